//! Retry and recovery escalation around whole-sync attempts.
//!
//! Each failed attempt is classified from its exit code and log digest
//! into the next step: plain retry, a forced resync, targeted per-file
//! retries, a last-resort direct copy, or giving up.

use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use syncwarden_common::Result;

use crate::backend::SyncBackend;
use crate::cancel::CancellationFlag;
use crate::config::SyncConfig;
use crate::conflict::{ConflictResolver, FileReconciler};
use crate::digest::{LogDigest, LogDigestExtractor};
use crate::invoker::{ExitCode, SyncInvoker};
use crate::lock::LockFileManager;
use crate::result::{Resolution, ResolutionAction, SyncResult};
use crate::retry::RetryPolicy;

/// Why the controller stopped without success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GiveUpReason {
    /// The failure is not worth retrying.
    NonRetryable,
    /// Every allowed attempt was used.
    BudgetExhausted,
    /// The operator interrupted the run.
    Cancelled,
}

/// Step chosen after an attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextAction {
    /// The attempt succeeded.
    Succeed,
    /// Data is intact; rebuild the backend's state with one resync.
    RecoverViaResync,
    /// Retry these transiently failed files one by one.
    RetryIndividualFiles(Vec<String>),
    /// Stop, but first copy these failed files directly.
    DirectCopyFallback(Vec<String>),
    /// Run another whole attempt after `delay`.
    RetryPlain { delay: Duration },
    /// Stop and report the last result.
    GiveUp(GiveUpReason),
}

/// Decide what follows an attempt.
///
/// `attempts` counts attempts made so far, `in_resync` is set when every
/// attempt already runs as a forced resync.
pub fn decide(
    exit: ExitCode,
    digest: &LogDigest,
    attempts: u32,
    policy: &RetryPolicy,
    cancelled: bool,
    in_resync: bool,
) -> NextAction {
    if exit == ExitCode::Success {
        return NextAction::Succeed;
    }
    if cancelled {
        return NextAction::GiveUp(GiveUpReason::Cancelled);
    }

    if exit == ExitCode::Critical && !in_resync {
        if digest.metadata_only_failure() {
            return NextAction::RecoverViaResync;
        }
        if !digest.transient_failures.is_empty() {
            return NextAction::RetryIndividualFiles(digest.transient_failures.clone());
        }
    }

    let retryable = exit == ExitCode::Retryable
        || (exit == ExitCode::Critical && digest.retryable_without_resync);

    if !retryable {
        if digest.copy_failures.is_empty() {
            return NextAction::GiveUp(GiveUpReason::NonRetryable);
        }
        return NextAction::DirectCopyFallback(digest.copy_failures.clone());
    }

    if policy.is_exhausted(attempts) {
        return NextAction::GiveUp(GiveUpReason::BudgetExhausted);
    }

    NextAction::RetryPlain {
        delay: policy.delay_for_attempt(attempts),
    }
}

/// Drives attempts until success, a terminal failure, or cancellation.
pub struct RetryEscalationController<B: SyncBackend + ?Sized> {
    config: SyncConfig,
    policy: RetryPolicy,
    invoker: SyncInvoker<B>,
    extractor: LogDigestExtractor,
    resolver: ConflictResolver<B>,
    reconciler: FileReconciler<B>,
    cancel: CancellationFlag,
}

impl<B: SyncBackend + ?Sized> RetryEscalationController<B> {
    /// Wire up every component for one run.
    pub fn new(backend: Arc<B>, config: SyncConfig, cancel: CancellationFlag) -> Result<Self> {
        let lock = LockFileManager::from_config(&config);
        let invoker = SyncInvoker::new(backend.clone(), lock, config.log_dir.clone());
        let resolver = ConflictResolver::new(backend.clone(), &config, cancel.clone())?;
        let reconciler = FileReconciler::new(backend, &config, cancel.clone());

        Ok(Self {
            policy: config.retry_policy(),
            extractor: LogDigestExtractor::new()?,
            config,
            invoker,
            resolver,
            reconciler,
            cancel,
        })
    }

    /// Run to completion. Never fails; every problem ends up in the result.
    pub async fn run(&self) -> SyncResult {
        let mut attempts = 0;
        let mut earlier = SyncResult::default();

        loop {
            attempts += 1;
            if self.policy.is_unlimited() {
                info!("Sync attempt {} (unlimited retries)", attempts);
            } else {
                info!("Sync attempt {}/{}", attempts, self.policy.max_retries);
            }

            let (mut result, digest) = self.attempt(attempts, self.config.resync).await;
            result.carry_over(std::mem::take(&mut earlier));

            let action = decide(
                ExitCode::from_code(result.exit_code),
                &digest,
                attempts,
                &self.policy,
                self.cancel.is_cancelled(),
                self.config.resync,
            );

            match action {
                NextAction::Succeed => return self.finish(result).await,
                NextAction::RecoverViaResync => {
                    info!("Transfers completed successfully, only metadata errors occurred");
                    let mut recovered = self.recover_via_resync(attempts + 1).await;
                    recovered.carry_over(result);
                    return self.finish(recovered).await;
                }
                NextAction::RetryIndividualFiles(files) => {
                    info!(
                        "Found {} files that failed with transient errors, retrying individually",
                        files.len()
                    );
                    let retries = self.reconciler.sync_files(&files).await;
                    let failures = retries
                        .iter()
                        .filter(|r| r.action == ResolutionAction::Error)
                        .count();

                    if self.cancel.is_cancelled() {
                        warn!("Interrupted, stopping retries");
                        result.file_retries.extend(retries);
                        return self.finish(result).await;
                    }

                    if failures > 0 {
                        let message =
                            format!("{} file retries failed, manual intervention needed", failures);
                        error!("{}", message);
                        result.file_retries.extend(retries);
                        result.manual_intervention = true;
                        result.push_error(message);
                        return self.finish(result).await;
                    }

                    info!("All file retries succeeded, running resync to recover state");
                    result.file_retries.extend(retries);
                    let mut recovered = self.recover_via_resync(attempts + 1).await;
                    recovered.carry_over(result);
                    return self.finish(recovered).await;
                }
                NextAction::DirectCopyFallback(files) => {
                    error!("Non-retryable error, stopping");
                    result.file_retries.extend(self.direct_copy(&files).await);
                    return self.finish(result).await;
                }
                NextAction::RetryPlain { delay } => {
                    info!("Retrying in {} seconds...", delay.as_secs());
                    if !self.cancel.sleep(delay).await {
                        warn!("Interrupted, stopping retries");
                        return self.finish(result).await;
                    }
                    earlier = result;
                }
                NextAction::GiveUp(reason) => {
                    match reason {
                        GiveUpReason::NonRetryable => error!("Non-retryable error, stopping"),
                        GiveUpReason::BudgetExhausted => {
                            error!("Max retries ({}) reached, stopping", self.policy.max_retries)
                        }
                        GiveUpReason::Cancelled => warn!("Interrupted, stopping retries"),
                    }
                    return self.finish(result).await;
                }
            }
        }
    }

    /// One attempt plus its digest and, after exit 0 or 1, conflict resolution.
    async fn attempt(&self, number: u32, resync: bool) -> (SyncResult, LogDigest) {
        if resync {
            info!("RESYNC MODE - rebuilding sync state");
        }
        if self.config.dry_run {
            info!("DRY RUN MODE - no changes will be made");
        }

        let attempt = self.invoker.run(number, resync).await;

        let digest = match self.extractor.extract_file(&attempt.log_file).await {
            Ok(digest) => digest,
            Err(e) => {
                warn!("Failed to parse log file {}: {}", attempt.log_file.display(), e);
                LogDigest::default()
            }
        };

        if attempt.exit() == ExitCode::Critical {
            error!("Bisync state is corrupted, a resync is needed to recover");
        }

        let mut result = SyncResult::from_attempt(&attempt, &digest);

        if matches!(attempt.exit(), ExitCode::Success | ExitCode::Retryable) {
            result.conflicts_resolved = self.resolver.resolve_all().await;
        }

        info!(
            exit_code = result.exit_code,
            conflicts_found = result.conflicts_found.len(),
            conflicts_resolved = result.conflicts_resolved.len(),
            errors = result.errors.len(),
            "Attempt digested"
        );

        (result, digest)
    }

    /// One forced resync, then direct copies of whatever it failed to copy.
    async fn recover_via_resync(&self, number: u32) -> SyncResult {
        info!("Running resync to recover bisync state...");
        let (mut result, digest) = self.attempt(number, true).await;

        if !digest.copy_failures.is_empty() {
            result
                .file_retries
                .extend(self.direct_copy(&digest.copy_failures).await);
        }

        result
    }

    async fn direct_copy(&self, files: &[String]) -> Vec<Resolution> {
        if files.is_empty() {
            return Vec::new();
        }
        info!(
            "Found {} files that failed during bisync, retrying with direct copy...",
            files.len()
        );

        let resolutions = self.reconciler.sync_files(files).await;
        let successes = resolutions.iter().filter(|r| r.action.is_copy()).count();
        info!("Direct copy: {}/{} files succeeded", successes, files.len());
        resolutions
    }

    /// Reconcile reported conflicts once more and log the summary.
    ///
    /// Paths whose marker was already settled this run are left alone.
    async fn finish(&self, mut result: SyncResult) -> SyncResult {
        let exit = ExitCode::from_code(result.exit_code);
        let settled = matches!(exit, ExitCode::Success | ExitCode::Retryable);
        let pending = result.unsettled_conflicts();

        if settled && !pending.is_empty() && !self.cancel.is_cancelled() {
            info!("Reconciling {} files changed on both sides", pending.len());
            let followups = self.reconciler.sync_files(&pending).await;
            result.conflicts_resolved.extend(followups);
        }

        info!(
            exit_code = result.exit_code,
            attempts = result.attempts,
            conflicts_found = result.conflicts_found.len(),
            conflicts_resolved = result.conflicts_resolved.len(),
            file_retries = result.file_retries.len(),
            errors = result.errors.len(),
            "Sync completed"
        );
        if result.manual_intervention {
            warn!("Manual intervention needed, see {:?}", result.log_file);
        }

        result
    }
}
