//! Reconciliation configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::error;

use syncwarden_common::{Error, RemoteSpec, Result};

use crate::retry::{Backoff, RetryPolicy};

/// Default location of the rclone binary.
pub const DEFAULT_RCLONE_PATH: &str = "/opt/homebrew/bin/rclone";

/// Deadlines for the three kinds of external calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeouts {
    /// One whole bidirectional sync attempt.
    pub attempt: Duration,
    /// One single-path metadata query.
    pub query: Duration,
    /// One single-file copy.
    pub copy: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            attempt: Duration::from_secs(6 * 60 * 60),
            query: Duration::from_secs(60),
            copy: Duration::from_secs(300),
        }
    }
}

/// Configuration for one reconciliation run.
///
/// Built once at startup and shared read-only by every component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Local replica root.
    pub local_path: PathBuf,
    /// Remote replica identifier.
    pub remote: RemoteSpec,
    /// Filter rules handed to the backend.
    pub filter_file: PathBuf,
    /// Directory for attempt logs and the summary file.
    pub log_dir: PathBuf,
    /// Number of attempt logs to keep.
    pub max_logs: usize,
    /// Compare and report without mutating either replica.
    pub dry_run: bool,
    /// Ask the backend for debug-level logs.
    pub verbose: bool,
    /// Operator-forced resync on every attempt.
    pub resync: bool,
    /// Maximum whole-sync attempts (0 = unlimited).
    pub max_retries: u32,
    /// Delay between attempts.
    pub retry_delay: Duration,
    /// Delay growth between attempts.
    pub backoff: Backoff,
    /// Path to the sync executable.
    pub rclone_path: PathBuf,
    /// Directory holding the backend's lock files. Platform cache dir if unset.
    pub lock_dir: Option<PathBuf>,
    /// Per-call deadlines.
    pub timeouts: Timeouts,
}

impl SyncConfig {
    /// Create a configuration with the stock defaults.
    pub fn new(
        local_path: impl Into<PathBuf>,
        remote: RemoteSpec,
        filter_file: impl Into<PathBuf>,
        log_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            local_path: local_path.into(),
            remote,
            filter_file: filter_file.into(),
            log_dir: log_dir.into(),
            max_logs: 20,
            dry_run: false,
            verbose: false,
            resync: false,
            max_retries: 3,
            retry_delay: Duration::from_secs(30),
            backoff: Backoff::Fixed,
            rclone_path: PathBuf::from(DEFAULT_RCLONE_PATH),
            lock_dir: None,
            timeouts: Timeouts::default(),
        }
    }

    /// Set dry-run mode.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Set verbose backend logging.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Force a resync on every attempt.
    pub fn with_resync(mut self, resync: bool) -> Self {
        self.resync = resync;
        self
    }

    /// Set the retry budget and delay.
    pub fn with_retries(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_delay = retry_delay;
        self
    }

    /// Set the backoff shape.
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Set the log retention count.
    pub fn with_max_logs(mut self, max_logs: usize) -> Self {
        self.max_logs = max_logs;
        self
    }

    /// Set the sync executable path.
    pub fn with_rclone_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.rclone_path = path.into();
        self
    }

    /// Override the lock directory.
    pub fn with_lock_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.lock_dir = Some(dir.into());
        self
    }

    /// Set per-call deadlines.
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Retry policy derived from this configuration.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries)
            .with_delay(self.retry_delay)
            .with_backoff(self.backoff)
    }

    /// Path of the persisted run summary.
    pub fn summary_path(&self) -> PathBuf {
        self.log_dir.join(crate::report::SUMMARY_FILENAME)
    }

    /// Validate the configuration before touching any files.
    ///
    /// # Errors
    /// - `Error::Config` listing every problem found
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        if !self.local_path.is_dir() {
            problems.push(format!(
                "Local path does not exist: {}",
                self.local_path.display()
            ));
        }

        if !self.filter_file.is_file() {
            problems.push(format!(
                "Filter file does not exist: {}",
                self.filter_file.display()
            ));
        }

        if !self.rclone_path.is_file() {
            problems.push(format!(
                "rclone not found at: {}",
                self.rclone_path.display()
            ));
        }

        if self.max_logs == 0 {
            problems.push("Log retention must keep at least one log".to_string());
        }

        if problems.is_empty() {
            return Ok(());
        }

        for problem in &problems {
            error!("{}", problem);
        }
        Err(Error::Config(problems.join("; ")))
    }
}
