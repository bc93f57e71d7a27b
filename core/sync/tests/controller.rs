//! End-to-end escalation scenarios against the scripted backend.

use chrono::{DateTime, TimeZone, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

use syncwarden_common::RemoteSpec;
use syncwarden_sync::{
    CancellationFlag, CopyDirection, LockFileManager, MemoryBackend, ResolutionAction,
    RetryEscalationController, ScriptedAttempt, SyncConfig, SyncResult,
};

const METADATA_ONLY_LOG: &str = "\
2026/02/27 01:00:01 INFO  : Documents/file1.txt: Copied (new)
2026/02/27 01:00:03 ERROR : Documents: Failed to update directory timestamp or metadata: invalidRequest
2026/02/27 01:00:04 ERROR : Bisync critical error: bisync aborted
Transferred:          312 / 312, 100%
";

struct Harness {
    temp: TempDir,
    backend: Arc<MemoryBackend>,
    cancel: CancellationFlag,
}

impl Harness {
    fn new() -> Self {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("root")).unwrap();
        std::fs::create_dir_all(temp.path().join("locks")).unwrap();
        Self {
            temp,
            backend: Arc::new(MemoryBackend::new()),
            cancel: CancellationFlag::new(),
        }
    }

    fn root(&self) -> PathBuf {
        self.temp.path().join("root")
    }

    fn config(&self, max_retries: u32) -> SyncConfig {
        SyncConfig::new(
            self.root(),
            RemoteSpec::new("onedrive:").unwrap(),
            self.temp.path().join("filters.txt"),
            self.temp.path().join("logs"),
        )
        .with_retries(max_retries, Duration::ZERO)
        .with_lock_dir(self.temp.path().join("locks"))
    }

    fn script(&self, exit_code: i32, log: &str) -> &Self {
        self.backend.push_attempt(ScriptedAttempt::new(exit_code, log));
        self
    }

    fn write(&self, rel: &str, content: &str, modified: DateTime<Utc>) -> PathBuf {
        let path = self.root().join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, content).unwrap();
        let file = std::fs::File::options().write(true).open(&path).unwrap();
        file.set_modified(SystemTime::from(modified)).unwrap();
        path
    }

    async fn run(&self, config: SyncConfig) -> SyncResult {
        RetryEscalationController::new(self.backend.clone(), config, self.cancel.clone())
            .unwrap()
            .run()
            .await
    }
}

fn at(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 2, 27, hour, 0, 0).unwrap()
}

fn lock_path(config: &SyncConfig) -> PathBuf {
    LockFileManager::from_config(config).path().to_path_buf()
}

fn exists(path: &Path) -> bool {
    path.exists()
}

#[tokio::test]
async fn test_clean_sync_succeeds_first_time() {
    let h = Harness::new();
    h.script(0, "2026/02/27 01:00:00 INFO  : Bisync successful\n");

    let config = h.config(3);
    std::fs::write(lock_path(&config), "stale").unwrap();

    let result = h.run(config.clone()).await;

    assert_eq!(result.exit_code, 0);
    assert_eq!(result.attempts, 1);
    assert!(result.is_success());
    assert_eq!(h.backend.bisync_count(), 1);
    assert!(!exists(&lock_path(&config)));
    assert!(exists(result.log_file.as_ref().unwrap()));
}

#[tokio::test]
async fn test_metadata_only_critical_runs_exactly_one_resync() {
    let h = Harness::new();
    h.script(7, METADATA_ONLY_LOG).script(0, "Bisync successful\n");

    let result = h.run(h.config(3)).await;

    assert_eq!(h.backend.resync_flags(), vec![false, true]);
    assert_eq!(result.exit_code, 0);
    assert_eq!(result.attempts, 2);
}

#[tokio::test]
async fn test_resync_copy_failures_get_direct_copy() {
    let h = Harness::new();
    h.write("Docs/stuck.pdf", "local", at(12));
    h.script(7, METADATA_ONLY_LOG)
        .script(0, "ERROR : Docs/stuck.pdf: Failed to copy: file is locked\n");

    let result = h.run(h.config(3)).await;

    assert_eq!(h.backend.bisync_count(), 2);
    assert_eq!(result.file_retries.len(), 1);
    assert_eq!(result.file_retries[0].action, ResolutionAction::Pushed);
    assert_eq!(
        h.backend.copies(),
        vec![("Docs/stuck.pdf".to_string(), CopyDirection::Push)]
    );
}

#[tokio::test]
async fn test_retryable_failures_stop_after_budget() {
    let h = Harness::new();
    for _ in 0..5 {
        h.script(1, "ERROR : connection reset by peer\n");
    }

    let config = h.config(3);
    let result = h.run(config.clone()).await;

    assert_eq!(h.backend.bisync_count(), 3);
    assert_eq!(result.attempts, 3);
    assert_eq!(result.exit_code, 1);
    assert_eq!(result.errors, vec!["connection reset by peer"]);
    assert!(!exists(&lock_path(&config)));
}

#[tokio::test]
async fn test_unlimited_budget_runs_until_success() {
    let h = Harness::new();
    for _ in 0..4 {
        h.script(1, "");
    }
    h.script(0, "");

    let result = h.run(h.config(0)).await;

    assert_eq!(h.backend.bisync_count(), 5);
    assert_eq!(result.exit_code, 0);
    assert_eq!(result.attempts, 5);
}

#[tokio::test]
async fn test_transient_files_retried_then_resynced() {
    let h = Harness::new();
    h.backend.set_remote_time("Photos/a.jpg", at(10));
    h.script(
        7,
        "ERROR : Photos/a.jpg: Couldn't move: unexpected EOF\nERROR : Bisync critical error\n",
    );

    let result = h.run(h.config(3)).await;

    assert_eq!(h.backend.resync_flags(), vec![false, true]);
    assert_eq!(result.exit_code, 0);
    assert!(!result.manual_intervention);
    assert_eq!(result.file_retries[0].path, "Photos/a.jpg");
    assert_eq!(result.file_retries[0].action, ResolutionAction::Pulled);
}

#[tokio::test]
async fn test_failed_file_retry_needs_manual_intervention() {
    let h = Harness::new();
    h.write("Photos/a.jpg", "local", at(12));
    h.backend
        .set_remote_time("Photos/a.jpg", at(10))
        .fail_copies_of("Photos/a.jpg");
    h.script(
        7,
        "ERROR : Photos/a.jpg: Failed to copy: 503 Service Unavailable\nERROR : Bisync critical error\n",
    );

    let result = h.run(h.config(3)).await;

    assert_eq!(h.backend.bisync_count(), 1);
    assert_eq!(result.exit_code, 7);
    assert!(result.manual_intervention);
    assert!(!result.is_success());
    assert!(result
        .errors
        .contains(&"1 file retries failed, manual intervention needed".to_string()));
}

#[tokio::test]
async fn test_non_retryable_failure_tries_direct_copy_once() {
    let h = Harness::new();
    h.write("big.iso", "local", at(12));
    h.script(2, "ERROR : big.iso: Failed to copy: quota exceeded\n");

    let result = h.run(h.config(3)).await;

    assert_eq!(h.backend.bisync_count(), 1);
    assert_eq!(result.exit_code, 2);
    assert_eq!(result.file_retries.len(), 1);
    assert_eq!(result.file_retries[0].action, ResolutionAction::Pushed);
}

#[tokio::test]
async fn test_conflict_markers_resolved_after_success() {
    let h = Harness::new();
    let original = h.write("notes.md", "local", at(9));
    let marker = h.write("notes.md.conflict1", "remote", at(9));
    h.backend.set_remote_time("notes.md", at(11));
    h.script(0, "");

    let result = h.run(h.config(3)).await;

    assert_eq!(result.conflicts_resolved.len(), 1);
    assert_eq!(result.conflicts_resolved[0].action, ResolutionAction::KeptRemote);
    assert!(!marker.exists());
    assert_eq!(std::fs::read_to_string(original).unwrap(), "remote");
}

#[tokio::test]
async fn test_resolutions_from_retried_attempts_are_kept() {
    let h = Harness::new();
    let original = h.write("notes.md", "local", at(9));
    let marker = h.write("notes.md.conflict1", "remote", at(9));
    h.backend.set_remote_time("notes.md", at(11));
    h.script(1, "ERROR : connection reset by peer\n").script(0, "");

    let result = h.run(h.config(3)).await;

    assert_eq!(result.exit_code, 0);
    assert_eq!(result.attempts, 2);
    assert!(!marker.exists());
    assert_eq!(std::fs::read_to_string(original).unwrap(), "remote");
    assert_eq!(result.conflicts_resolved.len(), 1);
    assert_eq!(result.conflicts_resolved[0].path, "notes.md");
    assert_eq!(result.conflicts_resolved[0].action, ResolutionAction::KeptRemote);
}

#[tokio::test]
async fn test_kept_both_is_not_undone_by_followup() {
    let h = Harness::new();
    h.write("a.txt", "local", at(10));
    h.write("a.txt.conflict1", "remote", at(10));
    h.backend.set_remote_time("a.txt", at(10));
    h.script(
        0,
        "2026/02/27 01:00:06 NOTICE: WARNING  New or changed in both paths: a.txt\n",
    );

    let result = h.run(h.config(3)).await;

    let actions: Vec<_> = result
        .conflicts_resolved
        .iter()
        .map(|r| (r.path.as_str(), r.action))
        .collect();
    assert_eq!(actions, vec![("a.txt", ResolutionAction::KeptBoth)]);
    assert!(h.backend.copies().is_empty());
    assert!(!h.root().join("a.txt").exists());
    assert_eq!(std::fs::read_dir(h.root()).unwrap().count(), 2);
}

#[tokio::test]
async fn test_reported_conflicts_reconciled_at_the_end() {
    let h = Harness::new();
    h.write("Notes/todo.md", "local", at(12));
    h.backend.set_remote_time("Notes/todo.md", at(10));
    h.script(
        0,
        "2026/02/27 01:00:06 NOTICE: WARNING  New or changed in both paths: Notes/todo.md\n",
    );

    let result = h.run(h.config(3)).await;

    assert_eq!(result.conflicts_found, vec!["Notes/todo.md"]);
    assert_eq!(result.conflicts_resolved.len(), 1);
    assert_eq!(result.conflicts_resolved[0].action, ResolutionAction::Pushed);
}

#[tokio::test]
async fn test_dry_run_reports_without_copying() {
    let h = Harness::new();
    h.write("a.txt", "local", at(12));
    h.write("a.txt.conflict1", "remote", at(12));
    h.backend.set_remote_time("a.txt", at(10));
    h.script(0, "");

    let result = h.run(h.config(3).with_dry_run(true)).await;

    assert_eq!(
        result.conflicts_resolved[0].action,
        ResolutionAction::WouldKeepLocal
    );
    assert!(h.root().join("a.txt.conflict1").exists());
    assert!(h.backend.copies().is_empty());
}

#[tokio::test]
async fn test_cancellation_stops_after_current_attempt() {
    let h = Harness::new();
    h.script(1, "").script(1, "").script(0, "");
    h.cancel.cancel();

    let result = h.run(h.config(0)).await;

    assert_eq!(h.backend.bisync_count(), 1);
    assert_eq!(result.exit_code, 1);
}

#[tokio::test]
async fn test_operator_resync_applies_to_every_attempt() {
    let h = Harness::new();
    h.script(7, METADATA_ONLY_LOG);

    let result = h.run(h.config(3).with_resync(true)).await;

    assert_eq!(h.backend.resync_flags(), vec![true]);
    assert_eq!(result.exit_code, 7);
}
