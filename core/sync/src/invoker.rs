//! One bidirectional sync attempt.

use chrono::Local;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::backend::{BisyncRequest, SyncBackend};
use crate::lock::LockFileManager;

/// Exit code classification of the sync executable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExitCode {
    /// 0: sync completed.
    Success,
    /// 1: transient failure, safe to retry.
    Retryable,
    /// 2: usage or configuration error.
    Usage,
    /// 7: internal state corrupted, may be recoverable by a resync.
    Critical,
    /// Anything else.
    Other(i32),
}

impl ExitCode {
    /// Classify a raw exit code.
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => ExitCode::Success,
            1 => ExitCode::Retryable,
            2 => ExitCode::Usage,
            7 => ExitCode::Critical,
            other => ExitCode::Other(other),
        }
    }

    /// Raw exit code.
    pub fn code(&self) -> i32 {
        match self {
            ExitCode::Success => 0,
            ExitCode::Retryable => 1,
            ExitCode::Usage => 2,
            ExitCode::Critical => 7,
            ExitCode::Other(code) => *code,
        }
    }
}

/// Outcome of one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempt {
    /// Ordinal of this attempt within the run (1-based).
    pub number: u32,
    /// Raw exit code.
    pub exit_code: i32,
    /// Log file the attempt wrote to.
    pub log_file: PathBuf,
    /// Whether this was a forced resync pass.
    pub resync: bool,
    /// Why the attempt could not be run or did not finish.
    pub launch_error: Option<String>,
}

impl Attempt {
    /// Classified exit code.
    pub fn exit(&self) -> ExitCode {
        ExitCode::from_code(self.exit_code)
    }
}

/// Runs single attempts against a backend, cleaning up its lock after each.
pub struct SyncInvoker<B: SyncBackend + ?Sized> {
    backend: Arc<B>,
    lock: LockFileManager,
    log_dir: PathBuf,
}

impl<B: SyncBackend + ?Sized> SyncInvoker<B> {
    /// Create an invoker writing attempt logs into `log_dir`.
    pub fn new(backend: Arc<B>, lock: LockFileManager, log_dir: impl Into<PathBuf>) -> Self {
        Self {
            backend,
            lock,
            log_dir: log_dir.into(),
        }
    }

    /// Directory attempt logs are written to.
    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Log file path for the given attempt, stamped with the current time.
    pub fn log_file_for(&self, number: u32) -> PathBuf {
        let stamp = Local::now().format("%Y%m%d-%H%M%S");
        self.log_dir
            .join(format!("sync-{}-a{:02}.log", stamp, number))
    }

    /// Run one attempt.
    ///
    /// Never fails: a launch error or timeout is reported as a retryable
    /// exit with the error attached. The backend lock is removed on every
    /// path out of this function.
    pub async fn run(&self, number: u32, resync: bool) -> Attempt {
        let log_file = self.log_file_for(number);

        if let Err(e) = tokio::fs::create_dir_all(&self.log_dir).await {
            warn!(
                "Failed to create log directory {}: {}",
                self.log_dir.display(),
                e
            );
        }

        info!(
            attempt = number,
            resync,
            backend = self.backend.name(),
            "Starting sync attempt"
        );

        let request = BisyncRequest {
            log_file: log_file.clone(),
            resync,
        };
        let outcome = self.backend.bisync(&request).await;

        self.lock.cleanup().await;

        let (exit_code, launch_error) = match outcome {
            Ok(code) => (code, None),
            Err(e) => {
                error!("Failed to run sync: {}", e);
                (ExitCode::Retryable.code(), Some(e.to_string()))
            }
        };

        info!(attempt = number, exit_code, "Sync attempt finished");

        Attempt {
            number,
            exit_code,
            log_file,
            resync,
            launch_error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use syncwarden_common::{Error, RelPath, RemoteSpec, Result};
    use tempfile::TempDir;

    use crate::backend::CopyDirection;
    use crate::memory::{MemoryBackend, ScriptedAttempt};

    struct UnlaunchableBackend;

    #[async_trait]
    impl SyncBackend for UnlaunchableBackend {
        fn name(&self) -> &str {
            "unlaunchable"
        }

        async fn bisync(&self, _request: &BisyncRequest) -> Result<i32> {
            Err(Error::Backend("No such file or directory".to_string()))
        }

        async fn remote_modified(&self, _path: &RelPath) -> Result<Option<DateTime<Utc>>> {
            Ok(None)
        }

        async fn copy_file(&self, _path: &RelPath, _direction: CopyDirection) -> Result<()> {
            Ok(())
        }
    }

    fn lock_in(dir: &Path) -> LockFileManager {
        let remote = RemoteSpec::new("onedrive:").unwrap();
        LockFileManager::new(dir, Path::new("/data/od"), &remote)
    }

    #[test]
    fn test_exit_code_taxonomy() {
        assert_eq!(ExitCode::from_code(0), ExitCode::Success);
        assert_eq!(ExitCode::from_code(1), ExitCode::Retryable);
        assert_eq!(ExitCode::from_code(2), ExitCode::Usage);
        assert_eq!(ExitCode::from_code(7), ExitCode::Critical);
        assert_eq!(ExitCode::from_code(9), ExitCode::Other(9));
        assert_eq!(ExitCode::Other(9).code(), 9);
    }

    #[tokio::test]
    async fn test_log_file_name_carries_attempt_number() {
        let temp = TempDir::new().unwrap();
        let invoker = SyncInvoker::new(
            Arc::new(MemoryBackend::new()),
            lock_in(temp.path()),
            temp.path().join("logs"),
        );

        let name = invoker.log_file_for(3);
        let name = name.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("sync-"));
        assert!(name.ends_with("-a03.log"));
    }

    #[tokio::test]
    async fn test_lock_removed_after_success_and_failure() {
        let temp = TempDir::new().unwrap();
        let lock = lock_in(temp.path());
        let backend = Arc::new(MemoryBackend::new());
        backend
            .push_attempt(ScriptedAttempt::new(0, ""))
            .push_attempt(ScriptedAttempt::new(7, "ERROR : Bisync critical error\n"));
        let invoker = SyncInvoker::new(backend, lock.clone(), temp.path().join("logs"));

        std::fs::write(lock.path(), "").unwrap();
        let first = invoker.run(1, false).await;
        assert_eq!(first.exit(), ExitCode::Success);
        assert!(!lock.path().exists());

        std::fs::write(lock.path(), "").unwrap();
        let second = invoker.run(2, false).await;
        assert_eq!(second.exit(), ExitCode::Critical);
        assert!(!lock.path().exists());
        assert!(second.log_file.exists());
    }

    #[tokio::test]
    async fn test_launch_error_is_retryable_and_cleans_lock() {
        let temp = TempDir::new().unwrap();
        let lock = lock_in(temp.path());
        let invoker = SyncInvoker::new(
            Arc::new(UnlaunchableBackend),
            lock.clone(),
            temp.path().join("logs"),
        );

        std::fs::write(lock.path(), "").unwrap();
        let attempt = invoker.run(1, false).await;

        assert_eq!(attempt.exit(), ExitCode::Retryable);
        assert!(attempt
            .launch_error
            .as_deref()
            .unwrap()
            .contains("No such file"));
        assert!(!lock.path().exists());
    }
}
