//! Shared interrupt flag, polled between units of work.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::lock::LockFileManager;

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Cancellation flag shared by every component of one run.
///
/// Setting it never aborts work in flight: a running attempt or file copy
/// always completes, and the flag is observed before the next one starts.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag {
    inner: Arc<Inner>,
}

impl CancellationFlag {
    /// Create an unset flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Wait until cancellation is requested.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    /// Sleep for `delay`, waking early on cancellation.
    ///
    /// Returns `false` if the sleep was cut short.
    pub async fn sleep(&self, delay: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(delay) => !self.is_cancelled(),
            _ = self.cancelled() => false,
        }
    }
}

/// Set `flag` on the first Ctrl-C; exit immediately on the second.
///
/// The lock file is removed before exiting. A running rclone child sits in
/// its own process group and is left to finish its current transfer.
pub fn spawn_interrupt_listener(flag: CancellationFlag, lock: LockFileManager) -> JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        warn!("Interrupt received, finishing current operation...");
        flag.cancel();

        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Second interrupt received, exiting now");
            release_before_exit(&lock).await;
            std::process::exit(130);
        }
    })
}

/// Last cleanup before the process exits on a second interrupt.
async fn release_before_exit(lock: &LockFileManager) -> bool {
    lock.cleanup().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_is_shared_between_clones() {
        let flag = CancellationFlag::new();
        let clone = flag.clone();
        assert!(!clone.is_cancelled());

        flag.cancel();
        assert!(clone.is_cancelled());
    }

    #[tokio::test]
    async fn test_sleep_completes_when_not_cancelled() {
        let flag = CancellationFlag::new();
        assert!(flag.sleep(Duration::from_millis(5)).await);
    }

    #[tokio::test]
    async fn test_sleep_wakes_on_cancel() {
        let flag = CancellationFlag::new();
        let trigger = flag.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        assert!(!flag.sleep(Duration::from_secs(30)).await);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_second_interrupt_releases_lock() {
        let temp = tempfile::TempDir::new().unwrap();
        let remote = syncwarden_common::RemoteSpec::new("onedrive:").unwrap();
        let lock = LockFileManager::new(temp.path(), std::path::Path::new("/data"), &remote);
        std::fs::write(lock.path(), "pid").unwrap();

        assert!(release_before_exit(&lock).await);
        assert!(!lock.path().exists());
    }

    #[tokio::test]
    async fn test_cancelled_returns_immediately_when_already_set() {
        let flag = CancellationFlag::new();
        flag.cancel();
        flag.cancelled().await;
    }
}
