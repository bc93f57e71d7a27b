//! Cleanup of the backend's per-pair lock file.
//!
//! rclone bisync refuses to start while a lock file for the same replica
//! pair exists. A crashed or killed attempt leaves that file behind, so it
//! is removed after every attempt regardless of outcome.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

use syncwarden_common::RemoteSpec;

use crate::config::SyncConfig;

/// Lock directory below the platform cache directory.
const BISYNC_CACHE_SUBDIR: [&str; 2] = ["rclone", "bisync"];

/// Locates and removes the lock file for one replica pair.
#[derive(Debug, Clone)]
pub struct LockFileManager {
    lock_path: PathBuf,
}

impl LockFileManager {
    /// Create a manager for the pair, with lock files kept in `lock_dir`.
    pub fn new(lock_dir: impl AsRef<Path>, local: &Path, remote: &RemoteSpec) -> Self {
        Self {
            lock_path: lock_dir.as_ref().join(lock_file_name(local, remote)),
        }
    }

    /// Create a manager from configuration.
    ///
    /// Uses the configured lock directory, else the directory rclone uses
    /// on this platform.
    pub fn from_config(config: &SyncConfig) -> Self {
        let lock_dir = config.lock_dir.clone().unwrap_or_else(default_lock_dir);
        Self::new(lock_dir, &config.local_path, &config.remote)
    }

    /// Full path of the lock file.
    pub fn path(&self) -> &Path {
        &self.lock_path
    }

    /// Delete the lock file if present.
    ///
    /// Returns `true` if a file was removed. Failures are logged and
    /// swallowed; a leftover lock is reported but never fatal.
    pub async fn cleanup(&self) -> bool {
        match fs::remove_file(&self.lock_path).await {
            Ok(()) => {
                debug!("Cleaned up lock file: {}", self.lock_path.display());
                true
            }
            Err(e) if e.kind() == ErrorKind::NotFound => false,
            Err(e) => {
                warn!(
                    "Failed to delete lock file {}: {}",
                    self.lock_path.display(),
                    e
                );
                false
            }
        }
    }
}

/// Platform cache directory rclone keeps bisync state in.
pub fn default_lock_dir() -> PathBuf {
    let mut dir = dirs::cache_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join(".cache")))
        .unwrap_or_else(std::env::temp_dir);
    for part in BISYNC_CACHE_SUBDIR {
        dir.push(part);
    }
    dir
}

/// Lock file name rclone derives for a replica pair:
/// `{local}..{remote}_.lck`.
///
/// The local path has `/` replaced by `_` with leading underscores dropped.
/// The remote has trailing `:` dropped, then `:` and `/` replaced by `_`.
pub fn lock_file_name(local: &Path, remote: &RemoteSpec) -> String {
    let local = local.to_string_lossy().replace('/', "_");
    let local = local.trim_start_matches('_');

    let remote = remote
        .as_str()
        .trim_end_matches(':')
        .replace([':', '/'], "_");

    format!("{}..{}_.lck", local, remote)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_lock_file_name_for_root_remote() {
        let remote = RemoteSpec::new("onedrive:").unwrap();
        let name = lock_file_name(Path::new("/Volumes/data_2/onedrive"), &remote);
        assert_eq!(name, "Volumes_data_2_onedrive..onedrive_.lck");
    }

    #[test]
    fn test_lock_file_name_for_remote_subfolder() {
        let remote = RemoteSpec::new("onedrive:Backup/Photos").unwrap();
        let name = lock_file_name(Path::new("/home/me/photos"), &remote);
        assert_eq!(name, "home_me_photos..onedrive_Backup_Photos_.lck");
    }

    #[test]
    fn test_default_lock_dir_ends_in_bisync() {
        let dir = default_lock_dir();
        assert!(dir.ends_with("rclone/bisync"));
    }

    #[tokio::test]
    async fn test_cleanup_removes_existing_lock() {
        let temp = TempDir::new().unwrap();
        let remote = RemoteSpec::new("onedrive:").unwrap();
        let manager = LockFileManager::new(temp.path(), Path::new("/data/od"), &remote);

        std::fs::write(manager.path(), "pid 4242").unwrap();
        assert!(manager.cleanup().await);
        assert!(!manager.path().exists());
    }

    #[tokio::test]
    async fn test_cleanup_without_lock_is_noop() {
        let temp = TempDir::new().unwrap();
        let remote = RemoteSpec::new("onedrive:").unwrap();
        let manager = LockFileManager::new(temp.path(), Path::new("/data/od"), &remote);

        assert!(!manager.cleanup().await);
    }
}
