//! Sync backend trait definition.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use syncwarden_common::{RelPath, Result};

/// Direction of an explicit single-file copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CopyDirection {
    /// Local replica to remote replica.
    Push,
    /// Remote replica to local replica.
    Pull,
}

impl fmt::Display for CopyDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CopyDirection::Push => write!(f, "push"),
            CopyDirection::Pull => write!(f, "pull"),
        }
    }
}

/// One whole bidirectional sync attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BisyncRequest {
    /// File the backend writes its log to.
    pub log_file: PathBuf,
    /// Rebuild the backend's listings from scratch.
    pub resync: bool,
}

/// External bidirectional sync implementation.
///
/// Every call is a blocking unit of work from the controller's point of
/// view and carries its own deadline. Implementations report failures as
/// `Err` values; a timeout is `Error::Timeout`.
#[async_trait]
pub trait SyncBackend: Send + Sync {
    /// Get the backend name (e.g. "rclone", "memory").
    fn name(&self) -> &str;

    /// Run one bidirectional sync attempt.
    ///
    /// # Returns
    /// The raw process exit code.
    ///
    /// # Errors
    /// - The process could not be started
    /// - The attempt exceeded its deadline
    async fn bisync(&self, request: &BisyncRequest) -> Result<i32>;

    /// Query the remote modification time of one path, bypassing any cache.
    ///
    /// # Returns
    /// `None` if the path does not exist on the remote.
    async fn remote_modified(&self, path: &RelPath) -> Result<Option<DateTime<Utc>>>;

    /// Copy one file explicitly in the given direction.
    async fn copy_file(&self, path: &RelPath, direction: CopyDirection) -> Result<()>;
}
