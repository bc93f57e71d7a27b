//! Persisted run summary and log retention.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::fs;
use tracing::{debug, info, warn};

use syncwarden_common::Result;

use crate::config::SyncConfig;
use crate::result::{Resolution, SyncResult};

/// File name of the summary inside the log directory.
pub const SUMMARY_FILENAME: &str = "last-sync-summary.json";

/// Immutable record of one run, as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncReport {
    pub timestamp: DateTime<Local>,
    pub exit_code: i32,
    pub conflicts_found: Vec<String>,
    pub conflicts_resolved: Vec<Resolution>,
    pub errors: Vec<String>,
    pub log_file: Option<String>,
    pub attempts: u32,
    pub file_retries: Vec<Resolution>,
    pub manual_intervention: bool,
}

impl SyncReport {
    /// Snapshot a result now.
    pub fn from_result(result: &SyncResult) -> Self {
        Self::at(result, Local::now())
    }

    /// Snapshot a result with an explicit timestamp.
    pub fn at(result: &SyncResult, timestamp: DateTime<Local>) -> Self {
        Self {
            timestamp,
            exit_code: result.exit_code,
            conflicts_found: result.conflicts_found.clone(),
            conflicts_resolved: result.conflicts_resolved.clone(),
            errors: result.errors.clone(),
            log_file: result
                .log_file
                .as_ref()
                .map(|p| p.display().to_string()),
            attempts: result.attempts,
            file_retries: result.file_retries.clone(),
            manual_intervention: result.manual_intervention,
        }
    }
}

/// Writes the summary file and prunes old attempt logs.
#[derive(Debug, Clone)]
pub struct SyncResultReporter {
    log_dir: PathBuf,
    max_logs: usize,
}

impl SyncResultReporter {
    /// Create a reporter for the configured log directory.
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            log_dir: config.log_dir.clone(),
            max_logs: config.max_logs,
        }
    }

    /// Path of the summary file.
    pub fn summary_path(&self) -> PathBuf {
        self.log_dir.join(SUMMARY_FILENAME)
    }

    /// Persist the summary, replacing any previous one atomically.
    pub async fn write_summary(&self, report: &SyncReport) -> Result<PathBuf> {
        fs::create_dir_all(&self.log_dir).await?;

        let path = self.summary_path();
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(report)?;

        fs::write(&tmp, json).await?;
        fs::rename(&tmp, &path).await?;

        debug!("Wrote summary to {}", path.display());
        Ok(path)
    }

    /// Delete the oldest `sync-*.log` files beyond the retention count.
    ///
    /// Returns how many files were deleted. Individual failures are logged.
    pub async fn rotate_logs(&self) -> Result<usize> {
        let mut logs: Vec<(SystemTime, PathBuf)> = Vec::new();

        let mut entries = match fs::read_dir(&self.log_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !is_attempt_log(&path) {
                continue;
            }
            let meta = entry.metadata().await?;
            if meta.is_file() {
                logs.push((meta.modified()?, path));
            }
        }

        logs.sort_by(|a, b| b.0.cmp(&a.0));

        let mut deleted = 0;
        for (_, old) in logs.into_iter().skip(self.max_logs) {
            match fs::remove_file(&old).await {
                Ok(()) => {
                    debug!("Deleted old log: {}", old.display());
                    deleted += 1;
                }
                Err(e) => warn!("Failed to delete old log {}: {}", old.display(), e),
            }
        }
        Ok(deleted)
    }

    /// Write the summary and rotate logs, logging rather than failing.
    pub async fn persist(&self, result: &SyncResult) -> Option<PathBuf> {
        let report = SyncReport::from_result(result);
        let written = match self.write_summary(&report).await {
            Ok(path) => {
                info!("Summary written to {}", path.display());
                Some(path)
            }
            Err(e) => {
                warn!("Failed to write summary: {}", e);
                None
            }
        };

        if let Err(e) = self.rotate_logs().await {
            warn!("Failed to rotate logs: {}", e);
        }
        written
    }
}

fn is_attempt_log(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with("sync-") && n.ends_with(".log"))
        .unwrap_or(false)
}
