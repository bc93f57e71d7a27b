//! rclone-backed implementation of [`SyncBackend`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use syncwarden_common::{Error, RelPath, RemoteSpec, Result};

use crate::backend::{BisyncRequest, CopyDirection, SyncBackend};
use crate::config::{SyncConfig, Timeouts};

/// rclone exit code for "directory not found".
const RCLONE_DIR_NOT_FOUND: i32 = 3;
/// rclone exit code for "file not found".
const RCLONE_FILE_NOT_FOUND: i32 = 4;

/// Flags passed to every bisync attempt.
const BISYNC_FLAGS: &[&str] = &[
    "--resilient",
    "--recover",
    "--check-access",
    "--metadata",
    "--retries",
    "3",
    "--retries-sleep",
    "10s",
    "--tpslimit",
    "4",
    "--transfers",
    "2",
    "--onedrive-chunk-size",
    "5M",
    "--low-level-retries",
    "10",
    "--conflict-resolve",
    "newer",
    "--conflict-loser",
    "num",
    "--max-lock",
    "30m",
    "--no-update-dir-modtime",
];

/// Drives the rclone executable as a subprocess.
pub struct RcloneBackend {
    rclone_path: PathBuf,
    local_path: PathBuf,
    remote: RemoteSpec,
    filter_file: PathBuf,
    verbose: bool,
    dry_run: bool,
    timeouts: Timeouts,
}

impl RcloneBackend {
    /// Create a backend from configuration.
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            rclone_path: config.rclone_path.clone(),
            local_path: config.local_path.clone(),
            remote: config.remote.clone(),
            filter_file: config.filter_file.clone(),
            verbose: config.verbose,
            dry_run: config.dry_run,
            timeouts: config.timeouts,
        }
    }

    /// Arguments for one bisync attempt, excluding the executable.
    pub fn bisync_args(&self, request: &BisyncRequest) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "bisync".into(),
            self.local_path.clone().into(),
            self.remote.as_str().into(),
        ];

        let mut filter = OsString::from("--filter-from=");
        filter.push(&self.filter_file);
        args.push(filter);

        let mut log_file = OsString::from("--log-file=");
        log_file.push(&request.log_file);
        args.push(log_file);

        args.extend(BISYNC_FLAGS.iter().map(OsString::from));
        args.push(if self.verbose { "-vv" } else { "-v" }.into());

        if request.resync {
            args.push("--resync".into());
        }
        if self.dry_run {
            args.push("--dry-run".into());
        }

        args
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.rclone_path);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Keep the terminal's Ctrl-C away from the child so an interrupt
        // never cuts a transfer in half.
        #[cfg(unix)]
        cmd.process_group(0);

        cmd
    }

    async fn run(&self, mut cmd: Command, limit: Duration, what: &str) -> Result<Output> {
        debug!("Running command: {:?}", cmd.as_std());
        match timeout(limit, cmd.output()).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(Error::Backend(format!("Failed to run rclone {}: {}", what, e))),
            Err(_) => Err(Error::Timeout(format!(
                "rclone {} did not finish within {:?}",
                what, limit
            ))),
        }
    }
}

#[async_trait]
impl SyncBackend for RcloneBackend {
    fn name(&self) -> &str {
        "rclone"
    }

    async fn bisync(&self, request: &BisyncRequest) -> Result<i32> {
        let mut cmd = self.command();
        cmd.args(self.bisync_args(request));

        let output = self.run(cmd, self.timeouts.attempt, "bisync").await?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            debug!(stderr = %stderr.trim(), "rclone bisync wrote to stderr");
        }

        // Terminated by a signal: no exit code, treat as a transient failure.
        Ok(output.status.code().unwrap_or(1))
    }

    async fn remote_modified(&self, path: &RelPath) -> Result<Option<DateTime<Utc>>> {
        let target = self.remote.join(path);
        let mut cmd = self.command();
        cmd.arg("lsjson").arg(&target);

        let output = self.run(cmd, self.timeouts.query, "lsjson").await?;

        match output.status.code() {
            Some(0) => parse_lsjson_mod_time(&output.stdout),
            Some(RCLONE_DIR_NOT_FOUND) | Some(RCLONE_FILE_NOT_FOUND) => Ok(None),
            code => Err(Error::Backend(format!(
                "lsjson {} exited with {:?}: {}",
                target,
                code,
                String::from_utf8_lossy(&output.stderr).trim()
            ))),
        }
    }

    async fn copy_file(&self, path: &RelPath, direction: CopyDirection) -> Result<()> {
        let local: OsString = path.to_local(&self.local_path).into_os_string();
        let remote: OsString = self.remote.join(path).into();

        let (source, destination) = match direction {
            CopyDirection::Push => (local, remote),
            CopyDirection::Pull => {
                if let Some(parent) = path.to_local(&self.local_path).parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                (remote, local)
            }
        };

        let mut cmd = self.command();
        cmd.arg("copyto").arg(source).arg(destination);

        let output = self.run(cmd, self.timeouts.copy, "copyto").await?;
        let stderr = String::from_utf8_lossy(&output.stderr);
        match output.status.code() {
            Some(0) => Ok(()),
            Some(RCLONE_DIR_NOT_FOUND) | Some(RCLONE_FILE_NOT_FOUND) => Err(Error::NotFound(
                format!("Source of {} {} not found: {}", direction, path, stderr.trim()),
            )),
            _ => Err(Error::Backend(format!(
                "Failed to {} {}: {}",
                direction,
                path,
                stderr.trim()
            ))),
        }
    }
}

/// One entry of `rclone lsjson` output.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct LsJsonEntry {
    mod_time: Option<String>,
}

/// Extract the modification time of the first entry of `lsjson` output.
///
/// An empty listing means the path does not exist.
pub fn parse_lsjson_mod_time(stdout: &[u8]) -> Result<Option<DateTime<Utc>>> {
    let entries: Vec<LsJsonEntry> = serde_json::from_slice(stdout)?;

    let Some(entry) = entries.into_iter().next() else {
        return Ok(None);
    };

    let raw = entry
        .mod_time
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::Parse("lsjson entry has no ModTime".to_string()))?;

    DateTime::parse_from_rfc3339(&raw)
        .map(|t| Some(t.with_timezone(&Utc)))
        .map_err(|e| Error::Parse(format!("Invalid ModTime {:?}: {}", raw, e)))
}
