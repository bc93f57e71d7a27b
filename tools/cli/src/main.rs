//! Syncwarden CLI - supervised bidirectional sync with conflict resolution.
//!
//! Runs one reconciliation of a local folder against a remote, retrying
//! and recovering from failures, then writes a JSON summary for
//! downstream tooling.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use syncwarden_common::RemoteSpec;
use syncwarden_sync::{
    spawn_interrupt_listener, Backoff, CancellationFlag, LockFileManager, RcloneBackend,
    RetryEscalationController, SyncConfig, SyncResultReporter,
};

/// Exit code for configuration problems found before any sync runs.
const EXIT_CONFIG: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum BackoffKind {
    /// Same delay before every retry.
    Fixed,
    /// Delay doubles per retry, capped at ten minutes.
    Exponential,
}

#[derive(Debug, Parser)]
#[command(name = "syncwarden")]
#[command(about = "Bidirectional sync with automatic recovery and conflict resolution")]
#[command(version)]
struct Cli {
    /// Local directory to sync.
    #[arg(long, default_value = "/Volumes/data_2/onedrive")]
    local: PathBuf,

    /// Remote to sync with.
    #[arg(long, default_value = "onedrive:")]
    remote: String,

    /// Filter rules file (default: ~/.config/rclone/bisync-filters.txt).
    #[arg(long)]
    filter: Option<PathBuf>,

    /// Directory for logs and the summary (default: ~/Library/Logs/rclone-onedrive).
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Number of attempt logs to keep.
    #[arg(long, default_value_t = 20)]
    max_logs: usize,

    /// Show what would be done without changing anything.
    #[arg(long)]
    dry_run: bool,

    /// Rebuild sync state from scratch.
    #[arg(long)]
    resync: bool,

    /// Maximum sync attempts (0 = unlimited).
    #[arg(long, default_value_t = 3)]
    max_retries: u32,

    /// Seconds to wait between attempts.
    #[arg(long, default_value_t = 30)]
    retry_delay: u64,

    /// How the delay between attempts grows.
    #[arg(long, value_enum, default_value_t = BackoffKind::Fixed)]
    backoff: BackoffKind,

    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Path to the rclone executable.
    #[arg(long, default_value = syncwarden_sync::config::DEFAULT_RCLONE_PATH)]
    rclone_path: PathBuf,

    /// Directory holding bisync lock files (default: rclone's cache dir).
    #[arg(long)]
    lock_dir: Option<PathBuf>,
}

impl Cli {
    /// Build the run configuration, filling home-relative defaults.
    fn into_config(self) -> Result<SyncConfig> {
        let home = dirs::home_dir().context("Could not determine home directory")?;
        let filter = self
            .filter
            .unwrap_or_else(|| home.join(".config/rclone/bisync-filters.txt"));
        let log_dir = self
            .log_dir
            .unwrap_or_else(|| home.join("Library/Logs/rclone-onedrive"));
        let remote = RemoteSpec::new(self.remote)?;

        let backoff = match self.backoff {
            BackoffKind::Fixed => Backoff::Fixed,
            BackoffKind::Exponential => Backoff::exponential(),
        };

        let mut config = SyncConfig::new(self.local, remote, filter, log_dir)
            .with_max_logs(self.max_logs)
            .with_dry_run(self.dry_run)
            .with_resync(self.resync)
            .with_verbose(self.verbose)
            .with_retries(self.max_retries, Duration::from_secs(self.retry_delay))
            .with_backoff(backoff)
            .with_rclone_path(self.rclone_path);
        if let Some(lock_dir) = self.lock_dir {
            config = config.with_lock_dir(lock_dir);
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Setup logging; RUST_LOG overrides the verbosity flag
    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = match cli.into_config() {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {:#}", e);
            return Ok(ExitCode::from(EXIT_CONFIG));
        }
    };
    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return Ok(ExitCode::from(EXIT_CONFIG));
    }

    info!("Local: {}", config.local_path.display());
    info!("Remote: {}", config.remote);
    info!("Filter file: {}", config.filter_file.display());
    debug!(
        "Configuration: {}",
        serde_json::to_string(&config).context("Failed to serialize configuration")?
    );

    let cancel = CancellationFlag::new();
    let listener = spawn_interrupt_listener(cancel.clone(), LockFileManager::from_config(&config));

    let backend = Arc::new(RcloneBackend::new(&config));
    let controller = RetryEscalationController::new(backend, config.clone(), cancel)
        .context("Failed to set up sync controller")?;
    let result = controller.run().await;

    SyncResultReporter::new(&config).persist(&result).await;
    listener.abort();

    if result.manual_intervention {
        error!("Some files could not be synced automatically, manual intervention needed");
    }

    Ok(ExitCode::from(u8::try_from(result.exit_code).unwrap_or(1)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_stock_setup() {
        let cli = Cli::parse_from(["syncwarden"]);
        assert_eq!(cli.remote, "onedrive:");
        assert_eq!(cli.max_logs, 20);
        assert_eq!(cli.max_retries, 3);
        assert_eq!(cli.retry_delay, 30);
        assert_eq!(cli.backoff, BackoffKind::Fixed);

        let config = cli.into_config().unwrap();
        assert!(config.filter_file.ends_with(".config/rclone/bisync-filters.txt"));
        assert!(config.log_dir.ends_with("Library/Logs/rclone-onedrive"));
        assert_eq!(config.retry_delay, Duration::from_secs(30));
        assert!(config.lock_dir.is_none());
    }

    #[test]
    fn test_flags_flow_into_config() {
        let cli = Cli::parse_from([
            "syncwarden",
            "--local",
            "/data",
            "--remote",
            "onedrive:Backup",
            "--max-retries",
            "0",
            "--retry-delay",
            "5",
            "--backoff",
            "exponential",
            "--dry-run",
            "--lock-dir",
            "/tmp/locks",
        ]);
        let config = cli.into_config().unwrap();

        assert_eq!(config.local_path, PathBuf::from("/data"));
        assert_eq!(config.remote.as_str(), "onedrive:Backup");
        assert_eq!(config.max_retries, 0);
        assert_eq!(config.backoff, Backoff::exponential());
        assert!(config.dry_run);
        assert_eq!(config.lock_dir, Some(PathBuf::from("/tmp/locks")));
    }

    #[test]
    fn test_blank_remote_is_rejected() {
        let cli = Cli::parse_from(["syncwarden", "--remote", " "]);
        assert!(cli.into_config().is_err());
    }
}
