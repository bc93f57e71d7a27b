//! Resolution of conflict markers left behind by the backend.
//!
//! When both replicas changed a file the backend keeps one version under
//! the original name and the other as `<name>.conflict<N>`. Markers are
//! resolved by comparing the local modification time with a fresh remote
//! query, never with anything cached.

use chrono::{DateTime, Local, Utc};
use regex::Regex;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, error, info, warn};

use syncwarden_common::{Error, RelPath, Result};

use crate::backend::{CopyDirection, SyncBackend};
use crate::cancel::CancellationFlag;
use crate::config::SyncConfig;
use crate::result::{Resolution, ResolutionAction};

/// File-name pattern of a conflict marker.
const MARKER_PATTERN: &str = r"^(.+)\.conflict\d+$";

/// Local modification time of a file, `None` if it does not exist.
pub async fn local_modified(path: &Path) -> io::Result<Option<DateTime<Utc>>> {
    match fs::metadata(path).await {
        Ok(meta) if meta.is_file() => Ok(Some(DateTime::<Utc>::from(meta.modified()?))),
        Ok(_) => Ok(None),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Which side a comparison favours.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Newer {
    Local,
    Remote,
    Neither,
}

fn compare(local: DateTime<Utc>, remote: DateTime<Utc>) -> Newer {
    if local > remote {
        Newer::Local
    } else if remote > local {
        Newer::Remote
    } else {
        Newer::Neither
    }
}

/// Copies single files toward whichever side is newer.
pub struct FileReconciler<B: SyncBackend + ?Sized> {
    backend: Arc<B>,
    local_root: PathBuf,
    dry_run: bool,
    cancel: CancellationFlag,
}

impl<B: SyncBackend + ?Sized> FileReconciler<B> {
    /// Create a reconciler for the configured replica pair.
    pub fn new(backend: Arc<B>, config: &SyncConfig, cancel: CancellationFlag) -> Self {
        Self {
            backend,
            local_root: config.local_path.clone(),
            dry_run: config.dry_run,
            cancel,
        }
    }

    /// Bring one file in line on both sides.
    ///
    /// Local newer or remote absent pushes, remote newer or local absent
    /// pulls. Equal times and files missing on both sides are skipped. If
    /// the remote cannot be queried nothing is copied.
    pub async fn sync_file(&self, path: &RelPath) -> Resolution {
        let shown = path.to_string();

        let remote = match self.backend.remote_modified(path).await {
            Ok(remote) => remote,
            Err(e) => {
                warn!("Could not get remote mtime for {}: {}", shown, e);
                return Resolution::new(
                    shown,
                    ResolutionAction::Error,
                    format!("Could not get remote modification time: {}", e),
                );
            }
        };

        let local = match local_modified(&path.to_local(&self.local_root)).await {
            Ok(local) => local,
            Err(e) => {
                return Resolution::new(
                    shown,
                    ResolutionAction::Error,
                    format!("Could not read local file: {}", e),
                )
            }
        };

        let direction = match (local, remote) {
            (Some(l), Some(r)) => match compare(l, r) {
                Newer::Local => CopyDirection::Push,
                Newer::Remote => CopyDirection::Pull,
                Newer::Neither => {
                    return Resolution::new(
                        shown,
                        ResolutionAction::Skipped,
                        "Files have equal timestamps",
                    )
                }
            },
            (Some(_), None) => CopyDirection::Push,
            (None, Some(_)) => CopyDirection::Pull,
            (None, None) => {
                return Resolution::new(
                    shown,
                    ResolutionAction::Skipped,
                    "File not found on either side",
                )
            }
        };

        self.copy(path, direction).await
    }

    async fn copy(&self, path: &RelPath, direction: CopyDirection) -> Resolution {
        let shown = path.to_string();

        if self.dry_run {
            return match direction {
                CopyDirection::Push => Resolution::new(
                    shown,
                    ResolutionAction::WouldPush,
                    "Would copy to remote (local is newer)",
                ),
                CopyDirection::Pull => Resolution::new(
                    shown,
                    ResolutionAction::WouldPull,
                    "Would copy from remote (remote is newer)",
                ),
            };
        }

        match (self.backend.copy_file(path, direction).await, direction) {
            (Ok(()), CopyDirection::Push) => Resolution::new(
                shown,
                ResolutionAction::Pushed,
                "Copied to remote (local is newer)",
            ),
            (Ok(()), CopyDirection::Pull) => Resolution::new(
                shown,
                ResolutionAction::Pulled,
                "Copied from remote (remote is newer)",
            ),
            (Err(e), _) => {
                warn!(transient = e.is_transient(), "Copy of {} failed: {}", shown, e);
                Resolution::new(shown, ResolutionAction::Error, e.to_string())
            }
        }
    }

    /// Reconcile a list of paths as reported in a log, one at a time.
    ///
    /// Stops early on cancellation; files not reached get no entry.
    pub async fn sync_files(&self, paths: &[String]) -> Vec<Resolution> {
        let mut resolutions = Vec::with_capacity(paths.len());

        for raw in paths {
            if self.cancel.is_cancelled() {
                warn!("Interrupt detected, stopping file retries");
                break;
            }

            let resolution = match RelPath::parse(raw) {
                Ok(path) => {
                    info!("Retrying file: {}", path);
                    self.sync_file(&path).await
                }
                Err(e) => Resolution::new(raw.as_str(), ResolutionAction::Error, e.to_string()),
            };

            if resolution.action == ResolutionAction::Error {
                warn!("Retry failed for {}: {}", resolution.path, resolution.message);
            } else {
                info!("Retry result for {}: {}", resolution.path, resolution.action);
            }
            resolutions.push(resolution);
        }

        resolutions
    }
}

/// Finds and resolves conflict markers under the local root.
pub struct ConflictResolver<B: SyncBackend + ?Sized> {
    backend: Arc<B>,
    local_root: PathBuf,
    dry_run: bool,
    cancel: CancellationFlag,
    marker: Regex,
}

impl<B: SyncBackend + ?Sized> ConflictResolver<B> {
    /// Create a resolver for the configured replica pair.
    pub fn new(backend: Arc<B>, config: &SyncConfig, cancel: CancellationFlag) -> Result<Self> {
        let marker = Regex::new(MARKER_PATTERN)
            .map_err(|e| Error::Parse(format!("Invalid marker pattern: {}", e)))?;

        Ok(Self {
            backend,
            local_root: config.local_path.clone(),
            dry_run: config.dry_run,
            cancel,
            marker,
        })
    }

    /// Original file a marker belongs to, if `marker` is one.
    pub fn original_for(&self, marker: &Path) -> Option<PathBuf> {
        let name = marker.file_name()?.to_str()?;
        let original = self.marker.captures(name)?.get(1)?.as_str();
        Some(marker.with_file_name(original))
    }

    /// All conflict markers below the local root, sorted.
    pub async fn find_markers(&self) -> Result<Vec<PathBuf>> {
        let mut markers = Vec::new();
        let mut pending = vec![self.local_root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if dir != self.local_root => {
                    warn!("Skipping unreadable directory {}: {}", dir.display(), e);
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            while let Some(entry) = entries.next_entry().await? {
                let file_type = entry.file_type().await?;
                let path = entry.path();
                if file_type.is_dir() {
                    pending.push(path);
                } else if file_type.is_file() && self.original_for(&path).is_some() {
                    markers.push(path);
                }
            }
        }

        markers.sort();
        Ok(markers)
    }

    /// Resolve every marker found. Polls cancellation between files.
    pub async fn resolve_all(&self) -> Vec<Resolution> {
        let markers = match self.find_markers().await {
            Ok(markers) => markers,
            Err(e) => {
                error!("Failed to scan for conflict files: {}", e);
                return vec![Resolution::new(
                    self.local_root.display().to_string(),
                    ResolutionAction::Error,
                    format!("Failed to scan for conflict files: {}", e),
                )];
            }
        };

        if markers.is_empty() {
            debug!("No conflict files found");
            return Vec::new();
        }
        info!("Found {} conflict files", markers.len());

        let mut resolutions = Vec::with_capacity(markers.len());
        for marker in markers {
            if self.cancel.is_cancelled() {
                warn!("Interrupt detected, stopping conflict resolution");
                break;
            }
            let resolution = self.resolve_marker(&marker).await;
            info!("Resolved conflict: {} -> {}", resolution.path, resolution.action);
            resolutions.push(resolution);
        }
        resolutions
    }

    /// Resolve one marker file.
    pub async fn resolve_marker(&self, marker: &Path) -> Resolution {
        let Some(original) = self.original_for(marker) else {
            return Resolution::new(
                marker.display().to_string(),
                ResolutionAction::Skipped,
                "Not a conflict file",
            );
        };

        let rel = match RelPath::from_local(&self.local_root, &original) {
            Ok(rel) => rel,
            Err(e) => {
                return Resolution::new(
                    original.display().to_string(),
                    ResolutionAction::Error,
                    e.to_string(),
                )
            }
        };
        let shown = rel.to_string();

        let local = match local_modified(&original).await {
            Ok(Some(local)) => local,
            Ok(None) => {
                warn!("Original file not found for conflict: {}", original.display());
                return Resolution::new(
                    shown,
                    ResolutionAction::Skipped,
                    "Original file not found",
                );
            }
            Err(e) => return Resolution::new(shown, ResolutionAction::Error, e.to_string()),
        };

        let remote = match self.backend.remote_modified(&rel).await {
            Ok(Some(remote)) => remote,
            Ok(None) => {
                warn!("File {} not found on remote, skipping", shown);
                return Resolution::new(
                    shown,
                    ResolutionAction::Skipped,
                    "Remote file not found",
                );
            }
            Err(e) => {
                warn!("Could not get remote mtime for {}, skipping: {}", shown, e);
                return Resolution::new(
                    shown,
                    ResolutionAction::Skipped,
                    format!("Could not get remote modification time: {}", e),
                );
            }
        };

        let newer = compare(local, remote);
        if self.dry_run {
            return dry_run_resolution(shown, newer, local, remote);
        }

        let outcome = match newer {
            Newer::Local => self.keep_local(&rel, marker, local, remote).await,
            Newer::Remote => keep_remote(&original, marker, local, remote).await,
            Newer::Neither => keep_both(&original, marker).await,
        };

        match outcome {
            Ok((action, message)) => Resolution::new(shown, action, message),
            Err(e) => {
                error!("Failed to resolve conflict {}: {}", marker.display(), e);
                Resolution::new(shown, ResolutionAction::Error, e.to_string())
            }
        }
    }

    /// Push local content, then drop the marker. A failed push deletes nothing.
    async fn keep_local(
        &self,
        rel: &RelPath,
        marker: &Path,
        local: DateTime<Utc>,
        remote: DateTime<Utc>,
    ) -> Result<(ResolutionAction, String)> {
        self.backend.copy_file(rel, CopyDirection::Push).await?;
        fs::remove_file(marker).await?;
        Ok((
            ResolutionAction::KeptLocal,
            format!(
                "Local is newer, pushed to remote ({} > {})",
                local.to_rfc3339(),
                remote.to_rfc3339()
            ),
        ))
    }
}

fn dry_run_resolution(
    shown: String,
    newer: Newer,
    local: DateTime<Utc>,
    remote: DateTime<Utc>,
) -> Resolution {
    match newer {
        Newer::Local => Resolution::new(
            shown,
            ResolutionAction::WouldKeepLocal,
            format!(
                "Local is newer ({} > {})",
                local.to_rfc3339(),
                remote.to_rfc3339()
            ),
        ),
        Newer::Remote => Resolution::new(
            shown,
            ResolutionAction::WouldKeepRemote,
            format!(
                "Remote is newer ({} > {})",
                remote.to_rfc3339(),
                local.to_rfc3339()
            ),
        ),
        Newer::Neither => Resolution::new(
            shown,
            ResolutionAction::WouldKeepBoth,
            "Timestamps equal, would keep both files",
        ),
    }
}

/// Move the marker (remote content) over the original.
async fn keep_remote(
    original: &Path,
    marker: &Path,
    local: DateTime<Utc>,
    remote: DateTime<Utc>,
) -> Result<(ResolutionAction, String)> {
    fs::rename(marker, original).await?;
    Ok((
        ResolutionAction::KeptRemote,
        format!(
            "Remote is newer, replaced local ({} > {})",
            remote.to_rfc3339(),
            local.to_rfc3339()
        ),
    ))
}

/// Rename both versions to dated names, never overwriting anything.
async fn keep_both(original: &Path, marker: &Path) -> Result<(ResolutionAction, String)> {
    let date = Local::now().format("%Y%m%d").to_string();
    let local_target = disambiguated(original, "local", &date).await?;
    let remote_target = disambiguated(original, "remote", &date).await?;
    rename_pair((original, &local_target), (marker, &remote_target)).await?;

    Ok((
        ResolutionAction::KeptBoth,
        format!(
            "Timestamps equal, renamed to {} and {}",
            file_name(&local_target),
            file_name(&remote_target)
        ),
    ))
}

/// Two renames as one step. The first is undone if the second fails.
async fn rename_pair(first: (&Path, &Path), second: (&Path, &Path)) -> Result<()> {
    fs::rename(first.0, first.1).await?;
    if let Err(e) = fs::rename(second.0, second.1).await {
        if let Err(undo) = fs::rename(first.1, first.0).await {
            error!("Failed to restore {}: {}", first.0.display(), undo);
        }
        return Err(e.into());
    }
    Ok(())
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// `<stem>.<side>-<date><ext>`, with `-N` before the extension if taken.
async fn disambiguated(original: &Path, side: &str, date: &str) -> Result<PathBuf> {
    let stem = original
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = original
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    let mut candidate = original.with_file_name(format!("{}.{}-{}{}", stem, side, date, ext));
    let mut n = 1u32;
    while fs::try_exists(&candidate).await? {
        candidate = original.with_file_name(format!("{}.{}-{}-{}{}", stem, side, date, n, ext));
        n += 1;
    }
    Ok(candidate)
}
