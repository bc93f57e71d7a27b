//! Per-run outcome types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::digest::LogDigest;
use crate::invoker::Attempt;

/// Kind of a parsed log line-item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    /// File changed on both sides.
    Conflict,
    /// Error message.
    Error,
    /// File failed with a transient error.
    Transient,
    /// File failed to copy.
    CopyFailure,
}

/// One parsed log line-item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileIssue {
    /// Affected file, if the line names one.
    pub path: Option<String>,
    pub kind: IssueKind,
    pub message: String,
}

/// What was done about one conflict or failed file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionAction {
    KeptLocal,
    KeptRemote,
    KeptBoth,
    WouldKeepLocal,
    WouldKeepRemote,
    WouldKeepBoth,
    Pushed,
    Pulled,
    WouldPush,
    WouldPull,
    Skipped,
    Error,
}

impl ResolutionAction {
    /// Whether this outcome left the file in a synchronized state.
    pub fn is_success(&self) -> bool {
        !matches!(self, ResolutionAction::Error | ResolutionAction::Skipped)
    }

    /// Whether this is a completed single-file copy.
    pub fn is_copy(&self) -> bool {
        matches!(self, ResolutionAction::Pushed | ResolutionAction::Pulled)
    }

    /// Whether a conflict marker was settled (or would be, in a dry run).
    pub fn settles_marker(&self) -> bool {
        matches!(
            self,
            ResolutionAction::KeptLocal
                | ResolutionAction::KeptRemote
                | ResolutionAction::KeptBoth
                | ResolutionAction::WouldKeepLocal
                | ResolutionAction::WouldKeepRemote
                | ResolutionAction::WouldKeepBoth
        )
    }
}

impl fmt::Display for ResolutionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResolutionAction::KeptLocal => "kept_local",
            ResolutionAction::KeptRemote => "kept_remote",
            ResolutionAction::KeptBoth => "kept_both",
            ResolutionAction::WouldKeepLocal => "would_keep_local",
            ResolutionAction::WouldKeepRemote => "would_keep_remote",
            ResolutionAction::WouldKeepBoth => "would_keep_both",
            ResolutionAction::Pushed => "pushed",
            ResolutionAction::Pulled => "pulled",
            ResolutionAction::WouldPush => "would_push",
            ResolutionAction::WouldPull => "would_pull",
            ResolutionAction::Skipped => "skipped",
            ResolutionAction::Error => "error",
        };
        f.write_str(name)
    }
}

/// Outcome of resolving one conflict or retrying one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub path: String,
    pub action: ResolutionAction,
    pub message: String,
}

impl Resolution {
    /// Create a resolution record.
    pub fn new(
        path: impl Into<String>,
        action: ResolutionAction,
        message: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            action,
            message: message.into(),
        }
    }
}

/// Aggregate outcome of one reconciliation run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResult {
    /// Exit code of the last attempt.
    pub exit_code: i32,
    /// Paths the backend reported as changed on both sides.
    pub conflicts_found: Vec<String>,
    /// Conflict resolutions and follow-up reconciliations.
    pub conflicts_resolved: Vec<Resolution>,
    /// Deduplicated error messages.
    pub errors: Vec<String>,
    /// Outcomes of individual-file retries and direct copies.
    pub file_retries: Vec<Resolution>,
    /// Whole-sync attempts made, resync passes included.
    pub attempts: u32,
    /// Log of the last attempt.
    pub log_file: Option<PathBuf>,
    /// Automatic recovery gave up on some files.
    pub manual_intervention: bool,
}

impl SyncResult {
    /// Build the result of one attempt from its digest.
    pub fn from_attempt(attempt: &Attempt, digest: &LogDigest) -> Self {
        let mut result = Self {
            exit_code: attempt.exit_code,
            attempts: attempt.number,
            log_file: Some(attempt.log_file.clone()),
            ..Self::default()
        };

        for issue in digest.issues() {
            result.absorb(issue);
        }
        if let Some(launch_error) = &attempt.launch_error {
            result.push_error(launch_error.clone());
        }

        result
    }

    /// Record one parsed issue.
    pub fn absorb(&mut self, issue: FileIssue) {
        match issue.kind {
            IssueKind::Conflict => {
                if let Some(path) = issue.path {
                    if !self.conflicts_found.contains(&path) {
                        self.conflicts_found.push(path);
                    }
                }
            }
            IssueKind::Error => self.push_error(issue.message),
            IssueKind::Transient | IssueKind::CopyFailure => {}
        }
    }

    /// Fold in what earlier attempts of the same run recorded.
    ///
    /// Earlier resolutions and file retries come first, reported conflicts
    /// are merged without duplicates. Exit code, errors and log stay this
    /// attempt's own.
    pub fn carry_over(&mut self, earlier: SyncResult) {
        let SyncResult {
            mut conflicts_found,
            mut conflicts_resolved,
            mut file_retries,
            ..
        } = earlier;

        conflicts_resolved.append(&mut self.conflicts_resolved);
        self.conflicts_resolved = conflicts_resolved;
        file_retries.append(&mut self.file_retries);
        self.file_retries = file_retries;

        for path in self.conflicts_found.drain(..) {
            if !conflicts_found.contains(&path) {
                conflicts_found.push(path);
            }
        }
        self.conflicts_found = conflicts_found;
    }

    /// Reported conflicts not already settled through a marker.
    pub fn unsettled_conflicts(&self) -> Vec<String> {
        self.conflicts_found
            .iter()
            .filter(|path| {
                !self
                    .conflicts_resolved
                    .iter()
                    .any(|r| &r.path == *path && r.action.settles_marker())
            })
            .cloned()
            .collect()
    }

    /// Append an error message unless already present.
    pub fn push_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        if !self.errors.contains(&message) {
            self.errors.push(message);
        }
    }

    /// Whether the run ended successfully.
    pub fn is_success(&self) -> bool {
        self.exit_code == 0 && !self.manual_intervention
    }

    /// Direct-copy outcomes that failed.
    pub fn failed_retries(&self) -> impl Iterator<Item = &Resolution> {
        self.file_retries
            .iter()
            .filter(|r| r.action == ResolutionAction::Error)
    }
}
