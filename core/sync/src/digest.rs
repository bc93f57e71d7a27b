//! Structured digest of one attempt's log.
//!
//! The log is read once, line by line. Each line gets at most one
//! classification; the patterns are tried in a fixed order and the first
//! match wins.

use regex::{Regex, RegexBuilder};
use serde::Serialize;
use std::collections::HashSet;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::debug;

use syncwarden_common::{Error, Result};

use crate::result::{FileIssue, IssueKind};

/// Maximum number of distinct error messages kept.
pub const MAX_ERRORS: usize = 30;
/// Maximum number of sample paths kept per change category.
pub const MAX_FILES_PER_CATEGORY: usize = 20;

/// Final verdict the backend printed, if any.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BisyncOutcome {
    #[default]
    Unknown,
    Success,
    Aborted,
    CriticalError,
    RetryableError,
}

/// Classification of one log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineClass {
    /// Deletions deliberately skipped after IO errors.
    ProtectiveSkip,
    /// File changed on both sides.
    Conflict(String),
    /// Transfer counter.
    TransferCount { done: u64, total: u64, percent: u32 },
    /// Total bytes of a completed transfer.
    TransferBytes(String),
    /// Timestamp or metadata update failed; content is intact.
    MetadataError,
    /// File failed with a transient error.
    TransientFailure { path: String, copy_failed: bool },
    /// File failed to copy.
    CopyFailure(String),
    /// Backend says the failure is retryable without a resync.
    RetryableWithoutResync,
    /// Backend gave up with a critical error.
    CriticalError,
    /// Final verdict line.
    Outcome(BisyncOutcome),
    /// Listings were restored from a prior backup.
    ListingsRecovered,
    /// Internal retry counter.
    RetryCounter(u32),
    CopiedNew(String),
    CopiedModified(String),
    Deleted(String),
    /// Any other error line.
    GenericError(String),
    Other,
}

/// Count plus a capped sample of affected paths.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FileChanges {
    pub count: usize,
    pub samples: Vec<String>,
}

impl FileChanges {
    fn record(&mut self, path: String) {
        self.count += 1;
        if self.samples.len() < MAX_FILES_PER_CATEGORY {
            self.samples.push(path);
        }
    }
}

/// Everything extracted from one log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LogDigest {
    /// Distinct error messages in order of first appearance.
    pub errors: Vec<String>,
    /// Paths reported as changed on both sides.
    pub conflicts: Vec<String>,
    pub new_files: FileChanges,
    pub modified_files: FileChanges,
    pub deleted_files: FileChanges,
    /// Last transfer counter seen as `(done, total)`.
    pub transferred: Option<(u64, u64)>,
    /// Last transfer counter reported every file transferred.
    pub transfer_complete: bool,
    pub bytes_transferred: Option<String>,
    pub metadata_errors: usize,
    /// Errors other than metadata updates and status lines.
    pub data_errors: usize,
    /// Files that failed with a transient error.
    pub transient_failures: Vec<String>,
    /// Files that failed to copy.
    pub copy_failures: Vec<String>,
    pub retryable_without_resync: bool,
    pub protective_skips: usize,
    pub outcome: BisyncOutcome,
    pub listings_recovered: bool,
    /// Highest internal retry counter seen.
    pub retry_count: u32,
    #[serde(skip)]
    seen_errors: HashSet<String>,
}

impl LogDigest {
    /// Whether the transfer finished and only metadata updates failed.
    pub fn metadata_only_failure(&self) -> bool {
        self.transfer_complete && self.metadata_errors > 0 && self.data_errors == 0
    }

    /// The digest as individual line-items.
    pub fn issues(&self) -> Vec<FileIssue> {
        let conflicts = self.conflicts.iter().map(|path| FileIssue {
            path: Some(path.clone()),
            kind: IssueKind::Conflict,
            message: format!("New or changed in both paths: {}", path),
        });
        let errors = self.errors.iter().map(|message| FileIssue {
            path: None,
            kind: IssueKind::Error,
            message: message.clone(),
        });
        let transient = self.transient_failures.iter().map(|path| FileIssue {
            path: Some(path.clone()),
            kind: IssueKind::Transient,
            message: format!("Transient failure: {}", path),
        });
        let copy = self.copy_failures.iter().map(|path| FileIssue {
            path: Some(path.clone()),
            kind: IssueKind::CopyFailure,
            message: format!("Failed to copy: {}", path),
        });

        conflicts.chain(errors).chain(transient).chain(copy).collect()
    }

    fn push_error(&mut self, message: &str) {
        if self.errors.len() >= MAX_ERRORS || self.seen_errors.contains(message) {
            return;
        }
        self.seen_errors.insert(message.to_string());
        self.errors.push(message.to_string());
    }

    fn push_unique(list: &mut Vec<String>, path: String) {
        if !path.is_empty() && !list.contains(&path) {
            list.push(path);
        }
    }
}

struct Patterns {
    protective_skip: Regex,
    conflict: Regex,
    transfer_count: Regex,
    transfer_bytes: Regex,
    metadata: Regex,
    transient: Regex,
    copy_failure: Regex,
    retryable_notice: Regex,
    critical: Regex,
    status: Regex,
    listings_recovered: Regex,
    retry_counter: Regex,
    copied_new: Regex,
    copied_modified: Regex,
    deleted: Regex,
    error: Regex,
}

fn compile(pattern: &str, case_insensitive: bool) -> Result<Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(case_insensitive)
        .build()
        .map_err(|e| Error::Parse(format!("Invalid log pattern {:?}: {}", pattern, e)))
}

impl Patterns {
    fn new() -> Result<Self> {
        Ok(Self {
            protective_skip: compile(
                r"not deleting (?:files|directories|files/directories) as there were IO errors",
                false,
            )?,
            conflict: compile(r"WARNING.*New or changed in both paths.*: (.+)", false)?,
            transfer_count: compile(r"Transferred:\s+(\d+)\s*/\s*(\d+),\s*(\d+)%", false)?,
            transfer_bytes: compile(
                r"Transferred:\s+[\d.]+\s+\S+\s*/\s*([\d.]+\s+\S+),\s*100%",
                false,
            )?,
            metadata: compile(
                r"Failed to update directory timestamp or metadata|error updating metadata|Failed to set modification time",
                false,
            )?,
            transient: compile(
                r"ERROR\s*:\s*(.+?):\s*(Couldn't move|Failed to copy|error copying).*(?:EOF|500|502|503|504|timeout|connection|invalidRequest|throttl|429|too many requests)",
                true,
            )?,
            copy_failure: compile(r"ERROR\s*:\s*(.+?):\s*Failed to copy", false)?,
            retryable_notice: compile(r"retryable without --resync", true)?,
            critical: compile(r"Bisync critical error", false)?,
            status: compile(r"Bisync (successful|aborted)", false)?,
            listings_recovered: compile(r"Listings not found\. Reverting to prior backup", false)?,
            retry_counter: compile(r"Retry (\d+)/\d+", false)?,
            copied_new: compile(r"INFO\s+:\s+(.+?):\s+Copied \(new\)", false)?,
            copied_modified: compile(r"INFO\s+:\s+(.+?):\s+Copied \(modified\)", false)?,
            deleted: compile(r"INFO\s+:\s+(.+?):\s+Deleted$", false)?,
            error: compile(r"ERROR\s*:\s*(.+)", false)?,
        })
    }
}

/// Streams attempt logs into [`LogDigest`]s.
pub struct LogDigestExtractor {
    patterns: Patterns,
}

impl LogDigestExtractor {
    /// Compile the pattern set.
    pub fn new() -> Result<Self> {
        Ok(Self {
            patterns: Patterns::new()?,
        })
    }

    /// Classify one line.
    pub fn classify(&self, line: &str) -> LineClass {
        let p = &self.patterns;
        let capture = |re: &Regex| {
            re.captures(line)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().trim().to_string())
        };

        if p.protective_skip.is_match(line) {
            return LineClass::ProtectiveSkip;
        }
        if let Some(path) = capture(&p.conflict) {
            return LineClass::Conflict(path);
        }
        if let Some(c) = p.transfer_count.captures(line) {
            let parse = |i: usize| c.get(i).and_then(|m| m.as_str().parse::<u64>().ok());
            if let (Some(done), Some(total), Some(percent)) = (parse(1), parse(2), parse(3)) {
                return LineClass::TransferCount {
                    done,
                    total,
                    percent: percent.min(100) as u32,
                };
            }
        }
        if let Some(bytes) = capture(&p.transfer_bytes) {
            return LineClass::TransferBytes(bytes);
        }
        if p.metadata.is_match(line) {
            return LineClass::MetadataError;
        }
        if let Some(c) = p.transient.captures(line) {
            let path = c.get(1).map(|m| m.as_str().trim().to_string()).unwrap_or_default();
            let copy_failed = c
                .get(2)
                .map(|m| m.as_str().eq_ignore_ascii_case("Failed to copy"))
                .unwrap_or(false);
            return LineClass::TransientFailure { path, copy_failed };
        }
        if let Some(path) = capture(&p.copy_failure) {
            return LineClass::CopyFailure(path);
        }
        if p.retryable_notice.is_match(line) {
            return LineClass::RetryableWithoutResync;
        }
        if p.critical.is_match(line) {
            return LineClass::CriticalError;
        }
        if let Some(c) = p.status.captures(line) {
            return match c.get(1).map(|m| m.as_str()) {
                Some("successful") => LineClass::Outcome(BisyncOutcome::Success),
                _ => LineClass::Outcome(BisyncOutcome::Aborted),
            };
        }
        if p.listings_recovered.is_match(line) {
            return LineClass::ListingsRecovered;
        }
        if let Some(n) = capture(&p.retry_counter).and_then(|n| n.parse().ok()) {
            return LineClass::RetryCounter(n);
        }
        if let Some(path) = capture(&p.copied_new) {
            return LineClass::CopiedNew(path);
        }
        if let Some(path) = capture(&p.copied_modified) {
            return LineClass::CopiedModified(path);
        }
        if let Some(path) = capture(&p.deleted) {
            return LineClass::Deleted(path);
        }
        if let Some(message) = capture(&p.error) {
            return LineClass::GenericError(message);
        }
        LineClass::Other
    }

    /// Fold one line into `digest`.
    pub fn record(&self, digest: &mut LogDigest, line: &str) {
        let line = line.trim_end();
        let class = self.classify(line);

        let error_text = self
            .patterns
            .error
            .captures(line)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string());

        match class {
            LineClass::ProtectiveSkip => {
                digest.protective_skips += 1;
                return;
            }
            LineClass::Conflict(path) => {
                LogDigest::push_unique(&mut digest.conflicts, path);
                return;
            }
            LineClass::TransferCount {
                done,
                total,
                percent,
            } => {
                digest.transferred = Some((done, total));
                digest.transfer_complete = percent == 100 && done == total && total > 0;
            }
            LineClass::TransferBytes(bytes) => digest.bytes_transferred = Some(bytes),
            LineClass::MetadataError => digest.metadata_errors += 1,
            LineClass::TransientFailure { path, copy_failed } => {
                digest.data_errors += 1;
                if copy_failed {
                    LogDigest::push_unique(&mut digest.copy_failures, path.clone());
                }
                LogDigest::push_unique(&mut digest.transient_failures, path);
            }
            LineClass::CopyFailure(path) => {
                digest.data_errors += 1;
                LogDigest::push_unique(&mut digest.copy_failures, path);
            }
            LineClass::RetryableWithoutResync => {
                digest.retryable_without_resync = true;
                digest.outcome = BisyncOutcome::RetryableError;
            }
            LineClass::CriticalError => digest.outcome = BisyncOutcome::CriticalError,
            LineClass::Outcome(outcome) => {
                if digest.outcome == BisyncOutcome::Unknown || outcome == BisyncOutcome::Success {
                    digest.outcome = outcome;
                }
            }
            LineClass::ListingsRecovered => digest.listings_recovered = true,
            LineClass::RetryCounter(n) => digest.retry_count = digest.retry_count.max(n),
            LineClass::CopiedNew(path) => digest.new_files.record(path),
            LineClass::CopiedModified(path) => digest.modified_files.record(path),
            LineClass::Deleted(path) => digest.deleted_files.record(path),
            LineClass::GenericError(message) => {
                if !message.contains("Failed to bisync") {
                    digest.data_errors += 1;
                }
            }
            LineClass::Other => {}
        }

        if let Some(message) = error_text {
            digest.push_error(&message);
        }
    }

    /// Digest an in-memory log.
    pub fn extract_str(&self, text: &str) -> LogDigest {
        let mut digest = LogDigest::default();
        for line in text.lines() {
            self.record(&mut digest, line);
        }
        digest
    }

    /// Digest a log from any buffered reader, one line at a time.
    ///
    /// Invalid UTF-8 is replaced rather than rejected.
    pub async fn extract_reader<R: AsyncBufRead + Unpin>(&self, mut reader: R) -> Result<LogDigest> {
        let mut digest = LogDigest::default();
        let mut buf = Vec::new();

        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf).await? == 0 {
                break;
            }
            let line = String::from_utf8_lossy(&buf);
            self.record(&mut digest, &line);
        }

        Ok(digest)
    }

    /// Digest a log file. A missing file yields an empty digest.
    pub async fn extract_file(&self, path: &Path) -> Result<LogDigest> {
        let file = match File::open(path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Log file {} not found, empty digest", path.display());
                return Ok(LogDigest::default());
            }
            Err(e) => return Err(e.into()),
        };
        self.extract_reader(BufReader::new(file)).await
    }
}
