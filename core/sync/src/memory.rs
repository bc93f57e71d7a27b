//! Scripted in-memory backend for testing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};

use syncwarden_common::{Error, RelPath, Result};

use crate::backend::{BisyncRequest, CopyDirection, SyncBackend};

/// One scripted bisync attempt: exit code plus the log text it leaves.
#[derive(Debug, Clone)]
pub struct ScriptedAttempt {
    pub exit_code: i32,
    pub log: String,
}

impl ScriptedAttempt {
    /// Attempt exiting with `exit_code` and writing `log`.
    pub fn new(exit_code: i32, log: impl Into<String>) -> Self {
        Self {
            exit_code,
            log: log.into(),
        }
    }
}

/// Calls observed by the backend, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    Bisync { resync: bool, log_file: PathBuf },
    RemoteModified(String),
    Copy(String, CopyDirection),
}

#[derive(Debug, Default)]
struct State {
    attempts: VecDeque<ScriptedAttempt>,
    remote_times: HashMap<String, DateTime<Utc>>,
    unreachable: HashSet<String>,
    failing_copies: HashSet<String>,
    calls: Vec<BackendCall>,
}

/// In-memory backend.
///
/// Replays scripted attempts in order; once the script runs out every
/// further attempt succeeds with an empty log. Remote modification times
/// are looked up in a table and copies are recorded, not performed.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<State>,
}

impl MemoryBackend {
    /// Create a backend with an empty script.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a scripted attempt.
    pub fn push_attempt(&self, attempt: ScriptedAttempt) -> &Self {
        self.state().attempts.push_back(attempt);
        self
    }

    /// Set the remote modification time of a path.
    pub fn set_remote_time(&self, path: &str, modified: DateTime<Utc>) -> &Self {
        self.state().remote_times.insert(path.to_string(), modified);
        self
    }

    /// Make metadata queries for a path fail.
    pub fn set_unreachable(&self, path: &str) -> &Self {
        self.state().unreachable.insert(path.to_string());
        self
    }

    /// Make copies of a path fail.
    pub fn fail_copies_of(&self, path: &str) -> &Self {
        self.state().failing_copies.insert(path.to_string());
        self
    }

    /// All calls made so far.
    pub fn calls(&self) -> Vec<BackendCall> {
        self.state().calls.clone()
    }

    /// Number of bisync attempts made so far.
    pub fn bisync_count(&self) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|c| matches!(c, BackendCall::Bisync { .. }))
            .count()
    }

    /// Resync flags of every bisync attempt, in order.
    pub fn resync_flags(&self) -> Vec<bool> {
        self.state()
            .calls
            .iter()
            .filter_map(|c| match c {
                BackendCall::Bisync { resync, .. } => Some(*resync),
                _ => None,
            })
            .collect()
    }

    /// Copies made so far.
    pub fn copies(&self) -> Vec<(String, CopyDirection)> {
        self.state()
            .calls
            .iter()
            .filter_map(|c| match c {
                BackendCall::Copy(path, direction) => Some((path.clone(), *direction)),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl SyncBackend for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    async fn bisync(&self, request: &BisyncRequest) -> Result<i32> {
        let attempt = {
            let mut state = self.state();
            state.calls.push(BackendCall::Bisync {
                resync: request.resync,
                log_file: request.log_file.clone(),
            });
            state
                .attempts
                .pop_front()
                .unwrap_or_else(|| ScriptedAttempt::new(0, ""))
        };

        tokio::fs::write(&request.log_file, attempt.log.as_bytes()).await?;
        Ok(attempt.exit_code)
    }

    async fn remote_modified(&self, path: &RelPath) -> Result<Option<DateTime<Utc>>> {
        let key = path.to_string();
        let mut state = self.state();
        state.calls.push(BackendCall::RemoteModified(key.clone()));

        if state.unreachable.contains(&key) {
            return Err(Error::Timeout(format!("lsjson {}", key)));
        }
        Ok(state.remote_times.get(&key).copied())
    }

    async fn copy_file(&self, path: &RelPath, direction: CopyDirection) -> Result<()> {
        let key = path.to_string();
        let mut state = self.state();
        state.calls.push(BackendCall::Copy(key.clone(), direction));

        if state.failing_copies.contains(&key) {
            return Err(Error::Backend(format!("copyto {}: unexpected EOF", key)));
        }
        Ok(())
    }
}
