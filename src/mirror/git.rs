use super::errors::GitError;
use crate::config::RemoteSpec;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Most commits `log` will ever return.
pub const MAX_LOG_LIMIT: usize = 100;
pub const DEFAULT_LOG_LIMIT: usize = 20;

/// Commit identity used for mirror commits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Author {
    pub name: String,
    pub email: String,
}

impl Default for Author {
    fn default() -> Self {
        Self {
            name: "Overleaf MCP".to_string(),
            email: "mcp@overleaf.local".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullOutcome {
    UpToDate,
    FastForwarded,
    /// Local commits the remote does not have, and the remote moved too.
    Diverged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    Pushed,
    /// The remote refused the update because it moved ahead.
    Rejected { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplayOutcome {
    /// The local commit was rebuilt on top of the new remote tip.
    Replayed { commit: String },
    /// Local and remote changes touch the same files.
    Conflict { paths: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitInfo {
    pub id: String,
    pub short_id: String,
    pub author: String,
    pub email: String,
    pub date: DateTime<Utc>,
    pub message: String,
}

impl CommitInfo {
    pub fn date_display(&self) -> String {
        self.date.format("%Y-%m-%d %H:%M").to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogQuery {
    pub limit: usize,
    /// Only commits that changed this file.
    pub path: Option<String>,
}

impl Default for LogQuery {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LOG_LIMIT,
            path: None,
        }
    }
}

impl LogQuery {
    pub fn effective_limit(&self) -> usize {
        self.limit.clamp(1, MAX_LOG_LIMIT)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffQuery {
    /// Base revision, `HEAD` when unset.
    pub from: Option<String>,
    /// Target revision; the working tree when unset.
    pub to: Option<String>,
    pub path: Option<String>,
}

/// Git operations the mirror store needs.
///
/// `dir` is always the mirror's working directory and `paths` are relative
/// to it with `/` separators.
pub trait GitClient: Send + Sync {
    /// Check that `dir` holds a usable working copy.
    fn verify(&self, dir: &Path) -> Result<(), GitError>;

    /// Clone `remote` into `dir`, which must not exist yet.
    fn clone_repo(&self, remote: &RemoteSpec, dir: &Path) -> Result<(), GitError>;

    fn pull(&self, remote: &RemoteSpec, dir: &Path) -> Result<PullOutcome, GitError>;

    /// Stage exactly `paths` and commit. `None` if the tree did not change.
    fn commit(
        &self,
        dir: &Path,
        paths: &[PathBuf],
        message: &str,
        author: &Author,
    ) -> Result<Option<String>, GitError>;

    fn push(&self, remote: &RemoteSpec, dir: &Path) -> Result<PushOutcome, GitError>;

    /// Fetch and rebuild the local commits on top of the remote tip.
    fn replay_onto_remote(&self, remote: &RemoteSpec, dir: &Path)
        -> Result<ReplayOutcome, GitError>;

    fn is_dirty(&self, dir: &Path) -> Result<bool, GitError>;

    fn log(&self, dir: &Path, query: &LogQuery) -> Result<Vec<CommitInfo>, GitError>;

    /// Unified diff text.
    fn diff(&self, dir: &Path, query: &DiffQuery) -> Result<String, GitError>;
}
