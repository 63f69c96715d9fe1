//! Operation-level error taxonomy.
//!
//! Every public operation of the store returns [`StoreError`]. Module-level
//! errors ([`SafetyError`], [`EditError`], [`GitError`], ...) are mapped into
//! a specific kind here so callers can decide whether to retry, re-sync or
//! hand the failure to a human.

use crate::edit::EditError;
use crate::mirror::{GitError, SyncError};
use crate::safety::SafetyError;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("path '{path}' escapes the project root")]
    PathTraversal { path: String },

    #[error("{0}")]
    NotFound(NotFound),

    #[error("file '{path}' already exists")]
    AlreadyExists { path: String },

    #[error("text to replace was not found in '{path}'")]
    NoMatch { path: String },

    #[error("text to replace occurs {count} times in '{path}', expected exactly 1")]
    AmbiguousMatch { path: String, count: usize },

    #[error("unknown project '{name}' (available: {})", available.join(", "))]
    UnknownProject { name: String, available: Vec<String> },

    #[error("sync failed: {0}")]
    Sync(#[from] SyncError),

    #[error("push rejected: {reason}")]
    PushRejected { reason: String },

    #[error("mirror at {path} is corrupt: {message}")]
    CorruptMirror { path: PathBuf, message: String },

    #[error("invalid edit: {reason}")]
    InvalidIntent { reason: String },

    #[error("mirror of '{project}' has uncommitted changes")]
    DirtyWorkingTree { project: String },

    #[error("'{path}' is not valid UTF-8 text")]
    NotText { path: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("git error: {message}")]
    Git { message: String },
}

/// What a `NotFound` failure refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotFound {
    File {
        path: String,
    },
    Section {
        path: String,
        title: String,
        available: Vec<String>,
        suggestion: Option<String>,
    },
}

impl fmt::Display for NotFound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotFound::File { path } => write!(f, "file '{}' not found", path),
            NotFound::Section {
                path,
                title,
                available,
                suggestion,
            } => {
                write!(f, "section '{}' not found in '{}'", title, path)?;
                if let Some(suggestion) = suggestion {
                    write!(f, " (did you mean '{}'?)", suggestion)?;
                }
                if !available.is_empty() {
                    let quoted: Vec<String> =
                        available.iter().map(|t| format!("'{}'", t)).collect();
                    write!(f, "; available sections: {}", quoted.join(", "))?;
                }
                Ok(())
            }
        }
    }
}

impl StoreError {
    pub(crate) fn file_not_found(path: impl Into<String>) -> Self {
        StoreError::NotFound(NotFound::File { path: path.into() })
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the same operation may succeed if simply retried later.
    ///
    /// Only transport failures qualify. Divergence needs a re-sync, and
    /// everything else needs a different request or a human.
    pub fn is_retriable(&self) -> bool {
        matches!(self, StoreError::Sync(SyncError::NetworkError { .. }))
    }

    /// Stable machine-readable name of the failure kind.
    pub fn kind(&self) -> &'static str {
        match self {
            StoreError::PathTraversal { .. } => "path_traversal",
            StoreError::NotFound(_) => "not_found",
            StoreError::AlreadyExists { .. } => "already_exists",
            StoreError::NoMatch { .. } => "no_match",
            StoreError::AmbiguousMatch { .. } => "ambiguous_match",
            StoreError::UnknownProject { .. } => "unknown_project",
            StoreError::Sync(SyncError::DivergedHistory) => "diverged_history",
            StoreError::Sync(SyncError::AuthFailure { .. }) => "auth_failure",
            StoreError::Sync(SyncError::NetworkError { .. }) => "network_error",
            StoreError::PushRejected { .. } => "push_rejected",
            StoreError::CorruptMirror { .. } => "corrupt_mirror",
            StoreError::InvalidIntent { .. } => "invalid_intent",
            StoreError::DirtyWorkingTree { .. } => "dirty_working_tree",
            StoreError::NotText { .. } => "not_text",
            StoreError::Io { .. } => "io",
            StoreError::Git { .. } => "git",
        }
    }
}

impl From<SafetyError> for StoreError {
    fn from(e: SafetyError) -> Self {
        match e {
            SafetyError::PathTraversal { path, .. } | SafetyError::ForbiddenPath { path, .. } => {
                StoreError::PathTraversal { path }
            }
            SafetyError::EmptyPath => StoreError::InvalidIntent {
                reason: "path must name a file inside the project".to_string(),
            },
            SafetyError::Io { path, source } => StoreError::Io { path, source },
        }
    }
}

impl From<EditError> for StoreError {
    fn from(e: EditError) -> Self {
        match e {
            EditError::Io { path, source } => StoreError::Io { path, source },
            EditError::Utf8 { file } => StoreError::NotText {
                path: file.display().to_string(),
            },
            other => StoreError::InvalidIntent {
                reason: other.to_string(),
            },
        }
    }
}

impl From<GitError> for StoreError {
    fn from(e: GitError) -> Self {
        match e {
            GitError::Sync(sync) => StoreError::Sync(sync),
            GitError::PushRejected { reason } => StoreError::PushRejected { reason },
            GitError::Corrupt { path, message } => StoreError::CorruptMirror { path, message },
            GitError::Io { path, source } => StoreError::Io { path, source },
            GitError::Other { message } => StoreError::Git { message },
        }
    }
}
