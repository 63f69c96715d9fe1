use git2::{ErrorClass, ErrorCode};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Failures talking to the remote.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("local and remote history have diverged")]
    DivergedHistory,

    #[error("authentication failed: {message}")]
    AuthFailure { message: String },

    #[error("network error: {message}")]
    NetworkError { message: String },
}

#[derive(Error, Debug)]
pub enum GitError {
    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error("push rejected: {reason}")]
    PushRejected { reason: String },

    #[error("repository at {} is unusable: {message}", path.display())]
    Corrupt { path: PathBuf, message: String },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{message}")]
    Other { message: String },
}

impl GitError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        GitError::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this failure means the mirror on disk can no longer be trusted.
    pub fn is_corruption(&self) -> bool {
        matches!(self, GitError::Corrupt { .. })
    }
}

/// Map a libgit2 error onto the failure kinds callers act on.
///
/// `repo` is the working copy the operation ran against and `context` a
/// short description of the step that failed.
pub fn classify(err: git2::Error, repo: &Path, context: &str) -> GitError {
    let message = format!("{context}: {}", err.message());

    match err.code() {
        ErrorCode::Auth => return SyncError::AuthFailure { message }.into(),
        ErrorCode::NotFastForward => return GitError::PushRejected { reason: message },
        ErrorCode::Certificate => return SyncError::NetworkError { message }.into(),
        // A stale lock file is recoverable without deleting the mirror.
        ErrorCode::Locked => return GitError::Other { message },
        _ => {}
    }

    match err.class() {
        ErrorClass::Http if looks_like_auth(err.message()) => {
            SyncError::AuthFailure { message }.into()
        }
        ErrorClass::Net | ErrorClass::Ssl | ErrorClass::Ssh | ErrorClass::Http => {
            SyncError::NetworkError { message }.into()
        }
        ErrorClass::Os | ErrorClass::Filesystem => GitError::Io {
            path: repo.to_path_buf(),
            source: std::io::Error::other(message),
        },
        // Only unreadable objects condemn the mirror; opening it is checked
        // separately.
        ErrorClass::Odb | ErrorClass::Zlib => GitError::Corrupt {
            path: repo.to_path_buf(),
            message,
        },
        _ => GitError::Other { message },
    }
}

fn looks_like_auth(message: &str) -> bool {
    let lowered = message.to_lowercase();
    lowered.contains("401")
        || lowered.contains("403")
        || lowered.contains("auth")
        || lowered.contains("credentials")
}
