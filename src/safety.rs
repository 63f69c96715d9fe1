use std::fs;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Sandbox check for caller-supplied paths inside a project mirror.
///
/// Every filesystem read or write the store performs goes through
/// [`PathGuard::resolve`] first.
#[derive(Debug, Clone)]
pub struct PathGuard {
    /// Canonical path to the mirror root
    root: PathBuf,
    /// Canonical paths that must never be touched, even though they are under the root
    forbidden_paths: Vec<PathBuf>,
}

#[derive(Error, Debug)]
pub enum SafetyError {
    #[error("path '{path}' escapes root {}", root.display())]
    PathTraversal { path: String, root: PathBuf },

    #[error("path '{path}' is inside forbidden directory {}", forbidden.display())]
    ForbiddenPath { path: String, forbidden: PathBuf },

    #[error("empty path")]
    EmptyPath,

    #[error("failed to resolve {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Resolve `user_path` against `root`, failing if the result leaves `root`.
pub fn resolve(root: impl AsRef<Path>, user_path: impl AsRef<Path>) -> Result<PathBuf, SafetyError> {
    PathGuard::new(root)?.resolve(user_path)
}

impl PathGuard {
    /// Create a guard for the given root.
    ///
    /// The root is canonicalized so symlinked roots compare correctly. The
    /// repository metadata directory is always forbidden.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, SafetyError> {
        let root = root.as_ref();
        let root = root.canonicalize().map_err(|source| SafetyError::Io {
            path: root.to_path_buf(),
            source,
        })?;

        let forbidden_paths = vec![root.join(".git")];

        Ok(Self {
            root,
            forbidden_paths,
        })
    }

    /// Resolve a caller-supplied path to an absolute path under the root.
    ///
    /// The target does not need to exist. The deepest existing ancestor is
    /// canonicalized (so symlinks pointing outside are caught) and the
    /// remaining components are applied lexically.
    pub fn resolve(&self, user_path: impl AsRef<Path>) -> Result<PathBuf, SafetyError> {
        let user_path = user_path.as_ref();
        if user_path.as_os_str().is_empty() {
            return Err(SafetyError::EmptyPath);
        }

        let joined = if user_path.is_absolute() {
            user_path.to_path_buf()
        } else {
            self.root.join(user_path)
        };

        let (existing, remainder) = split_existing(&joined);
        let mut resolved = match existing {
            Some(existing) => existing.canonicalize().map_err(|source| SafetyError::Io {
                path: existing.to_path_buf(),
                source,
            })?,
            None => {
                return Err(self.traversal(user_path));
            }
        };

        for component in remainder.components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::ParentDir => {
                    if !resolved.pop() {
                        return Err(self.traversal(user_path));
                    }
                }
                Component::CurDir => {}
                Component::RootDir | Component::Prefix(_) => {
                    return Err(self.traversal(user_path));
                }
            }
        }

        self.check_resolved(user_path, &resolved)?;
        Ok(resolved)
    }

    /// Path of `absolute` relative to the root, for staging in the index.
    pub fn relative(&self, absolute: &Path) -> Result<PathBuf, SafetyError> {
        absolute
            .strip_prefix(&self.root)
            .map(Path::to_path_buf)
            .map_err(|_| SafetyError::PathTraversal {
                path: absolute.display().to_string(),
                root: self.root.clone(),
            })
    }

    fn check_resolved(&self, user_path: &Path, resolved: &Path) -> Result<(), SafetyError> {
        if !resolved.starts_with(&self.root) || resolved == self.root {
            return Err(self.traversal(user_path));
        }

        for forbidden in &self.forbidden_paths {
            if resolved.starts_with(forbidden) {
                return Err(SafetyError::ForbiddenPath {
                    path: user_path.display().to_string(),
                    forbidden: forbidden.clone(),
                });
            }
        }

        Ok(())
    }

    fn traversal(&self, user_path: &Path) -> SafetyError {
        SafetyError::PathTraversal {
            path: user_path.display().to_string(),
            root: self.root.clone(),
        }
    }

    /// Get the canonical root.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Split `path` into its deepest existing ancestor and the remainder below it.
///
/// Dangling symlinks count as existing so that canonicalization rejects them.
fn split_existing(path: &Path) -> (Option<&Path>, PathBuf) {
    for ancestor in path.ancestors() {
        if fs::symlink_metadata(ancestor).is_ok() {
            let remainder = path
                .strip_prefix(ancestor)
                .map(Path::to_path_buf)
                .unwrap_or_default();
            return (Some(ancestor), remainder);
        }
    }
    (None, path.to_path_buf())
}
