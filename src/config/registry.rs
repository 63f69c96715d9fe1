use super::loader::ConfigError;
use super::schema::RegistryConfig;
use crate::error::StoreError;
use crate::mirror::Author;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

pub const DEFAULT_REMOTE_BASE: &str = "https://git.overleaf.com";
pub const DEFAULT_GIT_USERNAME: &str = "git";
pub const DEFAULT_MIRROR_ROOT: &str = "./overleaf_cache";

/// Username and secret for the remote.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub username: String,
    secret: String,
}

impl Credential {
    pub fn new(username: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            secret: secret.into(),
        }
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("secret", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSpec {
    pub url: String,
    pub credential: Option<Credential>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Project {
    /// Registry key; also the mirror directory name.
    pub name: String,
    pub display_name: String,
    pub remote: RemoteSpec,
    pub mirror_path: PathBuf,
}

/// Immutable set of known projects, built once at startup.
#[derive(Debug, Clone)]
pub struct ProjectRegistry {
    projects: BTreeMap<String, Project>,
    default_project: Option<String>,
    author: Author,
    mirror_root: PathBuf,
}

impl ProjectRegistry {
    pub fn from_config(config: RegistryConfig) -> Result<Self, ConfigError> {
        config
            .validate()
            .map_err(|source| ConfigError::Validation { path: None, source })?;

        let mirror_root = expand_tilde(
            config
                .mirror_root
                .unwrap_or_else(|| PathBuf::from(DEFAULT_MIRROR_ROOT)),
        );

        let fallback = Author::default();
        let author = match config.author {
            Some(a) => Author {
                name: a.name.unwrap_or(fallback.name),
                email: a.email.unwrap_or(fallback.email),
            },
            None => fallback,
        };

        let projects: BTreeMap<String, Project> = config
            .projects
            .into_iter()
            .map(|(key, p)| {
                let url = match (p.remote, p.project_id) {
                    (Some(remote), _) if !remote.trim().is_empty() => remote.trim().to_string(),
                    (_, Some(id)) => format!("{DEFAULT_REMOTE_BASE}/{}", id.trim()),
                    // Unreachable after validation.
                    (_, None) => String::new(),
                };
                let credential = p.token.map(|token| {
                    Credential::new(
                        p.username
                            .unwrap_or_else(|| DEFAULT_GIT_USERNAME.to_string()),
                        token,
                    )
                });
                let project = Project {
                    display_name: p.name.unwrap_or_else(|| key.clone()),
                    mirror_path: mirror_root.join(&key),
                    remote: RemoteSpec { url, credential },
                    name: key.clone(),
                };
                (key, project)
            })
            .collect();

        // A lone project is the default even when not named as such.
        let default_project = config.default_project.or_else(|| {
            if projects.len() == 1 {
                projects.keys().next().cloned()
            } else {
                None
            }
        });

        Ok(Self {
            projects,
            default_project,
            author,
            mirror_root,
        })
    }

    pub fn resolve(&self, name: &str) -> Result<&Project, StoreError> {
        self.projects.get(name).ok_or_else(|| self.unknown(name))
    }

    /// Resolve `name`, or the default project when `None`.
    pub fn resolve_or_default(&self, name: Option<&str>) -> Result<&Project, StoreError> {
        match name {
            Some(name) => self.resolve(name),
            None => self.default_project().ok_or_else(|| self.unknown("<default>")),
        }
    }

    pub fn default_project(&self) -> Option<&Project> {
        self.default_project
            .as_deref()
            .and_then(|name| self.projects.get(name))
    }

    pub fn projects(&self) -> impl Iterator<Item = &Project> {
        self.projects.values()
    }

    pub fn author(&self) -> &Author {
        &self.author
    }

    pub fn mirror_root(&self) -> &Path {
        &self.mirror_root
    }

    pub(crate) fn unknown(&self, name: &str) -> StoreError {
        StoreError::UnknownProject {
            name: name.to_string(),
            available: self.projects.keys().cloned().collect(),
        }
    }
}

fn expand_tilde(path: PathBuf) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path;
    };
    match home::home_dir() {
        Some(home) => home.join(rest),
        None => path,
    }
}
