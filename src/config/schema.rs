use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// On-disk registry configuration.
///
/// Accepts both the snake_case TOML layout and the camelCase keys of
/// `overleaf_config.json`.
#[derive(Debug, Deserialize, Default, Clone)]
pub struct RegistryConfig {
    #[serde(default, alias = "mirrorRoot")]
    pub mirror_root: Option<PathBuf>,
    #[serde(default, alias = "defaultProject")]
    pub default_project: Option<String>,
    #[serde(default)]
    pub author: Option<AuthorConfig>,
    #[serde(default)]
    pub projects: BTreeMap<String, ProjectConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct AuthorConfig {
    pub name: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct ProjectConfig {
    /// Display name.
    pub name: Option<String>,
    #[serde(default, alias = "projectId")]
    pub project_id: Option<String>,
    /// Full clone URL; overrides the one derived from `project_id`.
    pub remote: Option<String>,
    #[serde(default, alias = "gitToken")]
    pub token: Option<String>,
    pub username: Option<String>,
}

impl RegistryConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut issues = Vec::new();

        if self.projects.is_empty() {
            issues.push(ValidationIssue::EmptyProjectList);
        }

        for (key, project) in &self.projects {
            if !is_valid_key(key) {
                issues.push(ValidationIssue::InvalidKey { key: key.clone() });
            }

            let project_id = project.project_id.as_deref().map(str::trim);
            let remote = project.remote.as_deref().map(str::trim);
            match (project_id, remote) {
                (None | Some(""), None | Some("")) => issues.push(ValidationIssue::MissingField {
                    project: key.clone(),
                    field: "project_id",
                }),
                (Some(id), None) if !is_valid_key(id) => {
                    issues.push(ValidationIssue::InvalidField {
                        project: key.clone(),
                        field: "project_id",
                        message: "must be a bare Overleaf project id".to_string(),
                    })
                }
                _ => {}
            }

            if project.token.as_deref().is_some_and(|t| t.trim().is_empty()) {
                issues.push(ValidationIssue::InvalidField {
                    project: key.clone(),
                    field: "token",
                    message: "must not be empty when set".to_string(),
                });
            }
        }

        if let Some(default) = &self.default_project {
            if !self.projects.contains_key(default) {
                issues.push(ValidationIssue::UnknownDefault {
                    name: default.clone(),
                });
            }
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { issues })
        }
    }
}

/// Project keys double as mirror directory names.
fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && key != "."
        && key != ".."
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, issue) in self.issues.iter().enumerate() {
            if idx > 0 {
                writeln!(f)?;
            }
            write!(f, "{issue}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationIssue {
    EmptyProjectList,
    InvalidKey {
        key: String,
    },
    MissingField {
        project: String,
        field: &'static str,
    },
    InvalidField {
        project: String,
        field: &'static str,
        message: String,
    },
    UnknownDefault {
        name: String,
    },
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::EmptyProjectList => write!(f, "config defines no projects"),
            ValidationIssue::InvalidKey { key } => write!(
                f,
                "project key '{key}' may only contain letters, digits, '-', '_' and '.'"
            ),
            ValidationIssue::MissingField { project, field } => {
                write!(f, "project '{project}' missing required field '{field}'")
            }
            ValidationIssue::InvalidField {
                project,
                field,
                message,
            } => write!(f, "project '{project}' field '{field}' {message}"),
            ValidationIssue::UnknownDefault { name } => {
                write!(f, "default project '{name}' is not defined")
            }
        }
    }
}
