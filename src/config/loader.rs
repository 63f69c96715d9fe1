use crate::config::schema::{AuthorConfig, ProjectConfig, RegistryConfig, ValidationError};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_ENV: &str = "OVERLEAF_CONFIG_FILE";
pub const MIRROR_ROOT_ENV: &str = "OVERLEAF_TEMP_DIR";
pub const PROJECT_ID_ENV: &str = "OVERLEAF_PROJECT_ID";
pub const GIT_TOKEN_ENV: &str = "OVERLEAF_GIT_TOKEN";
pub const AUTHOR_NAME_ENV: &str = "OVERLEAF_GIT_AUTHOR_NAME";
pub const AUTHOR_EMAIL_ENV: &str = "OVERLEAF_GIT_AUTHOR_EMAIL";

pub const DEFAULT_CONFIG_FILE: &str = "overleaf_config.json";
/// Key of the project synthesized from environment variables.
pub const ENV_PROJECT_KEY: &str = "default";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Json,
}

impl ConfigFormat {
    /// `.json` files are JSON, everything else TOML.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => ConfigFormat::Json,
            _ => ConfigFormat::Toml,
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Toml {
        path: Option<PathBuf>,
        source: toml_edit::de::Error,
    },
    Json {
        path: Option<PathBuf>,
        source: serde_json::Error,
    },
    Validation {
        path: Option<PathBuf>,
        source: ValidationError,
    },
    NotConfigured {
        searched: PathBuf,
    },
}

impl ConfigError {
    fn with_path(self, path: &Path) -> Self {
        let path = path.to_path_buf();
        match self {
            ConfigError::Toml { path: None, source } => ConfigError::Toml {
                path: Some(path),
                source,
            },
            ConfigError::Json { path: None, source } => ConfigError::Json {
                path: Some(path),
                source,
            },
            ConfigError::Validation { path: None, source } => ConfigError::Validation {
                path: Some(path),
                source,
            },
            other => other,
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io { path, source } => {
                write!(
                    f,
                    "failed to read project config from {}: {}",
                    path.display(),
                    source
                )
            }
            ConfigError::Toml { path, source } => match path {
                Some(path) => write!(
                    f,
                    "failed to parse project config TOML ({}): {}",
                    path.display(),
                    source
                ),
                None => write!(f, "failed to parse project config TOML: {}", source),
            },
            ConfigError::Json { path, source } => match path {
                Some(path) => write!(
                    f,
                    "failed to parse project config JSON ({}): {}",
                    path.display(),
                    source
                ),
                None => write!(f, "failed to parse project config JSON: {}", source),
            },
            ConfigError::Validation { path, source } => match path {
                Some(path) => write!(f, "invalid project config ({}): {}", path.display(), source),
                None => write!(f, "invalid project config: {}", source),
            },
            ConfigError::NotConfigured { searched } => write!(
                f,
                "no project config at {} and {} / {} are not set",
                searched.display(),
                PROJECT_ID_ENV,
                GIT_TOKEN_ENV
            ),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io { source, .. } => Some(source),
            ConfigError::Toml { source, .. } => Some(source),
            ConfigError::Json { source, .. } => Some(source),
            ConfigError::Validation { source, .. } => Some(source),
            ConfigError::NotConfigured { .. } => None,
        }
    }
}

pub fn load_from_str(input: &str, format: ConfigFormat) -> Result<RegistryConfig, ConfigError> {
    let config: RegistryConfig = match format {
        ConfigFormat::Toml => toml_edit::de::from_str(input)
            .map_err(|source| ConfigError::Toml { path: None, source })?,
        ConfigFormat::Json => serde_json::from_str(input)
            .map_err(|source| ConfigError::Json { path: None, source })?,
    };
    config
        .validate()
        .map_err(|source| ConfigError::Validation { path: None, source })?;
    Ok(config)
}

pub fn load_from_path(path: impl AsRef<Path>) -> Result<RegistryConfig, ConfigError> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    load_from_str(&contents, ConfigFormat::from_path(path)).map_err(|error| error.with_path(path))
}

/// Single-project config from `OVERLEAF_PROJECT_ID` and `OVERLEAF_GIT_TOKEN`.
pub fn load_from_env(lookup: impl Fn(&str) -> Option<String>) -> Option<RegistryConfig> {
    let project_id = lookup(PROJECT_ID_ENV).filter(|v| !v.trim().is_empty())?;
    let token = lookup(GIT_TOKEN_ENV).filter(|v| !v.trim().is_empty())?;

    let mut config = RegistryConfig {
        default_project: Some(ENV_PROJECT_KEY.to_string()),
        ..RegistryConfig::default()
    };
    config.projects.insert(
        ENV_PROJECT_KEY.to_string(),
        ProjectConfig {
            name: Some("Default Project".to_string()),
            project_id: Some(project_id),
            token: Some(token),
            ..ProjectConfig::default()
        },
    );
    Some(config)
}

/// Resolve configuration the way the binary does.
///
/// An explicit path must exist. Otherwise `OVERLEAF_CONFIG_FILE` (default
/// `overleaf_config.json`) is tried, then the environment fallback. The
/// mirror root and commit author can always be overridden from the
/// environment when the file leaves them unset.
pub fn load(
    explicit: Option<&Path>,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<RegistryConfig, ConfigError> {
    let mut config = match explicit {
        Some(path) => load_from_path(path)?,
        None => {
            let path = lookup(CONFIG_FILE_ENV)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
            if path.exists() {
                load_from_path(&path)?
            } else {
                tracing::debug!(path = %path.display(), "no config file, trying environment");
                let config =
                    load_from_env(&lookup).ok_or(ConfigError::NotConfigured { searched: path })?;
                config
                    .validate()
                    .map_err(|source| ConfigError::Validation { path: None, source })?;
                config
            }
        }
    };

    if config.mirror_root.is_none() {
        config.mirror_root = lookup(MIRROR_ROOT_ENV).map(PathBuf::from);
    }

    let author = config.author.get_or_insert_with(AuthorConfig::default);
    if author.name.is_none() {
        author.name = lookup(AUTHOR_NAME_ENV);
    }
    if author.email.is_none() {
        author.email = lookup(AUTHOR_EMAIL_ENV);
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const JSON: &str = r#"{
        "projects": {
            "thesis": {
                "name": "My Thesis",
                "projectId": "64a1b2c3d4",
                "gitToken": "olp_secret"
            },
            "paper": {
                "name": "Paper",
                "projectId": "77ffee00"
            }
        },
        "defaultProject": "thesis"
    }"#;

    const TOML: &str = r#"
mirror_root = "/var/cache/overleaf"
default_project = "paper"

[author]
name = "Jane Doe"
email = "jane@example.com"

[projects.paper]
project_id = "77ffee00"
token = "olp_other"
"#;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_load_json_layout() {
        let config = load_from_str(JSON, ConfigFormat::Json).unwrap();
        assert_eq!(config.default_project.as_deref(), Some("thesis"));
        let thesis = &config.projects["thesis"];
        assert_eq!(thesis.project_id.as_deref(), Some("64a1b2c3d4"));
        assert_eq!(thesis.token.as_deref(), Some("olp_secret"));
        assert_eq!(config.projects["paper"].token, None);
    }

    #[test]
    fn test_load_toml_layout() {
        let config = load_from_str(TOML, ConfigFormat::Toml).unwrap();
        assert_eq!(
            config.mirror_root.as_deref(),
            Some(Path::new("/var/cache/overleaf"))
        );
        let author = config.author.unwrap();
        assert_eq!(author.name.as_deref(), Some("Jane Doe"));
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(
            ConfigFormat::from_path(Path::new("overleaf_config.json")),
            ConfigFormat::Json
        );
        assert_eq!(
            ConfigFormat::from_path(Path::new("projects.toml")),
            ConfigFormat::Toml
        );
    }

    #[test]
    fn test_parse_error_carries_path() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("broken.json");
        fs::write(&path, "{ not json").unwrap();

        let err = load_from_path(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Json { path: Some(_), .. }));
        assert!(err.to_string().contains("broken.json"));
    }

    #[test]
    fn test_validation_error_surfaces() {
        let err = load_from_str("{\"projects\": {}}", ConfigFormat::Json).unwrap_err();
        assert!(matches!(err, ConfigError::Validation { .. }));
    }

    #[test]
    fn test_env_fallback() {
        let temp = tempfile::tempdir().unwrap();
        let missing = temp.path().join("nope.json");
        let lookup = env(&[
            (CONFIG_FILE_ENV, missing.to_str().unwrap()),
            (PROJECT_ID_ENV, "abc123"),
            (GIT_TOKEN_ENV, "olp_tok"),
            (MIRROR_ROOT_ENV, "/tmp/mirrors"),
            (AUTHOR_NAME_ENV, "Bot"),
        ]);

        let config = load(None, lookup).unwrap();
        assert_eq!(config.default_project.as_deref(), Some(ENV_PROJECT_KEY));
        assert_eq!(
            config.projects[ENV_PROJECT_KEY].project_id.as_deref(),
            Some("abc123")
        );
        assert_eq!(config.mirror_root.as_deref(), Some(Path::new("/tmp/mirrors")));
        let author = config.author.unwrap();
        assert_eq!(author.name.as_deref(), Some("Bot"));
        assert_eq!(author.email, None);
    }

    #[test]
    fn test_nothing_configured() {
        let temp = tempfile::tempdir().unwrap();
        let missing = temp.path().join("nope.json");
        let lookup = env(&[(CONFIG_FILE_ENV, missing.to_str().unwrap())]);
        assert!(matches!(
            load(None, lookup),
            Err(ConfigError::NotConfigured { .. })
        ));
    }

    #[test]
    fn test_explicit_path_must_exist() {
        let temp = tempfile::tempdir().unwrap();
        let missing = temp.path().join("nope.toml");
        let lookup = env(&[(PROJECT_ID_ENV, "abc"), (GIT_TOKEN_ENV, "tok")]);
        assert!(matches!(
            load(Some(&missing), lookup),
            Err(ConfigError::Io { .. })
        ));
    }

    #[test]
    fn test_file_values_win_over_env() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("config.toml");
        fs::write(&path, TOML).unwrap();
        let lookup = env(&[(MIRROR_ROOT_ENV, "/elsewhere"), (AUTHOR_NAME_ENV, "Bot")]);

        let config = load(Some(&path), lookup).unwrap();
        assert_eq!(
            config.mirror_root.as_deref(),
            Some(Path::new("/var/cache/overleaf"))
        );
        assert_eq!(config.author.unwrap().name.as_deref(), Some("Jane Doe"));
    }
}
