pub mod loader;
pub mod registry;
pub mod schema;

pub use loader::{load, load_from_env, load_from_path, load_from_str, ConfigError, ConfigFormat};
pub use registry::{Credential, Project, ProjectRegistry, RemoteSpec};
pub use schema::{AuthorConfig, ProjectConfig, RegistryConfig, ValidationError, ValidationIssue};
