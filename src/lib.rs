//! Overleaf Store: git-backed local mirrors of Overleaf projects
//!
//! Keeps a local working copy of each configured project in sync with its
//! remote and offers section-aware reads and writes of the LaTeX files in it.
//!
//! # Architecture
//!
//! All file mutations compile down to a single primitive: [`Edit`], a
//! verified byte-span replacement. Locating the span (substring search,
//! section lookup via [`latex`]) is separate from applying it.
//!
//! - [`config`] builds the immutable [`ProjectRegistry`]
//! - [`mirror`] owns one state machine and one lock per project mirror
//! - [`engine`] plans, writes and commits [`EditIntent`]s
//! - [`store`] is the operation surface tying them together
//!
//! # Safety
//!
//! - Every caller-supplied path goes through [`PathGuard`]
//! - Atomic file writes (tempfile + fsync + rename)
//! - Substring replacement refuses missing and ambiguous matches
//! - A rejected push is replayed and retried exactly once
//!
//! # Example
//!
//! ```no_run
//! use overleaf_store::config;
//! use overleaf_store::{EditIntent, ProjectStore, WriteOptions};
//!
//! let registry = config::load(None, |key| std::env::var(key).ok())?;
//! let store = ProjectStore::from_config(registry)?;
//!
//! let intent = EditIntent::ReplaceSection {
//!     path: "main.tex".into(),
//!     title: "Introduction".into(),
//!     content: "New introduction.\n".into(),
//! };
//! let outcome = store.apply(None, &intent, &WriteOptions::default())?;
//! println!("committed {:?}", outcome.commit);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod config;
pub mod edit;
pub mod engine;
pub mod error;
pub mod latex;
pub mod mirror;
pub mod safety;
pub mod store;

// Re-exports
pub use config::{ConfigError, Project, ProjectRegistry, RegistryConfig};
pub use edit::{Edit, EditError, EditVerification};
pub use engine::{ChangeKind, EditEngine, EditIntent, EditOutcome, WriteOptions};
pub use error::{NotFound, StoreError};
pub use latex::{Section, SectionIndex, SectionKind, TitleMatch};
pub use mirror::{
    Author, CommitInfo, DiffQuery, Git2Client, GitClient, LogQuery, MirrorState, MirrorStore,
    PushReport, SyncError,
};
pub use safety::{PathGuard, SafetyError};
pub use store::{ProjectStore, ProjectSummary};
