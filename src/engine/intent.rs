use crate::latex::TitleMatch;
use serde::Serialize;

/// One requested mutation of a project file.
///
/// Paths are relative to the project root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditIntent {
    /// Replace the single occurrence of `old` with `new`.
    ReplaceUnique {
        path: String,
        old: String,
        new: String,
    },
    /// Replace the whole file, creating it if missing.
    Overwrite { path: String, content: String },
    /// Replace the body of the section titled `title`.
    ///
    /// If `content` itself starts with a sectioning command the heading is
    /// replaced too.
    ///
    /// When another heading follows the section and non-empty `content`
    /// does not end with a newline, one is appended so that heading stays
    /// on its own line. Otherwise `content` is written exactly as given.
    ReplaceSection {
        path: String,
        title: String,
        content: String,
    },
    /// Add `content` at the end of the section titled `title`.
    AppendToSection {
        path: String,
        title: String,
        content: String,
    },
    Create { path: String, content: String },
    Delete { path: String },
}

impl EditIntent {
    pub fn path(&self) -> &str {
        match self {
            EditIntent::ReplaceUnique { path, .. }
            | EditIntent::Overwrite { path, .. }
            | EditIntent::ReplaceSection { path, .. }
            | EditIntent::AppendToSection { path, .. }
            | EditIntent::Create { path, .. }
            | EditIntent::Delete { path } => path,
        }
    }

    /// Commit message used when the caller supplies none.
    pub fn default_message(&self) -> String {
        match self {
            EditIntent::ReplaceUnique { path, .. } | EditIntent::Overwrite { path, .. } => {
                format!("Update {path}")
            }
            EditIntent::ReplaceSection { title, .. } => format!("Update section '{title}'"),
            EditIntent::AppendToSection { title, .. } => format!("Append to section '{title}'"),
            EditIntent::Create { path, .. } => format!("Add {path}"),
            EditIntent::Delete { path } => format!("Delete {path}"),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            EditIntent::ReplaceUnique { .. } => "replace_unique",
            EditIntent::Overwrite { .. } => "overwrite",
            EditIntent::ReplaceSection { .. } => "replace_section",
            EditIntent::AppendToSection { .. } => "append_to_section",
            EditIntent::Create { .. } => "create",
            EditIntent::Delete { .. } => "delete",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOptions {
    pub commit_message: Option<String>,
    /// Push after committing. When false the commit stays local.
    pub push: bool,
    /// Compute the change without touching disk or git.
    pub dry_run: bool,
    pub title_match: TitleMatch,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            commit_message: None,
            push: true,
            dry_run: false,
            title_match: TitleMatch::Exact,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
    /// The new content equals the old one.
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EditOutcome {
    pub path: String,
    pub change: ChangeKind,
    pub bytes_written: usize,
    pub commit: Option<String>,
    pub pushed: bool,
    /// The first push was rejected and succeeded after a replay.
    pub retried: bool,
    pub dry_run: bool,
    /// File content before the change, `None` for new files.
    #[serde(skip)]
    pub before: Option<String>,
    /// File content after the change, `None` for deletions.
    #[serde(skip)]
    pub after: Option<String>,
}
