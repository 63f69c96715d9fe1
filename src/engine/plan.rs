//! In-memory computation of a file change. Nothing here touches disk.

use super::intent::{ChangeKind, EditIntent};
use crate::edit::Edit;
use crate::error::StoreError;
use crate::latex::{self, TitleMatch};
use std::path::Path;

/// The change an intent makes to one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilePlan {
    Write {
        before: Option<String>,
        after: String,
    },
    Delete {
        before: String,
    },
}

impl FilePlan {
    pub fn change(&self) -> ChangeKind {
        match self {
            FilePlan::Write { before: None, .. } => ChangeKind::Created,
            FilePlan::Write {
                before: Some(before),
                after,
            } if before == after => ChangeKind::Unchanged,
            FilePlan::Write { .. } => ChangeKind::Modified,
            FilePlan::Delete { .. } => ChangeKind::Deleted,
        }
    }
}

/// Compute the new content of `file` for `intent`.
///
/// `current` is the file's text, or `None` when it does not exist.
pub fn plan(
    intent: &EditIntent,
    file: &Path,
    current: Option<&str>,
    title_match: TitleMatch,
) -> Result<FilePlan, StoreError> {
    let path = intent.path();
    let existing = || current.ok_or_else(|| StoreError::file_not_found(path));

    match intent {
        EditIntent::ReplaceUnique { old, new, .. } => {
            if old.is_empty() {
                return Err(StoreError::InvalidIntent {
                    reason: "text to replace must not be empty".to_string(),
                });
            }
            let content = existing()?;
            let start = unique_occurrence(content, old, path)?;
            let edit = Edit::new(file, start, start + old.len(), new.as_str(), old);
            Ok(FilePlan::Write {
                before: Some(content.to_string()),
                after: edit.apply_to(content)?,
            })
        }

        EditIntent::Overwrite { content, .. } => Ok(FilePlan::Write {
            before: current.map(str::to_string),
            after: content.clone(),
        }),

        EditIntent::ReplaceSection { title, content, .. } => {
            let text = existing()?;
            let index = latex::parse(text);
            let section = latex::find(&index, title, title_match)
                .map_err(|e| e.into_store_error(path))?
                .section;

            let span = if starts_with_heading(content) {
                section.span()
            } else {
                section.body()
            };
            let mut replacement = content.clone();
            if span.end < text.len() && !replacement.is_empty() && !replacement.ends_with('\n') {
                // Keep the following heading on its own line.
                replacement.push('\n');
            }

            let edit = Edit::new(
                file,
                span.start,
                span.end,
                replacement,
                &text[span.clone()],
            );
            Ok(FilePlan::Write {
                before: Some(text.to_string()),
                after: edit.apply_to(text)?,
            })
        }

        EditIntent::AppendToSection { title, content, .. } => {
            let text = existing()?;
            let index = latex::parse(text);
            let section = latex::find(&index, title, title_match)
                .map_err(|e| e.into_store_error(path))?
                .section;

            let at = section.end;
            let mut addition = String::with_capacity(content.len() + 2);
            if at > 0 && !text[..at].ends_with('\n') {
                addition.push('\n');
            }
            addition.push_str(content);
            if at < text.len() && !addition.ends_with('\n') {
                addition.push('\n');
            }

            let edit = Edit::insert(file, at, addition);
            Ok(FilePlan::Write {
                before: Some(text.to_string()),
                after: edit.apply_to(text)?,
            })
        }

        EditIntent::Create { content, .. } => {
            if current.is_some() {
                return Err(StoreError::AlreadyExists {
                    path: path.to_string(),
                });
            }
            Ok(FilePlan::Write {
                before: None,
                after: content.clone(),
            })
        }

        EditIntent::Delete { .. } => Ok(FilePlan::Delete {
            before: existing()?.to_string(),
        }),
    }
}

/// Byte offset of the only occurrence of `needle`, counting overlaps.
fn unique_occurrence(haystack: &str, needle: &str, path: &str) -> Result<usize, StoreError> {
    let mut found = Vec::new();
    let mut from = 0;
    while let Some(offset) = haystack[from..].find(needle) {
        let at = from + offset;
        found.push(at);
        // Step one character so overlapping matches are seen too.
        from = at + haystack[at..].chars().next().map_or(1, char::len_utf8);
        if from > haystack.len() {
            break;
        }
    }

    match found.as_slice() {
        [] => Err(StoreError::NoMatch {
            path: path.to_string(),
        }),
        [only] => Ok(*only),
        many => Err(StoreError::AmbiguousMatch {
            path: path.to_string(),
            count: many.len(),
        }),
    }
}

/// Whether `content` opens with a sectioning command.
fn starts_with_heading(content: &str) -> bool {
    let index = latex::parse(content);
    !index.is_empty() && index.preamble(content).trim().is_empty()
}
