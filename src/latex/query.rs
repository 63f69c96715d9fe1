use super::errors::SectionError;
use super::parser::{Section, SectionIndex, SectionKind};
use serde::Serialize;
use std::ops::Range;

/// Characters of body text shown per outline entry.
pub const PREVIEW_CHARS: usize = 200;

/// How titles are compared during lookup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TitleMatch {
    #[default]
    Exact,
    IgnoreCase,
}

impl TitleMatch {
    fn matches(self, candidate: &str, wanted: &str) -> bool {
        match self {
            TitleMatch::Exact => candidate == wanted,
            TitleMatch::IgnoreCase => candidate.to_lowercase() == wanted.to_lowercase(),
        }
    }
}

/// Result of a title lookup.
#[derive(Debug, Clone, Copy)]
pub struct Lookup<'a> {
    pub section: &'a Section,
    /// Other sections with the same title that were passed over.
    pub duplicates: usize,
}

/// Find a section by exact title.
pub fn get_by_title<'a>(index: &'a SectionIndex, title: &str) -> Result<&'a Section, SectionError> {
    find(index, title, TitleMatch::Exact).map(|lookup| lookup.section)
}

/// Find a section by title. The first match in document order wins.
pub fn find<'a>(
    index: &'a SectionIndex,
    title: &str,
    mode: TitleMatch,
) -> Result<Lookup<'a>, SectionError> {
    let wanted = title.trim();
    let mut matches = index.iter().filter(|s| mode.matches(&s.title, wanted));

    let Some(section) = matches.next() else {
        return Err(not_found(index, wanted));
    };
    let duplicates = matches.count();
    if duplicates > 0 {
        tracing::warn!(
            title = wanted,
            duplicates,
            "several sections share this title, using the first"
        );
    }

    Ok(Lookup {
        section,
        duplicates,
    })
}

fn not_found(index: &SectionIndex, title: &str) -> SectionError {
    let available: Vec<String> = index.iter().map(|s| s.title.clone()).collect();
    let lowered = title.to_lowercase();
    let suggestion = available
        .iter()
        .map(|t| (t, strsim::jaro_winkler(&t.to_lowercase(), &lowered)))
        .filter(|(_, score)| *score >= 0.7)
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(t, _)| t.clone());

    SectionError::NotFound {
        title: title.to_string(),
        available,
        suggestion,
    }
}

/// Body text of `section`: everything after its heading line up to the end
/// of its span, subsections included.
pub fn get_content<'a>(content: &'a str, section: &Section) -> &'a str {
    &content[section.body()]
}

/// Text of an arbitrary range, clamped to the buffer.
pub fn span_text(content: &str, span: Range<usize>) -> &str {
    let end = span.end.min(content.len());
    let start = span.start.min(end);
    content.get(start..end).unwrap_or("")
}

/// Flat listing of a document's sections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutlineEntry {
    pub kind: SectionKind,
    pub title: String,
    pub level: usize,
    /// Depth in the tree, 0 for top-level sections.
    pub depth: usize,
    pub starred: bool,
    pub preview: String,
}

pub fn outline(content: &str, index: &SectionIndex) -> Vec<OutlineEntry> {
    fn walk(content: &str, sections: &[Section], depth: usize, out: &mut Vec<OutlineEntry>) {
        for section in sections {
            out.push(OutlineEntry {
                kind: section.kind,
                title: section.title.clone(),
                level: section.level(),
                depth,
                starred: section.starred,
                preview: preview(get_content(content, section)),
            });
            walk(content, &section.children, depth + 1, out);
        }
    }

    let mut out = Vec::new();
    walk(content, index.sections(), 0, &mut out);
    out
}

fn preview(body: &str) -> String {
    let trimmed = body.trim();
    let mut chars = trimmed.char_indices();
    match chars.nth(PREVIEW_CHARS) {
        Some((cut, _)) => format!("{}...", &trimmed[..cut]),
        None => trimmed.to_string(),
    }
}
