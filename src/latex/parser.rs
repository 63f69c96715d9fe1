use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::ops::Range;
use std::sync::OnceLock;

/// LaTeX sectioning commands, shallowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SectionKind {
    Part,
    Chapter,
    Section,
    Subsection,
    Subsubsection,
    Paragraph,
    Subparagraph,
}

impl SectionKind {
    pub fn from_command(command: &str) -> Option<Self> {
        match command {
            "part" => Some(SectionKind::Part),
            "chapter" => Some(SectionKind::Chapter),
            "section" => Some(SectionKind::Section),
            "subsection" => Some(SectionKind::Subsection),
            "subsubsection" => Some(SectionKind::Subsubsection),
            "paragraph" => Some(SectionKind::Paragraph),
            "subparagraph" => Some(SectionKind::Subparagraph),
            _ => None,
        }
    }

    pub fn command(self) -> &'static str {
        match self {
            SectionKind::Part => "part",
            SectionKind::Chapter => "chapter",
            SectionKind::Section => "section",
            SectionKind::Subsection => "subsection",
            SectionKind::Subsubsection => "subsubsection",
            SectionKind::Paragraph => "paragraph",
            SectionKind::Subparagraph => "subparagraph",
        }
    }

    /// Nesting depth; smaller is shallower.
    pub fn level(self) -> usize {
        self as usize
    }
}

impl fmt::Display for SectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.command())
    }
}

/// One node of the section tree.
///
/// `start..end` covers the heading command and everything up to the next
/// heading at the same or a shallower level. `body_start` is the first byte
/// after the heading line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub kind: SectionKind,
    pub starred: bool,
    pub title: String,
    pub start: usize,
    pub body_start: usize,
    pub end: usize,
    pub children: Vec<Section>,
}

impl Section {
    pub fn level(&self) -> usize {
        self.kind.level()
    }

    pub fn span(&self) -> Range<usize> {
        self.start..self.end
    }

    pub fn body(&self) -> Range<usize> {
        self.body_start..self.end
    }
}

/// Parsed section structure of one buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionIndex {
    sections: Vec<Section>,
    preamble_end: usize,
}

impl SectionIndex {
    /// Top-level sections in document order.
    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    /// Byte range of the text before the first heading.
    pub fn preamble_range(&self) -> Range<usize> {
        0..self.preamble_end
    }

    pub fn preamble<'a>(&self, content: &'a str) -> &'a str {
        &content[self.preamble_range()]
    }

    /// All sections, depth-first, which is also document order.
    pub fn iter(&self) -> Sections<'_> {
        Sections {
            stack: self.sections.iter().rev().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }
}

/// Pre-order iterator over a section tree.
pub struct Sections<'a> {
    stack: Vec<&'a Section>,
}

impl<'a> Iterator for Sections<'a> {
    type Item = &'a Section;

    fn next(&mut self) -> Option<Self::Item> {
        let section = self.stack.pop()?;
        self.stack.extend(section.children.iter().rev());
        Some(section)
    }
}

struct Heading {
    kind: SectionKind,
    starred: bool,
    title: String,
    start: usize,
    line_end: usize,
}

fn heading_regex() -> &'static Regex {
    static HEADING: OnceLock<Regex> = OnceLock::new();
    HEADING.get_or_init(|| {
        Regex::new(
            r"\\(part|chapter|section|subsection|subsubsection|paragraph|subparagraph)(\*?)[ \t]*(?:\[[^\]\n]*\][ \t]*)?\{",
        )
        .expect("heading pattern is a valid regex")
    })
}

/// Parse `content` into a section tree plus preamble.
pub fn parse(content: &str) -> SectionIndex {
    let headings = scan_headings(content);
    let preamble_end = headings.first().map_or(content.len(), |h| h.start);

    // Span end: next heading at the same or a shallower level.
    let ends: Vec<usize> = headings
        .iter()
        .enumerate()
        .map(|(i, heading)| {
            headings[i + 1..]
                .iter()
                .find(|next| next.kind.level() <= heading.kind.level())
                .map_or(content.len(), |next| next.start)
        })
        .collect();

    let mut roots: Vec<Section> = Vec::new();
    let mut stack: Vec<Section> = Vec::new();

    for (i, heading) in headings.into_iter().enumerate() {
        while stack
            .last()
            .is_some_and(|open| open.level() >= heading.kind.level())
        {
            close_top(&mut stack, &mut roots);
        }

        let end = ends[i];
        stack.push(Section {
            kind: heading.kind,
            starred: heading.starred,
            title: heading.title,
            start: heading.start,
            body_start: heading.line_end.min(end),
            end,
            children: Vec::new(),
        });
    }
    while !stack.is_empty() {
        close_top(&mut stack, &mut roots);
    }

    SectionIndex {
        sections: roots,
        preamble_end,
    }
}

fn close_top(stack: &mut Vec<Section>, roots: &mut Vec<Section>) {
    if let Some(done) = stack.pop() {
        match stack.last_mut() {
            Some(parent) => parent.children.push(done),
            None => roots.push(done),
        }
    }
}

fn scan_headings(content: &str) -> Vec<Heading> {
    let bytes = content.as_bytes();
    let mut headings: Vec<Heading> = Vec::new();

    for caps in heading_regex().captures_iter(content) {
        let whole = match caps.get(0) {
            Some(m) => m,
            None => continue,
        };
        let start = whole.start();

        if is_escaped(bytes, start) || in_comment(bytes, start) {
            continue;
        }

        let Some(kind) = caps.get(1).and_then(|m| SectionKind::from_command(m.as_str())) else {
            continue;
        };
        let starred = caps.get(2).is_some_and(|m| !m.as_str().is_empty());

        let open = whole.end() - 1;
        let Some(close) = matching_brace(bytes, open) else {
            continue;
        };
        let title = content[open + 1..close]
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");

        let line_end = content[close + 1..]
            .find('\n')
            .map_or(content.len(), |i| close + 1 + i + 1);

        headings.push(Heading {
            kind,
            starred,
            title,
            start,
            line_end,
        });
    }

    // A heading followed by another on the same line has an empty body.
    for i in 0..headings.len().saturating_sub(1) {
        let next_start = headings[i + 1].start;
        if headings[i].line_end > next_start {
            headings[i].line_end = next_start;
        }
    }

    headings
}

/// Whether the byte at `idx` is preceded by an odd number of backslashes.
fn is_escaped(bytes: &[u8], idx: usize) -> bool {
    let run = bytes[..idx]
        .iter()
        .rev()
        .take_while(|&&b| b == b'\\')
        .count();
    run % 2 == 1
}

/// Whether an unescaped `%` appears earlier on the same line.
fn in_comment(bytes: &[u8], idx: usize) -> bool {
    let line_start = bytes[..idx]
        .iter()
        .rposition(|&b| b == b'\n')
        .map_or(0, |i| i + 1);
    (line_start..idx).any(|i| bytes[i] == b'%' && !is_escaped(bytes, i))
}

/// Index of the `}` closing the group opened at `open`.
fn matching_brace(bytes: &[u8], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut i = open;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 1,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}
