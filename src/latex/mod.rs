//! Section structure of LaTeX documents.
//!
//! Only sectioning commands are recognized; everything between two headings
//! is opaque text. Indexes are cheap to build and are recomputed from the
//! current file content on every request.

pub mod errors;
pub mod parser;
pub mod query;

pub use errors::SectionError;
pub use parser::{parse, Section, SectionIndex, SectionKind};
pub use query::{
    find, get_by_title, get_content, outline, span_text, Lookup, OutlineEntry, TitleMatch,
};
