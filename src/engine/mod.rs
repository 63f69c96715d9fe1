//! Validated, atomic file mutations on project mirrors.
//!
//! Every mutation is an [`EditIntent`]. It is planned in memory first
//! ([`plan`]), then written atomically and committed by [`EditEngine`].

pub mod apply;
pub mod intent;
pub mod plan;

pub use apply::EditEngine;
pub use intent::{ChangeKind, EditIntent, EditOutcome, WriteOptions};
pub use plan::{plan, FilePlan};
