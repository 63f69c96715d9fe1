//! Local git mirrors of remote projects.
//!
//! [`MirrorStore`] keeps one state machine and one lock per project. The git
//! plumbing sits behind the [`GitClient`] trait; [`Git2Client`] is the libgit2
//! implementation used outside of tests.

pub mod errors;
pub mod git;
pub mod git2_client;
pub mod store;

pub use errors::{classify, GitError, SyncError};
pub use git::{
    Author, CommitInfo, DiffQuery, GitClient, LogQuery, PullOutcome, PushOutcome, ReplayOutcome,
    DEFAULT_LOG_LIMIT, MAX_LOG_LIMIT,
};
pub use git2_client::Git2Client;
pub use store::{MirrorLease, MirrorState, MirrorStore, PushReport};
