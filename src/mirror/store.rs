use super::errors::{GitError, SyncError};
use super::git::{
    Author, CommitInfo, DiffQuery, GitClient, LogQuery, PullOutcome, PushOutcome, ReplayOutcome,
};
use super::git2_client::Git2Client;
use crate::config::{Project, ProjectRegistry};
use crate::error::StoreError;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// Lifecycle of one project's mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorState {
    /// Not materialized yet in this process.
    Absent,
    /// A clone or pull is in flight.
    Syncing,
    Ready,
    /// Local history diverged from the remote; pulls keep failing until a
    /// refresh.
    Conflicted,
    /// Contents cannot be trusted; the next `ensure` re-clones.
    Corrupt,
}

impl fmt::Display for MirrorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MirrorState::Absent => "absent",
            MirrorState::Syncing => "syncing",
            MirrorState::Ready => "ready",
            MirrorState::Conflicted => "conflicted",
            MirrorState::Corrupt => "corrupt",
        };
        f.write_str(name)
    }
}

/// What happened after a local commit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PushReport {
    /// New commit id, `None` when the tree did not change.
    pub commit: Option<String>,
    pub pushed: bool,
    /// The first push was rejected and the commit was replayed.
    pub retried: bool,
}

/// Owns every project's mirror and the lock that serializes access to it.
pub struct MirrorStore<C: GitClient = Git2Client> {
    registry: Arc<ProjectRegistry>,
    client: C,
    slots: HashMap<String, Mutex<MirrorState>>,
}

impl MirrorStore<Git2Client> {
    pub fn new(registry: Arc<ProjectRegistry>) -> Self {
        Self::with_client(registry, Git2Client)
    }
}

impl<C: GitClient> MirrorStore<C> {
    pub fn with_client(registry: Arc<ProjectRegistry>, client: C) -> Self {
        let slots = registry
            .projects()
            .map(|p| (p.name.clone(), Mutex::new(MirrorState::Absent)))
            .collect();
        Self {
            registry,
            client,
            slots,
        }
    }

    pub fn registry(&self) -> &Arc<ProjectRegistry> {
        &self.registry
    }

    /// Take the project's lock. Blocks while another caller holds it.
    pub fn lock(&self, name: &str) -> Result<MirrorLease<'_, C>, StoreError> {
        let project = self.registry.resolve(name)?;
        let slot = self
            .slots
            .get(&project.name)
            .ok_or_else(|| self.registry.unknown(name))?;

        let state = match slot.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!(
                    project = %project.name,
                    "previous operation panicked, treating mirror as corrupt"
                );
                let mut guard = poisoned.into_inner();
                *guard = MirrorState::Corrupt;
                slot.clear_poison();
                guard
            }
        };

        Ok(MirrorLease {
            project,
            author: self.registry.author(),
            client: &self.client,
            state,
        })
    }

    /// Current state of a project's mirror. Waits for the lock.
    pub fn state(&self, name: &str) -> Result<MirrorState, StoreError> {
        Ok(self.lock(name)?.state())
    }
}

/// Exclusive access to one mirror for the duration of an operation.
pub struct MirrorLease<'a, C: GitClient> {
    project: &'a Project,
    author: &'a Author,
    client: &'a C,
    state: MutexGuard<'a, MirrorState>,
}

impl<'a, C: GitClient> MirrorLease<'a, C> {
    pub fn project(&self) -> &'a Project {
        self.project
    }

    pub fn state(&self) -> MirrorState {
        *self.state
    }

    pub fn root(&self) -> &'a Path {
        &self.project.mirror_path
    }

    /// Bring the mirror to Ready and return its working directory.
    pub fn ensure(&mut self) -> Result<&'a Path, StoreError> {
        let dir = self.root();
        self.adopt_existing();

        match *self.state {
            MirrorState::Absent => self.materialize()?,
            MirrorState::Corrupt | MirrorState::Syncing => {
                self.discard()?;
                self.materialize()?;
            }
            MirrorState::Ready | MirrorState::Conflicted => self.pull()?,
        }
        Ok(dir)
    }

    /// Mark the mirror corrupt; the next `ensure` deletes and re-clones it.
    pub fn reset_to_corrupt(&mut self) {
        tracing::warn!(project = %self.project.name, "mirror marked corrupt");
        *self.state = MirrorState::Corrupt;
    }

    /// Throw the mirror away and clone it again.
    pub fn refresh(&mut self) -> Result<&'a Path, StoreError> {
        self.reset_to_corrupt();
        self.ensure()
    }

    /// Commit `paths` without pushing. `None` if nothing changed.
    pub fn commit_only(
        &mut self,
        paths: &[PathBuf],
        message: &str,
    ) -> Result<Option<String>, StoreError> {
        let result = self.client.commit(self.root(), paths, message, self.author);
        self.track(result)
    }

    /// Commit `paths` and push, replaying and retrying exactly once if the
    /// remote moved ahead in between.
    pub fn commit_and_push(
        &mut self,
        paths: &[PathBuf],
        message: &str,
    ) -> Result<PushReport, StoreError> {
        let report = PushReport {
            commit: self.commit_only(paths, message)?,
            ..PushReport::default()
        };
        self.push_with_retry(report)
    }

    /// Push local commits that never reached the remote, such as those left
    /// by a write made without pushing or by a push that failed.
    ///
    /// Takes the same single replay-and-retry path as [`Self::commit_and_push`].
    /// Does not pull first, so commits stay pushable when the remote moved.
    pub fn push_pending(&mut self) -> Result<PushReport, StoreError> {
        self.adopt_existing();
        match *self.state {
            // Nothing local to push.
            MirrorState::Absent => return Ok(PushReport::default()),
            MirrorState::Corrupt | MirrorState::Syncing => {
                return Err(StoreError::CorruptMirror {
                    path: self.root().to_path_buf(),
                    message: "refresh the mirror before pushing".to_string(),
                })
            }
            MirrorState::Ready | MirrorState::Conflicted => {}
        }
        self.push_with_retry(PushReport::default())
    }

    fn push_with_retry(&mut self, mut report: PushReport) -> Result<PushReport, StoreError> {
        let reason = match self.push()? {
            PushOutcome::Pushed => {
                report.pushed = true;
                *self.state = MirrorState::Ready;
                return Ok(report);
            }
            PushOutcome::Rejected { reason } => reason,
        };

        tracing::warn!(
            project = %self.project.name,
            %reason,
            "push rejected, replaying onto the remote and retrying once"
        );
        report.retried = true;

        let replayed = self
            .client
            .replay_onto_remote(&self.project.remote, self.root());
        match self.track(replayed)? {
            ReplayOutcome::Replayed { commit } => {
                if report.commit.is_some() {
                    report.commit = Some(commit);
                }
            }
            ReplayOutcome::Conflict { paths } => {
                *self.state = MirrorState::Conflicted;
                return Err(StoreError::PushRejected {
                    reason: format!(
                        "the remote changed the same files: {}",
                        paths.join(", ")
                    ),
                });
            }
        }

        match self.push()? {
            PushOutcome::Pushed => {
                report.pushed = true;
                *self.state = MirrorState::Ready;
                Ok(report)
            }
            PushOutcome::Rejected { reason } => Err(StoreError::PushRejected { reason }),
        }
    }

    pub fn is_dirty(&mut self) -> Result<bool, StoreError> {
        let result = self.client.is_dirty(self.root());
        self.track(result)
    }

    pub fn history(&mut self, query: &LogQuery) -> Result<Vec<CommitInfo>, StoreError> {
        let result = self.client.log(self.root(), query);
        self.track(result)
    }

    pub fn diff(&mut self, query: &DiffQuery) -> Result<String, StoreError> {
        let result = self.client.diff(self.root(), query);
        self.track(result)
    }

    /// A mirror left on disk by an earlier process is checked before use.
    fn adopt_existing(&mut self) {
        let dir = self.root();
        if *self.state != MirrorState::Absent || !dir.exists() {
            return;
        }
        match self.client.verify(dir) {
            Ok(()) => *self.state = MirrorState::Ready,
            Err(err) => {
                tracing::warn!(
                    project = %self.project.name,
                    error = %err,
                    "existing mirror is unusable"
                );
                *self.state = MirrorState::Corrupt;
            }
        }
    }

    fn push(&mut self) -> Result<PushOutcome, StoreError> {
        let result = self.client.push(&self.project.remote, self.root());
        self.track(result)
    }

    fn materialize(&mut self) -> Result<(), StoreError> {
        let dir = self.root();
        *self.state = MirrorState::Syncing;
        match self.client.clone_repo(&self.project.remote, dir) {
            Ok(()) => {
                tracing::info!(project = %self.project.name, "mirror ready");
                *self.state = MirrorState::Ready;
                Ok(())
            }
            Err(err) => {
                *self.state = if dir.exists() {
                    MirrorState::Corrupt
                } else {
                    MirrorState::Absent
                };
                Err(err.into())
            }
        }
    }

    fn pull(&mut self) -> Result<(), StoreError> {
        let previous = *self.state;
        *self.state = MirrorState::Syncing;
        match self.client.pull(&self.project.remote, self.root()) {
            Ok(PullOutcome::UpToDate) | Ok(PullOutcome::FastForwarded) => {
                *self.state = MirrorState::Ready;
                Ok(())
            }
            Ok(PullOutcome::Diverged) => {
                tracing::warn!(project = %self.project.name, "mirror diverged from remote");
                *self.state = MirrorState::Conflicted;
                Err(SyncError::DivergedHistory.into())
            }
            Err(err) => {
                *self.state = if err.is_corruption() {
                    MirrorState::Corrupt
                } else {
                    previous
                };
                Err(err.into())
            }
        }
    }

    fn discard(&mut self) -> Result<(), StoreError> {
        let dir = self.root();
        match fs::remove_dir_all(dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(dir, e)),
        }
    }

    /// Record corruption in the state machine before handing the error up.
    fn track<T>(&mut self, result: Result<T, GitError>) -> Result<T, StoreError> {
        result.map_err(|err| {
            if err.is_corruption() {
                self.reset_to_corrupt();
            }
            err.into()
        })
    }
}
