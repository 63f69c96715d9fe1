use super::intent::{ChangeKind, EditIntent, EditOutcome, WriteOptions};
use super::plan::{plan, FilePlan};
use crate::edit::{atomic_write, read_text};
use crate::error::StoreError;
use crate::mirror::{Git2Client, GitClient, MirrorStore, PushReport};
use crate::safety::PathGuard;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

/// Applies [`EditIntent`]s to project mirrors.
pub struct EditEngine<C: GitClient = Git2Client> {
    mirrors: Arc<MirrorStore<C>>,
}

impl<C: GitClient> EditEngine<C> {
    pub fn new(mirrors: Arc<MirrorStore<C>>) -> Self {
        Self { mirrors }
    }

    /// Apply `intent` to `project` while holding the project's lock.
    ///
    /// The write is durable before commit and push start; a failure in
    /// either leaves it in place, and re-applying the same intent is safe.
    pub fn apply(
        &self,
        project: &str,
        intent: &EditIntent,
        options: &WriteOptions,
    ) -> Result<EditOutcome, StoreError> {
        let mut lease = self.mirrors.lock(project)?;
        let root = lease.ensure()?;

        let guard = PathGuard::new(root)?;
        let target = guard.resolve(intent.path())?;
        let current = read_text(&target)?;

        let file_plan = plan(intent, &target, current.as_deref(), options.title_match)?;
        let change = file_plan.change();
        let (before, after) = match &file_plan {
            FilePlan::Write { before, after } => (before.clone(), Some(after.clone())),
            FilePlan::Delete { before } => (Some(before.clone()), None),
        };
        let bytes_written = after.as_ref().map_or(0, String::len);

        let mut outcome = EditOutcome {
            path: intent.path().to_string(),
            change,
            bytes_written,
            commit: None,
            pushed: false,
            retried: false,
            dry_run: options.dry_run,
            before,
            after,
        };

        if options.dry_run {
            tracing::debug!(project, intent = intent.name(), "dry run, nothing written");
            outcome.bytes_written = 0;
            return Ok(outcome);
        }

        match &file_plan {
            FilePlan::Write { after, .. } if change != ChangeKind::Unchanged => {
                atomic_write(&target, after.as_bytes())?;
            }
            FilePlan::Write { .. } => {
                outcome.bytes_written = 0;
            }
            FilePlan::Delete { .. } => {
                fs::remove_file(&target).map_err(|e| StoreError::io(&target, e))?;
            }
        }
        tracing::info!(
            project,
            path = intent.path(),
            intent = intent.name(),
            bytes = outcome.bytes_written,
            "file updated"
        );

        let relative: PathBuf = guard.relative(&target)?;
        let message = options
            .commit_message
            .clone()
            .unwrap_or_else(|| intent.default_message());
        let changed = [relative];

        let report = if options.push {
            lease.commit_and_push(&changed, &message)?
        } else {
            PushReport {
                commit: lease.commit_only(&changed, &message)?,
                ..PushReport::default()
            }
        };

        outcome.commit = report.commit;
        outcome.pushed = report.pushed;
        outcome.retried = report.retried;
        Ok(outcome)
    }
}
