//! [`GitClient`] backed by libgit2.

use super::errors::{classify, GitError};
use super::git::{
    Author, CommitInfo, DiffQuery, GitClient, LogQuery, PullOutcome, PushOutcome, ReplayOutcome,
};
use crate::config::RemoteSpec;
use chrono::DateTime;
use git2::build::{CheckoutBuilder, RepoBuilder};
use git2::{
    Commit, Cred, DiffFormat, DiffOptions, ErrorClass, ErrorCode, FetchOptions, Index, IndexEntry,
    IndexTime, Oid, PushOptions, RemoteCallbacks, Repository, Signature, Sort, StatusOptions, Tree,
};
use std::cell::RefCell;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

const ORIGIN: &str = "origin";

/// Credential callbacks give up after this many attempts; libgit2 would
/// otherwise keep asking forever on a bad token.
const MAX_CREDENTIAL_ATTEMPTS: usize = 3;

#[derive(Debug, Default, Clone, Copy)]
pub struct Git2Client;

trait GitResultExt<T> {
    fn at(self, dir: &Path, context: &str) -> Result<T, GitError>;
}

impl<T> GitResultExt<T> for Result<T, git2::Error> {
    fn at(self, dir: &Path, context: &str) -> Result<T, GitError> {
        self.map_err(|e| classify(e, dir, context))
    }
}

impl Git2Client {
    fn open(dir: &Path) -> Result<Repository, GitError> {
        let repo = Repository::open(dir).map_err(|e| GitError::Corrupt {
            path: dir.to_path_buf(),
            message: format!("cannot open repository: {}", e.message()),
        })?;
        if repo.is_bare() {
            return Err(GitError::Corrupt {
                path: dir.to_path_buf(),
                message: "repository has no working tree".to_string(),
            });
        }
        Ok(repo)
    }

    /// Branch HEAD points at, born or not.
    fn current_branch(repo: &Repository, dir: &Path) -> Result<String, GitError> {
        let head = repo.find_reference("HEAD").at(dir, "read HEAD")?;
        match head.symbolic_target() {
            Some(target) => Ok(target
                .strip_prefix("refs/heads/")
                .unwrap_or(target)
                .to_string()),
            None => Err(GitError::Corrupt {
                path: dir.to_path_buf(),
                message: "HEAD is detached".to_string(),
            }),
        }
    }

    fn head_commit<'r>(repo: &'r Repository, dir: &Path) -> Result<Option<Commit<'r>>, GitError> {
        match repo.head() {
            Ok(head) => head.peel_to_commit().map(Some).at(dir, "resolve HEAD"),
            Err(e) if matches!(e.code(), ErrorCode::UnbornBranch | ErrorCode::NotFound) => Ok(None),
            Err(e) => Err(classify(e, dir, "resolve HEAD")),
        }
    }

    fn callbacks<'cb>(remote: &RemoteSpec) -> RemoteCallbacks<'cb> {
        let credential = remote.credential.clone();
        let mut attempts = 0usize;
        let mut callbacks = RemoteCallbacks::new();
        callbacks.credentials(move |url, username_from_url, _allowed_types| {
            attempts += 1;
            if attempts > MAX_CREDENTIAL_ATTEMPTS {
                return Err(git2::Error::new(
                    ErrorCode::Auth,
                    ErrorClass::Http,
                    "remote rejected the supplied credentials",
                ));
            }
            match &credential {
                Some(c) => Cred::userpass_plaintext(&c.username, c.secret()),
                None => match git2::Config::open_default() {
                    Ok(cfg) => Cred::credential_helper(&cfg, url, username_from_url),
                    Err(_) => Cred::default(),
                },
            }
        });
        callbacks
    }

    /// Point `origin` at the registry URL, creating it if needed.
    fn origin<'r>(
        repo: &'r Repository,
        remote: &RemoteSpec,
        dir: &Path,
    ) -> Result<git2::Remote<'r>, GitError> {
        let configured = repo
            .find_remote(ORIGIN)
            .ok()
            .and_then(|r| r.url().map(str::to_string));
        match configured {
            Some(url) if url == remote.url => {}
            Some(_) => repo.remote_set_url(ORIGIN, &remote.url).at(dir, "set origin url")?,
            None => {
                repo.remote(ORIGIN, &remote.url).at(dir, "add origin")?;
            }
        }
        repo.find_remote(ORIGIN).at(dir, "find origin")
    }

    /// Fetch `branch` and return the remote tip, if the remote has one.
    fn fetch_branch(
        repo: &Repository,
        remote: &RemoteSpec,
        branch: &str,
        dir: &Path,
    ) -> Result<Option<Oid>, GitError> {
        let mut origin = Self::origin(repo, remote, dir)?;
        let mut options = FetchOptions::new();
        options.remote_callbacks(Self::callbacks(remote));

        let refspec = format!("+refs/heads/{branch}:refs/remotes/{ORIGIN}/{branch}");
        tracing::debug!(branch, "fetching");
        origin
            .fetch(&[refspec.as_str()], Some(&mut options), None)
            .at(dir, "fetch")?;

        match repo.refname_to_id(&format!("refs/remotes/{ORIGIN}/{branch}")) {
            Ok(oid) => Ok(Some(oid)),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
            Err(e) => Err(classify(e, dir, "read remote branch")),
        }
    }

    /// Move `branch` to `target`, updating the working tree first.
    fn fast_forward(
        repo: &Repository,
        branch: &str,
        target: Oid,
        dir: &Path,
    ) -> Result<(), GitError> {
        let commit = repo.find_commit(target).at(dir, "find fetched commit")?;
        let mut checkout = CheckoutBuilder::new();
        checkout.safe();
        repo.checkout_tree(commit.as_object(), Some(&mut checkout))
            .at(dir, "checkout fetched tree")?;

        let refname = format!("refs/heads/{branch}");
        match repo.find_reference(&refname) {
            Ok(mut reference) => {
                reference
                    .set_target(target, "fast-forward")
                    .at(dir, "update branch")?;
            }
            Err(_) => {
                repo.reference(&refname, target, true, "fast-forward")
                    .at(dir, "create branch")?;
            }
        }
        repo.set_head(&refname).at(dir, "set HEAD")
    }

    fn changed_paths(
        repo: &Repository,
        old: &Tree<'_>,
        new: &Tree<'_>,
        dir: &Path,
    ) -> Result<BTreeSet<String>, GitError> {
        let diff = repo
            .diff_tree_to_tree(Some(old), Some(new), None)
            .at(dir, "diff trees")?;
        let mut paths = BTreeSet::new();
        for delta in diff.deltas() {
            for file in [delta.old_file(), delta.new_file()] {
                if let Some(path) = file.path() {
                    paths.insert(path.to_string_lossy().replace('\\', "/"));
                }
            }
        }
        Ok(paths)
    }

    /// Whether `commit` changed `path` relative to any of its parents.
    fn touches(commit: &Commit<'_>, path: &Path, dir: &Path) -> Result<bool, GitError> {
        let entry_id = |tree: Tree<'_>| tree.get_path(path).ok().map(|e| e.id());
        let own = entry_id(commit.tree().at(dir, "read commit tree")?);

        if commit.parent_count() == 0 {
            return Ok(own.is_some());
        }
        for parent in commit.parents() {
            if entry_id(parent.tree().at(dir, "read parent tree")?) != own {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn is_rejection(err: &git2::Error) -> bool {
        if err.code() == ErrorCode::NotFastForward {
            return true;
        }
        // libgit2 refuses locally when the remote ref points at a commit we
        // have never fetched.
        err.class() == ErrorClass::Reference
            && (err.message().contains("not present locally")
                || err.message().contains("non-fastforwardable"))
    }

    /// The remote tree with every path in `ours` taken from `local`.
    ///
    /// The index is in-memory, so entries must point at blobs that already
    /// exist in the object database.
    fn replay_tree(
        repo: &Repository,
        remote: &Tree<'_>,
        local: &Tree<'_>,
        ours: &BTreeSet<String>,
        dir: &Path,
    ) -> Result<Oid, GitError> {
        let mut index = Index::new().at(dir, "new index")?;
        index.read_tree(remote).at(dir, "read remote tree")?;
        for path in ours {
            match local.get_path(Path::new(path)) {
                Ok(entry) => {
                    let blob = repo.find_blob(entry.id()).at(dir, "read blob")?;
                    index
                        .add(&IndexEntry {
                            ctime: IndexTime::new(0, 0),
                            mtime: IndexTime::new(0, 0),
                            dev: 0,
                            ino: 0,
                            mode: entry.filemode() as u32,
                            uid: 0,
                            gid: 0,
                            file_size: blob.size() as u32,
                            id: entry.id(),
                            flags: 0,
                            flags_extended: 0,
                            path: path.as_bytes().to_vec(),
                        })
                        .at(dir, "stage replayed file")?;
                }
                Err(_) => index
                    .remove_path(Path::new(path))
                    .at(dir, "stage replayed removal")?,
            }
        }
        index.write_tree_to(repo).at(dir, "write replayed tree")
    }
}

impl GitClient for Git2Client {
    fn verify(&self, dir: &Path) -> Result<(), GitError> {
        let repo = Self::open(dir)?;
        Self::current_branch(&repo, dir)?;
        Self::head_commit(&repo, dir)?;
        Ok(())
    }

    fn clone_repo(&self, remote: &RemoteSpec, dir: &Path) -> Result<(), GitError> {
        let parent = dir.parent().ok_or_else(|| GitError::Other {
            message: format!("mirror path {} has no parent", dir.display()),
        })?;
        fs::create_dir_all(parent).map_err(|e| GitError::io(parent, e))?;

        // Clone next to the target and rename, so a half-finished clone is
        // never visible at the mirror path.
        let staging = tempfile::Builder::new()
            .prefix(".clone-")
            .tempdir_in(parent)
            .map_err(|e| GitError::io(parent, e))?;
        let staged = staging.path().join("repo");

        let mut options = FetchOptions::new();
        options.remote_callbacks(Self::callbacks(remote));

        tracing::info!(url = %remote.url, dir = %dir.display(), "cloning");
        RepoBuilder::new()
            .fetch_options(options)
            .clone(&remote.url, &staged)
            .at(dir, "clone")?;

        fs::rename(&staged, dir).map_err(|e| GitError::io(dir, e))?;
        Ok(())
    }

    fn pull(&self, remote: &RemoteSpec, dir: &Path) -> Result<PullOutcome, GitError> {
        let repo = Self::open(dir)?;
        let branch = Self::current_branch(&repo, dir)?;

        let Some(remote_tip) = Self::fetch_branch(&repo, remote, &branch, dir)? else {
            return Ok(PullOutcome::UpToDate);
        };

        let fetched = repo
            .find_annotated_commit(remote_tip)
            .at(dir, "read fetched commit")?;
        let (analysis, _) = repo.merge_analysis(&[&fetched]).at(dir, "merge analysis")?;

        if analysis.is_up_to_date() {
            Ok(PullOutcome::UpToDate)
        } else if analysis.is_fast_forward() || analysis.is_unborn() {
            Self::fast_forward(&repo, &branch, remote_tip, dir)?;
            tracing::debug!(branch, commit = %remote_tip, "fast-forwarded");
            Ok(PullOutcome::FastForwarded)
        } else {
            Ok(PullOutcome::Diverged)
        }
    }

    fn commit(
        &self,
        dir: &Path,
        paths: &[PathBuf],
        message: &str,
        author: &Author,
    ) -> Result<Option<String>, GitError> {
        let repo = Self::open(dir)?;
        let mut index = repo.index().at(dir, "open index")?;

        for path in paths {
            if dir.join(path).exists() {
                index.add_path(path).at(dir, "stage file")?;
            } else {
                index.remove_path(path).at(dir, "unstage file")?;
            }
        }
        index.write().at(dir, "write index")?;
        let tree_id = index.write_tree().at(dir, "write tree")?;

        let parent = Self::head_commit(&repo, dir)?;
        if parent.as_ref().is_some_and(|p| p.tree_id() == tree_id) {
            return Ok(None);
        }

        let tree = repo.find_tree(tree_id).at(dir, "find tree")?;
        let signature = Signature::now(&author.name, &author.email).at(dir, "signature")?;
        let parents: Vec<&Commit<'_>> = parent.iter().collect();
        let oid = repo
            .commit(Some("HEAD"), &signature, &signature, message, &tree, &parents)
            .at(dir, "commit")?;

        tracing::info!(commit = %oid, "committed");
        Ok(Some(oid.to_string()))
    }

    fn push(&self, remote: &RemoteSpec, dir: &Path) -> Result<PushOutcome, GitError> {
        let repo = Self::open(dir)?;
        let branch = Self::current_branch(&repo, dir)?;
        let mut origin = Self::origin(&repo, remote, dir)?;

        let rejected: RefCell<Option<String>> = RefCell::new(None);
        let mut callbacks = Self::callbacks(remote);
        callbacks.push_update_reference(|refname, status| {
            if let Some(status) = status {
                *rejected.borrow_mut() = Some(format!("{refname}: {status}"));
            }
            Ok(())
        });
        let mut options = PushOptions::new();
        options.remote_callbacks(callbacks);

        let refspec = format!("refs/heads/{branch}:refs/heads/{branch}");
        match origin.push(&[refspec.as_str()], Some(&mut options)) {
            Ok(()) => {}
            Err(e) if Self::is_rejection(&e) => {
                return Ok(PushOutcome::Rejected {
                    reason: e.message().to_string(),
                })
            }
            Err(e) => return Err(classify(e, dir, "push")),
        }

        if let Some(reason) = rejected.take() {
            return Ok(PushOutcome::Rejected { reason });
        }
        tracing::info!(branch, "pushed");
        Ok(PushOutcome::Pushed)
    }

    fn replay_onto_remote(
        &self,
        remote: &RemoteSpec,
        dir: &Path,
    ) -> Result<ReplayOutcome, GitError> {
        let repo = Self::open(dir)?;
        let branch = Self::current_branch(&repo, dir)?;

        let remote_tip = Self::fetch_branch(&repo, remote, &branch, dir)?.ok_or_else(|| {
            GitError::Other {
                message: format!("remote has no branch '{branch}'"),
            }
        })?;
        let local = Self::head_commit(&repo, dir)?.ok_or_else(|| GitError::Other {
            message: "nothing committed locally".to_string(),
        })?;
        let upstream = repo.find_commit(remote_tip).at(dir, "find remote tip")?;

        let base = match repo.merge_base(local.id(), remote_tip) {
            Ok(base) => base,
            Err(e) if e.code() == ErrorCode::NotFound => {
                return Ok(ReplayOutcome::Conflict {
                    paths: vec!["<unrelated histories>".to_string()],
                })
            }
            Err(e) => return Err(classify(e, dir, "merge base")),
        };
        if base == remote_tip {
            // Already on top of the remote.
            return Ok(ReplayOutcome::Replayed {
                commit: local.id().to_string(),
            });
        }

        let base_tree = repo
            .find_commit(base)
            .and_then(|c| c.tree())
            .at(dir, "read base tree")?;
        let local_tree = local.tree().at(dir, "read local tree")?;
        let remote_tree = upstream.tree().at(dir, "read remote tree")?;

        let ours = Self::changed_paths(&repo, &base_tree, &local_tree, dir)?;
        let theirs = Self::changed_paths(&repo, &base_tree, &remote_tree, dir)?;
        let overlap: Vec<String> = ours.intersection(&theirs).cloned().collect();
        if !overlap.is_empty() {
            return Ok(ReplayOutcome::Conflict { paths: overlap });
        }

        // Nothing on disk has changed yet; a failure here is not corruption.
        let tree_id = Self::replay_tree(&repo, &remote_tree, &local_tree, &ours, dir)
            .map_err(demote_corruption)?;
        let tree = repo.find_tree(tree_id).at(dir, "find replayed tree")?;

        let oid = repo
            .commit(
                None,
                &local.author(),
                &local.committer(),
                local.message().unwrap_or_default(),
                &tree,
                &[&upstream],
            )
            .at(dir, "commit replay")?;

        let refname = format!("refs/heads/{branch}");
        repo.find_reference(&refname)
            .and_then(|mut r| r.set_target(oid, "replay onto remote").map(|_| ()))
            .at(dir, "move branch")?;
        let mut checkout = CheckoutBuilder::new();
        checkout.force();
        repo.checkout_head(Some(&mut checkout))
            .at(dir, "checkout replayed commit")?;

        tracing::info!(commit = %oid, onto = %remote_tip, "replayed local commit");
        Ok(ReplayOutcome::Replayed {
            commit: oid.to_string(),
        })
    }

    fn is_dirty(&self, dir: &Path) -> Result<bool, GitError> {
        let repo = Self::open(dir)?;
        let mut options = StatusOptions::new();
        options
            .include_untracked(true)
            .recurse_untracked_dirs(true)
            .include_ignored(false);
        let statuses = repo.statuses(Some(&mut options)).at(dir, "status")?;
        Ok(!statuses.is_empty())
    }

    fn log(&self, dir: &Path, query: &LogQuery) -> Result<Vec<CommitInfo>, GitError> {
        let repo = Self::open(dir)?;
        if Self::head_commit(&repo, dir)?.is_none() {
            return Ok(Vec::new());
        }

        let mut walk = repo.revwalk().at(dir, "revwalk")?;
        walk.push_head().at(dir, "revwalk")?;
        walk.set_sorting(Sort::TOPOLOGICAL | Sort::TIME)
            .at(dir, "revwalk")?;

        let limit = query.effective_limit();
        let mut commits = Vec::new();
        for oid in walk {
            let oid = oid.at(dir, "revwalk")?;
            let commit = repo.find_commit(oid).at(dir, "find commit")?;
            if let Some(path) = &query.path {
                if !Self::touches(&commit, Path::new(path), dir)? {
                    continue;
                }
            }

            let author = commit.author();
            let id = oid.to_string();
            commits.push(CommitInfo {
                short_id: id.chars().take(7).collect(),
                id,
                author: author.name().unwrap_or_default().to_string(),
                email: author.email().unwrap_or_default().to_string(),
                date: DateTime::from_timestamp(commit.time().seconds(), 0).unwrap_or_default(),
                message: commit.summary().unwrap_or_default().to_string(),
            });
            if commits.len() >= limit {
                break;
            }
        }
        Ok(commits)
    }

    fn diff(&self, dir: &Path, query: &DiffQuery) -> Result<String, GitError> {
        let repo = Self::open(dir)?;
        let from = query.from.as_deref().unwrap_or("HEAD");
        let from_tree = repo
            .revparse_single(from)
            .and_then(|obj| obj.peel_to_tree())
            .at(dir, &format!("resolve '{from}'"))?;

        let mut options = DiffOptions::new();
        options.context_lines(3);
        if let Some(path) = &query.path {
            options.pathspec(path);
        }

        let diff = match &query.to {
            Some(to) => {
                let to_tree = repo
                    .revparse_single(to)
                    .and_then(|obj| obj.peel_to_tree())
                    .at(dir, &format!("resolve '{to}'"))?;
                repo.diff_tree_to_tree(Some(&from_tree), Some(&to_tree), Some(&mut options))
            }
            None => repo.diff_tree_to_workdir_with_index(Some(&from_tree), Some(&mut options)),
        }
        .at(dir, "diff")?;

        let mut out = String::new();
        diff.print(DiffFormat::Patch, |_delta, _hunk, line| {
            if matches!(line.origin(), '+' | '-' | ' ') {
                out.push(line.origin());
            }
            out.push_str(&String::from_utf8_lossy(line.content()));
            true
        })
        .at(dir, "render diff")?;
        Ok(out)
    }
}

/// A replay that fails locally leaves the mirror as it was before the attempt.
fn demote_corruption(err: GitError) -> GitError {
    match err {
        GitError::Corrupt { message, .. } => GitError::Other { message },
        other => other,
    }
}
