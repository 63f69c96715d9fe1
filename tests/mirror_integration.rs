//! Mirror synchronization against a real on-disk remote.

mod common;

use common::{Fixture, MAIN_TEX, PROJECT};
use overleaf_store::config::RemoteSpec;
use overleaf_store::mirror::{GitError, PullOutcome, PushOutcome, ReplayOutcome};
use overleaf_store::{
    Author, CommitInfo, DiffQuery, EditIntent, Git2Client, GitClient, LogQuery, MirrorState,
    ProjectStore, StoreError, SyncError, WriteOptions,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

type Hook = Box<dyn FnOnce() -> Result<(), GitError> + Send>;

/// Delegates to libgit2 but runs a hook right before the first push, so a
/// collaborator can land a commit between our pull and our push, or the
/// network can drop out.
struct RacingClient {
    inner: Git2Client,
    before_push: Mutex<Option<Hook>>,
}

impl RacingClient {
    fn new(hook: impl FnOnce() + Send + 'static) -> Self {
        Self::with_hook(move || {
            hook();
            Ok(())
        })
    }

    /// The first push fails as if the remote were unreachable.
    fn offline_once() -> Self {
        Self::with_hook(|| {
            Err(SyncError::NetworkError {
                message: "connection reset".to_string(),
            }
            .into())
        })
    }

    fn with_hook(hook: impl FnOnce() -> Result<(), GitError> + Send + 'static) -> Self {
        Self {
            inner: Git2Client,
            before_push: Mutex::new(Some(Box::new(hook))),
        }
    }
}

impl GitClient for RacingClient {
    fn verify(&self, dir: &Path) -> Result<(), GitError> {
        self.inner.verify(dir)
    }

    fn clone_repo(&self, remote: &RemoteSpec, dir: &Path) -> Result<(), GitError> {
        self.inner.clone_repo(remote, dir)
    }

    fn pull(&self, remote: &RemoteSpec, dir: &Path) -> Result<PullOutcome, GitError> {
        self.inner.pull(remote, dir)
    }

    fn commit(
        &self,
        dir: &Path,
        paths: &[PathBuf],
        message: &str,
        author: &Author,
    ) -> Result<Option<String>, GitError> {
        self.inner.commit(dir, paths, message, author)
    }

    fn push(&self, remote: &RemoteSpec, dir: &Path) -> Result<PushOutcome, GitError> {
        let hook = self.before_push.lock().unwrap().take();
        if let Some(hook) = hook {
            hook()?;
        }
        self.inner.push(remote, dir)
    }

    fn replay_onto_remote(
        &self,
        remote: &RemoteSpec,
        dir: &Path,
    ) -> Result<ReplayOutcome, GitError> {
        self.inner.replay_onto_remote(remote, dir)
    }

    fn is_dirty(&self, dir: &Path) -> Result<bool, GitError> {
        self.inner.is_dirty(dir)
    }

    fn log(&self, dir: &Path, query: &LogQuery) -> Result<Vec<CommitInfo>, GitError> {
        self.inner.log(dir, query)
    }

    fn diff(&self, dir: &Path, query: &DiffQuery) -> Result<String, GitError> {
        self.inner.diff(dir, query)
    }
}

fn append(path: &str, title: &str, content: &str) -> EditIntent {
    EditIntent::AppendToSection {
        path: path.into(),
        title: title.into(),
        content: content.into(),
    }
}

#[test]
fn test_first_access_clones_mirror() {
    let fixture = Fixture::with_main_tex();
    let store = fixture.store();

    assert_eq!(
        store.mirrors().state(PROJECT).unwrap(),
        MirrorState::Absent
    );
    assert_eq!(store.read_file(None, "main.tex").unwrap(), MAIN_TEX);
    assert!(fixture.mirror_path().join(".git").is_dir());
    assert_eq!(store.mirrors().state(PROJECT).unwrap(), MirrorState::Ready);

    // No staging directories are left next to the mirror.
    let leftovers: Vec<_> = fs::read_dir(fixture.dir.path().join("mirrors"))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name != PROJECT)
        .collect();
    assert!(leftovers.is_empty(), "unexpected entries: {leftovers:?}");
}

#[test]
fn test_existing_mirror_is_reused_by_new_process() {
    let fixture = Fixture::with_main_tex();
    fixture.store().read_file(None, "main.tex").unwrap();

    fixture.push_upstream(&[("notes.tex", Some("notes\n"))], "Add notes");

    // A fresh store finds the mirror on disk, verifies it and pulls.
    let store = fixture.store();
    assert_eq!(store.read_file(None, "notes.tex").unwrap(), "notes\n");
}

#[test]
fn test_sync_fast_forwards_upstream_changes() {
    let fixture = Fixture::with_main_tex();
    let store = fixture.store();
    store.read_file(None, "main.tex").unwrap();

    fixture.push_upstream(&[("main.tex", Some("\\section{New}\n"))], "Rewrite");

    assert_eq!(store.sync(None).unwrap(), MirrorState::Ready);
    assert_eq!(store.read_file(None, "main.tex").unwrap(), "\\section{New}\n");
}

#[test]
fn test_sync_refuses_dirty_working_tree() {
    let fixture = Fixture::with_main_tex();
    let store = fixture.store();
    store.read_file(None, "main.tex").unwrap();

    fs::write(fixture.mirror_path().join("stray.tex"), "x").unwrap();

    let err = store.sync(None).unwrap_err();
    assert!(matches!(err, StoreError::DirtyWorkingTree { .. }));
}

#[test]
fn test_diverged_history_marks_conflicted_until_refresh() {
    let fixture = Fixture::with_main_tex();
    let store = fixture.store();

    // A local commit the remote never sees...
    let local_only = WriteOptions {
        push: false,
        ..WriteOptions::default()
    };
    let outcome = store
        .apply(None, &append("main.tex", "B", "local"), &local_only)
        .unwrap();
    assert!(outcome.commit.is_some());
    assert!(!outcome.pushed);

    // ...and a remote commit we do not have.
    fixture.push_upstream(&[("refs.bib", Some("@book{y}\n"))], "Upstream");

    let err = store.sync(None).unwrap_err();
    assert!(matches!(err, StoreError::Sync(SyncError::DivergedHistory)));
    assert_eq!(
        store.mirrors().state(PROJECT).unwrap(),
        MirrorState::Conflicted
    );

    store.refresh(None).unwrap();
    assert_eq!(store.mirrors().state(PROJECT).unwrap(), MirrorState::Ready);
    assert_eq!(store.read_file(None, "refs.bib").unwrap(), "@book{y}\n");
    assert!(!store.read_file(None, "main.tex").unwrap().contains("local"));
}

#[test]
fn test_push_is_replayed_when_remote_moved_on_other_files() {
    let fixture = Fixture::with_main_tex();
    let remote = fixture.remote.clone();
    let client = RacingClient::new(move || {
        common::push_upstream(&remote, &[("refs.bib", Some("@book{z}\n"))], "Bib update");
    });
    let store = ProjectStore::with_client(fixture.registry(), client);

    let outcome = store
        .apply(None, &append("main.tex", "B", "more"), &WriteOptions::default())
        .unwrap();

    assert!(outcome.pushed);
    assert!(outcome.retried);
    assert_eq!(store.mirrors().state(PROJECT).unwrap(), MirrorState::Ready);
    assert_eq!(fixture.remote_file("refs.bib").unwrap(), "@book{z}\n");
    assert!(fixture.remote_file("main.tex").unwrap().contains("bar\nmore\n"));

    let log = fixture.remote_log();
    assert_eq!(log.len(), 3);
    assert_eq!(log[0], "Append to section 'B'");
    assert_eq!(log[1], "Bib update");
    assert!(fixture.remote_is_linear());

    // The mirror sits on the pushed commit.
    assert_eq!(store.sync(None).unwrap(), MirrorState::Ready);
    let head = &store.history(None, &LogQuery::default()).unwrap()[0];
    assert_eq!(Some(head.id.clone()), outcome.commit);
}

#[test]
fn test_push_rejected_when_remote_changed_same_file() {
    let fixture = Fixture::with_main_tex();
    let remote = fixture.remote.clone();
    let client = RacingClient::new(move || {
        common::push_upstream(&remote, &[("main.tex", Some("\\section{Theirs}\n"))], "Theirs");
    });
    let store = ProjectStore::with_client(fixture.registry(), client);

    let err = store
        .apply(None, &append("main.tex", "B", "mine"), &WriteOptions::default())
        .unwrap_err();
    assert!(matches!(err, StoreError::PushRejected { .. }), "{err}");
    assert_eq!(
        store.mirrors().state(PROJECT).unwrap(),
        MirrorState::Conflicted
    );
    assert_eq!(fixture.remote_file("main.tex").unwrap(), "\\section{Theirs}\n");

    // The local write is still there until the mirror is refreshed.
    let local = fs::read_to_string(fixture.mirror_path().join("main.tex")).unwrap();
    assert!(local.contains("mine"));

    store.refresh(None).unwrap();
    assert_eq!(
        store.read_file(None, "main.tex").unwrap(),
        "\\section{Theirs}\n"
    );
}

#[test]
fn test_replayed_write_lands_in_subdirectory_beside_remote_change() {
    let fixture = Fixture::with_main_tex();
    let remote = fixture.remote.clone();
    let client = RacingClient::new(move || {
        common::push_upstream(&remote, &[("main.tex", Some("\\section{Theirs}\n"))], "Theirs");
    });
    let store = ProjectStore::with_client(fixture.registry(), client);

    let create = EditIntent::Create {
        path: "chapters/intro.tex".into(),
        content: "intro\n".into(),
    };
    let outcome = store.apply(None, &create, &WriteOptions::default()).unwrap();

    assert!(outcome.retried);
    assert_eq!(fixture.remote_file("chapters/intro.tex").unwrap(), "intro\n");
    assert_eq!(fixture.remote_file("main.tex").unwrap(), "\\section{Theirs}\n");
    assert!(fixture.remote_is_linear());

    // The working tree matches the replayed commit.
    assert_eq!(
        fs::read_to_string(fixture.mirror_path().join("main.tex")).unwrap(),
        "\\section{Theirs}\n"
    );
    assert!(!store.mirrors().lock(PROJECT).unwrap().is_dirty().unwrap());
}

#[test]
fn test_push_completes_write_made_without_pushing() {
    let fixture = Fixture::with_main_tex();
    let store = fixture.store();
    let create = EditIntent::Create {
        path: "notes.tex".into(),
        content: "notes\n".into(),
    };
    let local_only = WriteOptions {
        push: false,
        ..WriteOptions::default()
    };

    store.apply(None, &create, &local_only).unwrap();
    assert_eq!(fixture.remote_file("notes.tex"), None);

    // Neither pulling nor repeating the write gets the commit out.
    store.sync(None).unwrap();
    assert_eq!(fixture.remote_file("notes.tex"), None);
    let again = store
        .apply(None, &create, &WriteOptions::default())
        .unwrap_err();
    assert!(matches!(again, StoreError::AlreadyExists { .. }), "{again}");

    let report = store.push(None).unwrap();
    assert!(report.pushed);
    assert!(!report.retried);
    assert_eq!(fixture.remote_file("notes.tex").unwrap(), "notes\n");
    assert_eq!(fixture.remote_log()[0], "Add notes.tex");
}

#[test]
fn test_push_completes_write_after_network_failure() {
    let fixture = Fixture::with_main_tex();
    let store = ProjectStore::with_client(fixture.registry(), RacingClient::offline_once());

    let err = store
        .apply(None, &append("main.tex", "B", "durable"), &WriteOptions::default())
        .unwrap_err();
    assert!(err.is_retriable(), "{err}");
    assert_eq!(store.mirrors().state(PROJECT).unwrap(), MirrorState::Ready);
    assert!(!fixture.remote_file("main.tex").unwrap().contains("durable"));

    // The write is committed locally and survives until pushed.
    let local = fs::read_to_string(fixture.mirror_path().join("main.tex")).unwrap();
    assert!(local.contains("bar\ndurable\n"));

    // Meanwhile a collaborator changed another file.
    fixture.push_upstream(&[("refs.bib", Some("@book{w}\n"))], "Bib update");

    let report = store.push(None).unwrap();
    assert!(report.pushed);
    assert!(report.retried);
    assert!(fixture
        .remote_file("main.tex")
        .unwrap()
        .contains("bar\ndurable\n"));
    assert_eq!(fixture.remote_file("refs.bib").unwrap(), "@book{w}\n");
    assert!(fixture.remote_is_linear());
    assert_eq!(store.mirrors().state(PROJECT).unwrap(), MirrorState::Ready);
}

#[test]
fn test_push_with_nothing_pending_is_harmless() {
    let fixture = Fixture::with_main_tex();
    let store = fixture.store();
    store.read_file(None, "main.tex").unwrap();

    let report = store.push(None).unwrap();
    assert!(report.pushed);
    assert_eq!(report.commit, None);
    assert_eq!(fixture.remote_log(), ["Initial commit"]);
}

#[test]
fn test_corrupt_mirror_on_disk_is_recloned() {
    let fixture = Fixture::with_main_tex();
    let path = fixture.mirror_path();
    fs::create_dir_all(&path).unwrap();
    fs::write(path.join("garbage"), "not a repository").unwrap();

    let store = fixture.store();
    assert_eq!(store.read_file(None, "main.tex").unwrap(), MAIN_TEX);
    assert!(!path.join("garbage").exists());
}

#[test]
fn test_unreachable_remote_leaves_mirror_absent() {
    let fixture = Fixture::with_main_tex();
    fs::remove_dir_all(&fixture.remote).unwrap();

    let store = fixture.store();
    assert!(store.read_file(None, "main.tex").is_err());
    assert_eq!(
        store.mirrors().state(PROJECT).unwrap(),
        MirrorState::Absent
    );
    assert!(!fixture.mirror_path().exists());
}
