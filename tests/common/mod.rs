//! Shared fixtures: a bare "remote" repository on disk and helpers that
//! play the part of another collaborator pushing to it.

#![allow(dead_code)]

use git2::{Commit, Repository, RepositoryInitOptions, Signature, Sort};
use overleaf_store::config::{ProjectConfig, ProjectRegistry, RegistryConfig};
use overleaf_store::ProjectStore;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const PROJECT: &str = "paper";

pub const MAIN_TEX: &str = "\\documentclass{article}
\\begin{document}
\\chapter{A}
foo
\\section{B}
bar
\\section{C}
baz
\\end{document}
";

pub struct Fixture {
    pub dir: TempDir,
    pub remote: PathBuf,
}

impl Fixture {
    /// A remote whose `main` branch holds `files` in one commit.
    pub fn new(files: &[(&str, &str)]) -> Self {
        let dir = TempDir::new().unwrap();
        let remote = dir.path().join("remote.git");

        let mut bare = RepositoryInitOptions::new();
        bare.bare(true).initial_head("main");
        Repository::init_opts(&remote, &bare).unwrap();

        let mut seed_opts = RepositoryInitOptions::new();
        seed_opts.initial_head("main");
        let seed = Repository::init_opts(dir.path().join("seed"), &seed_opts).unwrap();
        let changes: Vec<_> = files.iter().map(|(p, c)| (*p, Some(*c))).collect();
        commit_files(&seed, &changes, "Initial commit");
        push_main(&seed, &remote);

        Self { dir, remote }
    }

    pub fn with_main_tex() -> Self {
        Self::new(&[("main.tex", MAIN_TEX), ("refs.bib", "@book{x}\n")])
    }

    pub fn config(&self) -> RegistryConfig {
        let mut projects = BTreeMap::new();
        projects.insert(
            PROJECT.to_string(),
            ProjectConfig {
                name: Some("Paper".to_string()),
                remote: Some(self.remote.to_string_lossy().into_owned()),
                ..ProjectConfig::default()
            },
        );
        RegistryConfig {
            mirror_root: Some(self.dir.path().join("mirrors")),
            projects,
            ..RegistryConfig::default()
        }
    }

    pub fn registry(&self) -> ProjectRegistry {
        ProjectRegistry::from_config(self.config()).unwrap()
    }

    pub fn store(&self) -> ProjectStore {
        ProjectStore::new(self.registry())
    }

    pub fn mirror_path(&self) -> PathBuf {
        self.dir.path().join("mirrors").join(PROJECT)
    }

    /// Commit `files` to the remote from a separate clone, as another
    /// collaborator would. `None` content deletes the file.
    pub fn push_upstream(&self, files: &[(&str, Option<&str>)], message: &str) {
        push_upstream(&self.remote, files, message);
    }

    /// Content of `path` at the remote's `main`.
    pub fn remote_file(&self, path: &str) -> Option<String> {
        let repo = Repository::open_bare(&self.remote).unwrap();
        let tree = repo
            .find_reference("refs/heads/main")
            .unwrap()
            .peel_to_tree()
            .unwrap();
        let entry = tree.get_path(Path::new(path)).ok()?;
        let blob = entry.to_object(&repo).unwrap().peel_to_blob().unwrap();
        Some(String::from_utf8(blob.content().to_vec()).unwrap())
    }

    /// Commit messages on the remote's `main`, newest first.
    pub fn remote_log(&self) -> Vec<String> {
        let repo = Repository::open_bare(&self.remote).unwrap();
        let mut walk = repo.revwalk().unwrap();
        walk.push_ref("refs/heads/main").unwrap();
        walk.set_sorting(Sort::TOPOLOGICAL).unwrap();
        walk.map(|oid| {
            let commit = repo.find_commit(oid.unwrap()).unwrap();
            commit.summary().unwrap_or_default().to_string()
        })
        .collect()
    }

    /// Whether every commit on the remote's `main` has at most one parent.
    pub fn remote_is_linear(&self) -> bool {
        let repo = Repository::open_bare(&self.remote).unwrap();
        let mut walk = repo.revwalk().unwrap();
        walk.push_ref("refs/heads/main").unwrap();
        walk.set_sorting(Sort::TOPOLOGICAL).unwrap();
        walk.all(|oid| repo.find_commit(oid.unwrap()).unwrap().parent_count() <= 1)
    }
}

pub fn push_upstream(remote: &Path, files: &[(&str, Option<&str>)], message: &str) {
    let scratch = TempDir::new().unwrap();
    let repo = Repository::clone(&remote.to_string_lossy(), scratch.path().join("work")).unwrap();
    commit_files(&repo, files, message);
    push_main(&repo, remote);
}

fn commit_files(repo: &Repository, files: &[(&str, Option<&str>)], message: &str) {
    let workdir = repo.workdir().unwrap().to_path_buf();
    let mut index = repo.index().unwrap();
    for (path, content) in files {
        let full = workdir.join(path);
        match content {
            Some(content) => {
                if let Some(parent) = full.parent() {
                    fs::create_dir_all(parent).unwrap();
                }
                fs::write(&full, content).unwrap();
                index.add_path(Path::new(path)).unwrap();
            }
            None => {
                fs::remove_file(&full).unwrap();
                index.remove_path(Path::new(path)).unwrap();
            }
        }
    }
    index.write().unwrap();

    let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
    let signature = Signature::now("Collaborator", "collaborator@example.com").unwrap();
    let parent = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
    let parents: Vec<&Commit> = parent.iter().collect();
    repo.commit(Some("HEAD"), &signature, &signature, message, &tree, &parents)
        .unwrap();
}

fn push_main(repo: &Repository, remote: &Path) {
    let mut origin = repo.remote_anonymous(&remote.to_string_lossy()).unwrap();
    origin
        .push(&["refs/heads/main:refs/heads/main"], None)
        .unwrap();
}
