//! The operation surface: one entry point per thing a caller can ask for.

use crate::config::{ConfigError, ProjectRegistry, RegistryConfig};
use crate::edit::read_text;
use crate::engine::{EditEngine, EditIntent, EditOutcome, WriteOptions};
use crate::error::StoreError;
use crate::latex::{self, OutlineEntry, TitleMatch};
use crate::mirror::{
    CommitInfo, DiffQuery, Git2Client, GitClient, LogQuery, MirrorLease, MirrorState, MirrorStore,
    PushReport,
};
use crate::safety::PathGuard;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use walkdir::WalkDir;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectSummary {
    pub name: String,
    pub display_name: String,
    pub url: String,
    pub is_default: bool,
}

/// Section-aware access to every configured project.
///
/// `project` arguments take a registry key; `None` means the default
/// project.
pub struct ProjectStore<C: GitClient = Git2Client> {
    registry: Arc<ProjectRegistry>,
    mirrors: Arc<MirrorStore<C>>,
    engine: EditEngine<C>,
}

impl ProjectStore<Git2Client> {
    pub fn new(registry: ProjectRegistry) -> Self {
        Self::with_client(registry, Git2Client)
    }

    pub fn from_config(config: RegistryConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(ProjectRegistry::from_config(config)?))
    }
}

impl<C: GitClient> ProjectStore<C> {
    pub fn with_client(registry: ProjectRegistry, client: C) -> Self {
        let registry = Arc::new(registry);
        let mirrors = Arc::new(MirrorStore::with_client(Arc::clone(&registry), client));
        let engine = EditEngine::new(Arc::clone(&mirrors));
        Self {
            registry,
            mirrors,
            engine,
        }
    }

    pub fn registry(&self) -> &ProjectRegistry {
        &self.registry
    }

    pub fn mirrors(&self) -> &Arc<MirrorStore<C>> {
        &self.mirrors
    }

    pub fn list_projects(&self) -> Vec<ProjectSummary> {
        let default = self.registry.default_project().map(|p| p.name.as_str());
        self.registry
            .projects()
            .map(|p| ProjectSummary {
                name: p.name.clone(),
                display_name: p.display_name.clone(),
                url: p.remote.url.clone(),
                is_default: Some(p.name.as_str()) == default,
            })
            .collect()
    }

    /// Files in the project, relative and sorted. Hidden entries are skipped.
    ///
    /// `extension` may be given with or without the leading dot.
    pub fn list_files(
        &self,
        project: Option<&str>,
        extension: Option<&str>,
    ) -> Result<Vec<String>, StoreError> {
        let extension = extension
            .map(|e| e.trim_start_matches('.'))
            .filter(|e| !e.is_empty());

        self.with_mirror(project, |_, root| {
            let mut files = Vec::new();
            let walker = WalkDir::new(root)
                .into_iter()
                .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'));
            for entry in walker {
                let entry = entry.map_err(|e| {
                    let path = e.path().unwrap_or(root).to_path_buf();
                    StoreError::io(path, e.into())
                })?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let path = entry.path();
                if let Some(ext) = extension {
                    if path.extension().and_then(|e| e.to_str()) != Some(ext) {
                        continue;
                    }
                }
                if let Ok(relative) = path.strip_prefix(root) {
                    let parts: Vec<_> = relative
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy())
                        .collect();
                    files.push(parts.join("/"));
                }
            }
            files.sort();
            Ok(files)
        })
    }

    pub fn read_file(&self, project: Option<&str>, path: &str) -> Result<String, StoreError> {
        self.with_mirror(project, |_, root| read_in(root, path))
    }

    /// Flattened section outline of a LaTeX file.
    pub fn sections(
        &self,
        project: Option<&str>,
        path: &str,
    ) -> Result<Vec<OutlineEntry>, StoreError> {
        self.with_mirror(project, |_, root| {
            let content = read_in(root, path)?;
            let index = latex::parse(&content);
            Ok(latex::outline(&content, &index))
        })
    }

    /// Body of the section titled `title`.
    pub fn section_content(
        &self,
        project: Option<&str>,
        path: &str,
        title: &str,
        mode: TitleMatch,
    ) -> Result<String, StoreError> {
        self.with_mirror(project, |_, root| {
            let content = read_in(root, path)?;
            let index = latex::parse(&content);
            let lookup =
                latex::find(&index, title, mode).map_err(|e| e.into_store_error(path))?;
            Ok(latex::get_content(&content, lookup.section).to_string())
        })
    }

    pub fn history(
        &self,
        project: Option<&str>,
        query: &LogQuery,
    ) -> Result<Vec<CommitInfo>, StoreError> {
        self.with_mirror(project, |lease, root| {
            if let Some(path) = &query.path {
                PathGuard::new(root)?.resolve(path)?;
            }
            lease.history(query)
        })
    }

    pub fn diff(&self, project: Option<&str>, query: &DiffQuery) -> Result<String, StoreError> {
        self.with_mirror(project, |lease, root| {
            if let Some(path) = &query.path {
                PathGuard::new(root)?.resolve(path)?;
            }
            lease.diff(query)
        })
    }

    /// Pull the latest remote state. Refuses while the mirror has
    /// uncommitted changes.
    pub fn sync(&self, project: Option<&str>) -> Result<MirrorState, StoreError> {
        let name = self.project_name(project)?;
        let mut lease = self.mirrors.lock(&name)?;

        if lease.root().exists() && lease.state() != MirrorState::Corrupt {
            match lease.is_dirty() {
                Ok(true) => return Err(StoreError::DirtyWorkingTree { project: name }),
                Ok(false) => {}
                // Marked corrupt; `ensure` re-clones below.
                Err(StoreError::CorruptMirror { .. }) => {}
                Err(err) => return Err(err),
            }
        }

        lease.ensure()?;
        Ok(lease.state())
    }

    /// Discard the mirror and clone it again.
    pub fn refresh(&self, project: Option<&str>) -> Result<(), StoreError> {
        let name = self.project_name(project)?;
        self.mirrors.lock(&name)?.refresh()?;
        Ok(())
    }

    /// Push local commits the remote has not seen yet.
    ///
    /// This is how a write finishes after its push failed or was skipped;
    /// repeating the write itself would usually fail, since the file has
    /// already changed.
    pub fn push(&self, project: Option<&str>) -> Result<PushReport, StoreError> {
        let name = self.project_name(project)?;
        self.mirrors.lock(&name)?.push_pending()
    }

    pub fn apply(
        &self,
        project: Option<&str>,
        intent: &EditIntent,
        options: &WriteOptions,
    ) -> Result<EditOutcome, StoreError> {
        let name = self.project_name(project)?;
        self.engine.apply(&name, intent, options)
    }

    fn project_name(&self, project: Option<&str>) -> Result<String, StoreError> {
        Ok(self.registry.resolve_or_default(project)?.name.clone())
    }

    fn with_mirror<T>(
        &self,
        project: Option<&str>,
        op: impl FnOnce(&mut MirrorLease<'_, C>, &Path) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let name = self.project_name(project)?;
        let mut lease = self.mirrors.lock(&name)?;
        let root = lease.ensure()?;
        op(&mut lease, root)
    }
}

/// Read a text file under `root` through the path guard.
fn read_in(root: &Path, path: &str) -> Result<String, StoreError> {
    let target = PathGuard::new(root)?.resolve(path)?;
    read_text(&target)?.ok_or_else(|| StoreError::file_not_found(path))
}
