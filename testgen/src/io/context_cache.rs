//! Project context cache stored at `.testgen/cache/project_context.json`.
//!
//! The cache is a pure optimization. Saving never fails the caller, and on
//! load the snapshot is reconciled against the live filesystem:
//!
//! - every tracked config file must still be readable, otherwise the whole
//!   entry is discarded;
//! - content that drifted is replaced with the live content and written back
//!   once;
//! - when nothing drifted the cached entry is returned without any write.
//!
//! There is no cross-process locking. Concurrent writers are last-writer-wins.

use std::cell::Cell;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::paths::TestgenPaths;

/// Manifest re-read when the snapshot recorded no package manager.
pub const DEFAULT_MANIFEST: &str = "package.json";

/// A config file path plus a verbatim snapshot of its content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigFile {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageManager {
    /// `npm`, `pnpm`, `yarn` or `bun`.
    pub name: String,
    pub manifest: ConfigFile,
}

/// Project metadata gathered by introspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectContext {
    pub project_root: PathBuf,
    /// Every config-like file discovered, project-relative.
    #[serde(default)]
    pub config_files: Vec<String>,
    pub language_config: Option<ConfigFile>,
    pub linter_config: Option<ConfigFile>,
    pub formatter_config: Option<ConfigFile>,
    pub package_manager: Option<PackageManager>,
}

/// Snapshot fields whose content is reconciled on load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackedFile {
    Language,
    Linter,
    Formatter,
    PackageManifest,
}

impl TrackedFile {
    pub const ALL: [TrackedFile; 4] = [
        TrackedFile::Language,
        TrackedFile::Linter,
        TrackedFile::Formatter,
        TrackedFile::PackageManifest,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TrackedFile::Language => "language_config",
            TrackedFile::Linter => "linter_config",
            TrackedFile::Formatter => "formatter_config",
            TrackedFile::PackageManifest => "package_manager",
        }
    }
}

impl ProjectContext {
    fn snapshot(&self, field: TrackedFile) -> Option<&ConfigFile> {
        match field {
            TrackedFile::Language => self.language_config.as_ref(),
            TrackedFile::Linter => self.linter_config.as_ref(),
            TrackedFile::Formatter => self.formatter_config.as_ref(),
            TrackedFile::PackageManifest => self.package_manager.as_ref().map(|pm| &pm.manifest),
        }
    }

    fn snapshot_mut(&mut self, field: TrackedFile) -> Option<&mut ConfigFile> {
        match field {
            TrackedFile::Language => self.language_config.as_mut(),
            TrackedFile::Linter => self.linter_config.as_mut(),
            TrackedFile::Formatter => self.formatter_config.as_mut(),
            TrackedFile::PackageManifest => {
                self.package_manager.as_mut().map(|pm| &mut pm.manifest)
            }
        }
    }
}

/// What reconciliation decided about the cached entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLoad {
    /// No cache file exists.
    Missing,
    /// The entry is unreadable, corrupt, or references a missing file.
    Invalid,
    /// Every tracked file matches its snapshot; nothing was written.
    Fresh(ProjectContext),
    /// Drifted content was refreshed and persisted.
    Healed {
        context: ProjectContext,
        updated: Vec<TrackedFile>,
    },
}

impl CacheLoad {
    pub fn into_context(self) -> Option<ProjectContext> {
        match self {
            CacheLoad::Missing | CacheLoad::Invalid => None,
            CacheLoad::Fresh(context) | CacheLoad::Healed { context, .. } => Some(context),
        }
    }
}

/// Cache for one project root.
#[derive(Debug, Clone)]
pub struct ProjectContextCache {
    project_root: PathBuf,
    cache_path: PathBuf,
    /// Successful writes made through this handle.
    writes: Cell<usize>,
}

impl ProjectContextCache {
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        let project_root = project_root.into();
        let cache_path = TestgenPaths::new(&project_root).context_cache_path;
        Self {
            project_root,
            cache_path,
            writes: Cell::new(0),
        }
    }

    pub fn cache_path(&self) -> &Path {
        &self.cache_path
    }

    pub fn has_cache(&self) -> bool {
        self.cache_path.is_file()
    }

    /// Persist `context`. Failures are logged and otherwise ignored.
    pub fn save(&self, context: &ProjectContext) {
        match write_context(&self.cache_path, context) {
            Ok(()) => {
                self.writes.set(self.writes.get() + 1);
                debug!(path = %self.cache_path.display(), "saved project context cache");
            }
            Err(err) => warn!(
                path = %self.cache_path.display(),
                err = %format!("{err:#}"),
                "failed to save project context cache"
            ),
        }
    }

    #[cfg(test)]
    pub(crate) fn write_count(&self) -> usize {
        self.writes.get()
    }

    /// Load the cached context if it is still trustworthy.
    pub fn load(&self) -> Option<ProjectContext> {
        self.reconcile().into_context()
    }

    /// Load and reconcile the cached context against the filesystem.
    pub fn reconcile(&self) -> CacheLoad {
        if !self.has_cache() {
            debug!(path = %self.cache_path.display(), "no project context cache");
            return CacheLoad::Missing;
        }

        let cached = match read_context(&self.cache_path) {
            Ok(cached) => cached,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "ignoring unreadable project context cache");
                return CacheLoad::Invalid;
            }
        };

        let mut refreshed = cached.clone();
        let mut updated = Vec::new();
        for field in TrackedFile::ALL {
            let path = match cached.snapshot(field) {
                Some(snapshot) => snapshot.path.as_str(),
                None if field == TrackedFile::PackageManifest => DEFAULT_MANIFEST,
                None => continue,
            };
            let live = match fs::read_to_string(self.project_root.join(path)) {
                Ok(live) => live,
                Err(err) => {
                    info!(
                        field = field.as_str(),
                        path,
                        err = %err,
                        "tracked file unreadable, invalidating cache"
                    );
                    return CacheLoad::Invalid;
                }
            };
            if let Some(snapshot) = refreshed.snapshot_mut(field)
                && snapshot.content != live
            {
                debug!(field = field.as_str(), path, "tracked file drifted");
                snapshot.content = live;
                updated.push(field);
            }
        }

        if updated.is_empty() {
            debug!("project context cache is fresh");
            return CacheLoad::Fresh(cached);
        }

        info!(updated = updated.len(), "refreshing drifted project context cache");
        self.save(&refreshed);
        CacheLoad::Healed {
            context: refreshed,
            updated,
        }
    }

    /// Delete the cache file. Returns whether a file was removed.
    pub fn clear(&self) -> Result<bool> {
        if !self.cache_path.exists() {
            return Ok(false);
        }
        fs::remove_file(&self.cache_path)
            .with_context(|| format!("remove cache {}", self.cache_path.display()))?;
        Ok(true)
    }
}

fn read_context(path: &Path) -> Result<ProjectContext> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read cache {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse cache {}", path.display()))
}

/// Atomically write the cache (temp file + rename).
fn write_context(path: &Path, context: &ProjectContext) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("cache path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let mut buf = serde_json::to_string_pretty(context).context("serialize project context")?;
    buf.push('\n');
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, buf)
        .with_context(|| format!("write temp cache {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace cache {}", path.display()))?;
    Ok(())
}
