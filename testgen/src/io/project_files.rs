//! Read-only access to project sources and agent path resolution.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, warn};

use crate::core::candidates::{normalize_request, resolution_candidates};

/// Read capability over the project tree. Paths are project-relative.
pub trait ProjectFiles {
    /// Read a file's content; fails when the path does not exist.
    fn read_file(&self, path: &str) -> Result<String>;
}

/// [`ProjectFiles`] backed by the filesystem under `root`.
#[derive(Debug, Clone)]
pub struct FsProjectFiles {
    root: PathBuf,
}

impl FsProjectFiles {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ProjectFiles for FsProjectFiles {
    fn read_file(&self, path: &str) -> Result<String> {
        let full = self.root.join(path);
        fs::read_to_string(&full).with_context(|| format!("read {}", full.display()))
    }
}

/// Outcome of resolving one requested path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Resolution {
    Resolved {
        requested: String,
        actual_path: String,
        content: String,
    },
    NotFound {
        requested: String,
        attempted_paths: Vec<String>,
    },
}

impl Resolution {
    pub fn is_resolved(&self) -> bool {
        matches!(self, Resolution::Resolved { .. })
    }

    /// True when the file was found under a different path than requested.
    pub fn was_substituted(&self) -> bool {
        match self {
            Resolution::Resolved {
                requested,
                actual_path,
                ..
            } => requested != actual_path,
            Resolution::NotFound { .. } => false,
        }
    }
}

/// Maps agent-requested paths onto real project files.
pub struct FileResolver<'a, F: ProjectFiles + ?Sized> {
    files: &'a F,
}

impl<'a, F: ProjectFiles + ?Sized> FileResolver<'a, F> {
    pub fn new(files: &'a F) -> Self {
        Self { files }
    }

    /// Resolve `requested`, trying the exact path before extension variants.
    ///
    /// Never fails: a missing file is reported as [`Resolution::NotFound`].
    pub fn resolve(&self, requested: &str) -> Resolution {
        let Some(normalized) = normalize_request(requested) else {
            warn!(requested, "rejecting path outside the project root");
            return Resolution::NotFound {
                requested: requested.to_string(),
                attempted_paths: Vec::new(),
            };
        };

        let mut attempted_paths = Vec::new();
        for candidate in resolution_candidates(&normalized) {
            match self.files.read_file(&candidate) {
                Ok(content) => {
                    debug!(requested, actual = %candidate, "resolved requested file");
                    return Resolution::Resolved {
                        requested: requested.to_string(),
                        actual_path: candidate,
                        content,
                    };
                }
                Err(err) => {
                    debug!(
                        candidate = %candidate,
                        err = %format!("{err:#}"),
                        "candidate not readable"
                    );
                    attempted_paths.push(candidate);
                }
            }
        }

        debug!(requested, attempts = attempted_paths.len(), "requested file not found");
        Resolution::NotFound {
            requested: requested.to_string(),
            attempted_paths,
        }
    }

    pub fn resolve_all<S: AsRef<str>>(&self, requested: &[S]) -> Vec<Resolution> {
        requested
            .iter()
            .map(|path| self.resolve(path.as_ref()))
            .collect()
    }
}
