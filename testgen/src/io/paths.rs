//! Canonical paths under `.testgen/` for a project root.

use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct TestgenPaths {
    pub root: PathBuf,
    pub testgen_dir: PathBuf,
    pub config_path: PathBuf,
    pub cache_dir: PathBuf,
    pub context_cache_path: PathBuf,
}

impl TestgenPaths {
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref().to_path_buf();
        let testgen_dir = root.join(".testgen");
        let cache_dir = testgen_dir.join("cache");
        Self {
            root,
            config_path: testgen_dir.join("config.toml"),
            context_cache_path: cache_dir.join("project_context.json"),
            testgen_dir,
            cache_dir,
        }
    }
}
