//! Project introspection by fixed filename lists.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument};

use super::context_cache::{
    CacheLoad, ConfigFile, DEFAULT_MANIFEST, PackageManager, ProjectContext, ProjectContextCache,
};

const LANGUAGE_CONFIGS: &[&str] = &["tsconfig.json", "jsconfig.json"];

const LINTER_CONFIGS: &[&str] = &[
    "eslint.config.js",
    "eslint.config.mjs",
    "eslint.config.cjs",
    "eslint.config.ts",
    ".eslintrc",
    ".eslintrc.json",
    ".eslintrc.js",
    ".eslintrc.cjs",
    ".eslintrc.yml",
    ".eslintrc.yaml",
];

const FORMATTER_CONFIGS: &[&str] = &[
    ".prettierrc",
    ".prettierrc.json",
    ".prettierrc.js",
    ".prettierrc.cjs",
    ".prettierrc.yml",
    ".prettierrc.yaml",
    "prettier.config.js",
    "prettier.config.cjs",
    "prettier.config.mjs",
    "biome.json",
    "biome.jsonc",
];

/// Test runner configs listed in `config_files` but not snapshotted.
const TEST_RUNNER_CONFIGS: &[&str] = &[
    "vitest.config.ts",
    "vitest.config.js",
    "vitest.config.mts",
    "jest.config.ts",
    "jest.config.js",
    "jest.config.cjs",
    "jest.config.mjs",
    "playwright.config.ts",
    "playwright.config.js",
];

/// Lockfile to package manager, checked in order.
const LOCKFILES: &[(&str, &str)] = &[
    ("pnpm-lock.yaml", "pnpm"),
    ("yarn.lock", "yarn"),
    ("bun.lock", "bun"),
    ("bun.lockb", "bun"),
    ("package-lock.json", "npm"),
];

/// Inspect `root` and build a fresh [`ProjectContext`].
#[instrument(skip_all, fields(root = %root.display()))]
pub fn discover_project_context(root: &Path) -> Result<ProjectContext> {
    let mut config_files = Vec::new();

    let language_config = first_config(root, LANGUAGE_CONFIGS, &mut config_files)?;
    let linter_config = first_config(root, LINTER_CONFIGS, &mut config_files)?;
    let formatter_config = first_config(root, FORMATTER_CONFIGS, &mut config_files)?;
    config_files.extend(
        TEST_RUNNER_CONFIGS
            .iter()
            .filter(|name| root.join(name).is_file())
            .map(|name| name.to_string()),
    );

    let package_manager = detect_package_manager(root)?;
    if let Some(pm) = &package_manager {
        config_files.push(pm.manifest.path.clone());
    }

    debug!(
        config_files = config_files.len(),
        package_manager = package_manager.as_ref().map(|pm| pm.name.as_str()),
        "discovered project context"
    );
    Ok(ProjectContext {
        project_root: root.to_path_buf(),
        config_files,
        language_config,
        linter_config,
        formatter_config,
        package_manager,
    })
}

/// Return the cached context when it is still valid, otherwise discover and
/// cache a fresh one.
pub fn load_or_discover(cache: &ProjectContextCache, root: &Path) -> Result<ProjectContext> {
    match cache.reconcile() {
        CacheLoad::Fresh(context) => Ok(context),
        CacheLoad::Healed { context, updated } => {
            info!(updated = updated.len(), "using refreshed project context");
            Ok(context)
        }
        CacheLoad::Missing | CacheLoad::Invalid => {
            let context = discover_project_context(root)?;
            cache.save(&context);
            Ok(context)
        }
    }
}

fn first_config(
    root: &Path,
    candidates: &[&str],
    config_files: &mut Vec<String>,
) -> Result<Option<ConfigFile>> {
    let mut first = None;
    for name in candidates {
        let path = root.join(name);
        if !path.is_file() {
            continue;
        }
        config_files.push(name.to_string());
        if first.is_none() {
            first = Some(read_config(root, name)?);
        }
    }
    Ok(first)
}

fn detect_package_manager(root: &Path) -> Result<Option<PackageManager>> {
    if !root.join(DEFAULT_MANIFEST).is_file() {
        return Ok(None);
    }
    let name = LOCKFILES
        .iter()
        .find(|(lockfile, _)| root.join(lockfile).is_file())
        .map_or("npm", |(_, name)| *name);
    Ok(Some(PackageManager {
        name: name.to_string(),
        manifest: read_config(root, DEFAULT_MANIFEST)?,
    }))
}

fn read_config(root: &Path, name: &str) -> Result<ConfigFile> {
    let path = root.join(name);
    let content = fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
    Ok(ConfigFile {
        path: name.to_string(),
        content,
    })
}
