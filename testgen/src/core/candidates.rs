//! Candidate paths for resolving a file requested by the agent.
//!
//! Agents often guess the wrong extension for a module (`button.js` for a
//! `button.tsx` component). The exact request is always tried first, then the
//! same base name with each source extension in priority order.

use std::path::{Component, Path};

/// Source extensions tried when the requested path does not exist.
pub const EXTENSION_PRIORITY: &[&str] = &["ts", "tsx", "js", "jsx", "mts", "cts", "mjs", "cjs"];

/// Normalize a requested path to a project-relative form.
///
/// Returns `None` for empty, absolute, or root-escaping requests.
pub fn normalize_request(requested: &str) -> Option<String> {
    let trimmed = requested.trim();
    let trimmed = trimmed.strip_prefix("./").unwrap_or(trimmed);
    if trimmed.is_empty() {
        return None;
    }
    let path = Path::new(trimmed);
    let escapes = path.components().any(|component| {
        matches!(
            component,
            Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    });
    if escapes {
        return None;
    }
    Some(trimmed.to_string())
}

/// Ordered candidates for `requested`, exact path first.
///
/// Extension substitution applies only when the request has no extension or a
/// source extension; `styles.css` is never rewritten to `styles.ts`.
pub fn resolution_candidates(requested: &str) -> Vec<String> {
    let mut candidates = vec![requested.to_string()];
    let path = Path::new(requested);
    let current = path.extension().and_then(|ext| ext.to_str());
    let substitutable = match current {
        None => true,
        Some(ext) => EXTENSION_PRIORITY.contains(&ext),
    };
    if !substitutable || path.file_name().is_none() {
        return candidates;
    }

    for ext in EXTENSION_PRIORITY {
        if current == Some(*ext) {
            continue;
        }
        let candidate = path.with_extension(ext).to_string_lossy().into_owned();
        if !candidates.contains(&candidate) {
            candidates.push(candidate);
        }
    }
    candidates
}
