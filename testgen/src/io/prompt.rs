//! Prompt rendering for agent sessions.

use std::sync::LazyLock;

use anyhow::Result;
use minijinja::{Environment, context};
use serde::Serialize;
use tracing::debug;

use crate::core::diagnostics::{Diagnostic, truncate_feedback};
use crate::io::context_cache::{ConfigFile, ProjectContext};
use crate::io::project_files::Resolution;

const CONTRACT_TEMPLATE: &str = include_str!("prompts/contract.md");
const GENERATE_TEMPLATE: &str = include_str!("prompts/generate.md");
const FIX_TEMPLATE: &str = include_str!("prompts/fix.md");
const FILES_TEMPLATE: &str = include_str!("prompts/files.md");

/// Config snapshots are embedded in prompts up to this many bytes each.
const CONFIG_SNAPSHOT_LIMIT_BYTES: usize = 4_000;

static ENGINE: LazyLock<Environment<'static>> = LazyLock::new(|| {
    let mut env = Environment::new();
    env.add_template("contract", CONTRACT_TEMPLATE)
        .expect("contract template should be valid");
    env.add_template("generate", GENERATE_TEMPLATE)
        .expect("generate template should be valid");
    env.add_template("fix", FIX_TEMPLATE)
        .expect("fix template should be valid");
    env.add_template("files", FILES_TEMPLATE)
        .expect("files template should be valid");
    env.add_filter("fence", code_fence);
    env
});

/// Backtick fence longer than any backtick run inside `content`.
fn code_fence(content: &str) -> String {
    let longest = content
        .split(|c| c != '`')
        .map(str::len)
        .max()
        .unwrap_or(0);
    "`".repeat(longest.max(2) + 1)
}

#[derive(Debug, Serialize)]
struct ConfigSection<'a> {
    title: &'static str,
    path: &'a str,
    content: String,
}

impl<'a> ConfigSection<'a> {
    fn new(title: &'static str, file: &'a ConfigFile) -> Self {
        Self {
            title,
            path: &file.path,
            content: truncate_feedback(file.content.trim(), CONFIG_SNAPSHOT_LIMIT_BYTES),
        }
    }
}

/// System message describing the JSON reply contract.
pub fn render_contract(max_turns: u32) -> Result<String> {
    let rendered = ENGINE
        .get_template("contract")?
        .render(context! { max_turns => max_turns })?;
    Ok(rendered)
}

/// Inputs for the first prompt of a generation session.
#[derive(Debug, Clone, Copy)]
pub struct GenerateInputs<'a> {
    pub goal: &'a str,
    pub target_path: &'a str,
    pub test_command: Option<&'a str>,
    pub context: Option<&'a ProjectContext>,
}

pub fn render_generate_prompt(inputs: &GenerateInputs<'_>) -> Result<String> {
    let sections: Vec<ConfigSection<'_>> = inputs
        .context
        .map(|ctx| {
            [
                ("Language config", ctx.language_config.as_ref()),
                ("Linter config", ctx.linter_config.as_ref()),
                ("Formatter config", ctx.formatter_config.as_ref()),
                (
                    "Package manifest",
                    ctx.package_manager.as_ref().map(|pm| &pm.manifest),
                ),
            ]
            .into_iter()
            .filter_map(|(title, file)| file.map(|file| ConfigSection::new(title, file)))
            .collect()
        })
        .unwrap_or_default();
    let section_count = sections.len();

    let rendered = ENGINE.get_template("generate")?.render(context! {
        goal => inputs.goal.trim(),
        target_path => inputs.target_path,
        test_command => inputs.test_command,
        context => inputs.context,
        sections => sections,
    })?;
    debug!(bytes = rendered.len(), sections = section_count, "rendered generate prompt");
    Ok(rendered)
}

/// Inputs for a fix session after a failed check.
#[derive(Debug, Clone, Copy)]
pub struct FixInputs<'a> {
    pub goal: &'a str,
    pub target_path: &'a str,
    /// Which check failed, e.g. "type checking".
    pub check: &'a str,
    pub code: &'a str,
    pub diagnostics: &'a [Diagnostic],
    /// Raw checker output, shown when no diagnostic could be parsed.
    pub output: &'a str,
    pub attempt: u32,
    pub max_attempts: u32,
}

pub fn render_fix_prompt(inputs: &FixInputs<'_>) -> Result<String> {
    let rendered = ENGINE.get_template("fix")?.render(context! {
        goal => inputs.goal.trim(),
        target_path => inputs.target_path,
        check => inputs.check,
        code => inputs.code.trim_end(),
        diagnostics => inputs.diagnostics,
        output => inputs.output.trim(),
        attempt => inputs.attempt,
        max_attempts => inputs.max_attempts,
    })?;
    Ok(rendered)
}

/// Follow-up message answering a `request_files` action.
pub fn render_file_results(resolutions: &[Resolution]) -> Result<String> {
    let rendered = ENGINE
        .get_template("files")?
        .render(context! { files => resolutions })?;
    Ok(rendered)
}
