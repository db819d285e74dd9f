//! Generate, validate, fix: the end-to-end pipeline for one test file.
//!
//! The pipeline is a finite-state loop over [`PipelineState`]. Each generation
//! or fix is a fresh agent session; validation failures seed the next session
//! with the failing code and parsed diagnostics until `max_fix_attempts` is
//! spent.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, instrument, warn};

use crate::agent::AgentRunner;
use crate::core::diagnostics::Diagnostic;
use crate::io::backend::ChatBackend;
use crate::io::context_cache::ProjectContext;
use crate::io::project_files::ProjectFiles;
use crate::io::prompt::{
    FixInputs, GenerateInputs, render_contract, render_fix_prompt, render_generate_prompt,
};
use crate::validate::{CodeValidator, ValidationOutcome};

#[derive(Debug, Clone, Copy)]
pub struct GenerateRequest<'a> {
    pub goal: &'a str,
    /// Project-relative path of the test file to write.
    pub target_path: &'a str,
    pub test_command: Option<&'a str>,
    pub context: Option<&'a ProjectContext>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerateOutcome {
    /// Written without running any check.
    Written { path: PathBuf },
    /// Every check passed after `fix_attempts` fix sessions.
    Validated { path: PathBuf, fix_attempts: u32 },
    /// Fix attempts ran out; the last code is left on disk.
    Unvalidated {
        path: PathBuf,
        check: String,
        diagnostics: Vec<Diagnostic>,
        output: String,
    },
}

impl GenerateOutcome {
    pub fn path(&self) -> &Path {
        match self {
            GenerateOutcome::Written { path }
            | GenerateOutcome::Validated { path, .. }
            | GenerateOutcome::Unvalidated { path, .. } => path,
        }
    }
}

#[derive(Debug)]
enum PipelineState {
    /// Run an agent session with this prompt.
    Generate { prompt: String, fix_attempt: u32 },
    /// Write `code` and run the checks.
    Validate { code: String, fix_attempt: u32 },
    Finished(GenerateOutcome),
}

/// A check that did not pass.
struct CheckFailure {
    check: String,
    diagnostics: Vec<Diagnostic>,
    output: String,
}

pub struct Pipeline<'a, B: ChatBackend + ?Sized, F: ProjectFiles + ?Sized> {
    backend: &'a B,
    files: &'a F,
    root: &'a Path,
    validators: Vec<&'a dyn CodeValidator>,
    max_turns: u32,
    max_fix_attempts: u32,
}

impl<'a, B: ChatBackend + ?Sized, F: ProjectFiles + ?Sized> Pipeline<'a, B, F> {
    pub fn new(backend: &'a B, files: &'a F, root: &'a Path) -> Self {
        Self {
            backend,
            files,
            root,
            validators: Vec::new(),
            max_turns: crate::agent::DEFAULT_MAX_TURNS,
            max_fix_attempts: 2,
        }
    }

    /// Checks run in order; the first failure drives the fix session.
    pub fn with_validator(mut self, validator: &'a dyn CodeValidator) -> Self {
        self.validators.push(validator);
        self
    }

    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = max_turns;
        self
    }

    pub fn with_max_fix_attempts(mut self, max_fix_attempts: u32) -> Self {
        self.max_fix_attempts = max_fix_attempts;
        self
    }

    #[instrument(skip_all, fields(target = request.target_path))]
    pub fn run(&self, request: &GenerateRequest<'_>) -> Result<GenerateOutcome> {
        let path = self.root.join(request.target_path);
        let runner = AgentRunner::new(self.backend, self.files)
            .with_max_turns(self.max_turns)
            .with_system_prompt(render_contract(self.max_turns)?);

        let mut state = PipelineState::Generate {
            prompt: render_generate_prompt(&GenerateInputs {
                goal: request.goal,
                target_path: request.target_path,
                test_command: request.test_command,
                context: request.context,
            })?,
            fix_attempt: 0,
        };

        loop {
            state = match state {
                PipelineState::Generate {
                    prompt,
                    fix_attempt,
                } => {
                    let code = runner.run(&prompt)?;
                    PipelineState::Validate { code, fix_attempt }
                }
                PipelineState::Validate { code, fix_attempt } => {
                    write_test_file(&path, &code)?;
                    match self.first_failure(&path)? {
                        None if self.validators.is_empty() => {
                            PipelineState::Finished(GenerateOutcome::Written { path: path.clone() })
                        }
                        None => {
                            info!(fix_attempt, "generated test passed every check");
                            PipelineState::Finished(GenerateOutcome::Validated {
                                path: path.clone(),
                                fix_attempts: fix_attempt,
                            })
                        }
                        Some(failure) if fix_attempt >= self.max_fix_attempts => {
                            warn!(check = %failure.check, fix_attempt, "fix attempts exhausted");
                            PipelineState::Finished(GenerateOutcome::Unvalidated {
                                path: path.clone(),
                                check: failure.check,
                                diagnostics: failure.diagnostics,
                                output: failure.output,
                            })
                        }
                        Some(failure) => {
                            let attempt = fix_attempt + 1;
                            info!(check = %failure.check, attempt, "starting fix session");
                            let prompt = render_fix_prompt(&FixInputs {
                                goal: request.goal,
                                target_path: request.target_path,
                                check: &failure.check,
                                code: &code,
                                diagnostics: &failure.diagnostics,
                                output: &failure.output,
                                attempt,
                                max_attempts: self.max_fix_attempts,
                            })?;
                            PipelineState::Generate {
                                prompt,
                                fix_attempt: attempt,
                            }
                        }
                    }
                }
                PipelineState::Finished(outcome) => return Ok(outcome),
            };
        }
    }

    fn first_failure(&self, path: &Path) -> Result<Option<CheckFailure>> {
        for validator in &self.validators {
            let check = validator.name().to_string();
            match validator
                .validate(path)
                .with_context(|| format!("run {check}"))?
            {
                ValidationOutcome::Passed => continue,
                ValidationOutcome::Failed {
                    diagnostics,
                    output,
                } => {
                    return Ok(Some(CheckFailure {
                        check,
                        diagnostics,
                        output,
                    }));
                }
                ValidationOutcome::TimedOut { output } => {
                    return Ok(Some(CheckFailure {
                        output: format!("{check} timed out\n{output}"),
                        check,
                        diagnostics: Vec::new(),
                    }));
                }
            }
        }
        Ok(None)
    }
}

fn write_test_file(path: &Path, code: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let mut contents = code.trim_end().to_string();
    contents.push('\n');
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentError;
    use crate::test_support::{
        MemoryFiles, ScriptedBackend, ScriptedValidator, generate_reply, request_reply,
    };

    fn request() -> GenerateRequest<'static> {
        GenerateRequest {
            goal: "Cover add()",
            target_path: "src/math.test.ts",
            test_command: None,
            context: None,
        }
    }

    fn failed(message: &str) -> ValidationOutcome {
        ValidationOutcome::Failed {
            diagnostics: vec![Diagnostic {
                file: "src/math.test.ts".to_string(),
                line: 1,
                column: 1,
                code: "TS2304".to_string(),
                message: message.to_string(),
            }],
            output: message.to_string(),
        }
    }

    #[test]
    fn passing_code_is_validated_without_fixes() {
        let temp = tempfile::tempdir().expect("tempdir");
        let backend = ScriptedBackend::new([generate_reply("test('add', () => {});")]);
        let files = MemoryFiles::default();
        let validator = ScriptedValidator::new("type checking", [ValidationOutcome::Passed]);

        let outcome = Pipeline::new(&backend, &files, temp.path())
            .with_validator(&validator)
            .run(&request())
            .expect("run");

        let path = temp.path().join("src/math.test.ts");
        assert_eq!(
            outcome,
            GenerateOutcome::Validated {
                path: path.clone(),
                fix_attempts: 0
            }
        );
        assert_eq!(
            fs::read_to_string(&path).expect("read"),
            "test('add', () => {});\n"
        );
        assert_eq!(validator.checked(), vec![path]);
    }

    #[test]
    fn failure_seeds_a_fix_session_with_diagnostics() {
        let temp = tempfile::tempdir().expect("tempdir");
        let backend = ScriptedBackend::new([
            generate_reply("broken()"),
            generate_reply("fixed()"),
        ]);
        let files = MemoryFiles::default();
        let validator = ScriptedValidator::new(
            "type checking",
            [failed("Cannot find name 'broken'."), ValidationOutcome::Passed],
        );

        let outcome = Pipeline::new(&backend, &files, temp.path())
            .with_validator(&validator)
            .run(&request())
            .expect("run");

        assert!(matches!(
            outcome,
            GenerateOutcome::Validated { fix_attempts: 1, .. }
        ));
        assert_eq!(backend.call_count(), 2);
        let fix_prompt = &backend.call(1)[1].content;
        assert!(fix_prompt.contains("broken()"));
        assert!(fix_prompt.contains("Cannot find name 'broken'."));
        assert!(fix_prompt.contains("attempt 1 of 2"));
        assert_eq!(
            fs::read_to_string(outcome.path()).expect("read"),
            "fixed()\n"
        );
    }

    #[test]
    fn exhausted_fix_attempts_leave_unvalidated_code() {
        let temp = tempfile::tempdir().expect("tempdir");
        let backend = ScriptedBackend::repeating(generate_reply("still_broken()"));
        let files = MemoryFiles::default();
        let validator = ScriptedValidator::repeating("type checking", failed("nope"));

        let outcome = Pipeline::new(&backend, &files, temp.path())
            .with_validator(&validator)
            .with_max_fix_attempts(1)
            .run(&request())
            .expect("run");

        match outcome {
            GenerateOutcome::Unvalidated {
                check, diagnostics, ..
            } => {
                assert_eq!(check, "type checking");
                assert_eq!(diagnostics.len(), 1);
            }
            other => panic!("expected unvalidated outcome, got {other:?}"),
        }
        // initial generation plus one fix
        assert_eq!(backend.call_count(), 2);
        assert_eq!(validator.checked().len(), 2);
    }

    #[test]
    fn later_checks_run_only_after_earlier_ones_pass() {
        let temp = tempfile::tempdir().expect("tempdir");
        let backend = ScriptedBackend::new([generate_reply("a"), generate_reply("b")]);
        let files = MemoryFiles::default();
        let typecheck = ScriptedValidator::new(
            "type checking",
            [failed("type error"), ValidationOutcome::Passed],
        );
        let tests = ScriptedValidator::new("tests", [ValidationOutcome::Passed]);

        let outcome = Pipeline::new(&backend, &files, temp.path())
            .with_validator(&typecheck)
            .with_validator(&tests)
            .run(&request())
            .expect("run");

        assert!(matches!(outcome, GenerateOutcome::Validated { .. }));
        assert_eq!(typecheck.checked().len(), 2);
        assert_eq!(tests.checked().len(), 1);
    }

    #[test]
    fn no_validators_just_writes() {
        let temp = tempfile::tempdir().expect("tempdir");
        let backend = ScriptedBackend::new([
            request_reply(&["src/math.ts"]),
            generate_reply("test('add', () => {});"),
        ]);
        let files = MemoryFiles::new([("src/math.ts", "export const add = () => 0;")]);
        let outcome = Pipeline::new(&backend, &files, temp.path())
            .run(&request())
            .expect("run");
        assert_eq!(
            outcome,
            GenerateOutcome::Written {
                path: temp.path().join("src/math.test.ts")
            }
        );
        let system = &backend.call(0)[0].content;
        assert!(system.contains("generate_test"));
    }

    #[test]
    fn agent_errors_surface_typed() {
        let temp = tempfile::tempdir().expect("tempdir");
        let backend = ScriptedBackend::repeating(request_reply(&["src/a.ts"]));
        let files = MemoryFiles::default();
        let err = Pipeline::new(&backend, &files, temp.path())
            .with_max_turns(2)
            .run(&request())
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AgentError>(),
            Some(AgentError::IterationLimitExceeded { max_iterations: 2 })
        ));
        assert!(!temp.path().join("src/math.test.ts").exists());
    }
}
