//! Checks run against a generated test file (type checking, test execution).

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::core::diagnostics::{Diagnostic, parse_tsc_output, truncate_feedback};
use crate::io::config::CommandConfig;
use crate::io::process::{ExecOptions, execute};

/// Placeholder replaced with the checked file's path.
pub const FILE_PLACEHOLDER: &str = "{file}";

/// Result of one check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    Passed,
    Failed {
        diagnostics: Vec<Diagnostic>,
        /// Combined checker output, truncated for feedback.
        output: String,
    },
    TimedOut {
        output: String,
    },
}

impl ValidationOutcome {
    pub fn passed(&self) -> bool {
        matches!(self, ValidationOutcome::Passed)
    }
}

pub trait CodeValidator {
    /// Short label used in logs and fix prompts, e.g. "type checking".
    fn name(&self) -> &str;
    fn validate(&self, file: &Path) -> Result<ValidationOutcome>;
}

/// Runs a configured command through the process executor.
#[derive(Debug, Clone)]
pub struct CommandValidator {
    name: String,
    command: Vec<String>,
    workdir: PathBuf,
    timeout: Duration,
    pass_file: bool,
    feedback_limit_bytes: usize,
}

impl CommandValidator {
    pub fn new(
        name: impl Into<String>,
        config: &CommandConfig,
        workdir: impl Into<PathBuf>,
        feedback_limit_bytes: usize,
    ) -> Result<Self> {
        let name = name.into();
        if config.command.is_empty() {
            return Err(anyhow!("{name} command must not be empty"));
        }
        Ok(Self {
            name,
            command: config.command.clone(),
            workdir: workdir.into(),
            timeout: config.timeout(),
            pass_file: config.pass_file,
            feedback_limit_bytes,
        })
    }

    fn display_path(&self, file: &Path) -> String {
        file.strip_prefix(&self.workdir)
            .unwrap_or(file)
            .to_string_lossy()
            .into_owned()
    }

    /// Whether a diagnostic was reported against the checked file.
    fn concerns(&self, diagnostic: &Diagnostic, file: &Path, display: &str) -> bool {
        let reported = Path::new(diagnostic.file.trim_start_matches("./"));
        reported == Path::new(display) || reported == file || self.workdir.join(reported) == file
    }
}

impl CodeValidator for CommandValidator {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip_all, fields(check = %self.name, file = %file.display()))]
    fn validate(&self, file: &Path) -> Result<ValidationOutcome> {
        let display = self.display_path(file);
        let argv = expand_command(&self.command, &display, self.pass_file);
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| anyhow!("{} command must not be empty", self.name))?;
        let options = ExecOptions::inheriting_env()
            .with_cwd(&self.workdir)
            .with_timeout(self.timeout);

        let output = execute(program, args, &options)
            .with_context(|| format!("run {} command `{program}`", self.name))?;
        let combined = output.combined();

        if output.timed_out {
            warn!(timeout_secs = self.timeout.as_secs(), "check timed out");
            return Ok(ValidationOutcome::TimedOut {
                output: truncate_feedback(&combined, self.feedback_limit_bytes),
            });
        }
        if output.success() {
            info!("check passed");
            return Ok(ValidationOutcome::Passed);
        }

        let parsed = parse_tsc_output(&combined);
        let reported = parsed.len();
        let diagnostics: Vec<Diagnostic> = parsed
            .into_iter()
            .filter(|diagnostic| self.concerns(diagnostic, file, &display))
            .collect();
        if reported > 0 && diagnostics.is_empty() {
            info!(elsewhere = reported, "check failed only in other files");
            return Ok(ValidationOutcome::Passed);
        }
        debug!(
            exit_code = ?output.exit_code,
            diagnostics = diagnostics.len(),
            "check failed"
        );
        Ok(ValidationOutcome::Failed {
            diagnostics,
            output: truncate_feedback(&combined, self.feedback_limit_bytes),
        })
    }
}

/// Substitute `{file}` in every argument; append the path when no argument
/// contains the placeholder and `pass_file` is set.
pub fn expand_command(command: &[String], file: &str, pass_file: bool) -> Vec<String> {
    let mut substituted = false;
    let mut argv: Vec<String> = command
        .iter()
        .map(|arg| {
            if arg.contains(FILE_PLACEHOLDER) {
                substituted = true;
                arg.replace(FILE_PLACEHOLDER, file)
            } else {
                arg.clone()
            }
        })
        .collect();
    if !substituted && pass_file {
        argv.push(file.to_string());
    }
    argv
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn expand_command_appends_without_placeholder() {
        assert_eq!(
            expand_command(&strings(&["npx", "vitest", "run"]), "src/a.test.ts", true),
            strings(&["npx", "vitest", "run", "src/a.test.ts"])
        );
    }

    #[test]
    fn expand_command_substitutes_every_placeholder() {
        assert_eq!(
            expand_command(&strings(&["check", "--file={file}", "{file}"]), "a.ts", false),
            strings(&["check", "--file=a.ts", "a.ts"])
        );
    }

    #[test]
    fn default_typecheck_uses_project_config_without_file_argument() {
        let typecheck = crate::io::config::TestgenConfig::default().typecheck;
        let argv = expand_command(&typecheck.command, "src/a.test.ts", typecheck.pass_file);
        assert_eq!(argv, typecheck.command);
        assert_eq!(argv.last().map(String::as_str), Some("tsconfig.json"));
        assert!(!argv.iter().any(|arg| arg == "src/a.test.ts"));
    }

    #[test]
    fn empty_command_is_rejected() {
        let config = CommandConfig {
            command: Vec::new(),
            timeout_secs: 1,
            pass_file: true,
        };
        let err = CommandValidator::new("tests", &config, ".", 100).unwrap_err();
        assert!(err.to_string().contains("tests command"));
    }

    #[cfg(unix)]
    mod unix {
        use super::*;
        use std::fs;

        fn validator(dir: &Path, script: &str, timeout_secs: u64) -> CommandValidator {
            let config = CommandConfig {
                command: strings(&["sh", "-c", script, "sh"]),
                timeout_secs,
                pass_file: true,
            };
            CommandValidator::new("type checking", &config, dir, 10_000).expect("validator")
        }

        fn project_wide(dir: &Path, script: &str) -> CommandValidator {
            let config = CommandConfig {
                command: strings(&["sh", "-c", script, "sh"]),
                timeout_secs: 5,
                pass_file: false,
            };
            CommandValidator::new("type checking", &config, dir, 10_000).expect("validator")
        }

        #[test]
        fn zero_exit_passes() {
            let temp = tempfile::tempdir().expect("tempdir");
            let file = temp.path().join("a.test.ts");
            fs::write(&file, "").expect("write");
            let outcome = validator(temp.path(), "test -f \"$1\"", 5)
                .validate(&file)
                .expect("validate");
            assert_eq!(outcome, ValidationOutcome::Passed);
        }

        #[test]
        fn failure_parses_diagnostics() {
            let temp = tempfile::tempdir().expect("tempdir");
            let file = temp.path().join("a.test.ts");
            let script = "echo \"$1(3,7): error TS2304: Cannot find name 'expect'.\"; exit 2";
            let outcome = validator(temp.path(), script, 5)
                .validate(&file)
                .expect("validate");
            match outcome {
                ValidationOutcome::Failed {
                    diagnostics,
                    output,
                } => {
                    assert_eq!(diagnostics.len(), 1);
                    assert_eq!(diagnostics[0].file, "a.test.ts");
                    assert_eq!(diagnostics[0].line, 3);
                    assert_eq!(diagnostics[0].code, "TS2304");
                    assert!(output.contains("Cannot find name"));
                }
                other => panic!("expected failure, got {other:?}"),
            }
        }

        #[test]
        fn project_wide_check_gets_no_file_argument() {
            let temp = tempfile::tempdir().expect("tempdir");
            let file = temp.path().join("a.test.ts");
            let outcome = project_wide(temp.path(), "[ $# -eq 0 ]")
                .validate(&file)
                .expect("validate");
            assert_eq!(outcome, ValidationOutcome::Passed);
        }

        #[test]
        fn diagnostics_for_other_files_are_dropped() {
            let temp = tempfile::tempdir().expect("tempdir");
            let file = temp.path().join("src").join("a.test.ts");
            let script = "echo \"src/legacy.ts(1,1): error TS2322: Bad type.\"; \
                          echo \"./src/a.test.ts(4,2): error TS2304: Cannot find name 'expect'.\"; \
                          exit 2";
            let outcome = project_wide(temp.path(), script)
                .validate(&file)
                .expect("validate");
            match outcome {
                ValidationOutcome::Failed { diagnostics, .. } => {
                    assert_eq!(diagnostics.len(), 1);
                    assert_eq!(diagnostics[0].file, "./src/a.test.ts");
                    assert_eq!(diagnostics[0].code, "TS2304");
                }
                other => panic!("expected failure, got {other:?}"),
            }
        }

        #[test]
        fn failures_confined_to_other_files_pass() {
            let temp = tempfile::tempdir().expect("tempdir");
            let file = temp.path().join("a.test.ts");
            let script = "echo \"src/legacy.ts(1,1): error TS2322: Bad type.\"; \
                          exit 2";
            let outcome = project_wide(temp.path(), script)
                .validate(&file)
                .expect("validate");
            assert_eq!(outcome, ValidationOutcome::Passed);
        }

        #[test]
        fn failure_without_diagnostics_keeps_output() {
            let temp = tempfile::tempdir().expect("tempdir");
            let file = temp.path().join("a.test.ts");
            let outcome = validator(temp.path(), "echo 'AssertionError: nope' >&2; exit 1", 5)
                .validate(&file)
                .expect("validate");
            assert_eq!(
                outcome,
                ValidationOutcome::Failed {
                    diagnostics: Vec::new(),
                    output: "AssertionError: nope".to_string(),
                }
            );
        }

        #[test]
        fn slow_check_times_out() {
            let temp = tempfile::tempdir().expect("tempdir");
            let file = temp.path().join("a.test.ts");
            let mut validator = validator(temp.path(), "exec sleep 5", 5);
            validator.timeout = Duration::from_millis(200);
            let outcome = validator.validate(&file).expect("validate");
            assert!(matches!(outcome, ValidationOutcome::TimedOut { .. }));
        }
    }
}
