//! AI-assisted test generation CLI.
//!
//! Reads `.testgen/config.toml` under the project root, talks to the
//! configured chat backend command, and writes generated tests into the
//! project.

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::warn;

use testgen::agent::AgentError;
use testgen::exit_codes;
use testgen::generate::{GenerateOutcome, GenerateRequest, Pipeline};
use testgen::io::backend::CommandChatBackend;
use testgen::io::config::{TestgenConfig, load_config};
use testgen::io::context_cache::{CacheLoad, ProjectContext, ProjectContextCache};
use testgen::io::introspect::{discover_project_context, load_or_discover};
use testgen::io::paths::TestgenPaths;
use testgen::io::project_files::FsProjectFiles;
use testgen::logging;
use testgen::run_tests::{default_jobs, run_batch};
use testgen::validate::{CodeValidator, CommandValidator, ValidationOutcome};

#[derive(Parser)]
#[command(name = "testgen", version, about = "AI-assisted test generation")]
struct Cli {
    /// Project root (defaults to the current directory).
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate a test file for a goal, then type-check and run it.
    Generate {
        /// What the test should cover.
        #[arg(long)]
        goal: String,
        /// Project-relative path of the test file to write.
        #[arg(long)]
        output: String,
        /// Write the generated code without running any check.
        #[arg(long)]
        no_validate: bool,
        /// Type-check only; do not run the test command.
        #[arg(long)]
        skip_tests: bool,
        /// Override `max_turns` from config.
        #[arg(long)]
        max_turns: Option<u32>,
    },
    /// Type-check an existing test file.
    Validate { file: PathBuf },
    /// Run the test command once per file, concurrently.
    RunTests {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Maximum concurrent runs (defaults to available parallelism).
        #[arg(long)]
        jobs: Option<NonZeroUsize>,
    },
    /// Inspect or manage the project context cache.
    Cache {
        #[command(subcommand)]
        command: CacheCommand,
    },
}

#[derive(Subcommand)]
enum CacheCommand {
    /// Reconcile the cache against the project and report the result.
    Status,
    /// Rediscover the project context and overwrite the cache.
    Refresh,
    /// Delete the cache file.
    Clear,
}

fn main() -> ExitCode {
    logging::init();
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => exit_code(code),
        Err(err) => {
            eprintln!("{err:#}");
            exit_code(error_exit_code(&err))
        }
    }
}

fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

fn error_exit_code(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<AgentError>() {
        Some(AgentError::IterationLimitExceeded { .. }) => exit_codes::ITERATION_LIMIT,
        _ => exit_codes::INVALID,
    }
}

fn run(cli: Cli) -> Result<i32> {
    let root = cli.root.as_path();
    match cli.command {
        Command::Generate {
            goal,
            output,
            no_validate,
            skip_tests,
            max_turns,
        } => cmd_generate(
            root,
            &goal,
            &output,
            GenerateFlags {
                no_validate,
                skip_tests,
                max_turns,
            },
        ),
        Command::Validate { file } => cmd_validate(root, &file),
        Command::RunTests { files, jobs } => cmd_run_tests(root, &files, jobs),
        Command::Cache { command } => cmd_cache(root, command),
    }
}

struct GenerateFlags {
    no_validate: bool,
    skip_tests: bool,
    max_turns: Option<u32>,
}

fn load_project_config(root: &Path) -> Result<TestgenConfig> {
    let paths = TestgenPaths::new(root);
    load_config(&paths.config_path).with_context(|| format!("load {}", paths.config_path.display()))
}

fn cmd_generate(root: &Path, goal: &str, output: &str, flags: GenerateFlags) -> Result<i32> {
    let config = load_project_config(root)?;
    let backend =
        CommandChatBackend::new(config.backend_command()?, root, config.backend.timeout())?;
    let files = FsProjectFiles::new(root);
    let context = project_context(root);

    let typecheck = CommandValidator::new(
        "type checking",
        &config.typecheck,
        root,
        config.feedback_limit_bytes,
    )?;
    let tests = CommandValidator::new("tests", &config.tests, root, config.feedback_limit_bytes)?;

    let mut pipeline = Pipeline::new(&backend, &files, root)
        .with_max_turns(flags.max_turns.unwrap_or(config.max_turns))
        .with_max_fix_attempts(config.max_fix_attempts);
    if !flags.no_validate {
        pipeline = pipeline.with_validator(&typecheck);
        if !flags.skip_tests {
            pipeline = pipeline.with_validator(&tests);
        }
    }

    let test_command = config.tests.command.join(" ");
    let outcome = pipeline.run(&GenerateRequest {
        goal,
        target_path: output,
        test_command: Some(&test_command),
        context: context.as_ref(),
    })?;

    match outcome {
        GenerateOutcome::Written { path } => {
            println!("wrote {}", path.display());
            Ok(exit_codes::OK)
        }
        GenerateOutcome::Validated { path, fix_attempts } => {
            println!("wrote {} (passed after {fix_attempts} fixes)", path.display());
            Ok(exit_codes::OK)
        }
        GenerateOutcome::Unvalidated {
            path,
            check,
            diagnostics,
            output,
        } => {
            println!("wrote {} (failed {check})", path.display());
            if diagnostics.is_empty() {
                eprintln!("{output}");
            } else {
                for diagnostic in &diagnostics {
                    eprintln!("{diagnostic}");
                }
            }
            Ok(exit_codes::VALIDATION_FAILED)
        }
    }
}

/// Cached or freshly discovered project context. Failures degrade to no context.
fn project_context(root: &Path) -> Option<ProjectContext> {
    let cache = ProjectContextCache::new(root);
    match load_or_discover(&cache, root) {
        Ok(context) => Some(context),
        Err(err) => {
            warn!(err = %format!("{err:#}"), "continuing without project context");
            None
        }
    }
}

fn cmd_validate(root: &Path, file: &Path) -> Result<i32> {
    let config = load_project_config(root)?;
    let validator = CommandValidator::new(
        "type checking",
        &config.typecheck,
        root,
        config.feedback_limit_bytes,
    )?;
    let outcome = validator.validate(&root.join(file))?;
    Ok(report_outcome(file, &outcome))
}

fn cmd_run_tests(root: &Path, files: &[PathBuf], jobs: Option<NonZeroUsize>) -> Result<i32> {
    let config = load_project_config(root)?;
    let validator =
        CommandValidator::new("tests", &config.tests, root, config.feedback_limit_bytes)?;
    let resolved: Vec<PathBuf> = files.iter().map(|file| root.join(file)).collect();
    let report = run_batch(&validator, &resolved, jobs.unwrap_or_else(default_jobs));

    let mut code = exit_codes::OK;
    for (file, run) in files.iter().zip(&report.runs) {
        match &run.outcome {
            Ok(outcome) => {
                if report_outcome(file, outcome) != exit_codes::OK {
                    code = exit_codes::VALIDATION_FAILED;
                }
            }
            Err(err) => {
                println!("{}: error", file.display());
                eprintln!("{err:#}");
                code = exit_codes::VALIDATION_FAILED;
            }
        }
    }
    Ok(code)
}

fn report_outcome(file: &Path, outcome: &ValidationOutcome) -> i32 {
    match outcome {
        ValidationOutcome::Passed => {
            println!("{}: passed", file.display());
            exit_codes::OK
        }
        ValidationOutcome::Failed {
            diagnostics,
            output,
        } => {
            println!("{}: failed", file.display());
            if diagnostics.is_empty() {
                eprintln!("{output}");
            } else {
                for diagnostic in diagnostics {
                    eprintln!("{diagnostic}");
                }
            }
            exit_codes::VALIDATION_FAILED
        }
        ValidationOutcome::TimedOut { output } => {
            println!("{}: timed out", file.display());
            eprintln!("{output}");
            exit_codes::VALIDATION_FAILED
        }
    }
}

fn cmd_cache(root: &Path, command: CacheCommand) -> Result<i32> {
    let cache = ProjectContextCache::new(root);
    match command {
        CacheCommand::Status => {
            match cache.reconcile() {
                CacheLoad::Missing => println!("missing"),
                CacheLoad::Invalid => println!("invalid"),
                CacheLoad::Fresh(_) => println!("fresh"),
                CacheLoad::Healed { updated, .. } => {
                    let fields: Vec<&str> = updated.iter().map(|field| field.as_str()).collect();
                    println!("refreshed {}", fields.join(", "));
                }
            }
            Ok(exit_codes::OK)
        }
        CacheCommand::Refresh => {
            let context = discover_project_context(root)?;
            cache.save(&context);
            if !cache.has_cache() {
                anyhow::bail!("could not write {}", cache.cache_path().display());
            }
            println!("{}", cache.cache_path().display());
            Ok(exit_codes::OK)
        }
        CacheCommand::Clear => {
            if cache.clear()? {
                println!("removed {}", cache.cache_path().display());
            } else {
                println!("no cache");
            }
            Ok(exit_codes::OK)
        }
    }
}
