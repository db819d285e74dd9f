//! Testgen configuration stored under `.testgen/config.toml`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::agent::DEFAULT_MAX_TURNS;

/// Testgen configuration (TOML).
///
/// Missing fields default to values suited to a TypeScript project using
/// `tsc` and `vitest`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TestgenConfig {
    /// Turn ceiling for a single agent session.
    pub max_turns: u32,

    /// How many fix sessions may follow a failed validation.
    pub max_fix_attempts: u32,

    /// Truncate validator and test output fed back to the agent beyond this many bytes.
    pub feedback_limit_bytes: usize,

    pub backend: BackendConfig,
    pub typecheck: CommandConfig,
    pub tests: CommandConfig,
}

/// External command acting as the chat backend.
///
/// The command receives `{"messages":[...]}` on stdin and must print the
/// reply content on stdout.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BackendConfig {
    pub command: Vec<String>,
    pub timeout_secs: u64,
}

/// A command run against a generated file. `{file}` in any argument is
/// replaced with the file path; without a placeholder the path is appended
/// unless `pass_file` is off.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandConfig {
    pub command: Vec<String>,
    #[serde(default = "default_command_timeout_secs")]
    pub timeout_secs: u64,
    /// Off for project-wide checks such as `tsc -p tsconfig.json`, where a
    /// file argument would make the checker ignore the project settings.
    #[serde(default = "default_pass_file")]
    pub pass_file: bool,
}

fn default_command_timeout_secs() -> u64 {
    5 * 60
}

fn default_pass_file() -> bool {
    true
}

impl CommandConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            timeout_secs: 10 * 60,
        }
    }
}

impl BackendConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for TestgenConfig {
    fn default() -> Self {
        Self {
            max_turns: DEFAULT_MAX_TURNS,
            max_fix_attempts: 2,
            feedback_limit_bytes: 20_000,
            backend: BackendConfig::default(),
            typecheck: CommandConfig {
                command: [
                    "npx",
                    "tsc",
                    "--noEmit",
                    "--pretty",
                    "false",
                    "-p",
                    "tsconfig.json",
                ]
                .map(String::from)
                .to_vec(),
                timeout_secs: default_command_timeout_secs(),
                pass_file: false,
            },
            tests: CommandConfig {
                command: ["npx", "vitest", "run"].map(String::from).to_vec(),
                timeout_secs: default_command_timeout_secs(),
                pass_file: true,
            },
        }
    }
}

impl TestgenConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_turns == 0 {
            return Err(anyhow!("max_turns must be > 0"));
        }
        if self.feedback_limit_bytes == 0 {
            return Err(anyhow!("feedback_limit_bytes must be > 0"));
        }
        if self.backend.timeout_secs == 0 {
            return Err(anyhow!("backend.timeout_secs must be > 0"));
        }
        if !self.backend.command.is_empty() && self.backend.command[0].trim().is_empty() {
            return Err(anyhow!("backend.command must start with a program"));
        }
        for (name, cmd) in [("typecheck", &self.typecheck), ("tests", &self.tests)] {
            if cmd.command.is_empty() || cmd.command[0].trim().is_empty() {
                return Err(anyhow!("{name}.command must be a non-empty array"));
            }
        }
        Ok(())
    }

    /// The configured backend command, or an error explaining how to set one.
    pub fn backend_command(&self) -> Result<&[String]> {
        if self.backend.command.is_empty() {
            return Err(anyhow!(
                "backend.command is not configured (set it in .testgen/config.toml)"
            ));
        }
        Ok(&self.backend.command)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `TestgenConfig::default()`.
pub fn load_config(path: &Path) -> Result<TestgenConfig> {
    if !path.exists() {
        let cfg = TestgenConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: TestgenConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &TestgenConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, buf)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, TestgenConfig::default());
        assert!(cfg.backend_command().is_err());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(".testgen/config.toml");
        let cfg = TestgenConfig {
            max_turns: 4,
            backend: BackendConfig {
                command: vec!["my-llm".to_string(), "--json".to_string()],
                timeout_secs: 30,
            },
            ..TestgenConfig::default()
        };
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
        assert_eq!(
            loaded.backend_command().expect("backend"),
            ["my-llm".to_string(), "--json".to_string()]
        );
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "max_turns = 3\n\n[tests]\ncommand = [\"npx\", \"jest\"]\n")
            .expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.max_turns, 3);
        assert_eq!(cfg.tests.command, vec!["npx", "jest"]);
        assert_eq!(cfg.tests.timeout_secs, 300);
        assert!(cfg.tests.pass_file);
        assert_eq!(cfg.typecheck, TestgenConfig::default().typecheck);
        assert!(!cfg.typecheck.pass_file);
    }

    #[test]
    fn zero_turns_is_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "max_turns = 0\n").expect("write");
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("max_turns"));
    }
}
