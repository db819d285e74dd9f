//! Test doubles for agent sessions and validation pipelines.

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Result, anyhow, bail};
use serde_json::json;

use crate::core::conversation::ChatMessage;
use crate::io::backend::{ChatBackend, ChatReply};
use crate::io::project_files::ProjectFiles;
use crate::validate::{CodeValidator, ValidationOutcome};

/// Reply text for a `generate_test` action.
pub fn generate_reply(code: &str) -> String {
    json!({ "action": "generate_test", "code": code }).to_string()
}

/// Reply text for a `request_files` action.
pub fn request_reply(files: &[&str]) -> String {
    json!({ "action": "request_files", "files": files }).to_string()
}

/// Chat backend that returns queued replies and records every request.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    replies: RefCell<VecDeque<String>>,
    fallback: Option<String>,
    calls: RefCell<Vec<Vec<ChatMessage>>>,
}

impl ScriptedBackend {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: RefCell::new(replies.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    /// Backend that answers every request with `reply`.
    pub fn repeating(reply: impl Into<String>) -> Self {
        Self {
            fallback: Some(reply.into()),
            ..Self::default()
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.borrow().len()
    }

    /// Messages sent on the `index`-th call (zero-based).
    pub fn call(&self, index: usize) -> Vec<ChatMessage> {
        self.calls.borrow()[index].clone()
    }
}

impl ChatBackend for ScriptedBackend {
    fn create_chat_completion(&self, messages: &[ChatMessage]) -> Result<ChatReply> {
        self.calls.borrow_mut().push(messages.to_vec());
        let content = self
            .replies
            .borrow_mut()
            .pop_front()
            .or_else(|| self.fallback.clone())
            .ok_or_else(|| anyhow!("scripted backend has no reply left"))?;
        Ok(ChatReply { content })
    }
}

/// In-memory project files that record every read attempt.
#[derive(Debug, Default)]
pub struct MemoryFiles {
    files: BTreeMap<String, String>,
    reads: RefCell<Vec<String>>,
}

impl MemoryFiles {
    pub fn new<'a>(files: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        Self {
            files: files
                .into_iter()
                .map(|(path, content)| (path.to_string(), content.to_string()))
                .collect(),
            reads: RefCell::default(),
        }
    }

    /// Every path passed to `read_file`, in order.
    pub fn reads(&self) -> Vec<String> {
        self.reads.borrow().clone()
    }
}

impl ProjectFiles for MemoryFiles {
    fn read_file(&self, path: &str) -> Result<String> {
        self.reads.borrow_mut().push(path.to_string());
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| anyhow!("read {path}: not found"))
    }
}

/// Validator that returns queued outcomes and records checked paths.
#[derive(Debug)]
pub struct ScriptedValidator {
    name: String,
    outcomes: Mutex<VecDeque<ValidationOutcome>>,
    fallback: Option<ValidationOutcome>,
    checked: Mutex<Vec<PathBuf>>,
}

impl ScriptedValidator {
    pub fn new(
        name: impl Into<String>,
        outcomes: impl IntoIterator<Item = ValidationOutcome>,
    ) -> Self {
        Self {
            name: name.into(),
            outcomes: Mutex::new(outcomes.into_iter().collect()),
            fallback: None,
            checked: Mutex::default(),
        }
    }

    pub fn repeating(name: impl Into<String>, outcome: ValidationOutcome) -> Self {
        Self {
            fallback: Some(outcome),
            ..Self::new(name, Vec::<ValidationOutcome>::new())
        }
    }

    pub fn checked(&self) -> Vec<PathBuf> {
        self.checked
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl CodeValidator for ScriptedValidator {
    fn name(&self) -> &str {
        &self.name
    }

    fn validate(&self, file: &Path) -> Result<ValidationOutcome> {
        self.checked
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(file.to_path_buf());
        let next = self
            .outcomes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front();
        match next.or_else(|| self.fallback.clone()) {
            Some(outcome) => Ok(outcome),
            None => bail!("scripted validator has no outcome left"),
        }
    }
}

/// Temporary project directory for integration tests.
pub struct TestProject {
    temp: tempfile::TempDir,
}

impl TestProject {
    pub fn new() -> Result<Self> {
        Ok(Self {
            temp: tempfile::tempdir()?,
        })
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    /// Write `content` to a project-relative path, creating parent directories.
    pub fn write(&self, path: &str, content: &str) -> Result<PathBuf> {
        let full = self.root().join(path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&full, content)?;
        Ok(full)
    }

    pub fn read(&self, path: &str) -> Result<String> {
        Ok(fs::read_to_string(self.root().join(path))?)
    }
}
