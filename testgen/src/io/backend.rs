//! Chat backend abstraction for agent sessions.
//!
//! The [`ChatBackend`] trait decouples the agent loop from the model provider.
//! [`CommandChatBackend`] is the provider-agnostic implementation: it hands the
//! whole conversation to an external command and reads the reply from its
//! stdout. Tests use scripted backends that return predetermined replies.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use tracing::{debug, instrument, warn};

use crate::core::conversation::ChatMessage;
use crate::io::process::{ExecOptions, execute};

/// One reply from the chat backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatReply {
    pub content: String,
}

/// Abstraction over chat-completion providers.
pub trait ChatBackend {
    /// Produce one reply for the full ordered message list.
    fn create_chat_completion(&self, messages: &[ChatMessage]) -> Result<ChatReply>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    messages: &'a [ChatMessage],
}

/// Backend that runs a configured command per completion.
///
/// The command receives `{"messages":[{"role":..,"content":..},..]}` on stdin
/// and must print the reply content on stdout.
#[derive(Debug, Clone)]
pub struct CommandChatBackend {
    program: String,
    args: Vec<String>,
    workdir: PathBuf,
    timeout: Duration,
}

impl CommandChatBackend {
    pub fn new(command: &[String], workdir: impl Into<PathBuf>, timeout: Duration) -> Result<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| anyhow!("backend command must not be empty"))?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            workdir: workdir.into(),
            timeout,
        })
    }
}

impl ChatBackend for CommandChatBackend {
    #[instrument(skip_all, fields(program = %self.program, messages = messages.len()))]
    fn create_chat_completion(&self, messages: &[ChatMessage]) -> Result<ChatReply> {
        let payload =
            serde_json::to_vec(&ChatRequest { messages }).context("serialize chat request")?;
        let options = ExecOptions::inheriting_env()
            .with_cwd(&self.workdir)
            .with_timeout(self.timeout)
            .with_stdin(payload);

        let output = execute(&self.program, &self.args, &options)
            .with_context(|| format!("run chat backend `{}`", self.program))?;

        if output.timed_out {
            warn!(timeout_secs = self.timeout.as_secs(), "chat backend timed out");
            return Err(anyhow!("chat backend timed out after {:?}", self.timeout));
        }
        if !output.success() {
            warn!(exit_code = ?output.exit_code, "chat backend failed");
            return Err(anyhow!(
                "chat backend failed with status {:?}: {}",
                output.exit_code,
                output.stderr.trim()
            ));
        }

        debug!(bytes = output.stdout.len(), "chat backend replied");
        Ok(ChatReply {
            content: output.stdout.trim().to_string(),
        })
    }
}
