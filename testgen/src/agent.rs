//! Bounded multi-turn agent session that ends in generated test code.
//!
//! Each turn sends the full conversation to the chat backend and decodes the
//! reply as an [`AgentAction`]. File requests are answered through the
//! [`FileResolver`] and appended as the next user message; a `generate_test`
//! action ends the session. Turns are strictly sequential.

use tracing::{debug, info, instrument, warn};

use crate::core::action::{AgentAction, DecodeError, decode_action};
use crate::core::conversation::Conversation;
use crate::io::backend::ChatBackend;
use crate::io::project_files::{FileResolver, ProjectFiles};
use crate::io::prompt::render_file_results;

/// Default turn ceiling for one session.
pub const DEFAULT_MAX_TURNS: u32 = 8;

/// Fatal session failures.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("invalid response format: {0}")]
    InvalidResponseFormat(String),
    #[error("unknown action `{0}` in agent response")]
    UnknownAction(String),
    #[error("agent did not generate a test within {max_iterations} iterations")]
    IterationLimitExceeded { max_iterations: u32 },
    #[error("chat backend failed: {0:#}")]
    Backend(#[source] anyhow::Error),
    #[error("render follow-up message: {0:#}")]
    Prompt(#[source] anyhow::Error),
}

impl From<DecodeError> for AgentError {
    fn from(err: DecodeError) -> Self {
        match err {
            DecodeError::UnknownAction(action) => AgentError::UnknownAction(action),
            other => AgentError::InvalidResponseFormat(other.to_string()),
        }
    }
}

/// A finished session: the generated code plus the transcript that led to it.
#[derive(Debug, Clone)]
pub struct AgentSession {
    pub code: String,
    pub turns: u32,
    pub conversation: Conversation,
}

/// Drives one agent session against a backend and the project files.
pub struct AgentRunner<'a, B: ChatBackend + ?Sized, F: ProjectFiles + ?Sized> {
    backend: &'a B,
    files: &'a F,
    max_turns: u32,
    system_prompt: Option<String>,
}

impl<'a, B: ChatBackend + ?Sized, F: ProjectFiles + ?Sized> AgentRunner<'a, B, F> {
    pub fn new(backend: &'a B, files: &'a F) -> Self {
        Self {
            backend,
            files,
            max_turns: DEFAULT_MAX_TURNS,
            system_prompt: None,
        }
    }

    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = max_turns;
        self
    }

    /// System message placed before the initial prompt of every session.
    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    /// Run a session and return only the generated code.
    pub fn run(&self, initial_prompt: &str) -> Result<String, AgentError> {
        self.run_session(initial_prompt).map(|session| session.code)
    }

    #[instrument(skip_all, fields(max_turns = self.max_turns))]
    pub fn run_session(&self, initial_prompt: &str) -> Result<AgentSession, AgentError> {
        let mut conversation = Conversation::seed(self.system_prompt.as_deref(), initial_prompt);
        let resolver = FileResolver::new(self.files);

        for turn in 1..=self.max_turns {
            debug!(turn, messages = conversation.messages().len(), "requesting completion");
            let reply = self
                .backend
                .create_chat_completion(conversation.messages())
                .map_err(AgentError::Backend)?;
            conversation.push_assistant(reply.content.as_str());

            let action = match decode_action(&reply.content) {
                Ok(action) => {
                    debug!(turn, action = action.name(), "decoded agent reply");
                    action
                }
                Err(err) => {
                    warn!(turn, err = %err, "rejecting agent reply");
                    return Err(err.into());
                }
            };

            match action {
                AgentAction::GenerateTest { code } => {
                    info!(turn, bytes = code.len(), "agent generated test");
                    return Ok(AgentSession {
                        code,
                        turns: turn,
                        conversation,
                    });
                }
                AgentAction::RequestFiles { files } => {
                    info!(turn, files = files.len(), "agent requested files");
                    if turn == self.max_turns {
                        // No turn left to answer with.
                        break;
                    }
                    let resolutions = resolver.resolve_all(&files);
                    let found = resolutions.iter().filter(|r| r.is_resolved()).count();
                    let substituted = resolutions.iter().filter(|r| r.was_substituted()).count();
                    debug!(
                        turn,
                        requested = files.len(),
                        found,
                        substituted,
                        "resolved requested files"
                    );
                    let follow_up =
                        render_file_results(&resolutions).map_err(AgentError::Prompt)?;
                    conversation.push_user(follow_up);
                }
            }
        }

        warn!(max_turns = self.max_turns, "agent turn budget exhausted");
        Err(AgentError::IterationLimitExceeded {
            max_iterations: self.max_turns,
        })
    }
}
