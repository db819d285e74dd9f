//! Decoding of agent replies into typed actions.
//!
//! A reply is accepted only if it is a JSON object whose `action` field names
//! one of the known actions and whose payload matches the action schema. The
//! discriminant is checked before any other field is inspected, so an unknown
//! action is always reported as such, regardless of what else the reply holds.

use std::sync::LazyLock;

use jsonschema::Validator;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const GENERATE_TEST: &str = "generate_test";
pub const REQUEST_FILES: &str = "request_files";

const AGENT_ACTION_SCHEMA: &str = include_str!("../../schemas/agent_action.schema.json");

static ACTION_VALIDATOR: LazyLock<Validator> = LazyLock::new(|| {
    let schema: Value =
        serde_json::from_str(AGENT_ACTION_SCHEMA).expect("agent action schema should be json");
    jsonschema::validator_for(&schema).expect("agent action schema should compile")
});

/// Action requested by the agent in a single reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum AgentAction {
    /// Final answer: the generated test source.
    GenerateTest { code: String },
    /// The agent needs these project files before it can answer.
    RequestFiles { files: Vec<String> },
}

impl AgentAction {
    pub fn name(&self) -> &'static str {
        match self {
            AgentAction::GenerateTest { .. } => GENERATE_TEST,
            AgentAction::RequestFiles { .. } => REQUEST_FILES,
        }
    }
}

/// Why a reply could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("reply is not valid JSON: {0}")]
    NotJson(String),
    #[error("reply must be a JSON object with a string `action` field")]
    MissingAction,
    #[error("unknown action `{0}`")]
    UnknownAction(String),
    #[error("`{action}` payload is malformed: {reason}")]
    Malformed { action: String, reason: String },
}

/// Decode the textual content of an agent reply.
pub fn decode_action(text: &str) -> Result<AgentAction, DecodeError> {
    let value: Value =
        serde_json::from_str(text).map_err(|err| DecodeError::NotJson(err.to_string()))?;

    let action = value
        .get("action")
        .and_then(Value::as_str)
        .ok_or(DecodeError::MissingAction)?
        .to_string();
    if action != GENERATE_TEST && action != REQUEST_FILES {
        return Err(DecodeError::UnknownAction(action));
    }

    let messages: Vec<String> = ACTION_VALIDATOR
        .iter_errors(&value)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        return Err(DecodeError::Malformed {
            action,
            reason: messages.join("; "),
        });
    }

    serde_json::from_value(value).map_err(|err| DecodeError::Malformed {
        action,
        reason: err.to_string(),
    })
}
