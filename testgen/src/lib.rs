//! AI-assisted test generation for TypeScript and JavaScript projects.
//!
//! An agent session converses with a chat backend until it returns test code,
//! answering file requests from the project tree along the way. Generated code
//! is written to disk, checked by external commands, and fed back to fresh
//! sessions when a check fails.
//!
//! - **[`core`]**: Pure logic (reply decoding, conversation, path candidates,
//!   diagnostics parsing). No I/O.
//! - **[`io`]**: Side effects (processes, project files, config, cache,
//!   prompts, chat backend).
//!
//! Orchestration lives in [`agent`], [`generate`], [`validate`] and
//! [`run_tests`].

pub mod agent;
pub mod core;
pub mod exit_codes;
pub mod generate;
pub mod io;
pub mod logging;
pub mod run_tests;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod validate;
