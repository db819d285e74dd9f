//! I/O helpers for testgen commands.

pub mod backend;
pub mod config;
pub mod context_cache;
pub mod introspect;
pub mod paths;
pub mod process;
pub mod project_files;
pub mod prompt;
