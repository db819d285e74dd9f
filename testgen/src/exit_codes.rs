//! Stable exit codes for testgen CLI commands.

/// Command succeeded; generated tests passed every check.
pub const OK: i32 = 0;
/// Invalid config, agent reply, project layout or any other error.
pub const INVALID: i32 = 1;
/// Generated or existing tests failed a check after every fix attempt.
pub const VALIDATION_FAILED: i32 = 2;
/// The agent used its whole turn budget without producing a test.
pub const ITERATION_LIMIT: i32 = 3;
