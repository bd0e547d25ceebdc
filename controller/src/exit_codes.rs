//! Stable exit codes for automation CLI commands.

/// Command succeeded, or every test in the run passed.
pub const OK: i32 = 0;
/// Command failed due to invalid config/manifest or other errors.
pub const INVALID: i32 = 1;
/// The run finished but some tests failed, timed out or never ran.
pub const FAILED: i32 = 2;
/// The run was cancelled before it could finish.
pub const ABORTED: i32 = 3;
