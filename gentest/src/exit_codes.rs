//! Stable exit codes for gentest CLI commands.

/// Command succeeded.
pub const OK: i32 = 0;
/// Invalid config or usage, or any other error.
pub const INVALID: i32 = 1;
/// The baseline could not be restored; the run was aborted.
pub const BASELINE_RESTORE_FAILED: i32 = 2;
