//! Stable exit codes for the provisioner CLI.

/// Every non-optional step was skipped or succeeded.
pub const OK: i32 = 0;
/// Invalid invocation or configuration, or another runtime error (lock held, names exhausted).
pub const INVALID: i32 = 1;
/// A non-optional step failed and halted the run.
pub const STEP_FAILED: i32 = 2;
/// Required external tools are missing from `PATH`.
pub const MISSING_PREREQUISITES: i32 = 3;
/// The user declined or aborted an interactive prompt.
pub const CANCELLED: i32 = 4;
/// The working directory holds content that is not a prior installation.
pub const CONFLICT: i32 = 5;
