//! Stable exit codes for `rewind` CLI commands.

/// Command succeeded.
pub const OK: i32 = 0;
/// Command failed due to an invalid record, config, argument or environment error.
pub const INVALID: i32 = 1;
/// `rewind best-step` found no step with a parseable test report.
pub const NO_BEST_STEP: i32 = 2;
