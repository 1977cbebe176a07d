//! Stable exit codes of the `renderer` command.

/// Every functional requirement was rendered.
pub const OK: i32 = 0;
/// The render reached the failed state or its final step errored.
pub const FAILED: i32 = 1;
/// Invalid arguments, configuration or specification; nothing was rendered.
pub const INVALID: i32 = 2;
