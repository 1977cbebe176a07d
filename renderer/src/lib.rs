//! Render orchestration engine.
//!
//! Walks a module's functional requirements in document order and, for each,
//! drives a hierarchical state machine through code generation, unit tests,
//! refactoring and conformance tests, checkpointing every phase in git. The
//! architecture keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (state graph, machine runtime,
//!   outcome table, records). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting collaborators (filesystem, git, scripts,
//!   generation service). Behind traits where tests substitute them.
//!
//! [`context`] holds the session state and the graph's hooks, [`actions`] the
//! work of each leaf state, and [`driver`] the loop tying them together.
//! [`render::render_module`] is the entry point used by the CLI.

pub mod actions;
pub mod context;
pub mod core;
pub mod driver;
pub mod events;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod render;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
