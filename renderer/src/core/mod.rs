//! Deterministic, pure logic shared by the render engine.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod error;
pub mod frid;
pub mod graph;
pub mod machine;
pub mod outcome;
pub mod render_graph;
pub mod trigger;
pub mod types;
