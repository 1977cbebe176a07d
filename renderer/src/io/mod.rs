//! Side-effecting collaborators of the render engine.

pub mod config;
pub mod conformance_store;
pub mod files;
pub mod git;
pub mod http_service;
pub mod process;
pub mod run_state;
pub mod scripts;
pub mod service;
pub mod spec_tree;
