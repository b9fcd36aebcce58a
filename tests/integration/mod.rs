//! Integration test suite for pipewright.
//!
//! These tests drive the public API end to end: registering tasks, running
//! plans, serving watch bindings and loading project files from disk.
//!
//! # Test Categories
//!
//! - `run_sequence`: phase ordering, prerequisite resolution, fail-fast
//! - `fan_out`: concurrent phases and shared prerequisites
//! - `watch_debounce`: watch bindings, coalescing, unwatch
//! - `project_file`: `Pipewright.toml` projects with built-in task bodies
//!
//! # CI Compatibility
//!
//! Task bodies are in-process closures or plain `sh` commands; everything on
//! disk lives in temporary directories.


mod fan_out;
mod run_sequence;
mod watch_debounce;
