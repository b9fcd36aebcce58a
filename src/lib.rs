//! Pipewright: a declarative build-task orchestrator.
//!
//! Named tasks are registered once with their prerequisites and an opaque
//! body. A [`Plan`] of phases runs them in dependency order, concurrent
//! phases fan out and join, and watch bindings re-run tasks when files
//! change.

pub mod builtin;
pub mod config;
pub mod core;
pub mod error;
pub mod log;
pub mod orchestration;
pub mod util;

pub use crate::core::{CallbackBody, Done, FnBody, NoopBody, Phase, Plan, Task, TaskBody, TaskRegistry};
pub use error::{Error, Result};
pub use orchestration::{
    Orchestrator, RunEvent, RunOutcome, RunReport, RunState, Runner, WatchBinding, WatchEvent,
    WatchService,
};
