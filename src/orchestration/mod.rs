//! Orchestration layer: running plans and re-running tasks on file changes.
//!
//! The [`Orchestrator`] owns the frozen task registry together with named
//! sequences and watch bindings. [`Runner`] executes one plan at a time,
//! phase by phase, and [`WatchService`] schedules debounced runs when watched
//! files change.

mod orchestrator;
mod runner;
mod watch;

pub use orchestrator::{Orchestrator, DEFAULT_TARGET};
pub use runner::{RunEvent, RunId, RunOutcome, RunReport, RunState, Runner, TaskTiming};
pub use watch::{WatchBinding, WatchEvent, WatchService, DEFAULT_DEBOUNCE_MS};
