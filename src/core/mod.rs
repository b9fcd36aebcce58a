//! Core domain models for pipewright.
//!
//! Tasks and their bodies, the registry that resolves prerequisites, plans
//! made of phases, and the glob patterns used by watch and copy tasks.

pub mod pattern;
pub mod plan;
pub mod registry;
pub mod task;

pub use pattern::GlobPattern;
pub use plan::{Phase, Plan};
pub use registry::TaskRegistry;
pub use task::{CallbackBody, Done, FnBody, NoopBody, Task, TaskBody};
