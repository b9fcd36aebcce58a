//! The task orchestrator: a frozen registry plus named sequences and watch
//! bindings, as loaded from a project file or composed in code.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::core::{GlobPattern, Plan, TaskRegistry};
use crate::error::{Error, Result};
use crate::orchestration::runner::{RunReport, Runner};
use crate::orchestration::watch::{WatchBinding, WatchService, DEFAULT_DEBOUNCE_MS};
use crate::pwlog_debug;

/// Name run when no task or sequence is given.
pub const DEFAULT_TARGET: &str = "default";

pub struct Orchestrator {
    registry: Arc<TaskRegistry>,
    sequences: Vec<(String, Plan)>,
    bindings: Vec<WatchBinding>,
    debounce: Duration,
}

impl Orchestrator {
    /// Freeze `registry`; no tasks can be registered afterwards.
    pub fn new(registry: TaskRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
            sequences: Vec::new(),
            bindings: Vec::new(),
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
        }
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Register a named sequence.
    ///
    /// Sequences share the task namespace, so a name already used by a task
    /// or another sequence is rejected with [`Error::DuplicateTask`].
    pub fn add_sequence(&mut self, name: impl Into<String>, plan: Plan) -> Result<()> {
        let name = name.into();
        if self.registry.contains(&name) || self.sequence(&name).is_some() {
            return Err(Error::DuplicateTask(name));
        }
        pwlog_debug!("Sequence '{}': {}", name, plan);
        self.sequences.push((name, plan));
        Ok(())
    }

    pub fn add_binding(&mut self, binding: WatchBinding) {
        self.bindings.push(binding);
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    pub fn sequence(&self, name: &str) -> Option<&Plan> {
        self.sequences
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, plan)| plan)
    }

    /// Sequences in declaration order.
    pub fn sequences(&self) -> impl Iterator<Item = (&str, &Plan)> {
        self.sequences.iter().map(|(n, p)| (n.as_str(), p))
    }

    pub fn bindings(&self) -> &[WatchBinding] {
        &self.bindings
    }

    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    /// Build the plan for a list of targets.
    ///
    /// A sequence contributes its phases; a task becomes a single phase. An
    /// empty list means [`DEFAULT_TARGET`].
    pub fn plan_for<S: AsRef<str>>(&self, names: &[S]) -> Result<Plan> {
        if names.is_empty() {
            return self.plan_for(&[DEFAULT_TARGET]);
        }

        let mut plan = Plan::new();
        for name in names {
            let name = name.as_ref();
            if let Some(sequence) = self.sequence(name) {
                plan.extend(sequence.clone());
            } else if self.registry.contains(name) {
                plan = plan.then(name);
            } else {
                return Err(Error::UnknownTask(name.to_string()));
            }
        }
        Ok(plan)
    }

    /// Check the registry, every sequence and every watch binding.
    pub fn validate(&self) -> Result<()> {
        self.registry.validate()?;
        for (_, plan) in &self.sequences {
            for task in plan.task_names() {
                self.registry.require(task)?;
            }
        }
        for binding in &self.bindings {
            for task in &binding.tasks {
                self.registry.require(task)?;
            }
            GlobPattern::new(&binding.pattern)?;
        }
        Ok(())
    }

    pub fn runner(&self) -> Runner {
        Runner::new(Arc::clone(&self.registry))
    }

    /// Run the plan for `names` with a fresh runner.
    pub async fn run<S: AsRef<str>>(&self, names: &[S]) -> Result<RunReport> {
        let plan = self.plan_for(names)?;
        self.runner().run(&plan).await
    }

    /// Create a watch service serving every binding, with runs going through
    /// `runner`. The service is armed but not yet watching the file system;
    /// call [`WatchService::start`] for that.
    pub fn watch_service(&self, runner: Runner, root: impl Into<PathBuf>) -> Result<WatchService> {
        let mut service = WatchService::new(runner, root, self.debounce);
        service.watch(self.bindings.clone())?;
        Ok(service)
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("tasks", &self.registry.len())
            .field("sequences", &self.sequences.len())
            .field("bindings", &self.bindings.len())
            .field("debounce", &self.debounce)
            .finish()
    }
}
