//! Phases and plans.
//!
//! A [`Plan`] is an ordered list of [`Phase`]s. Phases run strictly one after
//! another; the task names inside a concurrent phase run side by side.

use serde::{Deserialize, Serialize};

/// One step of a plan.
///
/// Deserializes from either a bare string (`"clean"`) or a list of names
/// (`["html", "images"]`), mirroring how build sequences are written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Phase {
    /// A single task.
    Single(String),
    /// Tasks that run concurrently; the phase ends when all have finished.
    Concurrent(Vec<String>),
}

impl Phase {
    /// Task names in this phase, in the order written.
    pub fn tasks(&self) -> Vec<&str> {
        match self {
            Phase::Single(name) => vec![name.as_str()],
            Phase::Concurrent(names) => names.iter().map(String::as_str).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Phase::Concurrent(names) if names.is_empty())
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Single(name) => write!(f, "{}", name),
            Phase::Concurrent(names) => write!(f, "[{}]", names.join(", ")),
        }
    }
}

impl From<&str> for Phase {
    fn from(name: &str) -> Self {
        Phase::Single(name.to_string())
    }
}

impl From<String> for Phase {
    fn from(name: String) -> Self {
        Phase::Single(name)
    }
}

impl<S: Into<String>> From<Vec<S>> for Phase {
    fn from(names: Vec<S>) -> Self {
        Phase::Concurrent(names.into_iter().map(Into::into).collect())
    }
}

/// Ordered sequence of phases making up one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Plan {
    phases: Vec<Phase>,
}

impl Plan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a phase running one task.
    pub fn then(mut self, name: impl Into<String>) -> Self {
        self.phases.push(Phase::Single(name.into()));
        self
    }

    /// Append a phase running all `names` concurrently.
    pub fn then_all<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.phases
            .push(Phase::Concurrent(names.into_iter().map(Into::into).collect()));
        self
    }

    pub fn push(&mut self, phase: Phase) {
        self.phases.push(phase);
    }

    /// Plan with one concurrent phase holding `names` (what a watch binding triggers).
    pub fn single_phase<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new().then_all(names)
    }

    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    pub fn len(&self) -> usize {
        self.phases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    /// Every task name the plan mentions, first occurrence order.
    pub fn task_names(&self) -> Vec<&str> {
        let mut seen = std::collections::HashSet::new();
        self.phases
            .iter()
            .flat_map(|p| p.tasks())
            .filter(|n| seen.insert(*n))
            .collect()
    }

    /// Concatenate another plan's phases onto this one.
    pub fn extend(&mut self, other: Plan) {
        self.phases.extend(other.phases);
    }
}

impl From<Vec<Phase>> for Plan {
    fn from(phases: Vec<Phase>) -> Self {
        Self { phases }
    }
}

impl std::fmt::Display for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self.phases.iter().map(|p| p.to_string()).collect();
        write!(f, "{}", parts.join(" -> "))
    }
}
