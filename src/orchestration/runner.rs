//! Plan runner: executes a [`Plan`] phase by phase.
//!
//! Phases run strictly in order. Before a phase starts, the prerequisite
//! closure of its tasks is resolved against the registry; prerequisites that
//! already completed earlier in the same run are skipped. What remains runs
//! in dependency waves: everything whose prerequisites are satisfied starts
//! together, and the next wave waits for the whole wave to finish. The first
//! failing task halts the run; no later wave or phase starts.
//!
//! Run lifecycle: `Idle -> Resolving(i) -> RunningPhase(i) -> ... -> Completed`
//! or `Failed(task, error)`.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::core::{Phase, Plan, TaskRegistry};
use crate::error::{Error, Result};
use crate::{pwlog, pwlog_debug, pwlog_error};

/// Unique identifier for one run of a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// First 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a run is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum RunState {
    Idle,
    /// Resolving prerequisites for the phase at this index.
    Resolving { phase: usize },
    /// Task bodies of the phase at this index are running.
    RunningPhase { phase: usize },
    /// Every phase finished successfully.
    Completed,
    /// The run halted on this task.
    Failed { task: String, error: String },
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Completed | RunState::Failed { .. })
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunState::Idle => write!(f, "idle"),
            RunState::Resolving { phase } => write!(f, "resolving phase {}", phase),
            RunState::RunningPhase { phase } => write!(f, "running phase {}", phase),
            RunState::Completed => write!(f, "completed"),
            RunState::Failed { task, error } => write!(f, "failed at '{}': {}", task, error),
        }
    }
}

/// Events emitted while a run progresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEvent {
    RunStarted { run_id: RunId, plan: String },
    StateChanged { run_id: RunId, state: RunState },
    TaskStarted { run_id: RunId, task: String, phase: usize },
    /// A prerequisite that already completed earlier in this run.
    TaskSkipped { run_id: RunId, task: String },
    TaskCompleted { run_id: RunId, task: String, duration: Duration },
    TaskFailed { run_id: RunId, task: String, error: String },
    RunFinished { run_id: RunId, state: RunState },
}

/// Timing of one executed task body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskTiming {
    pub task: String,
    pub phase: usize,
    pub duration_ms: u64,
}

/// Outcome of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub state: RunState,
    /// Task bodies that ran, in completion order per wave.
    pub executed: Vec<TaskTiming>,
    /// Prerequisites skipped because they already ran in this run.
    pub skipped: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.state == RunState::Completed
    }

    /// Names of the tasks whose bodies ran, in order.
    pub fn executed_tasks(&self) -> Vec<&str> {
        self.executed.iter().map(|t| t.task.as_str()).collect()
    }

    pub fn duration(&self) -> Duration {
        (self.finished_at - self.started_at)
            .to_std()
            .unwrap_or_default()
    }
}

/// A finished run: its report, plus the error when it failed.
#[derive(Debug)]
pub struct RunOutcome {
    pub report: RunReport,
    pub error: Option<Error>,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// The report on success, the error otherwise.
    pub fn into_result(self) -> Result<RunReport> {
        match self.error {
            None => Ok(self.report),
            Some(error) => Err(error),
        }
    }
}

/// Bookkeeping for a run in progress.
struct Progress {
    run_id: RunId,
    started_at: DateTime<Utc>,
    completed: HashSet<String>,
    executed: Vec<TaskTiming>,
    skipped: Vec<String>,
}

impl Progress {
    fn into_report(self, state: RunState) -> RunReport {
        RunReport {
            run_id: self.run_id,
            state,
            executed: self.executed,
            skipped: self.skipped,
            started_at: self.started_at,
            finished_at: Utc::now(),
        }
    }
}

/// A phase after resolution: waves of task names plus skipped prerequisites.
#[derive(Debug, Default, PartialEq, Eq)]
struct PhaseSchedule {
    waves: Vec<Vec<String>>,
    skipped: Vec<String>,
}

/// Result of running one wave.
struct WaveOutcome {
    timings: Vec<TaskTiming>,
    failure: Option<(String, Error)>,
}

/// Executes plans against a shared task registry.
///
/// Cheap to clone; clones share the registry and event channel.
#[derive(Clone)]
pub struct Runner {
    registry: Arc<TaskRegistry>,
    event_tx: Option<mpsc::Sender<RunEvent>>,
}

impl Runner {
    pub fn new(registry: Arc<TaskRegistry>) -> Self {
        Self {
            registry,
            event_tx: None,
        }
    }

    /// Emit [`RunEvent`]s on `event_tx` for every run.
    pub fn with_events(mut self, event_tx: mpsc::Sender<RunEvent>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    async fn emit(&self, event: RunEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event).await;
        }
    }

    async fn set_state(&self, run_id: RunId, state: RunState) {
        pwlog_debug!(run_id.short() => "{}", state);
        self.emit(RunEvent::StateChanged { run_id, state }).await;
    }

    /// Run `plan` and invoke `on_complete` exactly once with the outcome.
    pub async fn run_with<F>(&self, plan: &Plan, on_complete: F)
    where
        F: FnOnce(Result<RunReport>),
    {
        on_complete(self.run(plan).await);
    }

    /// Run `plan` to completion.
    ///
    /// # Errors
    /// - [`Error::UnknownTask`] / [`Error::CyclicDependency`] if a phase cannot be
    ///   resolved; earlier phases have already run, later ones never start
    /// - [`Error::TaskExecution`] naming the failing task and phase index
    ///
    /// Use [`execute`](Self::execute) to keep the report of a failed run.
    pub async fn run(&self, plan: &Plan) -> Result<RunReport> {
        self.execute(plan).await.into_result()
    }

    /// Run `plan` and return its report whether or not it succeeded.
    ///
    /// A failed run's report has state [`RunState::Failed`] and lists the
    /// tasks that ran (or were skipped) before the run halted.
    pub async fn execute(&self, plan: &Plan) -> RunOutcome {
        let run_id = RunId::new();
        let mut progress = Progress {
            run_id,
            started_at: Utc::now(),
            completed: HashSet::new(),
            executed: Vec::new(),
            skipped: Vec::new(),
        };

        pwlog!(run_id.short() => "run started: {}", plan);
        self.emit(RunEvent::RunStarted {
            run_id,
            plan: plan.to_string(),
        })
        .await;

        for (index, phase) in plan.phases().iter().enumerate() {
            self.set_state(run_id, RunState::Resolving { phase: index })
                .await;

            let schedule = match self.schedule_phase(phase, &progress.completed) {
                Ok(schedule) => schedule,
                Err(error) => {
                    let task = match &error {
                        Error::UnknownTask(name) => name.clone(),
                        _ => phase.to_string(),
                    };
                    pwlog_error!(run_id.short() => "phase {} cannot be resolved: {}", index, error);
                    return self.fail(progress, task, error).await;
                }
            };

            for task in &schedule.skipped {
                pwlog_debug!(run_id.short() => "skipping '{}' (already ran)", task);
                self.emit(RunEvent::TaskSkipped {
                    run_id,
                    task: task.clone(),
                })
                .await;
            }
            progress.skipped.extend(schedule.skipped);

            self.set_state(run_id, RunState::RunningPhase { phase: index })
                .await;

            for wave in &schedule.waves {
                let outcome = self.run_wave(run_id, index, wave).await;
                for timing in outcome.timings {
                    progress.completed.insert(timing.task.clone());
                    progress.executed.push(timing);
                }

                if let Some((task, source)) = outcome.failure {
                    pwlog_error!(run_id.short() => "failed at '{}' in phase {}: {}", task, index, source);
                    let error = Error::TaskExecution {
                        task: task.clone(),
                        phase: index,
                        source: Box::new(source),
                    };
                    return self.fail(progress, task, error).await;
                }
            }
        }

        self.finish(run_id, RunState::Completed).await;
        let report = progress.into_report(RunState::Completed);
        pwlog!(
            run_id.short() => "run completed: {} task(s) in {:?}",
            report.executed.len(),
            report.duration()
        );
        RunOutcome {
            report,
            error: None,
        }
    }

    async fn fail(&self, progress: Progress, task: String, error: Error) -> RunOutcome {
        let state = RunState::Failed {
            task,
            error: match &error {
                Error::TaskExecution { source, .. } => source.to_string(),
                other => other.to_string(),
            },
        };
        self.finish(progress.run_id, state.clone()).await;
        RunOutcome {
            report: progress.into_report(state),
            error: Some(error),
        }
    }

    async fn finish(&self, run_id: RunId, state: RunState) {
        self.set_state(run_id, state.clone()).await;
        self.emit(RunEvent::RunFinished { run_id, state }).await;
    }

    /// Resolve one phase into waves.
    ///
    /// Tasks named by the phase always run. Prerequisites run unless they
    /// already completed in this run.
    fn schedule_phase(&self, phase: &Phase, completed: &HashSet<String>) -> Result<PhaseSchedule> {
        let named: Vec<&str> = phase.tasks();
        let explicit: HashSet<&str> = named.iter().copied().collect();
        let order = self.registry.resolve_all(named.iter().copied())?;

        let mut schedule = PhaseSchedule::default();
        let mut pending: Vec<String> = Vec::new();
        for name in order {
            if explicit.contains(name.as_str()) || !completed.contains(&name) {
                pending.push(name);
            } else {
                schedule.skipped.push(name);
            }
        }

        let pending_set: HashSet<String> = pending.iter().cloned().collect();
        let mut done: HashSet<String> = HashSet::new();

        while !pending.is_empty() {
            let (ready, blocked): (Vec<String>, Vec<String>) =
                pending.into_iter().partition(|name| {
                    self.registry
                        .get(name)
                        .map(|task| {
                            task.prerequisites
                                .iter()
                                .all(|p| !pending_set.contains(p) || done.contains(p))
                        })
                        .unwrap_or(false)
                });

            if ready.is_empty() {
                // resolve_all already rejects cycles; this guards against looping forever.
                return Err(Error::CyclicDependency { cycle: blocked });
            }

            done.extend(ready.iter().cloned());
            schedule.waves.push(ready);
            pending = blocked;
        }

        Ok(schedule)
    }

    /// Start every task of a wave concurrently and wait for all of them.
    async fn run_wave(&self, run_id: RunId, phase: usize, wave: &[String]) -> WaveOutcome {
        let mut handles = Vec::with_capacity(wave.len());
        for name in wave {
            let body = match self.registry.require(name) {
                Ok(task) => task.body(),
                Err(error) => {
                    return WaveOutcome {
                        timings: Vec::new(),
                        failure: Some((name.clone(), error)),
                    }
                }
            };

            pwlog_debug!(run_id.short() => "starting '{}' (phase {})", name, phase);
            self.emit(RunEvent::TaskStarted {
                run_id,
                task: name.clone(),
                phase,
            })
            .await;

            handles.push(tokio::spawn(async move {
                let started = Instant::now();
                let result = body.run().await;
                (result, started.elapsed())
            }));
        }

        let results = join_all(handles).await;

        let mut outcome = WaveOutcome {
            timings: Vec::new(),
            failure: None,
        };
        for (name, joined) in wave.iter().zip(results) {
            let (result, duration) = match joined {
                Ok(pair) => pair,
                Err(join_err) => (Err(Error::TaskJoin(join_err.to_string())), Duration::ZERO),
            };

            match result {
                Ok(()) => {
                    self.emit(RunEvent::TaskCompleted {
                        run_id,
                        task: name.clone(),
                        duration,
                    })
                    .await;
                    outcome.timings.push(TaskTiming {
                        task: name.clone(),
                        phase,
                        duration_ms: duration.as_millis() as u64,
                    });
                }
                Err(error) => {
                    self.emit(RunEvent::TaskFailed {
                        run_id,
                        task: name.clone(),
                        error: error.to_string(),
                    })
                    .await;
                    if outcome.failure.is_none() {
                        outcome.failure = Some((name.clone(), error));
                    }
                }
            }
        }
        outcome
    }
}

impl std::fmt::Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("tasks", &self.registry.len())
            .field("events", &self.event_tx.is_some())
            .finish()
    }
}
