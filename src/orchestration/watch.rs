//! Watch service: re-runs tasks when matching files change.
//!
//! Each [`WatchBinding`] maps a glob pattern to a list of task names. A
//! change to a matching path schedules a single-phase plan of those tasks.
//! Every binding has its own worker that debounces events: a run starts once
//! the binding has been quiet for the debounce window, and events arriving
//! while a run is in progress collapse into one follow-up run. Runs of the
//! same binding never overlap.
//!
//! File-system events come from `notify`; [`WatchService::notify_path`] feeds
//! the same routing by hand.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::{GlobPattern, Plan};
use crate::error::Result;
use crate::orchestration::runner::{RunReport, Runner};
use crate::{pwlog, pwlog_debug, pwlog_error, pwlog_trace, pwlog_warn};

/// Default debounce window in milliseconds.
pub const DEFAULT_DEBOUNCE_MS: u64 = 200;

/// A glob pattern and the tasks it re-runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchBinding {
    pub pattern: String,
    pub tasks: Vec<String>,
}

impl WatchBinding {
    pub fn new<I, S>(pattern: impl Into<String>, tasks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            pattern: pattern.into(),
            tasks: tasks.into_iter().map(Into::into).collect(),
        }
    }

    /// The plan a change triggers: all tasks in one concurrent phase.
    pub fn plan(&self) -> Plan {
        Plan::single_phase(self.tasks.iter().cloned())
    }
}

/// Events emitted by the watch service.
#[derive(Debug, Clone)]
pub enum WatchEvent {
    /// A path matched a binding.
    Changed { pattern: String, path: PathBuf },
    /// A triggered run finished successfully.
    RunCompleted { pattern: String, report: RunReport },
    /// A triggered run failed; the service keeps watching.
    RunFailed { pattern: String, error: String },
    /// A binding stopped (unwatch or shutdown).
    Stopped { pattern: String },
}

/// Routing entry shared with the notify callback.
struct Route {
    glob: GlobPattern,
    trigger_tx: mpsc::UnboundedSender<PathBuf>,
    cancel: CancellationToken,
}

type RouteTable = Arc<RwLock<Vec<Route>>>;

/// Serves watch bindings until shut down.
pub struct WatchService {
    runner: Runner,
    root: PathBuf,
    debounce: Duration,
    routes: RouteTable,
    bindings: Vec<WatchBinding>,
    cancel: CancellationToken,
    event_tx: Option<mpsc::Sender<WatchEvent>>,
    workers: Vec<JoinHandle<()>>,
    watcher: Option<RecommendedWatcher>,
    watched: BTreeMap<PathBuf, RecursiveMode>,
}

impl WatchService {
    /// Create a service running triggered plans with `runner`.
    ///
    /// Patterns are matched against paths relative to `root`.
    pub fn new(runner: Runner, root: impl Into<PathBuf>, debounce: Duration) -> Self {
        Self {
            runner,
            root: root.into(),
            debounce,
            routes: Arc::new(RwLock::new(Vec::new())),
            bindings: Vec::new(),
            cancel: CancellationToken::new(),
            event_tx: None,
            workers: Vec::new(),
            watcher: None,
            watched: BTreeMap::new(),
        }
    }

    pub fn with_events(mut self, event_tx: mpsc::Sender<WatchEvent>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    /// Bindings currently being served.
    pub fn bindings(&self) -> &[WatchBinding] {
        &self.bindings
    }

    /// Directories currently registered with the file-system watcher.
    pub fn watched_dirs(&self) -> Vec<PathBuf> {
        self.watched.keys().cloned().collect()
    }

    /// Register bindings and start one worker per binding.
    ///
    /// All bindings are checked before any is armed: unknown task names and
    /// invalid patterns fail the whole call. After [`start`](Self::start),
    /// new base directories are added to the file-system watcher. Must be
    /// called inside a tokio runtime.
    pub fn watch(&mut self, bindings: Vec<WatchBinding>) -> Result<()> {
        let mut compiled = Vec::with_capacity(bindings.len());
        for binding in &bindings {
            for task in &binding.tasks {
                self.runner.registry().require(task)?;
            }
            compiled.push(GlobPattern::new(&binding.pattern)?);
        }

        for (binding, glob) in bindings.into_iter().zip(compiled) {
            let (trigger_tx, trigger_rx) = mpsc::unbounded_channel();
            let cancel = self.cancel.child_token();

            let worker = BindingWorker {
                binding: binding.clone(),
                runner: self.runner.clone(),
                debounce: self.debounce,
                cancel: cancel.clone(),
                event_tx: self.event_tx.clone(),
            };
            self.workers.push(tokio::spawn(worker.run(trigger_rx)));

            if let Ok(mut routes) = self.routes.write() {
                routes.push(Route {
                    glob,
                    trigger_tx,
                    cancel,
                });
            }
            pwlog!("Watching {} -> [{}]", binding.pattern, binding.tasks.join(", "));
            self.bindings.push(binding);
        }
        self.sync_watches()
    }

    /// Start watching the file system for the registered bindings.
    ///
    /// Each pattern's literal base directory is watched (recursively unless
    /// the pattern stays at one level). Missing directories are skipped.
    pub fn start(&mut self) -> Result<()> {
        let routes = Arc::clone(&self.routes);
        let root = self.root.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if matches!(event.kind, EventKind::Access(_)) {
                        return;
                    }
                    for path in &event.paths {
                        pwlog_trace!("fs event {:?} {}", event.kind, path.display());
                        route(&routes, &root, path);
                    }
                }
                Err(e) => pwlog_warn!("Watch error: {}", e),
            },
            Config::default(),
        )?;

        self.watcher = Some(watcher);
        self.watched.clear();
        self.sync_watches()
    }

    /// Bring the file-system watcher in line with the live bindings.
    ///
    /// Base directories no binding needs are unwatched, new ones are watched
    /// and a base whose mode changed is re-registered. No-op before `start`.
    fn sync_watches(&mut self) -> Result<()> {
        let wanted: BTreeMap<PathBuf, RecursiveMode> = self.watch_dirs().into_iter().collect();
        let Some(watcher) = self.watcher.as_mut() else {
            return Ok(());
        };

        let stale: Vec<PathBuf> = self
            .watched
            .iter()
            .filter(|(dir, mode)| wanted.get(*dir) != Some(*mode))
            .map(|(dir, _)| dir.clone())
            .collect();
        for dir in stale {
            pwlog_debug!("Unwatching directory {}", dir.display());
            if let Err(e) = watcher.unwatch(&dir) {
                pwlog_warn!("Failed to unwatch {}: {}", dir.display(), e);
            }
            self.watched.remove(&dir);
        }

        for (dir, mode) in wanted {
            if self.watched.contains_key(&dir) {
                continue;
            }
            if !dir.exists() {
                pwlog_warn!("Watch directory {} does not exist, skipping", dir.display());
                continue;
            }
            pwlog_debug!("Watching directory {} ({:?})", dir.display(), mode);
            watcher.watch(&dir, mode)?;
            self.watched.insert(dir, mode);
        }
        Ok(())
    }

    /// Directories to hand to notify, one entry per distinct base.
    fn watch_dirs(&self) -> Vec<(PathBuf, RecursiveMode)> {
        let mut dirs: BTreeMap<PathBuf, RecursiveMode> = BTreeMap::new();
        let Ok(routes) = self.routes.read() else {
            return Vec::new();
        };
        for route in routes.iter().filter(|r| !r.cancel.is_cancelled()) {
            let dir = self.root.join(route.glob.base());
            let mode = if route.glob.depth_limit() == Some(1) {
                RecursiveMode::NonRecursive
            } else {
                RecursiveMode::Recursive
            };
            dirs.entry(dir)
                .and_modify(|m| {
                    if mode == RecursiveMode::Recursive {
                        *m = RecursiveMode::Recursive;
                    }
                })
                .or_insert(mode);
        }
        dirs.into_iter().collect()
    }

    /// Route a changed path to every matching binding.
    ///
    /// Returns how many bindings were triggered.
    pub fn notify_path(&self, path: impl AsRef<Path>) -> usize {
        route(&self.routes, &self.root, path.as_ref())
    }

    /// Stop the binding registered with `pattern`.
    ///
    /// Only future runs are cancelled; a run already in progress finishes.
    /// The base directory leaves the file-system watcher once no other
    /// binding shares it. Returns false if no binding has that pattern.
    pub fn unwatch(&mut self, pattern: &str) -> bool {
        let removed = {
            let Ok(mut routes) = self.routes.write() else {
                return false;
            };
            let before = routes.len();
            routes.retain(|r| {
                if r.glob.as_str() == pattern {
                    r.cancel.cancel();
                    false
                } else {
                    true
                }
            });
            routes.len() != before
        };
        if removed {
            self.bindings.retain(|b| b.pattern != pattern);
            pwlog!("Unwatched {}", pattern);
            if let Err(e) = self.sync_watches() {
                pwlog_warn!("Failed to update watched directories: {}", e);
            }
        }
        removed
    }

    /// Stop every binding and the file-system watcher.
    pub fn shutdown(&mut self) {
        self.cancel.cancel();
        self.watcher = None;
        self.watched.clear();
        if let Ok(mut routes) = self.routes.write() {
            routes.clear();
        }
        self.bindings.clear();
        pwlog!("Watch service shut down");
    }

    /// Wait until every worker has stopped (after [`shutdown`](Self::shutdown)
    /// or cancellation of all bindings).
    pub async fn join(&mut self) {
        let workers = std::mem::take(&mut self.workers);
        for worker in workers {
            let _ = worker.await;
        }
    }

    /// Serve until `stop` resolves, then shut down and wait for workers.
    pub async fn serve_until<F>(&mut self, stop: F)
    where
        F: std::future::Future<Output = ()>,
    {
        tokio::select! {
            _ = stop => {}
            _ = self.cancel.cancelled() => {}
        }
        self.shutdown();
        self.join().await;
    }
}

impl Drop for WatchService {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for WatchService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchService")
            .field("root", &self.root)
            .field("debounce", &self.debounce)
            .field("bindings", &self.bindings.len())
            .finish()
    }
}

fn relative_to(root: &Path, path: &Path) -> PathBuf {
    if path.is_relative() {
        return path.to_path_buf();
    }
    if let Ok(rel) = path.strip_prefix(root) {
        return rel.to_path_buf();
    }
    // notify may report canonical paths (symlinked temp dirs, /private on macOS).
    if let Ok(canonical_root) = root.canonicalize() {
        if let Ok(rel) = path.strip_prefix(&canonical_root) {
            return rel.to_path_buf();
        }
    }
    path.to_path_buf()
}

fn route(routes: &RouteTable, root: &Path, path: &Path) -> usize {
    let relative = relative_to(root, path);
    let Ok(routes) = routes.read() else {
        return 0;
    };
    let mut triggered = 0;
    for r in routes.iter() {
        if r.cancel.is_cancelled() || !r.glob.is_match(&relative) {
            continue;
        }
        if r.trigger_tx.send(relative.clone()).is_ok() {
            triggered += 1;
        }
    }
    triggered
}

/// Per-binding debounce loop.
struct BindingWorker {
    binding: WatchBinding,
    runner: Runner,
    debounce: Duration,
    cancel: CancellationToken,
    event_tx: Option<mpsc::Sender<WatchEvent>>,
}

impl BindingWorker {
    async fn emit(&self, event: WatchEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event).await;
        }
    }

    async fn run(self, mut trigger_rx: mpsc::UnboundedReceiver<PathBuf>) {
        let pattern = self.binding.pattern.clone();
        let plan = self.binding.plan();

        'serve: loop {
            let mut latest = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break 'serve,
                path = trigger_rx.recv() => match path {
                    Some(path) => path,
                    None => break 'serve,
                },
            };

            // Quiet period: every new event restarts the window.
            loop {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => break 'serve,
                    path = trigger_rx.recv() => match path {
                        Some(path) => latest = path,
                        None => break,
                    },
                    _ = tokio::time::sleep(self.debounce) => break,
                }
            }

            pwlog!("{} changed ({}), running [{}]", latest.display(), pattern, self.binding.tasks.join(", "));
            self.emit(WatchEvent::Changed {
                pattern: pattern.clone(),
                path: latest,
            })
            .await;

            // Runs are never cancelled midway.
            match self.runner.run(&plan).await {
                Ok(report) => {
                    self.emit(WatchEvent::RunCompleted {
                        pattern: pattern.clone(),
                        report,
                    })
                    .await;
                }
                Err(error) => {
                    pwlog_error!("Watch run for {} failed: {}", pattern, error);
                    self.emit(WatchEvent::RunFailed {
                        pattern: pattern.clone(),
                        error: error.to_string(),
                    })
                    .await;
                }
            }
        }

        pwlog_debug!("Watch worker for {} stopped", pattern);
        self.emit(WatchEvent::Stopped { pattern }).await;
    }
}
