//! Task definitions and the task body interface.
//!
//! A task is a named unit of work with an ordered list of prerequisite task
//! names and a body. The orchestrator never looks inside a body: it invokes
//! it and waits for exactly one success or failure.

use std::fmt;
use std::sync::{Arc, Mutex};

use futures::future::{BoxFuture, FutureExt};
use tokio::sync::oneshot;

use crate::error::{Error, Result};

/// The unit of work behind a task.
///
/// Implementations report completion exactly once by resolving the returned
/// future. Internally they may use any concurrency model.
pub trait TaskBody: Send + Sync {
    fn run(&self) -> BoxFuture<'_, Result<()>>;

    /// Short label for listings and logs.
    fn kind(&self) -> &'static str {
        "custom"
    }
}

/// A registered task.
#[derive(Clone)]
pub struct Task {
    /// Unique name within the registry.
    pub name: String,
    /// Tasks that must complete before this task's body runs, in declared order.
    pub prerequisites: Vec<String>,
    /// Optional one-line description shown by `pipewright list`.
    pub description: Option<String>,
    body: Arc<dyn TaskBody>,
}

impl Task {
    pub fn new(name: impl Into<String>, prerequisites: Vec<String>, body: Arc<dyn TaskBody>) -> Self {
        Self {
            name: name.into(),
            prerequisites,
            description: None,
            body,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn body(&self) -> Arc<dyn TaskBody> {
        Arc::clone(&self.body)
    }

    pub fn kind(&self) -> &'static str {
        self.body.kind()
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("prerequisites", &self.prerequisites)
            .field("kind", &self.body.kind())
            .finish()
    }
}

/// A body with nothing to do. Aggregate tasks (prerequisites only) use it.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopBody;

impl TaskBody for NoopBody {
    fn run(&self) -> BoxFuture<'_, Result<()>> {
        async { Ok(()) }.boxed()
    }

    fn kind(&self) -> &'static str {
        "group"
    }
}

/// Body backed by an async closure.
///
/// ```ignore
/// let body = FnBody::new(|| async { compile_styles().await });
/// ```
pub struct FnBody<F> {
    f: F,
}

impl<F, Fut> FnBody<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<()>> + Send + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F, Fut> TaskBody for FnBody<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<()>> + Send + 'static,
{
    fn run(&self) -> BoxFuture<'_, Result<()>> {
        (self.f)().boxed()
    }

    fn kind(&self) -> &'static str {
        "fn"
    }
}

/// Completion signal handed to a [`CallbackBody`].
///
/// Consuming it reports the outcome; dropping it unused counts as a failure.
#[derive(Debug)]
pub struct Done {
    tx: oneshot::Sender<Result<()>>,
}

impl Done {
    pub fn success(self) {
        let _ = self.tx.send(Ok(()));
    }

    pub fn fail(self, reason: impl Into<String>) {
        let _ = self.tx.send(Err(Error::Task(reason.into())));
    }

    pub fn finish(self, result: Result<()>) {
        let _ = self.tx.send(result);
    }
}

/// Body for work that signals completion through a callback.
///
/// The closure may return immediately and hand the [`Done`] to a thread or
/// another task; the run waits until it is consumed.
pub struct CallbackBody<F> {
    f: Mutex<F>,
}

impl<F> CallbackBody<F>
where
    F: FnMut(Done) + Send,
{
    pub fn new(f: F) -> Self {
        Self { f: Mutex::new(f) }
    }
}

impl<F> TaskBody for CallbackBody<F>
where
    F: FnMut(Done) + Send,
{
    fn run(&self) -> BoxFuture<'_, Result<()>> {
        let (tx, rx) = oneshot::channel();
        match self.f.lock() {
            Ok(mut f) => f(Done { tx }),
            Err(_) => return async { Err(Error::Task("callback body poisoned".to_string())) }.boxed(),
        }
        async move {
            rx.await
                .unwrap_or_else(|_| Err(Error::Task("completion signal dropped".to_string())))
        }
        .boxed()
    }

    fn kind(&self) -> &'static str {
        "callback"
    }
}
