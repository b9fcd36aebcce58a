//! Phase ordering, prerequisite resolution and fail-fast tests.

use std::sync::Arc;

use tokio::sync::mpsc;

use pipewright::orchestration::RunEvent;
use pipewright::{Error, Plan, RunState, Runner, TaskRegistry};

use crate::fixtures::{registry, site_registry, Recorder};

/// Test: clean, compile, package(compile)
/// Given plan [clean, [compile], package]
/// When the plan runs
/// Then bodies run clean, compile, package and the run completes
#[tokio::test]
async fn test_sequential_phases_in_order() {
    let recorder = Recorder::new();
    let reg = registry(
        &recorder,
        &[("clean", &[]), ("compile", &[]), ("package", &["compile"])],
    );
    let runner = Runner::new(Arc::new(reg));

    let plan = Plan::new().then("clean").then_all(["compile"]).then("package");
    let report = runner.run(&plan).await.unwrap();

    assert_eq!(report.state, RunState::Completed);
    assert_eq!(recorder.entries(), vec!["clean", "compile", "package"]);
    // compile already ran in phase 1, so package does not re-run it.
    assert_eq!(report.skipped, vec!["compile"]);
}

/// Test: prerequisites run before the task that needs them
#[tokio::test]
async fn test_prerequisites_resolved_per_phase() {
    let recorder = Recorder::new();
    let runner = Runner::new(Arc::new(site_registry(&recorder)));

    let report = runner.run(&Plan::new().then("html")).await.unwrap();
    assert!(report.is_success());

    let html = recorder.position("html").unwrap();
    for dep in ["webpack", "styles", "jekyll"] {
        assert!(recorder.position(dep).unwrap() < html, "{} should run before html", dep);
    }
    assert_eq!(recorder.entries().len(), 4);
}

/// Test: idempotent runs
/// Given a successful plan
/// When it runs twice
/// Then both runs complete independently and every body runs twice
#[tokio::test]
async fn test_same_plan_twice() {
    let recorder = Recorder::new();
    let runner = Runner::new(Arc::new(site_registry(&recorder)));
    let plan = Plan::new()
        .then("clean")
        .then_all(["html", "images", "fonts", "extras"])
        .then("js-uglify");

    let first = runner.run(&plan).await.unwrap();
    let second = runner.run(&plan).await.unwrap();

    assert!(first.is_success());
    assert!(second.is_success());
    assert_ne!(first.run_id, second.run_id);
    assert_eq!(first.executed_tasks().len(), second.executed_tasks().len());
    assert_eq!(recorder.count("webpack"), 2);
    assert_eq!(recorder.count("clean"), 2);
}

/// Test: fail-fast
/// Given a task failing in phase 0
/// When the plan runs
/// Then phase 1 never starts and the error names the failing task
#[tokio::test]
async fn test_failure_halts_later_phases() {
    let recorder = Recorder::new();
    let mut reg = TaskRegistry::new();
    reg.register("lint", vec![], recorder.failing_body("lint")).unwrap();
    reg.register("deploy", vec![], recorder.body("deploy")).unwrap();
    let runner = Runner::new(Arc::new(reg));

    let err = runner
        .run(&Plan::new().then("lint").then("deploy"))
        .await
        .unwrap_err();

    match &err {
        Error::TaskExecution { task, phase, source } => {
            assert_eq!(task, "lint");
            assert_eq!(*phase, 0);
            assert!(source.to_string().contains("lint broke"));
        }
        other => panic!("Expected TaskExecution, got {:?}", other),
    }
    assert_eq!(err.failed_task(), Some("lint"));
    assert_eq!(recorder.count("deploy"), 0);
}

/// Test: the report of a failed run
/// Given clean then [lint, compile] where lint fails
/// When the plan is executed
/// Then the report is Failed and lists clean and compile as executed
#[tokio::test]
async fn test_failed_run_report_lists_executed_tasks() {
    let recorder = Recorder::new();
    let mut reg = TaskRegistry::new();
    reg.register("clean", vec![], recorder.body("clean")).unwrap();
    reg.register("lint", vec![], recorder.failing_body("lint")).unwrap();
    reg.register("compile", vec![], recorder.body("compile")).unwrap();
    reg.register("deploy", vec![], recorder.body("deploy")).unwrap();
    let runner = Runner::new(Arc::new(reg));

    let plan = Plan::new()
        .then("clean")
        .then_all(["lint", "compile"])
        .then("deploy");
    let outcome = runner.execute(&plan).await;

    let report = &outcome.report;
    assert!(!report.is_success());
    assert!(matches!(report.state, RunState::Failed { ref task, .. } if task == "lint"));
    assert_eq!(report.executed_tasks(), vec!["clean", "compile"]);
    assert_eq!(report.executed[1].phase, 1);
    assert_eq!(recorder.count("deploy"), 0);
    assert_eq!(outcome.error.as_ref().and_then(Error::failed_task), Some("lint"));
}

/// Test: a failing prerequisite stops the task that needs it
#[tokio::test]
async fn test_failing_prerequisite_stops_dependent() {
    let recorder = Recorder::new();
    let mut reg = TaskRegistry::new();
    reg.register("webpack", vec![], recorder.failing_body("webpack"))
        .unwrap();
    reg.register("js-uglify", vec!["webpack".into()], recorder.body("js-uglify"))
        .unwrap();
    let runner = Runner::new(Arc::new(reg));

    let err = runner.run(&Plan::new().then("js-uglify")).await.unwrap_err();
    assert_eq!(err.failed_task(), Some("webpack"));
    assert_eq!(recorder.entries(), vec!["webpack"]);
}

/// Test: an unknown task fails the run without running anything
#[tokio::test]
async fn test_unknown_task_in_plan() {
    let recorder = Recorder::new();
    let runner = Runner::new(Arc::new(site_registry(&recorder)));

    let err = runner
        .run(&Plan::new().then("styles").then("deploy"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UnknownTask(ref n) if n == "deploy"));
    // Phase 0 ran before phase 1 failed to resolve.
    assert_eq!(recorder.entries(), vec!["styles"]);
}

/// Test: a cycle below the requested task is reported, not looped
#[tokio::test]
async fn test_cycle_reported_at_resolution() {
    let recorder = Recorder::new();
    let reg = registry(
        &recorder,
        &[("a", &["b"]), ("b", &["a"]), ("root", &["a"])],
    );
    assert!(matches!(
        reg.resolve("a"),
        Err(Error::CyclicDependency { ref cycle }) if cycle == &vec!["a", "b", "a"]
    ));

    let runner = Runner::new(Arc::new(reg));
    let err = runner.run(&Plan::new().then("root")).await.unwrap_err();
    assert!(matches!(err, Error::CyclicDependency { .. }));
    assert!(recorder.entries().is_empty());
}

/// Test: the event stream follows the run lifecycle
#[tokio::test]
async fn test_event_stream_lifecycle() {
    let recorder = Recorder::new();
    let reg = registry(&recorder, &[("clean", &[]), ("build", &["clean"])]);
    let (tx, mut rx) = mpsc::channel(64);
    let runner = Runner::new(Arc::new(reg)).with_events(tx);

    runner.run(&Plan::new().then("build")).await.unwrap();
    drop(runner);

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }

    assert!(matches!(events.first(), Some(RunEvent::RunStarted { .. })));
    assert!(matches!(
        events.last(),
        Some(RunEvent::RunFinished {
            state: RunState::Completed,
            ..
        })
    ));
    let started: Vec<&str> = events
        .iter()
        .filter_map(|e| match e {
            RunEvent::TaskStarted { task, .. } => Some(task.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(started, vec!["clean", "build"]);
}

/// Test: run_with delivers the outcome exactly once
#[tokio::test]
async fn test_run_with_callback() {
    let recorder = Recorder::new();
    let runner = Runner::new(Arc::new(site_registry(&recorder)));

    let (tx, mut rx) = mpsc::unbounded_channel();
    runner
        .run_with(&Plan::new().then("fonts"), move |result| {
            let _ = tx.send(result.map(|r| r.executed_tasks().len()));
        })
        .await;

    assert_eq!(rx.recv().await.unwrap().unwrap(), 1);
    assert!(rx.recv().await.is_none());
}
