//! Watch binding tests: routing, coalescing, unwatch and real file events.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use pipewright::orchestration::WatchEvent;
use pipewright::{Error, Orchestrator, Plan, Runner, WatchBinding, WatchService};

use crate::fixtures::{site_registry, wait_until, Recorder, TestProject};

fn service(recorder: &Recorder, debounce_ms: u64) -> WatchService {
    let runner = Runner::new(Arc::new(site_registry(recorder)));
    WatchService::new(runner, "/site", Duration::from_millis(debounce_ms))
}

/// Test: debounce
/// Given a binding [styles] and two change events inside the window
/// When the window elapses
/// Then styles runs exactly once
#[tokio::test]
async fn test_two_events_inside_window_run_once() {
    let recorder = Recorder::new();
    let mut service = service(&recorder, 150);
    service
        .watch(vec![WatchBinding::new("src/assets/styles/**/*.scss", ["styles"])])
        .unwrap();

    assert_eq!(service.notify_path("src/assets/styles/main.scss"), 1);
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(service.notify_path("src/assets/styles/partials/_grid.scss"), 1);

    assert!(wait_until(Duration::from_secs(2), || recorder.count("styles") == 1).await);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(recorder.count("styles"), 1);

    service.shutdown();
    service.join().await;
}

/// Test: a triggered task still resolves its own prerequisites
#[tokio::test]
async fn test_triggered_task_runs_prerequisites() {
    let recorder = Recorder::new();
    let mut service = service(&recorder, 20);
    service
        .watch(vec![WatchBinding::new("src/**/*.{md,markdown,html}", ["html"])])
        .unwrap();

    service.notify_path("src/_posts/hello.md");
    assert!(wait_until(Duration::from_secs(2), || recorder.count("html") == 1).await);

    let html = recorder.position("html").unwrap();
    for dep in ["webpack", "styles", "jekyll"] {
        assert!(recorder.position(dep).unwrap() < html);
    }
    service.shutdown();
}

/// Test: bindings are independent
/// Given bindings for styles and fonts
/// When only a font changes
/// Then only fonts runs
#[tokio::test]
async fn test_only_matching_binding_runs() {
    let recorder = Recorder::new();
    let mut service = service(&recorder, 20);
    service
        .watch(vec![
            WatchBinding::new("src/assets/styles/**/*.scss", ["styles"]),
            WatchBinding::new("src/assets/fonts/**/*", ["fonts"]),
        ])
        .unwrap();

    assert_eq!(service.notify_path("/site/src/assets/fonts/icons.woff2"), 1);
    assert!(wait_until(Duration::from_secs(2), || recorder.count("fonts") == 1).await);
    assert_eq!(recorder.count("styles"), 0);
    service.shutdown();
}

/// Test: unwatch stops future runs
#[tokio::test]
async fn test_unwatch_stops_future_runs() {
    let recorder = Recorder::new();
    let (tx, mut rx) = mpsc::channel(32);
    let mut service = service(&recorder, 20).with_events(tx);
    service
        .watch(vec![
            WatchBinding::new("src/**/*.js", ["webpack"]),
            WatchBinding::new("bower.json", ["extras"]),
        ])
        .unwrap();

    assert!(service.unwatch("src/**/*.js"));
    assert_eq!(service.notify_path("src/app.js"), 0);
    assert_eq!(service.notify_path("bower.json"), 1);

    assert!(wait_until(Duration::from_secs(2), || recorder.count("extras") == 1).await);
    assert_eq!(recorder.count("webpack"), 0);
    assert_eq!(service.bindings().len(), 1);

    service.shutdown();
    service.join().await;

    let mut stopped = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let WatchEvent::Stopped { pattern } = event {
            stopped.push(pattern);
        }
    }
    stopped.sort();
    assert_eq!(stopped, vec!["bower.json", "src/**/*.js"]);
}

/// Test: bindings built from an orchestrator are validated
#[tokio::test]
async fn test_orchestrator_watch_service_rejects_unknown_task() {
    let recorder = Recorder::new();
    let mut orchestrator = Orchestrator::new(site_registry(&recorder));
    orchestrator.add_binding(WatchBinding::new("src/**/*.scss", ["sass"]));

    let err = orchestrator
        .watch_service(orchestrator.runner(), "/site")
        .unwrap_err();
    assert!(matches!(err, Error::UnknownTask(ref n) if n == "sass"));
}

/// Test: real file-system events
/// Given a service watching a temporary project
/// When a matching file is written
/// Then the bound task runs
#[tokio::test]
async fn test_file_change_triggers_run() {
    let project = TestProject::new("");
    project.write("src/assets/styles/main.scss", "body {}");

    let recorder = Recorder::new();
    let mut orchestrator = Orchestrator::new(site_registry(&recorder))
        .with_debounce(Duration::from_millis(50));
    orchestrator.add_binding(WatchBinding::new("src/assets/styles/**/*.scss", ["styles"]));

    let mut service = orchestrator
        .watch_service(orchestrator.runner(), project.root())
        .unwrap();
    service.start().unwrap();

    // Give the watcher a moment to register before changing the file.
    tokio::time::sleep(Duration::from_millis(200)).await;
    project.write("src/assets/styles/main.scss", "body { color: red }");

    assert!(wait_until(Duration::from_secs(10), || recorder.count("styles") >= 1).await);
    assert_eq!(recorder.count("clean"), 0);

    service.shutdown();
    service.join().await;
}

/// Test: bindings added to a started service
/// Given a started service with no bindings
/// When a binding is added and a matching file is written
/// Then the bound task runs
#[tokio::test]
async fn test_binding_added_after_start_sees_file_changes() {
    let project = TestProject::new("");
    project.write("src/assets/fonts/icons.woff2", "woff2");

    let recorder = Recorder::new();
    let runner = Runner::new(Arc::new(site_registry(&recorder)));
    let mut service = WatchService::new(runner, project.root(), Duration::from_millis(50));
    service.start().unwrap();
    assert!(service.watched_dirs().is_empty());

    service
        .watch(vec![WatchBinding::new("src/assets/fonts/**/*", ["fonts"])])
        .unwrap();
    assert_eq!(service.watched_dirs().len(), 1);

    tokio::time::sleep(Duration::from_millis(200)).await;
    project.write("src/assets/fonts/icons.woff2", "woff2 v2");

    assert!(wait_until(Duration::from_secs(10), || recorder.count("fonts") >= 1).await);

    service.shutdown();
    service.join().await;
}

/// Test: a plan built for a binding is a single phase of its tasks
#[test]
fn test_binding_plan_shape() {
    let binding = WatchBinding::new("bower.json", ["wiredep", "fonts"]);
    assert_eq!(binding.plan(), Plan::single_phase(["wiredep", "fonts"]));
}
