//! Concurrent phase and shared prerequisite tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Barrier;

use pipewright::{CallbackBody, Error, FnBody, Plan, Runner, TaskRegistry};

use crate::fixtures::{site_registry, Recorder};

/// Test: shared prerequisite
/// Given A and B both depending on P
/// When plan [[A, B]] runs
/// Then P runs exactly once, before both A and B
#[tokio::test]
async fn test_shared_prerequisite_runs_once() {
    let recorder = Recorder::new();
    let mut reg = TaskRegistry::new();
    reg.register("P", vec![], recorder.slow_body("P", Duration::from_millis(30)))
        .unwrap();
    reg.register("A", vec!["P".into()], recorder.body("A")).unwrap();
    reg.register("B", vec!["P".into()], recorder.body("B")).unwrap();
    let runner = Runner::new(Arc::new(reg));

    let report = runner.run(&Plan::single_phase(["A", "B"])).await.unwrap();

    assert!(report.is_success());
    assert_eq!(recorder.count("P"), 1);
    assert_eq!(recorder.position("P"), Some(0));
    assert_eq!(recorder.entries().len(), 3);
}

/// Test: concurrent phase
/// Given two bodies that each wait for the other at a barrier
/// When they share a phase
/// Then both finish (they cannot, unless started together)
#[tokio::test]
async fn test_phase_tasks_run_concurrently() {
    let barrier = Arc::new(Barrier::new(2));
    let mut reg = TaskRegistry::new();
    for name in ["images", "fonts"] {
        let barrier = Arc::clone(&barrier);
        reg.register(
            name,
            vec![],
            Arc::new(FnBody::new(move || {
                let barrier = Arc::clone(&barrier);
                async move {
                    barrier.wait().await;
                    Ok(())
                }
            })),
        )
        .unwrap();
    }
    let runner = Runner::new(Arc::new(reg));

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        runner.run(&Plan::single_phase(["images", "fonts"])),
    )
    .await
    .expect("phase tasks did not run concurrently");
    assert!(result.unwrap().is_success());
}

/// Test: fan-in barrier
/// Given a slow and a fast task in one phase
/// When the next phase starts
/// Then both earlier tasks have finished
#[tokio::test]
async fn test_next_phase_waits_for_all() {
    let recorder = Recorder::new();
    let mut reg = TaskRegistry::new();
    reg.register("slow", vec![], recorder.slow_body("slow", Duration::from_millis(100)))
        .unwrap();
    reg.register("fast", vec![], recorder.body("fast")).unwrap();
    reg.register("after", vec![], recorder.body("after")).unwrap();
    let runner = Runner::new(Arc::new(reg));

    let plan = Plan::new().then_all(["slow", "fast"]).then("after");
    runner.run(&plan).await.unwrap();

    assert_eq!(recorder.entries(), vec!["fast", "slow", "after"]);
}

/// Test: the site build
/// Given clean, [html, images, fonts, extras], js-uglify
/// When it runs
/// Then webpack (shared by html and js-uglify) runs once and every task completes
#[tokio::test]
async fn test_site_build_sequence() {
    let recorder = Recorder::new();
    let runner = Runner::new(Arc::new(site_registry(&recorder)));
    let plan = Plan::new()
        .then("clean")
        .then_all(["html", "images", "fonts", "extras"])
        .then("js-uglify");

    let report = runner.run(&plan).await.unwrap();

    assert!(report.is_success());
    assert_eq!(recorder.count("webpack"), 1);
    assert_eq!(recorder.position("clean"), Some(0));
    assert_eq!(recorder.entries().last().map(String::as_str), Some("js-uglify"));
    assert_eq!(recorder.entries().len(), 9);
    assert_eq!(report.skipped, vec!["webpack"]);
}

/// Test: a failure in a concurrent phase lets siblings finish, then halts
#[tokio::test]
async fn test_failure_in_concurrent_phase() {
    let recorder = Recorder::new();
    let mut reg = TaskRegistry::new();
    reg.register("images", vec![], recorder.slow_body("images", Duration::from_millis(50)))
        .unwrap();
    reg.register("fonts", vec![], recorder.failing_body("fonts")).unwrap();
    reg.register("js-uglify", vec![], recorder.body("js-uglify")).unwrap();
    let runner = Runner::new(Arc::new(reg));

    let plan = Plan::new().then_all(["images", "fonts"]).then("js-uglify");
    let err = runner.run(&plan).await.unwrap_err();

    assert_eq!(err.failed_task(), Some("fonts"));
    assert_eq!(recorder.count("images"), 1);
    assert_eq!(recorder.count("js-uglify"), 0);
}

/// Test: done-signal bodies
/// Given a callback body that completes from another task
/// When it runs
/// Then the phase waits for the signal
#[tokio::test]
async fn test_callback_body_signals_completion() {
    let finished = Arc::new(AtomicUsize::new(0));
    let flag = Arc::clone(&finished);
    let mut reg = TaskRegistry::new();
    reg.register(
        "jekyll",
        vec![],
        Arc::new(CallbackBody::new(move |done| {
            let flag = Arc::clone(&flag);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                flag.fetch_add(1, Ordering::SeqCst);
                done.success();
            });
        })),
    )
    .unwrap();
    reg.register(
        "broken",
        vec![],
        Arc::new(CallbackBody::new(|done| done.fail("jekyll exited with 1"))),
    )
    .unwrap();
    let runner = Runner::new(Arc::new(reg));

    let started = Instant::now();
    runner.run(&Plan::new().then("jekyll")).await.unwrap();
    assert!(started.elapsed() >= Duration::from_millis(30));
    assert_eq!(finished.load(Ordering::SeqCst), 1);

    let err = runner.run(&Plan::new().then("broken")).await.unwrap_err();
    match err {
        Error::TaskExecution { source, .. } => {
            assert!(source.to_string().contains("jekyll exited with 1"))
        }
        other => panic!("Expected TaskExecution, got {:?}", other),
    }
}
