mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{service, MockOrchestrator, NEW_DIGEST};
use updater_core::{EngineConfig, OverlapPolicy, SweepStatus};
use updater_engine::{CancellationToken, SweepError, SweepGuard, UpdateEngine};

fn guarded(policy: OverlapPolicy, delay: Duration) -> (Arc<MockOrchestrator>, Arc<SweepGuard>) {
    let mock = Arc::new(
        MockOrchestrator::new(vec![
            service("1", "a", "a:latest", &[]),
            service("2", "b", "b:latest", &[]),
        ])
        .with_delay(delay),
    );
    mock.publish("a:latest", NEW_DIGEST);
    mock.publish("b:latest", NEW_DIGEST);

    let config = EngineConfig {
        overlap_policy: policy,
        ..EngineConfig::default()
    };
    let guard = SweepGuard::new(UpdateEngine::new(mock.clone(), config));
    (mock, Arc::new(guard))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn reject_policy_refuses_an_overlapping_trigger() {
    let (mock, guard) = guarded(OverlapPolicy::Reject, Duration::from_millis(100));
    let cancel = CancellationToken::new();

    let first = {
        let guard = guard.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { guard.trigger_sweep(Vec::new(), &cancel).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(guard.is_running());

    let second = guard.trigger_sweep(Vec::new(), &cancel).await;
    assert!(matches!(second, Err(SweepError::Busy)));

    let report = first.await.expect("join").expect("first sweep");
    assert_eq!(report.updated(), 2);
    assert_eq!(mock.peak_listing(), 1);
    assert!(!guard.is_running());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn wait_policy_runs_triggers_one_after_another() {
    let (mock, guard) = guarded(OverlapPolicy::Wait, Duration::from_millis(30));
    let cancel = CancellationToken::new();

    let handles: Vec<_> = (0..3)
        .map(|_| {
            let guard = guard.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { guard.trigger_sweep(Vec::new(), &cancel).await })
        })
        .collect();

    let mut updated = 0;
    for handle in handles {
        let report = handle.await.expect("join").expect("sweep");
        assert_eq!(report.status, SweepStatus::Completed);
        updated += report.updated();
    }

    assert_eq!(updated, 2, "only the first sweep finds new digests");
    assert_eq!(mock.peak_listing(), 1, "sweeps must never overlap");
    assert_eq!(mock.updates().len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn queued_trigger_gives_up_on_cancellation() {
    let (mock, guard) = guarded(OverlapPolicy::Wait, Duration::from_millis(100));
    let running = CancellationToken::new();
    let queued = CancellationToken::new();

    let first = {
        let guard = guard.clone();
        let running = running.clone();
        tokio::spawn(async move { guard.trigger_sweep(Vec::new(), &running).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let second = {
        let guard = guard.clone();
        let queued = queued.clone();
        tokio::spawn(async move { guard.trigger_sweep(Vec::new(), &queued).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    queued.cancel();

    let report = second.await.expect("join").expect("cancelled sweep");
    assert_eq!(report.status, SweepStatus::Cancelled);
    assert!(report.services.is_empty());

    first.await.expect("join").expect("first sweep");
    assert_eq!(mock.calls().iter().filter(|c| **c == common::Call::List).count(), 1);
}

#[tokio::test]
async fn wait_idle_returns_once_the_sweep_is_done() {
    let (mock, guard) = guarded(OverlapPolicy::Wait, Duration::from_millis(20));
    let cancel = CancellationToken::new();

    let run = {
        let guard = guard.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { guard.trigger_sweep(Vec::new(), &cancel).await })
    };
    tokio::task::yield_now().await;
    guard.wait_idle().await;

    assert!(!guard.is_running());
    run.await.expect("join").expect("sweep");
    assert_eq!(mock.updates().len(), 2);
}
