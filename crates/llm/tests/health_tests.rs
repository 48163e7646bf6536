mod support;

use async_trait::async_trait;
use llm::{AlertSink, HealthState, HealthTransition};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use support::{test_config, Harness};
use tokio::time::Instant;

#[derive(Default)]
struct RecordingSink {
    seen: Mutex<Vec<(String, HealthState)>>,
}

#[async_trait]
impl AlertSink for RecordingSink {
    async fn notify(&self, transition: &HealthTransition) {
        self.seen
            .lock()
            .unwrap()
            .push((transition.provider_id.clone(), transition.to));
    }
}

#[tokio::test(start_paused = true)]
async fn test_transitions_are_published_once() {
    let harness = Harness::new();
    let p1 = harness.add("p1").await;
    let monitor = harness.runtime.monitor();
    let mut events = monitor.subscribe();

    let first = monitor.check_now().await;
    assert_eq!(first.len(), 1);
    assert_eq!((first[0].from, first[0].to), (HealthState::Unknown, HealthState::Healthy));

    // Steady state produces no events.
    assert!(monitor.check_now().await.is_empty());

    p1.set_healthy(false);
    let down = monitor.check_now().await;
    assert_eq!(down.len(), 1);
    assert_eq!((down[0].from, down[0].to), (HealthState::Healthy, HealthState::Unhealthy));

    let received = events.recv().await.expect("first event");
    assert_eq!(received.to, HealthState::Healthy);
    let received = events.recv().await.expect("second event");
    assert_eq!(received.provider_id, "p1");
    assert_eq!(received.to, HealthState::Unhealthy);
    assert!(events.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_failures_accumulate_and_recovery_resets() {
    let harness = Harness::new();
    let p1 = harness.add("p1").await;
    let monitor = harness.runtime.monitor();

    p1.set_healthy(false);
    for _ in 0..3 {
        monitor.check_now().await;
    }
    let status = harness.runtime.get_health("p1").await.expect("health").expect("checked");
    assert!(!status.is_healthy);
    assert_eq!(status.consecutive_failures, 3);
    assert_eq!(status.last_error.as_deref(), Some("health check failed"));

    p1.set_healthy(true);
    let recovered = monitor.check_now().await;
    assert_eq!(recovered.len(), 1);
    assert_eq!(recovered[0].to, HealthState::Healthy);

    let status = harness.runtime.get_health("p1").await.expect("health").expect("checked");
    assert!(status.is_healthy);
    assert_eq!(status.consecutive_failures, 0);
    assert!(status.last_error.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_hanging_check_does_not_block_others() {
    let harness = Harness::new();
    let slow = harness.add("slow").await;
    let fast = harness.add("fast").await;
    slow.hang_health_checks(true);

    let started = Instant::now();
    harness.runtime.monitor().check_now().await;
    let elapsed = started.elapsed();

    assert!(elapsed >= Duration::from_secs(5));
    assert!(elapsed < Duration::from_secs(6), "{elapsed:?}");
    assert_eq!(fast.health_checks(), 1);

    let board = harness.runtime.monitor().board();
    assert_eq!(board.state("fast"), HealthState::Healthy);
    assert_eq!(board.state("slow"), HealthState::Unhealthy);
    let error = board.get("slow").and_then(|s| s.last_error).unwrap_or_default();
    assert!(error.contains("timed out"), "{error}");
}

#[tokio::test(start_paused = true)]
async fn test_slow_instance_lookup_counts_against_check_timeout() {
    let harness = Harness::new();
    let p1 = harness.add("p1").await;

    // A fresh runtime has to load the config before it can probe.
    let restarted = harness.restart();
    harness.store.set_latency(Duration::from_secs(30));
    restarted.monitor().check_now().await;

    assert_eq!(p1.health_checks(), 0);
    let board = restarted.monitor().board();
    assert_eq!(board.state("p1"), HealthState::Unhealthy);
    let error = board.get("p1").and_then(|s| s.last_error).unwrap_or_default();
    assert!(error.contains("timed out"), "{error}");
}

#[tokio::test(start_paused = true)]
async fn test_background_loop_polls_and_stops_on_shutdown() {
    let mut config = test_config();
    config.health.interval_secs = 10;
    let harness = Harness::with_config(config);
    let p1 = harness.add("p1").await;

    harness.runtime.start().await.expect("start");
    // Checks at t=0, 10 and 20.
    tokio::time::sleep(Duration::from_secs(25)).await;
    assert_eq!(p1.health_checks(), 3);

    let started = Instant::now();
    harness.runtime.shutdown().await;
    assert!(started.elapsed() < Duration::from_secs(1));

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(p1.health_checks(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_interrupts_hanging_check() {
    let harness = Harness::new();
    let p1 = harness.add("p1").await;
    p1.hang_health_checks(true);

    harness.runtime.start().await.expect("start");
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(p1.health_checks(), 1);

    let started = Instant::now();
    harness.runtime.shutdown().await;
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn test_alert_sink_receives_transitions() {
    let harness = Harness::new();
    let p1 = harness.add("p1").await;
    let sink = Arc::new(RecordingSink::default());
    harness.runtime.forward_alerts(sink.clone());

    let monitor = harness.runtime.monitor();
    monitor.check_now().await;
    p1.set_healthy(false);
    monitor.check_now().await;
    monitor.check_now().await;
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(
        *sink.seen.lock().unwrap(),
        [
            ("p1".to_string(), HealthState::Healthy),
            ("p1".to_string(), HealthState::Unhealthy),
        ]
    );
    harness.runtime.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_deleted_provider_is_pruned() {
    let harness = Harness::new();
    harness.add("p1").await;
    harness.add("p2").await;
    let monitor = harness.runtime.monitor();
    monitor.check_now().await;

    harness.runtime.delete_provider("p2").await.expect("delete");
    monitor.check_now().await;

    let snapshot = monitor.board().snapshot();
    assert!(snapshot.contains_key("p1"));
    assert!(!snapshot.contains_key("p2"));
}

#[tokio::test(start_paused = true)]
async fn test_provider_deleted_mid_check_is_not_recorded() {
    let harness = Harness::new();
    harness.add("p1").await;
    let doomed = harness.add("doomed").await;
    doomed.hang_health_checks(true);
    let monitor = harness.runtime.monitor();

    let (transitions, deleted) = tokio::join!(monitor.check_now(), async {
        tokio::time::sleep(Duration::from_secs(1)).await;
        harness.runtime.delete_provider("doomed").await
    });

    deleted.expect("delete while the check is in flight");
    assert!(transitions.iter().all(|t| t.provider_id != "doomed"));
    assert!(monitor.board().get("doomed").is_none());
    assert_eq!(monitor.board().state("p1"), HealthState::Healthy);
}
