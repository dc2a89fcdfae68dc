mod common;

use std::sync::atomic::Ordering;

use attendance::coordinator::SessionEvent;
use attendance::error::AttendanceError;
use attendance::queue::QueueConfig;
use attendance::store::MemorySessionStateStore;
use attendance::types::AttendanceStatus;
use common::*;
use tokio::time::{Duration, sleep};

#[tokio::test(start_paused = true)]
async fn updates_inside_one_window_share_a_commit() {
    let h = spawn(RecordingGateway::new());
    h.handle.start(session_config(5, 30)).await.unwrap();

    for token in ["0001", "0002", "0003"] {
        h.handle.scan(token).await.unwrap();
        sleep(Duration::from_millis(500)).await;
    }
    assert!(h.gateway.commits().await.is_empty());

    sleep(Duration::from_secs(3)).await;
    let commits = h.gateway.commits().await;
    assert_eq!(commits.len(), 1);
    assert_eq!(commits[0].len(), 3);
}

#[tokio::test(start_paused = true)]
async fn failed_commit_restores_the_batch_and_retries() {
    let h = spawn(RecordingGateway::failing(2));
    let mut events = h.handle.subscribe();
    h.handle.start(session_config(5, 30)).await.unwrap();
    h.handle.scan("0001").await.unwrap();
    h.handle.scan("0002").await.unwrap();

    let failed = wait_for(&mut events, |e| matches!(e, SessionEvent::FlushFailed { .. })).await;
    assert!(matches!(failed, SessionEvent::FlushFailed { attempt: 1, retry_in_ms: 500, .. }));

    let view = h.handle.status().await.unwrap();
    assert_eq!(view.pending_updates, 2);
    assert_eq!(view.consecutive_failures, 1);
    let statuses: Vec<_> = view.records.iter().map(|r| r.status).collect();
    assert_eq!(statuses, vec![AttendanceStatus::Present, AttendanceStatus::Present]);

    let second = wait_for(&mut events, |e| matches!(e, SessionEvent::FlushFailed { .. })).await;
    assert!(matches!(second, SessionEvent::FlushFailed { attempt: 2, retry_in_ms: 1000, .. }));

    wait_for(&mut events, |e| matches!(e, SessionEvent::FlushSucceeded { count: 2, .. })).await;
    assert_eq!(h.gateway.attempts.load(Ordering::SeqCst), 3);
    let commits = h.gateway.commits().await;
    assert_eq!(commits.len(), 1);
    assert_eq!(commits[0].len(), 2);

    let view = h.handle.status().await.unwrap();
    assert_eq!(view.pending_updates, 0);
    assert_eq!(view.consecutive_failures, 0);
}

#[tokio::test(start_paused = true)]
async fn only_one_commit_is_in_flight() {
    let (gateway, gate) = RecordingGateway::gated();
    let h = spawn(gateway);
    h.handle.start(session_config(5, 30)).await.unwrap();

    h.handle.scan("0001").await.unwrap();
    sleep(Duration::from_millis(2_100)).await;
    assert_eq!(h.gateway.attempts.load(Ordering::SeqCst), 1);

    // Arrives while the first batch is blocked in the gateway.
    h.handle.scan("0002").await.unwrap();
    sleep(Duration::from_secs(3)).await;
    assert_eq!(h.gateway.attempts.load(Ordering::SeqCst), 1);
    let view = h.handle.status().await.unwrap();
    assert_eq!(view.in_flight_updates, 1);
    assert_eq!(view.pending_updates, 1);

    gate.add_permits(2);
    sleep(Duration::from_millis(100)).await;

    let commits = h.gateway.commits().await;
    assert_eq!(commits.len(), 2);
    assert_eq!(commits[0][0].student_id, 1);
    assert_eq!(commits[1][0].student_id, 2);
    assert_eq!(h.gateway.max_in_flight.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn end_reports_persistence_failure_then_keeps_retrying() {
    let config = attendance::CoordinatorConfig {
        queue: QueueConfig {
            retry_max_attempts: 2,
            ..QueueConfig::default()
        },
        ..coordinator_config()
    };
    let gateway = RecordingGateway::failing(usize::MAX);
    let h = spawn_with(gateway, MemorySessionStateStore::new(), config, t0());
    let mut events = h.handle.subscribe();
    h.handle.start(session_config(5, 30)).await.unwrap();
    h.handle.scan("0001").await.unwrap();

    let err = h.handle.end().await.unwrap_err();
    assert!(matches!(err, AttendanceError::PersistenceFailure(_)));
    wait_for(&mut events, |e| matches!(e, SessionEvent::PersistenceStalled { .. })).await;

    let view = h.handle.status().await.unwrap();
    assert_eq!(view.pending_updates, 3);

    // The course cannot reopen while the old session's rows are uncommitted.
    let err = h.handle.start(session_config(5, 30)).await.unwrap_err();
    assert!(matches!(err, AttendanceError::PersistenceFailure(_)));

    h.gateway.fail_next(0);
    wait_for(&mut events, |e| matches!(e, SessionEvent::FlushSucceeded { count: 3, .. })).await;
    assert_eq!(h.gateway.final_status(1).await, Some(AttendanceStatus::Present));
    assert_eq!(h.gateway.final_status(2).await, Some(AttendanceStatus::Absent));
    assert!(matches!(
        h.handle.start(session_config(5, 30)).await,
        Err(AttendanceError::SessionNotLive(_))
    ));

    // Nothing left: a repeated end returns the summary straight away.
    let summary = h.handle.end().await.unwrap();
    assert_eq!(summary.counts.absent, 2);
}
