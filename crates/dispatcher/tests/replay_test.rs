use std::sync::Arc;
use std::time::Duration;

use admission_core::{config::ReplayConfig, AdmissionError, RecordOutcome, ReplayEvent};
use admission_dispatcher::CheckpointReplayCoordinator;
use admission_infrastructure::InMemoryCheckpointStore;
use admission_testing_utils::{
    shuffled, stream_events, MockCheckpoints, RecordingApplier, ReplayEventBuilder, TestEnv,
};

fn coordinator(
    config: ReplayConfig,
) -> (
    Arc<CheckpointReplayCoordinator>,
    Arc<InMemoryCheckpointStore>,
    Arc<RecordingApplier>,
) {
    let store = Arc::new(InMemoryCheckpointStore::new());
    let applier = Arc::new(RecordingApplier::new());
    let coordinator = Arc::new(CheckpointReplayCoordinator::new(
        config,
        store.clone(),
        applier.clone(),
    ));
    (coordinator, store, applier)
}

fn event(stream: &str, sequence: u64) -> ReplayEvent {
    ReplayEventBuilder::new()
        .with_stream(stream)
        .with_sequence(sequence)
        .build()
}

#[tokio::test]
async fn test_record_outcomes() {
    TestEnv::init_logging();
    let (coordinator, store, _) = coordinator(ReplayConfig::default());

    assert_eq!(coordinator.record("k", 1).await.unwrap(), RecordOutcome::Advanced);
    assert_eq!(coordinator.record("k", 2).await.unwrap(), RecordOutcome::Advanced);
    assert_eq!(coordinator.record("k", 4).await.unwrap(), RecordOutcome::Advanced);
    assert_eq!(coordinator.record("k", 2).await.unwrap(), RecordOutcome::Duplicate);
    assert_eq!(coordinator.detect_gaps("k").await, vec![3]);
    assert_eq!(coordinator.resume_position("k").await, Some(3));

    assert_eq!(coordinator.record("k", 3).await.unwrap(), RecordOutcome::GapFilled);
    assert!(coordinator.detect_gaps("k").await.is_empty());
    assert_eq!(coordinator.resume_position("k").await, Some(5));
    assert_eq!(store.len().await, 4);
}

#[tokio::test]
async fn test_regression_below_origin_is_fatal() {
    let (coordinator, _, _) = coordinator(ReplayConfig::default());
    coordinator.record("k", 10).await.unwrap();

    let err = coordinator.record("k", 9).await.unwrap_err();
    assert!(matches!(err, AdmissionError::SequenceRegression { origin: 10, .. }));
    assert!(err.is_fatal());
}

#[tokio::test]
async fn test_gap_beyond_window_is_fatal() {
    let (coordinator, _, _) = coordinator(ReplayConfig {
        max_gap_window: 5,
        ..Default::default()
    });
    coordinator.record("k", 1).await.unwrap();
    assert!(coordinator.record("k", 6).await.is_ok());

    let err = coordinator.record("k", 12).await.unwrap_err();
    assert!(matches!(err, AdmissionError::GapBeyondRepairWindow { .. }));
    assert_eq!(coordinator.stream_sequences().await.get("k"), Some(&6));
}

#[tokio::test]
async fn test_store_failure_leaves_state_unchanged() {
    let (coordinator, store, _) = coordinator(ReplayConfig::default());
    coordinator.record("k", 1).await.unwrap();

    store.set_available(false);
    assert!(coordinator.record("k", 2).await.unwrap_err().is_retryable());
    assert_eq!(coordinator.resume_position("k").await, Some(2));

    store.set_available(true);
    assert_eq!(coordinator.record("k", 2).await.unwrap(), RecordOutcome::Advanced);
}

#[tokio::test]
async fn test_streams_are_independent() {
    let (coordinator, _, _) = coordinator(ReplayConfig::default());
    futures::future::join_all(["a", "b", "c", "d"].map(|stream| {
        let coordinator = coordinator.clone();
        async move {
            for sequence in 1..=50 {
                coordinator.record(stream, sequence).await.unwrap();
            }
        }
    }))
    .await;

    let sequences = coordinator.stream_sequences().await;
    assert_eq!(sequences.len(), 4);
    assert!(sequences.values().all(|&highest| highest == 50));
}

#[tokio::test]
async fn test_concurrent_records_on_one_stream_serialize() {
    let (coordinator, store, _) = coordinator(ReplayConfig::default());
    coordinator.record("k", 1).await.unwrap();

    let mut handles = Vec::new();
    for sequence in (2..=40).rev() {
        let coordinator = coordinator.clone();
        handles.push(tokio::spawn(async move {
            coordinator.record("k", sequence).await.unwrap()
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert!(coordinator.detect_gaps("k").await.is_empty());
    assert_eq!(coordinator.resume_position("k").await, Some(41));
    assert_eq!(store.len().await, 40);
}

#[tokio::test]
async fn test_replay_order_does_not_matter() {
    let forward = vec![event("k", 1), event("k", 2)];
    let backward = vec![event("k", 2), event("k", 1)];

    let (first, _, first_applier) = coordinator(ReplayConfig::default());
    let (second, _, second_applier) = coordinator(ReplayConfig::default());
    first.replay(forward).await.unwrap();
    second.replay(backward).await.unwrap();

    assert_eq!(first.stream_sequences().await, second.stream_sequences().await);
    assert_eq!(
        first_applier.applied_positions().await,
        second_applier.applied_positions().await
    );
    assert_eq!(
        first_applier.applied_positions().await,
        vec![("k".to_string(), 1), ("k".to_string(), 2)]
    );
}

#[tokio::test]
async fn test_shuffled_replay_with_duplicates_converges() {
    let mut events = stream_events("a", 30);
    events.extend(stream_events("b", 30));
    events.extend(stream_events("a", 10));

    let (baseline, _, baseline_applier) = coordinator(ReplayConfig::default());
    let report = baseline.replay(events.clone()).await.unwrap();
    assert_eq!(report.applied, 60);
    assert_eq!(report.duplicates, 10);
    assert!(report.is_clean());

    for seed in 0..5 {
        let (replayed, _, applier) = coordinator(ReplayConfig::default());
        replayed.replay(shuffled(&events, seed)).await.unwrap();
        assert_eq!(
            replayed.stream_sequences().await,
            baseline.stream_sequences().await
        );
        assert_eq!(
            applier.applied_positions().await,
            baseline_applier.applied_positions().await
        );
    }
}

#[tokio::test]
async fn test_second_replay_applies_nothing() {
    let (coordinator, _, applier) = coordinator(ReplayConfig::default());
    let events = stream_events("k", 5);
    coordinator.replay(events.clone()).await.unwrap();

    let report = coordinator.replay(events).await.unwrap();
    assert_eq!(report.applied, 0);
    assert_eq!(report.duplicates, 5);
    assert_eq!(applier.applied_count().await, 5);
}

#[tokio::test]
async fn test_fatal_stream_halts_while_others_continue() {
    let (coordinator, _, applier) = coordinator(ReplayConfig {
        max_gap_window: 3,
        ..Default::default()
    });
    let events = vec![
        event("bad", 1),
        event("bad", 100),
        event("bad", 101),
        event("good", 1),
        event("good", 2),
    ];

    let report = coordinator.replay(events).await.unwrap();
    assert_eq!(report.halted.len(), 1);
    assert_eq!(report.halted[0].stream_id, "bad");
    assert_eq!(report.halted[0].sequence, 100);
    assert!(!report.is_clean());

    let sequences = coordinator.stream_sequences().await;
    assert_eq!(sequences.get("good"), Some(&2));
    assert_eq!(sequences.get("bad"), Some(&1));
    assert_eq!(applier.applied_count().await, 3);
}

#[tokio::test]
async fn test_apply_failure_halts_stream() {
    let (coordinator, _, applier) = coordinator(ReplayConfig::default());
    applier.fail_on("k:2").await;

    let report = coordinator.replay(stream_events("k", 3)).await.unwrap();
    assert_eq!(report.applied, 1);
    assert_eq!(report.halted[0].sequence, 2);
    assert_eq!(coordinator.resume_position("k").await, Some(2));
}

#[tokio::test]
async fn test_cancelled_replay_keeps_checkpoints() {
    let store = Arc::new(InMemoryCheckpointStore::new());
    let applier = Arc::new(RecordingApplier::new().with_delay(Duration::from_millis(5)));
    let coordinator = Arc::new(CheckpointReplayCoordinator::new(
        ReplayConfig::default(),
        store.clone(),
        applier.clone(),
    ));

    let handle = coordinator.spawn_replay(stream_events("k", 1_000));
    let progressed = TestEnv::wait_for(
        || {
            let applier = applier.clone();
            async move { applier.applied_count().await >= 5 }
        },
        Duration::from_secs(2),
    )
    .await;
    assert!(progressed);
    let report = handle.cancel_and_join().await.unwrap();

    assert!(report.cancelled);
    assert!(report.applied < 1_000);
    assert_eq!(store.len().await, report.applied);
    assert_eq!(
        coordinator.resume_position("k").await,
        Some(report.applied as u64 + 1)
    );
}

#[tokio::test]
async fn test_spawned_replay_reports_through_join() {
    let (coordinator, _, _) = coordinator(ReplayConfig::default());
    let handle = coordinator.spawn_replay(stream_events("k", 10));
    let report = handle.join().await.unwrap();
    assert_eq!(report.applied, 10);
    assert!(report.is_clean());
}

#[tokio::test]
async fn test_restore_resumes_after_durable_position() {
    let store = Arc::new(InMemoryCheckpointStore::new());
    {
        let coordinator = CheckpointReplayCoordinator::new(
            ReplayConfig::default(),
            store.clone(),
            Arc::new(RecordingApplier::new()),
        );
        for sequence in [1, 2, 3, 5] {
            coordinator.record("k", sequence).await.unwrap();
        }
    }

    let applier = Arc::new(RecordingApplier::new());
    let restarted =
        CheckpointReplayCoordinator::new(ReplayConfig::default(), store, applier.clone());
    assert_eq!(restarted.restore().await.unwrap(), 1);
    assert_eq!(restarted.resume_position("k").await, Some(4));
    assert_eq!(restarted.detect_gaps("k").await, vec![4]);

    let report = restarted.replay(stream_events("k", 6)).await.unwrap();
    assert_eq!(report.applied, 2);
    assert_eq!(
        applier.applied_positions().await,
        vec![("k".to_string(), 4), ("k".to_string(), 6)]
    );
}

#[tokio::test]
async fn test_same_key_under_different_ids_applies_once() {
    let (coordinator, _, applier) = coordinator(ReplayConfig::default());
    let original = ReplayEventBuilder::new()
        .with_id("evt-a")
        .with_stream("k")
        .with_sequence(1)
        .with_idempotency_key("order-42")
        .with_payload(serde_json::json!({ "amount": 10 }))
        .build();
    let redelivered = ReplayEventBuilder::new()
        .with_id("evt-b")
        .with_stream("k")
        .with_sequence(1)
        .with_idempotency_key("order-42")
        .with_payload(serde_json::json!({ "amount": 10 }))
        .build();

    let report = coordinator
        .replay(vec![redelivered, original])
        .await
        .unwrap();
    assert_eq!(report.applied, 1);
    assert_eq!(report.duplicates, 1);
    assert_eq!(applier.applied().await[0].id, "evt-a");
}

#[tokio::test]
async fn test_restore_propagates_store_failure() {
    let mut store = MockCheckpoints::new();
    store
        .expect_load_checkpoints()
        .times(1)
        .returning(|| Err(AdmissionError::storage("checkpoint table unavailable")));
    store.expect_save_checkpoint().never();

    let coordinator = CheckpointReplayCoordinator::new(
        ReplayConfig::default(),
        Arc::new(store),
        Arc::new(RecordingApplier::new()),
    );
    let err = coordinator.restore().await.unwrap_err();
    assert!(err.is_retryable());
    assert!(coordinator.stream_sequences().await.is_empty());
}

#[tokio::test]
async fn test_checkpoint_write_failure_halts_replay_after_apply() {
    let mut store = MockCheckpoints::new();
    store
        .expect_save_checkpoint()
        .withf(|checkpoint| checkpoint.sequence == 1)
        .times(1)
        .returning(|_| Ok(()));
    store
        .expect_save_checkpoint()
        .withf(|checkpoint| checkpoint.sequence == 2)
        .times(1)
        .returning(|_| Err(AdmissionError::storage("disk full")));

    let applier = Arc::new(RecordingApplier::new());
    let coordinator =
        CheckpointReplayCoordinator::new(ReplayConfig::default(), Arc::new(store), applier.clone());
    let report = coordinator.replay(stream_events("k", 3)).await.unwrap();

    assert_eq!(report.applied, 1);
    assert_eq!(report.halted[0].sequence, 2);
    assert_eq!(coordinator.resume_position("k").await, Some(2));
    assert_eq!(applier.applied_count().await, 2);
}

#[tokio::test]
async fn test_redelivered_event_repairs_missing_checkpoint() {
    let (coordinator, store, applier) = coordinator(ReplayConfig::default());
    coordinator.replay(stream_events("k", 1)).await.unwrap();

    store.set_available(false);
    let second = vec![event("k", 2)];
    let report = coordinator.replay(second.clone()).await.unwrap();
    assert_eq!(report.halted.len(), 1);
    assert_eq!(coordinator.resume_position("k").await, Some(2));
    assert_eq!(coordinator.unrecorded_count("k").await, 1);

    store.set_available(true);
    let report = coordinator.replay(second).await.unwrap();
    assert_eq!(report.applied, 0);
    assert_eq!(report.duplicates, 1);
    assert_eq!(coordinator.resume_position("k").await, Some(3));
    assert_eq!(applier.applied_count().await, 2);
    assert_eq!(coordinator.unrecorded_count("k").await, 0);
}

#[tokio::test]
async fn test_sequences_at_end_of_u64_range() {
    let (coordinator, _, _) = coordinator(ReplayConfig::default());

    assert_eq!(
        coordinator.record("k", u64::MAX - 1).await.unwrap(),
        RecordOutcome::Advanced
    );
    assert_eq!(
        coordinator.record("k", u64::MAX).await.unwrap(),
        RecordOutcome::Advanced
    );
    assert_eq!(
        coordinator.record("k", u64::MAX).await.unwrap(),
        RecordOutcome::Duplicate
    );
    assert!(coordinator.detect_gaps("k").await.is_empty());
    assert_eq!(coordinator.resume_position("k").await, Some(u64::MAX));
}

#[tokio::test]
async fn test_idempotency_tracking_stays_bounded_over_long_replay() {
    let (coordinator, _, applier) = coordinator(ReplayConfig {
        batch_size: 64,
        ..Default::default()
    });
    let mut events = stream_events("k", 5_000);
    events.extend(stream_events("k", 5_000));

    let report = coordinator.replay(shuffled(&events, 11)).await.unwrap();
    assert_eq!(report.applied, 5_000);
    assert_eq!(report.duplicates, 5_000);
    assert_eq!(coordinator.unrecorded_count("k").await, 0);

    let report = coordinator.replay(stream_events("k", 5_000)).await.unwrap();
    assert_eq!(report.applied, 0);
    assert_eq!(applier.applied_count().await, 5_000);
    assert_eq!(coordinator.unrecorded_count("k").await, 0);
}
