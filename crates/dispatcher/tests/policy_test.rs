use std::sync::Arc;
use std::time::{Duration, Instant};

use admission_core::{
    config::PolicyConfig, AdmissionError, PolicyHistoryStore, PolicyLevel, PolicySignal,
};
use admission_dispatcher::PolicyEngine;
use admission_infrastructure::InMemoryPolicyHistoryStore;
use admission_testing_utils::MockPolicyHistory;

#[tokio::test]
async fn test_transitions_are_written_to_history_store() {
    let store = Arc::new(InMemoryPolicyHistoryStore::new());
    let engine = PolicyEngine::new(PolicyConfig {
        deescalation_cooldown_ms: 0,
        ..Default::default()
    })
    .with_history_store(store.clone());

    engine.escalate("crane outage").await;
    engine.escalate("second crane outage").await;
    engine.deescalate("crane repaired").await;

    let stored = store.history().await.unwrap();
    assert_eq!(stored, engine.history().await);
    let levels: Vec<(PolicyLevel, PolicyLevel)> =
        stored.iter().map(|t| (t.from_level, t.to_level)).collect();
    assert_eq!(
        levels,
        vec![
            (PolicyLevel::Normal, PolicyLevel::Watch),
            (PolicyLevel::Watch, PolicyLevel::Restricted),
            (PolicyLevel::Restricted, PolicyLevel::Watch),
        ]
    );
}

#[tokio::test]
async fn test_history_store_failure_does_not_block_transition() {
    let mut store = MockPolicyHistory::new();
    store
        .expect_append()
        .times(1)
        .returning(|_| Err(AdmissionError::storage("audit table locked")));

    let engine = PolicyEngine::new(PolicyConfig::default()).with_history_store(Arc::new(store));
    let level = engine.apply_signal(PolicySignal::Critical, "storm").await;

    assert_eq!(level, PolicyLevel::Halted);
    assert_eq!(engine.current_level().await, PolicyLevel::Halted);
    assert_eq!(engine.history().await.len(), 1);
}

#[tokio::test]
async fn test_stable_signal_writes_nothing() {
    let mut store = MockPolicyHistory::new();
    store.expect_append().never();

    let engine = PolicyEngine::new(PolicyConfig::default()).with_history_store(Arc::new(store));
    assert_eq!(
        engine.apply_signal(PolicySignal::Stable, "quiet").await,
        PolicyLevel::Normal
    );
}

#[tokio::test]
async fn test_halted_recovers_one_rung_per_cooldown() {
    let engine = PolicyEngine::new(PolicyConfig {
        deescalation_cooldown_ms: 100,
        ..Default::default()
    });
    let start = Instant::now();
    engine
        .apply_signal_at(PolicySignal::Critical, "storm", start)
        .await;

    let mut now = start;
    let mut observed = Vec::new();
    for _ in 0..4 {
        now += Duration::from_millis(100);
        observed.push(
            engine
                .apply_signal_at(PolicySignal::Recovered, "calm", now)
                .await,
        );
    }
    assert_eq!(
        observed,
        vec![
            PolicyLevel::Restricted,
            PolicyLevel::Watch,
            PolicyLevel::Normal,
            PolicyLevel::Normal,
        ]
    );
}

#[tokio::test]
async fn test_concurrent_incidents_escalate_exactly_once_each() {
    let engine = Arc::new(PolicyEngine::new(PolicyConfig::default()));
    let mut handles = Vec::new();
    for i in 0..3 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .apply_signal(PolicySignal::Incident, &format!("incident {i}"))
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(engine.current_level().await, PolicyLevel::Halted);
    assert_eq!(engine.history().await.len(), 3);
}

#[tokio::test]
async fn test_in_memory_history_is_bounded_but_store_keeps_everything() {
    let store = Arc::new(InMemoryPolicyHistoryStore::new());
    let engine = PolicyEngine::new(PolicyConfig {
        deescalation_cooldown_ms: 0,
        history_capacity: 2,
        ..Default::default()
    })
    .with_history_store(store.clone());

    for i in 0..10 {
        engine.escalate(&format!("incident {i}")).await;
        engine.deescalate(&format!("recovery {i}")).await;
    }

    let recent = engine.history().await;
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[0].reason, "incident 9");
    assert_eq!(recent[1].reason, "recovery 9");
    assert_eq!(store.history().await.unwrap().len(), 20);
}
