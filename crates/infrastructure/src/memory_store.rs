use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use admission_core::{
    models::{Checkpoint, PolicyTransition},
    traits::{BreakerStateStore, CheckpointStore, PolicyHistoryStore},
    AdmissionError, AdmissionResult, BreakerSnapshot,
};

/// 可模拟存储故障的开关
#[derive(Debug)]
struct Availability(AtomicBool);

impl Default for Availability {
    fn default() -> Self {
        Self(AtomicBool::new(true))
    }
}

impl Availability {
    fn set(&self, available: bool) {
        self.0.store(available, Ordering::SeqCst);
    }

    fn check(&self, store: &str) -> AdmissionResult<()> {
        if self.0.load(Ordering::SeqCst) {
            Ok(())
        } else {
            warn!("{} 当前不可用", store);
            Err(AdmissionError::storage(format!("{store} unavailable")))
        }
    }
}

/// 内存检查点存储，按 `(stream_id, sequence)` 去重
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    checkpoints: RwLock<BTreeMap<(String, u64), Checkpoint>>,
    availability: Availability,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 模拟存储宕机或恢复
    pub fn set_available(&self, available: bool) {
        self.availability.set(available);
    }

    pub async fn len(&self) -> usize {
        self.checkpoints.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.checkpoints.read().await.is_empty()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> AdmissionResult<()> {
        self.availability.check("checkpoint store")?;
        let mut checkpoints = self.checkpoints.write().await;
        checkpoints
            .entry((checkpoint.stream_id.clone(), checkpoint.sequence))
            .or_insert_with(|| checkpoint.clone());
        debug!(
            "保存检查点 {}:{}",
            checkpoint.stream_id, checkpoint.sequence
        );
        Ok(())
    }

    async fn load_checkpoints(&self) -> AdmissionResult<Vec<Checkpoint>> {
        self.availability.check("checkpoint store")?;
        Ok(self.checkpoints.read().await.values().cloned().collect())
    }
}

/// 内存熔断器状态存储，按 `service_id` 覆盖写入
#[derive(Debug, Default)]
pub struct InMemoryBreakerStateStore {
    states: RwLock<BTreeMap<String, BreakerSnapshot>>,
    availability: Availability,
}

impl InMemoryBreakerStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_available(&self, available: bool) {
        self.availability.set(available);
    }
}

#[async_trait]
impl BreakerStateStore for InMemoryBreakerStateStore {
    async fn save_states(&self, states: &[BreakerSnapshot]) -> AdmissionResult<()> {
        self.availability.check("breaker state store")?;
        let mut stored = self.states.write().await;
        for state in states {
            stored.insert(state.service_id.clone(), state.clone());
        }
        Ok(())
    }

    async fn load_states(&self) -> AdmissionResult<Vec<BreakerSnapshot>> {
        self.availability.check("breaker state store")?;
        Ok(self.states.read().await.values().cloned().collect())
    }
}

/// 内存策略审计存储，只追加
#[derive(Debug, Default)]
pub struct InMemoryPolicyHistoryStore {
    transitions: RwLock<Vec<PolicyTransition>>,
    availability: Availability,
}

impl InMemoryPolicyHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_available(&self, available: bool) {
        self.availability.set(available);
    }
}

#[async_trait]
impl PolicyHistoryStore for InMemoryPolicyHistoryStore {
    async fn append(&self, transition: &PolicyTransition) -> AdmissionResult<()> {
        self.availability.check("policy history store")?;
        self.transitions.write().await.push(transition.clone());
        Ok(())
    }

    async fn history(&self) -> AdmissionResult<Vec<PolicyTransition>> {
        self.availability.check("policy history store")?;
        Ok(self.transitions.read().await.clone())
    }
}

#[cfg(test)]
mod tests {
    use admission_core::CircuitState;
    use chrono::Utc;

    use super::*;

    #[tokio::test]
    async fn test_checkpoint_store_dedupes_sequences() {
        let store = InMemoryCheckpointStore::new();
        store.save_checkpoint(&Checkpoint::new("s", 1)).await.unwrap();
        store.save_checkpoint(&Checkpoint::new("s", 1)).await.unwrap();
        store.save_checkpoint(&Checkpoint::new("s", 2)).await.unwrap();
        assert_eq!(store.len().await, 2);

        let loaded = store.load_checkpoints().await.unwrap();
        let sequences: Vec<u64> = loaded.iter().map(|c| c.sequence).collect();
        assert_eq!(sequences, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_unavailable_store_returns_retryable_error() {
        let store = InMemoryCheckpointStore::new();
        store.set_available(false);
        let err = store
            .save_checkpoint(&Checkpoint::new("s", 1))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(store.is_empty().await);

        store.set_available(true);
        assert!(store.save_checkpoint(&Checkpoint::new("s", 1)).await.is_ok());
    }

    #[tokio::test]
    async fn test_breaker_store_overwrites_by_service() {
        let store = InMemoryBreakerStateStore::new();
        let mut snapshot = BreakerSnapshot {
            service_id: "svc".to_string(),
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 3,
            last_transition: Utc::now(),
        };
        store.save_states(&[snapshot.clone()]).await.unwrap();
        snapshot.state = CircuitState::Open;
        store.save_states(&[snapshot]).await.unwrap();

        let states = store.load_states().await.unwrap();
        assert_eq!(states.len(), 1);
        assert_eq!(states[0].state, CircuitState::Open);
    }
}
