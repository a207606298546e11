//! Mock implementations for the collaborator traits
//!
//! `RecordingApplier` is a hand-written in-memory double; the `mock!`
//! blocks generate mockall doubles for expectation-style tests.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use mockall::mock;
use tokio::sync::Mutex;

use admission_core::{
    models::{Candidate, Checkpoint, PolicyTransition, ReplayEvent, Vote},
    traits::{CheckpointStore, EventApplier, PolicyHistoryStore, VoteTransport},
    AdmissionError, AdmissionResult,
};

/// Event applier that records every applied event in order
#[derive(Debug, Default)]
pub struct RecordingApplier {
    applied: Mutex<Vec<ReplayEvent>>,
    failing_keys: Mutex<HashSet<String>>,
    delay: Option<Duration>,
}

impl RecordingApplier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep before each apply, useful for cancellation tests
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail every apply of events carrying `key`
    pub async fn fail_on(&self, key: &str) {
        self.failing_keys.lock().await.insert(key.to_string());
    }

    pub async fn applied(&self) -> Vec<ReplayEvent> {
        self.applied.lock().await.clone()
    }

    /// `(stream_id, sequence)` of every applied event
    pub async fn applied_positions(&self) -> Vec<(String, u64)> {
        self.applied
            .lock()
            .await
            .iter()
            .map(|e| (e.stream_id.clone(), e.sequence))
            .collect()
    }

    pub async fn applied_count(&self) -> usize {
        self.applied.lock().await.len()
    }
}

#[async_trait]
impl EventApplier for RecordingApplier {
    async fn apply(&self, event: &ReplayEvent) -> AdmissionResult<()> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self
            .failing_keys
            .lock()
            .await
            .contains(&event.idempotency_key)
        {
            return Err(AdmissionError::storage(format!(
                "apply failed for {}",
                event.idempotency_key
            )));
        }
        self.applied.lock().await.push(event.clone());
        Ok(())
    }
}

mock! {
    pub Transport {}

    #[async_trait]
    impl VoteTransport for Transport {
        async fn request_votes(
            &self,
            term: u64,
            candidates: &[Candidate],
            voters: &[String],
        ) -> AdmissionResult<Vec<Vote>>;
    }
}

mock! {
    pub Checkpoints {}

    #[async_trait]
    impl CheckpointStore for Checkpoints {
        async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> AdmissionResult<()>;
        async fn load_checkpoints(&self) -> AdmissionResult<Vec<Checkpoint>>;
    }
}

mock! {
    pub PolicyHistory {}

    #[async_trait]
    impl PolicyHistoryStore for PolicyHistory {
        async fn append(&self, transition: &PolicyTransition) -> AdmissionResult<()>;
        async fn history(&self) -> AdmissionResult<Vec<PolicyTransition>>;
    }
}
