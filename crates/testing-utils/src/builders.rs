//! Test data builders for creating test entities
//!
//! This module provides builder patterns for creating test data with
//! sensible defaults and easy customization.

use uuid::Uuid;

use admission_core::models::{Candidate, QueueItem, ReplayEvent};

/// Builder for creating test QueueItem entities
pub struct QueueItemBuilder {
    item: QueueItem,
}

impl QueueItemBuilder {
    pub fn new() -> Self {
        Self {
            item: QueueItem::new(Uuid::new_v4().to_string(), 0),
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.item.id = id.to_string();
        self
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.item.priority = priority;
        self
    }

    pub fn build(self) -> QueueItem {
        self.item
    }
}

impl Default for QueueItemBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for creating test ReplayEvent entities
///
/// The idempotency key defaults to `<stream>:<sequence>` so events built for
/// the same position collapse during replay.
pub struct ReplayEventBuilder {
    id: Option<String>,
    stream_id: String,
    idempotency_key: Option<String>,
    sequence: u64,
    payload: serde_json::Value,
}

impl ReplayEventBuilder {
    pub fn new() -> Self {
        Self {
            id: None,
            stream_id: "stream-1".to_string(),
            idempotency_key: None,
            sequence: 1,
            payload: serde_json::json!({}),
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.id = Some(id.to_string());
        self
    }

    pub fn with_stream(mut self, stream_id: &str) -> Self {
        self.stream_id = stream_id.to_string();
        self
    }

    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn with_idempotency_key(mut self, key: &str) -> Self {
        self.idempotency_key = Some(key.to_string());
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn build(self) -> ReplayEvent {
        let idempotency_key = self
            .idempotency_key
            .unwrap_or_else(|| format!("{}:{}", self.stream_id, self.sequence));
        ReplayEvent {
            id: self
                .id
                .unwrap_or_else(|| format!("evt-{}-{}", self.stream_id, self.sequence)),
            stream_id: self.stream_id,
            idempotency_key,
            sequence: self.sequence,
            payload: self.payload,
        }
    }
}

impl Default for ReplayEventBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Events `1..=count` for one stream
pub fn stream_events(stream_id: &str, count: u64) -> Vec<ReplayEvent> {
    (1..=count)
        .map(|sequence| {
            ReplayEventBuilder::new()
                .with_stream(stream_id)
                .with_sequence(sequence)
                .with_payload(serde_json::json!({ "seq": sequence }))
                .build()
        })
        .collect()
}

/// Candidates `c1..cN` with equal log length
pub fn candidates(count: usize, log_len: u64) -> Vec<Candidate> {
    (1..=count)
        .map(|i| Candidate::new(format!("c{i}"), log_len))
        .collect()
}

/// Voter ids `n1..nN`
pub fn voter_ids(count: usize) -> Vec<String> {
    (1..=count).map(|i| format!("n{i}")).collect()
}
