use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 准入队列条目
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: String,
    pub priority: i64,
    pub enqueued_at: DateTime<Utc>,
}

impl QueueItem {
    pub fn new(id: impl Into<String>, priority: i64) -> Self {
        Self {
            id: id.into(),
            priority,
            enqueued_at: Utc::now(),
        }
    }
}
