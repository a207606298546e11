use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 事件流的持久化位置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub stream_id: String,
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(stream_id: impl Into<String>, sequence: u64) -> Self {
        Self {
            stream_id: stream_id.into(),
            sequence,
            timestamp: Utc::now(),
        }
    }
}

/// 待重放的事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayEvent {
    pub id: String,
    pub stream_id: String,
    pub idempotency_key: String,
    pub sequence: u64,
    pub payload: serde_json::Value,
}

/// 记录检查点的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordOutcome {
    /// 新的最高序列
    Advanced,
    /// 填补了此前缺失的序列
    GapFilled,
    /// 序列已记录过，无任何影响
    Duplicate,
}

/// 被停止重放的流
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HaltedStream {
    pub stream_id: String,
    pub sequence: u64,
    pub reason: String,
}

/// 重放报告
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayReport {
    pub applied: usize,
    pub duplicates: usize,
    pub halted: Vec<HaltedStream>,
    pub cancelled: bool,
    pub duration_ms: u64,
}

impl ReplayReport {
    pub fn is_clean(&self) -> bool {
        self.halted.is_empty() && !self.cancelled
    }
}
