use async_trait::async_trait;

use crate::circuit_breaker::BreakerSnapshot;
use crate::models::{Checkpoint, PolicyTransition};
use crate::AdmissionResult;

/// 检查点持久化接口，按 `(stream_id, sequence)` 存储
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> AdmissionResult<()>;

    async fn load_checkpoints(&self) -> AdmissionResult<Vec<Checkpoint>>;
}

/// 熔断器状态持久化接口，按 `service_id` 覆盖写入
#[async_trait]
pub trait BreakerStateStore: Send + Sync {
    async fn save_states(&self, states: &[BreakerSnapshot]) -> AdmissionResult<()>;

    async fn load_states(&self) -> AdmissionResult<Vec<BreakerSnapshot>>;
}

/// 策略变更审计
#[async_trait]
pub trait PolicyHistoryStore: Send + Sync {
    async fn append(&self, transition: &PolicyTransition) -> AdmissionResult<()>;

    async fn history(&self) -> AdmissionResult<Vec<PolicyTransition>>;
}
