use async_trait::async_trait;

use crate::models::{Candidate, ReplayEvent, Vote};
use crate::AdmissionResult;

/// 选票传输接口
///
/// 网络重试由实现方负责；每一轮调用返回该轮完整收集到的选票。
#[async_trait]
pub trait VoteTransport: Send + Sync {
    async fn request_votes(
        &self,
        term: u64,
        candidates: &[Candidate],
        voters: &[String],
    ) -> AdmissionResult<Vec<Vote>>;
}

/// 重放事件的应用方
#[async_trait]
pub trait EventApplier: Send + Sync {
    async fn apply(&self, event: &ReplayEvent) -> AdmissionResult<()>;
}
