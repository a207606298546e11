use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use admission_core::{
    AdmissionResult, AppConfig, BreakerStateStore, Candidate, CircuitBreakerRegistry,
    ElectionResult, EventApplier, PriorityAdmissionQueue, QueueItem, RateLimiter, ReplayEvent,
    ReplayReport, StatisticsTracker,
};
use admission_dispatcher::{
    AdmissionContext, AdmissionController, CheckpointReplayCoordinator, Decision, LeaderElection,
    PolicyEngine,
};
use admission_infrastructure::{
    InMemoryBreakerStateStore, InMemoryCheckpointStore, InMemoryPolicyHistoryStore,
    LocalVoteTransport,
};

/// 下游调用结果，准入后回填给熔断器与延迟统计
#[derive(Debug, Clone, Deserialize)]
pub struct ObservedOutcome {
    pub success: bool,
    #[serde(default)]
    pub latency_ms: u64,
}

/// 请求文件中的单个准入请求
#[derive(Debug, Clone, Deserialize)]
pub struct AdmissionRequest {
    pub id: String,
    #[serde(default)]
    pub priority: i64,
    #[serde(flatten)]
    pub context: AdmissionContext,
    #[serde(default)]
    pub outcome: Option<ObservedOutcome>,
}

/// 请求文件
#[derive(Debug, Clone, Deserialize)]
pub struct RequestBatch {
    #[serde(default)]
    pub events: Vec<ReplayEvent>,
    pub requests: Vec<AdmissionRequest>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DecisionRecord {
    pub id: String,
    #[serde(flatten)]
    pub decision: Decision,
}

/// 只记录日志的事件应用方
struct LoggingApplier;

#[async_trait]
impl EventApplier for LoggingApplier {
    async fn apply(&self, event: &ReplayEvent) -> AdmissionResult<()> {
        info!(
            stream_id = %event.stream_id,
            sequence = event.sequence,
            "应用重放事件 {}",
            event.id
        );
        Ok(())
    }
}

/// 控制面组合根
pub struct ControlPlane {
    controller: AdmissionController,
    replay: Arc<CheckpointReplayCoordinator>,
    election: LeaderElection,
    breaker_store: Arc<InMemoryBreakerStateStore>,
}

impl ControlPlane {
    pub fn from_config(config: &AppConfig, node_id: &str) -> Self {
        let policy = PolicyEngine::new(config.policy.clone())
            .with_history_store(Arc::new(InMemoryPolicyHistoryStore::new()));

        let controller = AdmissionController::new(
            Arc::new(PriorityAdmissionQueue::new(config.resilience.queue.clone())),
            Arc::new(RateLimiter::new(config.resilience.rate_limiter.clone())),
            Arc::new(CircuitBreakerRegistry::new(
                config.resilience.circuit_breaker.clone(),
            )),
            Arc::new(policy),
            Arc::new(StatisticsTracker::new(config.statistics.clone())),
            Arc::new(StatisticsTracker::new(config.statistics.clone())),
        );

        let replay = Arc::new(CheckpointReplayCoordinator::new(
            config.replay.clone(),
            Arc::new(InMemoryCheckpointStore::new()),
            Arc::new(LoggingApplier),
        ));

        let transport = LocalVoteTransport::with_voters([node_id], 0);
        let election = LeaderElection::new(config.election.clone(), Arc::new(transport));

        Self {
            controller,
            replay,
            election,
            breaker_store: Arc::new(InMemoryBreakerStateStore::new()),
        }
    }

    pub fn controller(&self) -> &AdmissionController {
        &self.controller
    }

    /// 恢复检查点与熔断器状态，并运行本地选举
    pub async fn bootstrap(&self, node_id: &str) -> Result<ElectionResult> {
        let streams = self.replay.restore().await.context("恢复检查点失败")?;
        let breakers = self
            .breaker_store
            .load_states()
            .await
            .context("加载熔断器状态失败")?;
        self.controller.breakers().restore(&breakers).await;
        info!("恢复了 {} 个流与 {} 个熔断器", streams, breakers.len());

        let result = self
            .election
            .elect(&[Candidate::new(node_id, 0)], &[node_id.to_string()])
            .await
            .context("领导者选举失败")?;
        if result.is_elected() {
            info!("节点 {} 在任期 {} 成为领导者", node_id, result.term);
        } else {
            warn!("节点 {} 未能当选", node_id);
        }
        Ok(result)
    }

    pub async fn replay(&self, events: Vec<ReplayEvent>) -> Result<ReplayReport> {
        let handle = self.replay.spawn_replay(events);
        let report = handle.join().await.context("重放事件失败")?;
        for halted in &report.halted {
            warn!(
                "流 {} 在序列 {} 停止: {}",
                halted.stream_id, halted.sequence, halted.reason
            );
        }
        Ok(report)
    }

    /// 评估一个请求；准入后回填结果并刷新策略
    pub async fn handle(&self, request: AdmissionRequest) -> Result<DecisionRecord> {
        let item = QueueItem::new(request.id.clone(), request.priority);
        let decision = self
            .controller
            .try_admit(item, &request.context)
            .await
            .with_context(|| format!("评估请求 {} 失败", request.id))?;

        if decision.is_admitted() {
            if let Some(outcome) = &request.outcome {
                self.controller
                    .record_outcome(
                        &request.context.service_id,
                        outcome.success,
                        Duration::from_millis(outcome.latency_ms),
                    )
                    .await?;
            }
        }
        self.controller
            .refresh_policy(&format!("after request {}", request.id))
            .await;

        Ok(DecisionRecord {
            id: request.id,
            decision,
        })
    }

    pub async fn persist_breakers(&self) -> Result<()> {
        let snapshots = self.controller.breakers().snapshot().await;
        self.breaker_store
            .save_states(&snapshots)
            .await
            .context("保存熔断器状态失败")?;
        Ok(())
    }
}
