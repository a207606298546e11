use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, gauge, histogram};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use admission_core::{
    models::{PolicyLevel, PolicySignal, QueueItem},
    AdmissionResult, CircuitBreakerRegistry, EnqueueOutcome, PriorityAdmissionQueue, RateLimiter,
    StatisticsTracker, StatsSummary,
};

use crate::policy::{derive_signal, DenialReason, GateDecision, PolicyEngine};

/// 风险评分输入
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RiskInputs {
    pub exposure: f64,
    pub incident_count: u32,
    pub volatility: f64,
}

/// 单次准入请求的上下文
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionContext {
    pub service_id: String,
    #[serde(default)]
    pub risk: RiskInputs,
    #[serde(default)]
    pub comms_degraded: bool,
    #[serde(default)]
    pub mfa_done: bool,
    #[serde(default)]
    pub amount_cents: Option<i64>,
    #[serde(default = "default_cost")]
    pub cost: f64,
}

fn default_cost() -> f64 {
    1.0
}

impl AdmissionContext {
    pub fn new(service_id: impl Into<String>) -> Self {
        Self {
            service_id: service_id.into(),
            risk: RiskInputs::default(),
            comms_degraded: false,
            mfa_done: false,
            amount_cents: None,
            cost: default_cost(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ThrottleReason {
    CircuitOpen { service_id: String },
    TokensExhausted { cost: f64 },
}

/// 准入决策。拒绝是预期结果，不是错误。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", content = "detail", rename_all = "snake_case")]
pub enum Decision {
    Admitted { depth: usize },
    Shed { depth: usize, limit: usize },
    Throttled(ThrottleReason),
    PolicyDenied(DenialReason),
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Admitted { .. } => "admitted",
            Decision::Shed { .. } => "shed",
            Decision::Throttled(_) => "throttled",
            Decision::PolicyDenied(_) => "policy_denied",
        }
    }

    pub fn is_admitted(&self) -> bool {
        matches!(self, Decision::Admitted { .. })
    }
}

/// 健康报告
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub queue_depth: usize,
    pub emergency_mode: bool,
    pub available_tokens: f64,
    pub breakers: usize,
    pub open_breakers: usize,
    pub policy_level: PolicyLevel,
    pub latency: StatsSummary,
    pub risk: StatsSummary,
}

/// 准入控制器
///
/// 按固定顺序组合策略、熔断、限流和排队：
/// policy -> circuit breaker -> rate limiter -> queue。
/// 各组件的锁互不嵌套，控制器本身不持有锁。
pub struct AdmissionController {
    queue: Arc<PriorityAdmissionQueue>,
    limiter: Arc<RateLimiter>,
    breakers: Arc<CircuitBreakerRegistry>,
    policy: Arc<PolicyEngine>,
    latency: Arc<StatisticsTracker>,
    risk: Arc<StatisticsTracker>,
}

impl AdmissionController {
    pub fn new(
        queue: Arc<PriorityAdmissionQueue>,
        limiter: Arc<RateLimiter>,
        breakers: Arc<CircuitBreakerRegistry>,
        policy: Arc<PolicyEngine>,
        latency: Arc<StatisticsTracker>,
        risk: Arc<StatisticsTracker>,
    ) -> Self {
        Self {
            queue,
            limiter,
            breakers,
            policy,
            latency,
            risk,
        }
    }

    pub fn queue(&self) -> &Arc<PriorityAdmissionQueue> {
        &self.queue
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    pub fn policy(&self) -> &Arc<PolicyEngine> {
        &self.policy
    }

    /// 评估一个准入请求
    pub async fn try_admit(
        &self,
        item: QueueItem,
        context: &AdmissionContext,
    ) -> AdmissionResult<Decision> {
        let decision = self.evaluate(item, context).await?;

        counter!("admission_decisions_total", "decision" => decision.as_str()).increment(1);
        match &decision {
            Decision::Admitted { depth } => {
                gauge!("admission_queue_depth").set(*depth as f64);
                debug!("服务 {} 的请求已准入 (队列深度 {})", context.service_id, depth);
            }
            other => {
                info!("服务 {} 的请求被拒绝: {:?}", context.service_id, other);
            }
        }
        Ok(decision)
    }

    async fn evaluate(
        &self,
        item: QueueItem,
        context: &AdmissionContext,
    ) -> AdmissionResult<Decision> {
        // halted 期间也记录风险样本，refresh_policy 才能观察到恢复
        let risk = self.policy.compute_risk_score(
            context.risk.exposure,
            context.risk.incident_count,
            context.risk.volatility,
        );
        self.risk.record(risk).await?;

        let level = self.policy.current_level().await;
        if level == PolicyLevel::Halted {
            return Ok(Decision::PolicyDenied(DenialReason::Halted));
        }

        if let Some(amount_cents) = context.amount_cents {
            if self.policy.should_hold_transaction(amount_cents, level) {
                return Ok(Decision::PolicyDenied(DenialReason::TransactionHold {
                    amount_cents,
                    level,
                }));
            }
        }

        if let GateDecision::Deny(reason) = self.policy.evaluate_policy_gate(
            risk,
            context.comms_degraded,
            context.mfa_done,
            item.priority,
        ) {
            return Ok(Decision::PolicyDenied(reason));
        }

        if !self.breakers.allow_request(&context.service_id).await {
            return Ok(Decision::Throttled(ThrottleReason::CircuitOpen {
                service_id: context.service_id.clone(),
            }));
        }

        // 后续步骤拒绝时归还熔断器的半开试探名额
        let acquired = match self.limiter.try_acquire(context.cost).await {
            Ok(acquired) => acquired,
            Err(e) => {
                self.breakers.release_trial(&context.service_id).await;
                return Err(e);
            }
        };
        if !acquired {
            self.breakers.release_trial(&context.service_id).await;
            return Ok(Decision::Throttled(ThrottleReason::TokensExhausted {
                cost: context.cost,
            }));
        }

        match self.queue.try_enqueue(item).await {
            EnqueueOutcome::Accepted { depth } => Ok(Decision::Admitted { depth }),
            EnqueueOutcome::Shed { depth, limit } => {
                self.breakers.release_trial(&context.service_id).await;
                Ok(Decision::Shed { depth, limit })
            }
        }
    }

    /// 记录下游调用结果，驱动熔断器与延迟统计
    pub async fn record_outcome(
        &self,
        service_id: &str,
        success: bool,
        latency: Duration,
    ) -> AdmissionResult<()> {
        let state = self.breakers.record_result(service_id, success).await;
        let latency_ms = latency.as_secs_f64() * 1000.0;
        self.latency.record(latency_ms).await?;
        histogram!("admission_call_latency_ms").record(latency_ms);
        debug!(
            "服务 {} 调用结果 success={} latency={:.1}ms breaker={}",
            service_id, success, latency_ms, state
        );
        Ok(())
    }

    /// 根据统计与熔断器健康度推导信号并应用到策略引擎
    ///
    /// 策略等级达到 restricted 及以上时队列进入紧急模式。
    pub async fn refresh_policy(&self, reason: &str) -> PolicyLevel {
        self.refresh_policy_at(reason, Instant::now()).await
    }

    pub async fn refresh_policy_at(&self, reason: &str, now: Instant) -> PolicyLevel {
        let recent_risk = self.risk.percentile(95.0).await.unwrap_or(0.0);
        let open_ratio = self.breakers.open_ratio().await;
        let signal = derive_signal(recent_risk, open_ratio);

        let level = self.policy.apply_signal_at(signal, reason, now).await;
        let emergency = level >= PolicyLevel::Restricted;
        if emergency != self.queue.emergency_mode().await {
            self.queue.set_emergency_mode(emergency).await;
        }
        if signal != PolicySignal::Stable {
            warn!(
                "策略刷新: 风险 p95 {:.1}, 熔断比例 {:.2}, 信号 {:?}, 等级 {}",
                recent_risk, open_ratio, signal, level
            );
        }
        level
    }

    pub async fn health(&self) -> AdmissionResult<HealthReport> {
        Ok(HealthReport {
            queue_depth: self.queue.size().await,
            emergency_mode: self.queue.emergency_mode().await,
            available_tokens: self.limiter.available_tokens().await?,
            breakers: self.breakers.len().await,
            open_breakers: self.breakers.open_count().await,
            policy_level: self.policy.current_level().await,
            latency: self.latency.summary().await,
            risk: self.risk.summary().await,
        })
    }
}

#[cfg(test)]
mod tests {
    use admission_core::{
        config::PolicyConfig, CircuitBreakerConfig, QueueConfig, RateLimiterConfig,
        StatisticsConfig,
    };

    use super::*;

    fn controller(hard_limit: usize, max_tokens: f64) -> AdmissionController {
        AdmissionController::new(
            Arc::new(PriorityAdmissionQueue::new(QueueConfig {
                hard_limit,
                ..Default::default()
            })),
            Arc::new(RateLimiter::new(RateLimiterConfig {
                max_tokens,
                refill_rate_per_second: 0.0,
            })),
            Arc::new(CircuitBreakerRegistry::new(CircuitBreakerConfig {
                failure_threshold: 2,
                ..Default::default()
            })),
            Arc::new(PolicyEngine::new(PolicyConfig::default())),
            Arc::new(StatisticsTracker::new(StatisticsConfig::default())),
            Arc::new(StatisticsTracker::new(StatisticsConfig::default())),
        )
    }

    #[tokio::test]
    async fn test_admits_when_everything_is_healthy() {
        let controller = controller(10, 10.0);
        let decision = controller
            .try_admit(QueueItem::new("a", 1), &AdmissionContext::new("svc"))
            .await
            .unwrap();
        assert_eq!(decision, Decision::Admitted { depth: 1 });
    }

    #[tokio::test]
    async fn test_open_breaker_throttles() {
        let controller = controller(10, 10.0);
        for _ in 0..2 {
            controller
                .record_outcome("svc", false, Duration::from_millis(5))
                .await
                .unwrap();
        }
        let decision = controller
            .try_admit(QueueItem::new("a", 1), &AdmissionContext::new("svc"))
            .await
            .unwrap();
        assert_eq!(
            decision,
            Decision::Throttled(ThrottleReason::CircuitOpen {
                service_id: "svc".to_string()
            })
        );
        // tokens untouched by a breaker rejection
        assert_eq!(controller.health().await.unwrap().available_tokens, 10.0);
    }

    #[tokio::test]
    async fn test_exhausted_tokens_throttle_before_queue() {
        let controller = controller(10, 1.0);
        let context = AdmissionContext::new("svc");
        assert!(controller
            .try_admit(QueueItem::new("a", 1), &context)
            .await
            .unwrap()
            .is_admitted());
        let decision = controller
            .try_admit(QueueItem::new("b", 1), &context)
            .await
            .unwrap();
        assert_eq!(
            decision,
            Decision::Throttled(ThrottleReason::TokensExhausted { cost: 1.0 })
        );
        assert_eq!(controller.queue().size().await, 1);
    }

    #[tokio::test]
    async fn test_full_queue_sheds() {
        let controller = controller(1, 10.0);
        let context = AdmissionContext::new("svc");
        controller
            .try_admit(QueueItem::new("a", 1), &context)
            .await
            .unwrap();
        let decision = controller
            .try_admit(QueueItem::new("b", 9), &context)
            .await
            .unwrap();
        assert_eq!(decision, Decision::Shed { depth: 2, limit: 1 });
    }

    #[tokio::test]
    async fn test_policy_denial_runs_first() {
        let controller = controller(10, 10.0);
        let mut context = AdmissionContext::new("svc");
        context.risk = RiskInputs {
            exposure: 1e9,
            incident_count: 100,
            volatility: 10.0,
        };
        let decision = controller
            .try_admit(QueueItem::new("a", 100), &context)
            .await
            .unwrap();
        assert!(matches!(
            decision,
            Decision::PolicyDenied(DenialReason::RiskCeiling { .. })
        ));
        assert_eq!(controller.queue().size().await, 0);
    }

    #[tokio::test]
    async fn test_decision_serializes_with_kind_tag() {
        let json = serde_json::to_value(Decision::Shed { depth: 3, limit: 2 }).unwrap();
        assert_eq!(json["decision"], "shed");
        assert_eq!(json["detail"]["limit"], 2);
    }
}
