use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use metrics::{counter, gauge};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use admission_core::{
    config::PolicyConfig,
    models::{PolicyLevel, PolicySignal, PolicyTransition, RiskBand},
    traits::PolicyHistoryStore,
};

/// 风险分段边界
const MEDIUM_RISK_FLOOR: f64 = 25.0;
const HIGH_RISK_FLOOR: f64 = 50.0;
const CRITICAL_RISK_FLOOR: f64 = 75.0;

/// 根据风险分数划分风险等级，NaN 视为最高风险
pub fn risk_band(score: f64) -> RiskBand {
    if score.is_nan() || score >= CRITICAL_RISK_FLOOR {
        RiskBand::Critical
    } else if score >= HIGH_RISK_FLOOR {
        RiskBand::High
    } else if score >= MEDIUM_RISK_FLOOR {
        RiskBand::Medium
    } else {
        RiskBand::Low
    }
}

/// 升级一级，halted 保持不变
pub fn next_escalation(level: PolicyLevel) -> PolicyLevel {
    PolicyLevel::LADDER
        .get(level.rank() + 1)
        .copied()
        .unwrap_or(PolicyLevel::Halted)
}

/// 降级一级，normal 保持不变
pub fn previous_escalation(level: PolicyLevel) -> PolicyLevel {
    level
        .rank()
        .checked_sub(1)
        .map(|rank| PolicyLevel::LADDER[rank])
        .unwrap_or(PolicyLevel::Normal)
}

/// 纯状态转换：除 Critical 外每次只移动一级
pub fn next_policy(current: PolicyLevel, signal: PolicySignal) -> PolicyLevel {
    match signal {
        PolicySignal::Stable => current,
        PolicySignal::Incident => next_escalation(current),
        PolicySignal::Recovered => previous_escalation(current),
        PolicySignal::Critical => PolicyLevel::Halted,
    }
}

/// 由风险分数和熔断器健康度推导策略信号
pub fn derive_signal(risk_score: f64, open_breaker_ratio: f64) -> PolicySignal {
    match risk_band(risk_score) {
        RiskBand::Critical => PolicySignal::Critical,
        RiskBand::High => PolicySignal::Incident,
        _ if open_breaker_ratio >= 0.5 => PolicySignal::Incident,
        RiskBand::Low if open_breaker_ratio == 0.0 => PolicySignal::Recovered,
        _ => PolicySignal::Stable,
    }
}

/// 策略拒绝原因
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DenialReason {
    /// 系统处于 halted 等级
    Halted,
    /// 交易金额超过当前等级的阈值
    TransactionHold { amount_cents: i64, level: PolicyLevel },
    /// 风险超过硬上限
    RiskCeiling { risk: f64, ceiling: f64 },
    /// 需要多因素认证
    MfaRequired { risk: f64, threshold: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum GateDecision {
    Allow,
    Deny(DenialReason),
}

#[derive(Debug)]
struct PolicyState {
    level: PolicyLevel,
    last_change: Option<Instant>,
    /// 最近的转换，容量由 `history_capacity` 限定
    history: VecDeque<PolicyTransition>,
}

/// 策略引擎
///
/// 维护进程级策略等级，只能通过 [`PolicyEngine::apply_signal`] 修改。
/// 降级受冷却时间限制，每次只降一级。
pub struct PolicyEngine {
    config: PolicyConfig,
    state: RwLock<PolicyState>,
    history_store: Option<Arc<dyn PolicyHistoryStore>>,
}

impl PolicyEngine {
    pub fn new(config: PolicyConfig) -> Self {
        Self {
            config,
            state: RwLock::new(PolicyState {
                level: PolicyLevel::Normal,
                last_change: None,
                history: VecDeque::new(),
            }),
            history_store: None,
        }
    }

    /// 注入策略审计存储
    pub fn with_history_store(mut self, store: Arc<dyn PolicyHistoryStore>) -> Self {
        self.history_store = Some(store);
        self
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// 各分量先归一化并封顶，再按权重求和，结果位于 [0, 100]
    pub fn compute_risk_score(&self, exposure: f64, incident_count: u32, volatility: f64) -> f64 {
        let exposure_component = capped_ratio(exposure, self.config.exposure_cap);
        let incident_component =
            capped_ratio(incident_count as f64, self.config.incident_cap as f64);
        let volatility_component = capped_ratio(volatility, self.config.volatility_cap);

        let score = exposure_component * self.config.exposure_weight
            + incident_component * self.config.incident_weight
            + volatility_component * self.config.volatility_weight;
        score.clamp(0.0, 100.0)
    }

    pub fn should_hold_transaction(&self, amount_cents: i64, level: PolicyLevel) -> bool {
        match level {
            PolicyLevel::Halted => true,
            PolicyLevel::Restricted => amount_cents > self.config.restricted_hold_threshold_cents,
            PolicyLevel::Watch => amount_cents > self.config.watch_hold_threshold_cents,
            PolicyLevel::Normal => false,
        }
    }

    /// 准入门控
    ///
    /// 超过硬上限一律拒绝。超过 MFA 阈值且未完成 MFA 时拒绝，唯一例外是
    /// 通信降级期间的紧急优先级流量（此时无法完成 MFA）。优先级不会绕过硬上限。
    pub fn evaluate_policy_gate(
        &self,
        risk: f64,
        comms_degraded: bool,
        mfa_done: bool,
        priority: i64,
    ) -> GateDecision {
        if risk.is_nan() || risk >= self.config.hard_risk_ceiling {
            return GateDecision::Deny(DenialReason::RiskCeiling {
                risk,
                ceiling: self.config.hard_risk_ceiling,
            });
        }

        if risk >= self.config.mfa_risk_threshold && !mfa_done {
            if comms_degraded && priority >= self.config.emergency_priority {
                debug!(
                    "紧急优先级 {} 在通信降级期间免除MFA (风险 {:.1})",
                    priority, risk
                );
                return GateDecision::Allow;
            }
            return GateDecision::Deny(DenialReason::MfaRequired {
                risk,
                threshold: self.config.mfa_risk_threshold,
            });
        }

        GateDecision::Allow
    }

    pub async fn current_level(&self) -> PolicyLevel {
        self.state.read().await.level
    }

    /// 内存中保留的最近转换，按时间升序
    pub async fn history(&self) -> Vec<PolicyTransition> {
        self.state.read().await.history.iter().cloned().collect()
    }

    pub async fn apply_signal(&self, signal: PolicySignal, reason: &str) -> PolicyLevel {
        self.apply_signal_at(signal, reason, Instant::now()).await
    }

    /// 应用策略信号，返回应用后的等级
    ///
    /// 降级距上次变更不足冷却时间时被忽略。
    pub async fn apply_signal_at(
        &self,
        signal: PolicySignal,
        reason: &str,
        now: Instant,
    ) -> PolicyLevel {
        let transition = {
            let mut state = self.state.write().await;
            let from = state.level;
            let to = next_policy(from, signal);

            if to == from {
                return from;
            }

            if to < from {
                if let Some(last_change) = state.last_change {
                    let elapsed = now.saturating_duration_since(last_change);
                    if elapsed < self.config.deescalation_cooldown() {
                        debug!(
                            "策略降级被冷却时间阻止: {} -> {} (已过 {:?})",
                            from, to, elapsed
                        );
                        counter!("policy_deescalations_deferred_total").increment(1);
                        return from;
                    }
                }
            }

            let transition = PolicyTransition {
                from_level: from,
                to_level: to,
                reason: reason.to_string(),
                changed_at: Utc::now(),
            };
            state.level = to;
            state.last_change = Some(now);
            if state.history.len() >= self.config.history_capacity.max(1) {
                state.history.pop_front();
            }
            state.history.push_back(transition.clone());
            transition
        };

        if transition.to_level > transition.from_level {
            warn!(
                "策略升级: {} -> {} ({})",
                transition.from_level, transition.to_level, transition.reason
            );
        } else {
            info!(
                "策略降级: {} -> {} ({})",
                transition.from_level, transition.to_level, transition.reason
            );
        }
        counter!("policy_transitions_total", "to" => transition.to_level.as_str()).increment(1);
        gauge!("policy_level").set(transition.to_level.rank() as f64);

        if let Some(store) = &self.history_store {
            if let Err(e) = store.append(&transition).await {
                error!("写入策略审计记录失败: {}", e);
                counter!("policy_history_write_failures_total").increment(1);
            }
        }

        transition.to_level
    }

    pub async fn escalate(&self, reason: &str) -> PolicyLevel {
        self.apply_signal(PolicySignal::Incident, reason).await
    }

    pub async fn deescalate(&self, reason: &str) -> PolicyLevel {
        self.apply_signal(PolicySignal::Recovered, reason).await
    }
}

fn capped_ratio(value: f64, cap: f64) -> f64 {
    if value.is_nan() || cap <= 0.0 {
        return 0.0;
    }
    (value.max(0.0) / cap).min(1.0)
}
