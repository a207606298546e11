use anyhow::Result;
use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// 安装 Prometheus 记录器并注册指标描述
///
/// 返回的句柄可随时渲染当前指标文本。
pub fn init_metrics() -> Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus recorder: {}", e))?;
    describe_metrics();
    info!("Prometheus metrics recorder installed");
    Ok(handle)
}

/// 注册控制面所有指标的描述
pub fn describe_metrics() {
    // Admission
    describe_counter!(
        "admission_decisions_total",
        "Admission decisions by outcome"
    );
    describe_gauge!("admission_queue_depth", "Queue depth after the last admit");
    describe_histogram!(
        "admission_call_latency_ms",
        Unit::Milliseconds,
        "Downstream call latency reported through record_outcome"
    );

    // Resilience
    describe_counter!(
        "circuit_breaker_transitions_total",
        "Circuit breaker state transitions by target state"
    );
    describe_counter!(
        "circuit_breaker_trials_reclaimed_total",
        "Half-open trials reclaimed after the call timeout without a reported outcome"
    );
    describe_counter!("queue_shed_total", "Arrivals shed by the admission queue");

    // Policy
    describe_counter!(
        "policy_transitions_total",
        "Policy level transitions by target level"
    );
    describe_counter!(
        "policy_deescalations_deferred_total",
        "De-escalations blocked by the cooldown"
    );
    describe_counter!(
        "policy_history_write_failures_total",
        "Policy transitions that could not be written to the audit store"
    );
    describe_gauge!("policy_level", "Current policy level rank");

    // Coordination
    describe_counter!("replay_events_applied_total", "Replayed events applied");
    describe_counter!(
        "replay_duplicates_total",
        "Replayed events skipped as duplicates"
    );
    describe_counter!(
        "replay_streams_halted_total",
        "Streams halted during replay"
    );
    describe_counter!("election_rounds_total", "Election rounds started");
    describe_counter!("elections_won_total", "Elections that produced a leader");
    describe_counter!(
        "election_split_brain_total",
        "Election rounds aborted by split brain"
    );
}
