use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::{AdmissionError, AdmissionResult};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    /// Circuit is closed - normal operation
    Closed,
    /// Circuit is open - calls are blocked
    Open,
    /// Circuit is half-open - a single trial call probes recovery
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening circuit
    pub failure_threshold: u32,
    /// Time the circuit stays open before a trial call is allowed
    pub recovery_timeout_ms: u64,
    /// Maximum call timeout used by `call`
    pub call_timeout_ms: u64,
    /// Exponential backoff multiplier applied after a failed trial
    pub backoff_multiplier: f64,
    /// Maximum recovery timeout
    pub max_recovery_timeout_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_ms: 60_000,
            call_timeout_ms: 30_000,
            backoff_multiplier: 2.0,
            max_recovery_timeout_ms: 300_000, // 5 minutes
        }
    }
}

impl CircuitBreakerConfig {
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_millis(self.recovery_timeout_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn max_recovery_timeout(&self) -> Duration {
        Duration::from_millis(self.max_recovery_timeout_ms)
    }

    pub fn validate(&self) -> AdmissionResult<()> {
        if self.failure_threshold == 0 {
            return Err(AdmissionError::config_error(
                "circuit_breaker.failure_threshold must be > 0",
            ));
        }
        if self.backoff_multiplier < 1.0 {
            return Err(AdmissionError::config_error(
                "circuit_breaker.backoff_multiplier must be >= 1.0",
            ));
        }
        if self.max_recovery_timeout_ms < self.recovery_timeout_ms {
            return Err(AdmissionError::config_error(
                "circuit_breaker.max_recovery_timeout_ms must be >= recovery_timeout_ms",
            ));
        }
        Ok(())
    }
}

/// Circuit breaker statistics
#[derive(Debug, Clone)]
pub struct CircuitBreakerStats {
    /// Current state
    pub state: CircuitState,
    /// Consecutive failures in the current window
    pub failure_count: u32,
    /// Consecutive successes in the current window
    pub success_count: u32,
    /// Total calls recorded
    pub total_calls: u64,
    /// Total successful calls
    pub successful_calls: u64,
    /// Total failed calls
    pub failed_calls: u64,
    /// Last state change (monotonic clock)
    pub last_state_change: Instant,
    /// Last state change (wall clock, persisted)
    pub last_transition_at: DateTime<Utc>,
    /// Current recovery timeout
    pub current_recovery_timeout: Duration,
    /// Whether the half-open trial call is outstanding
    pub trial_in_flight: bool,
    /// When the outstanding trial was granted
    pub trial_granted_at: Option<Instant>,
}

impl CircuitBreakerStats {
    pub fn new(config: &CircuitBreakerConfig) -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            total_calls: 0,
            successful_calls: 0,
            failed_calls: 0,
            last_state_change: Instant::now(),
            last_transition_at: Utc::now(),
            current_recovery_timeout: config.recovery_timeout(),
            trial_in_flight: false,
            trial_granted_at: None,
        }
    }

    /// Calculate failure rate
    pub fn failure_rate(&self) -> f64 {
        if self.total_calls == 0 {
            0.0
        } else {
            self.failed_calls as f64 / self.total_calls as f64
        }
    }

    /// Calculate success rate
    pub fn success_rate(&self) -> f64 {
        if self.total_calls == 0 {
            0.0
        } else {
            self.successful_calls as f64 / self.total_calls as f64
        }
    }

    fn transition(&mut self, service_id: &str, to: CircuitState, now: Instant) {
        let from = self.state;
        self.state = to;
        self.last_state_change = now;
        self.last_transition_at = Utc::now();
        self.trial_in_flight = false;
        self.trial_granted_at = None;
        counter!("circuit_breaker_transitions_total", "to" => to.as_str()).increment(1);
        info!(
            "Circuit breaker for {} transitioned {} -> {}",
            service_id, from, to
        );
    }

    /// Open -> half-open once the recovery timeout has elapsed
    fn refresh(&mut self, service_id: &str, now: Instant) {
        if self.state == CircuitState::Open
            && now.saturating_duration_since(self.last_state_change)
                >= self.current_recovery_timeout
        {
            self.transition(service_id, CircuitState::HalfOpen, now);
            self.success_count = 0;
        }
    }
}

/// Persisted breaker row, keyed by `service_id`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    pub service_id: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub last_transition: DateTime<Utc>,
}

/// Circuit breaker for a single downstream service
///
/// Transitions: closed -> open at `failure_threshold` consecutive failures,
/// open -> half-open after the recovery timeout, half-open -> closed on the
/// first success, half-open -> open on any failure (with backoff).
/// Half-open admits exactly one trial call; other callers are rejected until
/// that trial's result is recorded.
#[derive(Debug)]
pub struct CircuitBreaker {
    service_id: String,
    config: CircuitBreakerConfig,
    stats: Mutex<CircuitBreakerStats>,
}

impl CircuitBreaker {
    pub fn new(service_id: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let stats = CircuitBreakerStats::new(&config);
        Self {
            service_id: service_id.into(),
            config,
            stats: Mutex::new(stats),
        }
    }

    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    pub async fn allow_request(&self) -> bool {
        self.allow_request_at(Instant::now()).await
    }

    /// Check if a call should be allowed based on circuit state
    pub async fn allow_request_at(&self, now: Instant) -> bool {
        let mut stats = self.stats.lock().await;
        stats.refresh(&self.service_id, now);

        match stats.state {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => {
                if stats.trial_in_flight {
                    // 未回报结果的试探在超过调用超时后收回
                    let expired = stats.trial_granted_at.map_or(true, |granted| {
                        now.saturating_duration_since(granted) >= self.config.call_timeout()
                    });
                    if !expired {
                        debug!(
                            "Circuit breaker for {} rejecting call: trial already in flight",
                            self.service_id
                        );
                        return false;
                    }
                    warn!(
                        "Circuit breaker for {} reclaimed a trial with no reported outcome",
                        self.service_id
                    );
                    counter!("circuit_breaker_trials_reclaimed_total").increment(1);
                }
                stats.trial_in_flight = true;
                stats.trial_granted_at = Some(now);
                true
            }
        }
    }

    /// Give back a granted half-open trial that was never executed
    pub async fn release_trial(&self) {
        let mut stats = self.stats.lock().await;
        if stats.state == CircuitState::HalfOpen && stats.trial_in_flight {
            debug!("Circuit breaker for {} released unused trial", self.service_id);
            stats.trial_in_flight = false;
            stats.trial_granted_at = None;
        }
    }

    pub async fn record_result(&self, success: bool) -> CircuitState {
        self.record_result_at(success, Instant::now()).await
    }

    /// Record a call outcome and apply the transition rules, returning the new state
    pub async fn record_result_at(&self, success: bool, now: Instant) -> CircuitState {
        let mut stats = self.stats.lock().await;
        stats.refresh(&self.service_id, now);

        stats.total_calls += 1;
        if success {
            stats.successful_calls += 1;
            stats.success_count = stats.success_count.saturating_add(1);
            match stats.state {
                CircuitState::Closed => stats.failure_count = 0,
                CircuitState::HalfOpen => {
                    stats.failure_count = 0;
                    stats.current_recovery_timeout = self.config.recovery_timeout();
                    stats.transition(&self.service_id, CircuitState::Closed, now);
                }
                // late result from a call started before the circuit opened
                CircuitState::Open => {}
            }
        } else {
            stats.failed_calls += 1;
            stats.failure_count = stats.failure_count.saturating_add(1);
            stats.success_count = 0;
            match stats.state {
                CircuitState::Closed => {
                    if stats.failure_count >= self.config.failure_threshold {
                        stats.current_recovery_timeout = self.config.recovery_timeout();
                        stats.transition(&self.service_id, CircuitState::Open, now);
                    }
                }
                CircuitState::HalfOpen => {
                    // Increase recovery timeout with backoff
                    stats.current_recovery_timeout = std::cmp::min(
                        Duration::from_millis(
                            (stats.current_recovery_timeout.as_millis() as f64
                                * self.config.backoff_multiplier) as u64,
                        ),
                        self.config.max_recovery_timeout(),
                    );
                    stats.transition(&self.service_id, CircuitState::Open, now);
                }
                CircuitState::Open => {}
            }
        }

        stats.state
    }

    /// Execute operation with circuit breaker protection
    pub async fn call<F, Fut, T>(&self, operation: F) -> AdmissionResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = AdmissionResult<T>>,
    {
        if !self.allow_request().await {
            return Err(AdmissionError::Unavailable(format!(
                "circuit breaker for {} is open - calls are blocked",
                self.service_id
            )));
        }

        match tokio::time::timeout(self.config.call_timeout(), operation()).await {
            Ok(Ok(result)) => {
                self.record_result(true).await;
                Ok(result)
            }
            Ok(Err(error)) => {
                self.record_result(false).await;
                Err(error)
            }
            Err(_) => {
                self.record_result(false).await;
                Err(AdmissionError::Timeout(format!(
                    "call to {} timed out",
                    self.service_id
                )))
            }
        }
    }

    pub async fn state(&self) -> CircuitState {
        self.state_at(Instant::now()).await
    }

    pub async fn state_at(&self, now: Instant) -> CircuitState {
        let mut stats = self.stats.lock().await;
        stats.refresh(&self.service_id, now);
        stats.state
    }

    pub async fn stats(&self) -> CircuitBreakerStats {
        self.stats.lock().await.clone()
    }

    pub async fn snapshot(&self) -> BreakerSnapshot {
        let stats = self.stats.lock().await;
        BreakerSnapshot {
            service_id: self.service_id.clone(),
            state: stats.state,
            failure_count: stats.failure_count,
            success_count: stats.success_count,
            last_transition: stats.last_transition_at,
        }
    }

    /// Overwrite the state from a persisted row
    pub async fn restore(&self, snapshot: &BreakerSnapshot) {
        let mut stats = self.stats.lock().await;
        let age = (Utc::now() - snapshot.last_transition)
            .to_std()
            .unwrap_or_default();
        stats.state = snapshot.state;
        stats.failure_count = snapshot.failure_count;
        stats.success_count = snapshot.success_count;
        stats.last_transition_at = snapshot.last_transition;
        stats.last_state_change = Instant::now().checked_sub(age).unwrap_or_else(Instant::now);
        stats.trial_in_flight = false;
        stats.trial_granted_at = None;
    }

    /// Reset circuit breaker to closed state
    pub async fn reset(&self) {
        let mut stats = self.stats.lock().await;
        *stats = CircuitBreakerStats::new(&self.config);
    }

    /// Force open circuit (for maintenance)
    pub async fn force_open(&self) {
        let mut stats = self.stats.lock().await;
        stats.transition(&self.service_id, CircuitState::Open, Instant::now());
    }

    /// Force close circuit (for recovery)
    pub async fn force_close(&self) {
        let mut stats = self.stats.lock().await;
        stats.failure_count = 0;
        stats.current_recovery_timeout = self.config.recovery_timeout();
        stats.transition(&self.service_id, CircuitState::Closed, Instant::now());
    }
}

/// Registry of per-service circuit breakers
///
/// Get-or-create holds the write lock across the lookup and the insert, so
/// concurrent first references always share one breaker. Breaker state is
/// mutated under the breaker's own lock after the registry lock is released.
#[derive(Debug)]
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    pub async fn get_or_create(&self, service_id: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.write().await;
        breakers
            .entry(service_id.to_string())
            .or_insert_with(|| {
                debug!("Creating circuit breaker for {}", service_id);
                Arc::new(CircuitBreaker::new(service_id, self.config.clone()))
            })
            .clone()
    }

    pub async fn record_result(&self, service_id: &str, success: bool) -> CircuitState {
        let breaker = self.get_or_create(service_id).await;
        let state = breaker.record_result(success).await;
        if !success {
            warn!("Recorded failure for {} (state: {})", service_id, state);
        }
        state
    }

    pub async fn service_state(&self, service_id: &str) -> CircuitState {
        self.get_or_create(service_id).await.state().await
    }

    pub async fn allow_request(&self, service_id: &str) -> bool {
        self.get_or_create(service_id).await.allow_request().await
    }

    pub async fn release_trial(&self, service_id: &str) {
        self.get_or_create(service_id).await.release_trial().await
    }

    /// Execute operation against `service_id` with breaker protection
    pub async fn call<F, Fut, T>(&self, service_id: &str, operation: F) -> AdmissionResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = AdmissionResult<T>>,
    {
        self.get_or_create(service_id).await.call(operation).await
    }

    pub async fn len(&self) -> usize {
        self.breakers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.breakers.read().await.is_empty()
    }

    async fn all(&self) -> Vec<Arc<CircuitBreaker>> {
        self.breakers.read().await.values().cloned().collect()
    }

    /// Number of breakers currently not closed
    pub async fn open_count(&self) -> usize {
        let mut open = 0;
        for breaker in self.all().await {
            if breaker.state().await != CircuitState::Closed {
                open += 1;
            }
        }
        open
    }

    /// Fraction of known services whose breaker is not closed
    pub async fn open_ratio(&self) -> f64 {
        let breakers = self.all().await;
        if breakers.is_empty() {
            return 0.0;
        }
        let mut open = 0;
        for breaker in &breakers {
            if breaker.state().await != CircuitState::Closed {
                open += 1;
            }
        }
        open as f64 / breakers.len() as f64
    }

    /// Snapshot of every breaker, sorted by service id
    pub async fn snapshot(&self) -> Vec<BreakerSnapshot> {
        let mut snapshots = Vec::new();
        for breaker in self.all().await {
            snapshots.push(breaker.snapshot().await);
        }
        snapshots.sort_by(|a, b| a.service_id.cmp(&b.service_id));
        snapshots
    }

    pub async fn restore(&self, snapshots: &[BreakerSnapshot]) {
        for snapshot in snapshots {
            self.get_or_create(&snapshot.service_id)
                .await
                .restore(snapshot)
                .await;
        }
        info!("Restored {} circuit breakers", snapshots.len());
    }
}
