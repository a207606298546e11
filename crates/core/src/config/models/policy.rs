use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{AdmissionError, AdmissionResult};

/// Risk scoring, hold thresholds and gate settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Exposure (cents) at which the exposure component saturates
    pub exposure_cap: f64,
    /// Incident count at which the incident component saturates
    pub incident_cap: u32,
    /// Volatility at which the volatility component saturates
    pub volatility_cap: f64,
    pub exposure_weight: f64,
    pub incident_weight: f64,
    pub volatility_weight: f64,
    /// Risk at or above which admission is always denied
    pub hard_risk_ceiling: f64,
    /// Risk at or above which MFA is required
    pub mfa_risk_threshold: f64,
    /// Priority treated as emergency traffic by the gate
    pub emergency_priority: i64,
    pub watch_hold_threshold_cents: i64,
    pub restricted_hold_threshold_cents: i64,
    /// Minimum time between two de-escalations
    pub deescalation_cooldown_ms: u64,
    /// Transitions kept in memory; the history store holds the full trail
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
}

fn default_history_capacity() -> usize {
    256
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            exposure_cap: 10_000_000.0,
            incident_cap: 10,
            volatility_cap: 1.0,
            exposure_weight: 40.0,
            incident_weight: 35.0,
            volatility_weight: 25.0,
            hard_risk_ceiling: 85.0,
            mfa_risk_threshold: 60.0,
            emergency_priority: 90,
            watch_hold_threshold_cents: 2_500_000,
            restricted_hold_threshold_cents: 1_000_000,
            deescalation_cooldown_ms: 60_000,
            history_capacity: default_history_capacity(),
        }
    }
}

impl PolicyConfig {
    pub fn deescalation_cooldown(&self) -> Duration {
        Duration::from_millis(self.deescalation_cooldown_ms)
    }

    pub fn validate(&self) -> AdmissionResult<()> {
        if self.exposure_cap <= 0.0 || self.volatility_cap <= 0.0 || self.incident_cap == 0 {
            return Err(AdmissionError::config_error(
                "policy caps must be positive",
            ));
        }
        let weights = self.exposure_weight + self.incident_weight + self.volatility_weight;
        if self.exposure_weight < 0.0
            || self.incident_weight < 0.0
            || self.volatility_weight < 0.0
            || (weights - 100.0).abs() > 1e-9
        {
            return Err(AdmissionError::config_error(format!(
                "policy weights must be non-negative and sum to 100, got {weights}"
            )));
        }
        if self.mfa_risk_threshold >= self.hard_risk_ceiling {
            return Err(AdmissionError::config_error(
                "policy.mfa_risk_threshold must be below policy.hard_risk_ceiling",
            ));
        }
        if self.history_capacity == 0 {
            return Err(AdmissionError::config_error(
                "policy.history_capacity must be > 0",
            ));
        }
        if self.restricted_hold_threshold_cents > self.watch_hold_threshold_cents {
            return Err(AdmissionError::config_error(
                "restricted hold threshold must not exceed the watch threshold",
            ));
        }
        Ok(())
    }
}
