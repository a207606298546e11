use serde::{Deserialize, Serialize};

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::priority_queue::QueueConfig;
use crate::rate_limiter::RateLimiterConfig;
use crate::AdmissionResult;

/// Admission-path components: queue, limiter and breakers
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResilienceConfig {
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub rate_limiter: RateLimiterConfig,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
}

impl ResilienceConfig {
    pub fn validate(&self) -> AdmissionResult<()> {
        self.queue.validate()?;
        self.rate_limiter.validate()?;
        self.circuit_breaker.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resilience_config_default() {
        let config = ResilienceConfig::default();

        assert_eq!(config.queue.hard_limit, 10_000);
        assert_eq!(config.rate_limiter.max_tokens, 100.0);
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_resilience_config_serialization() {
        let config = ResilienceConfig::default();

        let serialized = serde_json::to_string(&config).expect("Failed to serialize");
        let deserialized: ResilienceConfig =
            serde_json::from_str(&serialized).expect("Failed to deserialize");

        assert_eq!(
            config.circuit_breaker.recovery_timeout_ms,
            deserialized.circuit_breaker.recovery_timeout_ms
        );
        assert_eq!(config.queue.emergency_fraction, deserialized.queue.emergency_fraction);
    }
}
