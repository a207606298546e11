use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, error};

use crate::{AdmissionError, AdmissionResult};

/// Token bucket configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimiterConfig {
    /// Bucket capacity
    pub max_tokens: f64,
    /// Tokens accrued per second of wall-clock time
    pub refill_rate_per_second: f64,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            max_tokens: 100.0,
            refill_rate_per_second: 50.0,
        }
    }
}

impl RateLimiterConfig {
    pub fn validate(&self) -> AdmissionResult<()> {
        if !self.max_tokens.is_finite() || self.max_tokens <= 0.0 {
            return Err(AdmissionError::config_error(
                "rate_limiter.max_tokens must be a positive number",
            ));
        }
        if !self.refill_rate_per_second.is_finite() || self.refill_rate_per_second < 0.0 {
            return Err(AdmissionError::config_error(
                "rate_limiter.refill_rate_per_second must be >= 0",
            ));
        }
        Ok(())
    }
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill_at: Instant,
}

impl BucketState {
    /// Lazy refill. A clock reading older than the last refill adds nothing.
    fn refill(&mut self, now: Instant, config: &RateLimiterConfig) -> AdmissionResult<()> {
        if now > self.last_refill_at {
            let elapsed = now.duration_since(self.last_refill_at).as_secs_f64();
            self.tokens = (self.tokens + elapsed * config.refill_rate_per_second)
                .min(config.max_tokens);
            self.last_refill_at = now;
        }
        self.check_invariant(config)
    }

    fn check_invariant(&self, config: &RateLimiterConfig) -> AdmissionResult<()> {
        if self.tokens.is_nan() || self.tokens < 0.0 || self.tokens > config.max_tokens {
            error!(
                "Token bucket invariant violated: tokens={} max={}",
                self.tokens, config.max_tokens
            );
            return Err(AdmissionError::invariant(format!(
                "token count {} outside [0, {}]",
                self.tokens, config.max_tokens
            )));
        }
        Ok(())
    }
}

/// Token bucket rate limiter
///
/// All reads and writes go through one lock so refills are never lost and
/// tokens are never spent twice.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimiterConfig,
    state: Mutex<BucketState>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimiterConfig::default())
    }
}

impl RateLimiter {
    /// Create a limiter with a full bucket
    pub fn new(config: RateLimiterConfig) -> Self {
        let state = BucketState {
            tokens: config.max_tokens,
            last_refill_at: Instant::now(),
        };
        Self {
            config,
            state: Mutex::new(state),
        }
    }

    pub fn max_tokens(&self) -> f64 {
        self.config.max_tokens
    }

    pub async fn try_acquire(&self, cost: f64) -> AdmissionResult<bool> {
        self.try_acquire_at(cost, Instant::now()).await
    }

    /// Refill as of `now`, then spend `cost` tokens if available
    pub async fn try_acquire_at(&self, cost: f64, now: Instant) -> AdmissionResult<bool> {
        if !cost.is_finite() || cost < 0.0 {
            return Err(AdmissionError::invalid_argument(format!(
                "token cost must be a finite non-negative number, got {cost}"
            )));
        }

        let mut state = self.state.lock().await;
        state.refill(now, &self.config)?;

        if state.tokens >= cost {
            state.tokens -= cost;
            Ok(true)
        } else {
            debug!(
                "Rate limiter denied cost {:.2}: {:.2} tokens available",
                cost, state.tokens
            );
            Ok(false)
        }
    }

    pub async fn available_tokens(&self) -> AdmissionResult<f64> {
        self.available_tokens_at(Instant::now()).await
    }

    pub async fn available_tokens_at(&self, now: Instant) -> AdmissionResult<f64> {
        let mut state = self.state.lock().await;
        state.refill(now, &self.config)?;
        Ok(state.tokens)
    }

    /// Restore the bucket to capacity
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        state.tokens = self.config.max_tokens;
        state.last_refill_at = Instant::now();
    }
}
