pub mod circuit_breaker;
pub mod config;
pub mod logging;
pub mod models;
pub mod priority_queue;
pub mod rate_limiter;
pub mod statistics;
pub mod traits;
pub mod voting;

pub use admission_errors::{AdmissionError, AdmissionResult};
pub use circuit_breaker::{
    BreakerSnapshot, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry,
    CircuitBreakerStats, CircuitState,
};
pub use config::AppConfig;
pub use logging::{init_logging, LogFormat};
pub use models::*;
pub use priority_queue::{
    effective_limit, should_shed, EnqueueOutcome, PriorityAdmissionQueue, QueueConfig,
};
pub use rate_limiter::{RateLimiter, RateLimiterConfig};
pub use statistics::{StatisticsConfig, StatisticsTracker, StatsSummary};
pub use traits::*;
