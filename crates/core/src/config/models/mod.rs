pub mod app_config;
pub mod coordination;
pub mod observability;
pub mod policy;
pub mod resilience;

// Re-export main types for easier imports
pub use app_config::AppConfig;
pub use coordination::{ElectionConfig, ReplayConfig};
pub use observability::ObservabilityConfig;
pub use policy::PolicyConfig;
pub use resilience::ResilienceConfig;
