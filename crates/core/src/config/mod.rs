//! Control plane configuration
//!
//! Loaded from a TOML file with `ADMISSION_` prefixed environment overrides.

pub mod models;

pub use models::*;
