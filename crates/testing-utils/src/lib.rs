//! # Admission Testing Utils
//!
//! Shared testing utilities for the admission control plane.
//! This crate provides test data builders, collaborator mocks and
//! async testing helpers used across the workspace.
//!
//! ## Usage
//!
//! Add this crate as a dev-dependency:
//!
//! ```toml
//! [dev-dependencies]
//! admission-testing-utils = { path = "../testing-utils" }
//! ```
//!
//! Then use the builders and mocks in your tests:
//!
//! ```rust
//! use admission_testing_utils::builders::ReplayEventBuilder;
//! use admission_testing_utils::mocks::RecordingApplier;
//! ```

pub mod builders;
pub mod helpers;
pub mod mocks;

// Re-export commonly used items
pub use builders::*;
pub use helpers::*;
pub use mocks::*;
