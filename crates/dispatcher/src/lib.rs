//! Admission Dispatcher
//!
//! 组合核心弹性原语的协调层：策略引擎、领导者选举、检查点重放
//! 以及对外的准入控制器。

pub mod controller;
pub mod election;
pub mod policy;
pub mod replay;

pub use controller::{
    AdmissionContext, AdmissionController, Decision, HealthReport, RiskInputs, ThrottleReason,
};
pub use admission_core::voting::{
    count_votes, has_quorum, quorum, split_brain_detected, vote_validator,
};
pub use election::LeaderElection;
pub use policy::{
    derive_signal, next_escalation, next_policy, previous_escalation, risk_band, DenialReason,
    GateDecision, PolicyEngine,
};
pub use replay::{CheckpointReplayCoordinator, ReplayHandle};
