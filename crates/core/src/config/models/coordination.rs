use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{AdmissionError, AdmissionResult};

/// Checkpoint/replay configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayConfig {
    /// Largest forward jump in sequence accepted for a stream
    pub max_gap_window: u64,
    /// Events applied between cancellation checkpoints and yields
    pub batch_size: usize,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            max_gap_window: 1024,
            batch_size: 500,
        }
    }
}

impl ReplayConfig {
    pub fn validate(&self) -> AdmissionResult<()> {
        if self.max_gap_window == 0 {
            return Err(AdmissionError::config_error(
                "replay.max_gap_window must be > 0",
            ));
        }
        if self.batch_size == 0 {
            return Err(AdmissionError::config_error("replay.batch_size must be > 0"));
        }
        Ok(())
    }
}

/// Leader election configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElectionConfig {
    /// Rounds attempted before giving up
    pub max_rounds: u32,
    /// Time allowed for one round of vote collection
    pub round_timeout_ms: u64,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            max_rounds: 5,
            round_timeout_ms: 2_000,
        }
    }
}

impl ElectionConfig {
    pub fn round_timeout(&self) -> Duration {
        Duration::from_millis(self.round_timeout_ms)
    }

    pub fn validate(&self) -> AdmissionResult<()> {
        if self.max_rounds == 0 {
            return Err(AdmissionError::config_error(
                "election.max_rounds must be > 0",
            ));
        }
        if self.round_timeout_ms == 0 {
            return Err(AdmissionError::config_error(
                "election.round_timeout_ms must be > 0",
            ));
        }
        Ok(())
    }
}
