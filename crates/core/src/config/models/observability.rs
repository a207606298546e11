use serde::{Deserialize, Serialize};

use crate::logging::LogFormat;
use crate::{AdmissionError, AdmissionResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub log_format: String,
    pub metrics_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: true,
        }
    }
}

impl ObservabilityConfig {
    pub fn validate(&self) -> AdmissionResult<()> {
        match self.log_level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(AdmissionError::config_error(format!(
                    "invalid log level: {other}"
                )))
            }
        }
        self.log_format.parse::<LogFormat>().map(|_| ())
    }
}
