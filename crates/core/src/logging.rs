use std::str::FromStr;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::{AdmissionError, AdmissionResult};

/// Output format for log entries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// JSON format
    Json,
    /// Pretty-printed, human readable
    Pretty,
}

impl FromStr for LogFormat {
    type Err = AdmissionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" | "text" => Ok(LogFormat::Pretty),
            other => Err(AdmissionError::config_error(format!(
                "不支持的日志格式: {other}"
            ))),
        }
    }
}

/// 初始化日志系统
///
/// `RUST_LOG` takes precedence over `log_level` when set.
pub fn init_logging(log_level: &str, format: LogFormat) -> AdmissionResult<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    match format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .map_err(|e| AdmissionError::config_error(format!("初始化JSON日志格式失败: {e}"))),
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init()
            .map_err(|e| AdmissionError::config_error(format!("初始化Pretty日志格式失败: {e}"))),
    }
}
