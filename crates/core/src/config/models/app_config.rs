use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{
    coordination::{ElectionConfig, ReplayConfig},
    observability::ObservabilityConfig,
    policy::PolicyConfig,
    resilience::ResilienceConfig,
};
use crate::statistics::StatisticsConfig;

/// Control plane configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub resilience: ResilienceConfig,
    #[serde(default)]
    pub replay: ReplayConfig,
    #[serde(default)]
    pub election: ElectionConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub statistics: StatisticsConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// Load configuration from config file and environment variables
    ///
    /// Load order:
    /// 1. Default configuration
    /// 2. Config file (TOML format)
    /// 3. Environment variable overrides (`ADMISSION_SECTION__FIELD`)
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let defaults =
            ConfigBuilder::try_from(&AppConfig::default()).context("构建默认配置失败")?;
        let mut builder = ConfigBuilder::builder().add_source(defaults);

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
        } else {
            let default_paths = ["config/admission.toml", "admission.toml"];
            if let Some(path) = default_paths.iter().find(|p| Path::new(p).exists()) {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("ADMISSION")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;

        Ok(config)
    }

    /// Load configuration from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;

        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to TOML string
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    /// Validate configuration effectiveness
    pub fn validate(&self) -> Result<()> {
        self.resilience.validate().context("容错组件配置验证失败")?;
        self.replay.validate().context("重放配置验证失败")?;
        self.election.validate().context("选举配置验证失败")?;
        self.policy.validate().context("策略配置验证失败")?;
        self.observability
            .validate()
            .context("可观测性配置验证失败")?;
        if self.statistics.window_size == 0 {
            return Err(anyhow::anyhow!("statistics.window_size must be > 0"));
        }
        Ok(())
    }
}
