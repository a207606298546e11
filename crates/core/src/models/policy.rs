use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 运行策略等级，按严重程度递增排序
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum PolicyLevel {
    #[default]
    Normal,
    Watch,
    Restricted,
    Halted,
}

impl PolicyLevel {
    pub const LADDER: [PolicyLevel; 4] = [
        PolicyLevel::Normal,
        PolicyLevel::Watch,
        PolicyLevel::Restricted,
        PolicyLevel::Halted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyLevel::Normal => "normal",
            PolicyLevel::Watch => "watch",
            PolicyLevel::Restricted => "restricted",
            PolicyLevel::Halted => "halted",
        }
    }

    pub fn rank(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for PolicyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskBand {
    Low,
    Medium,
    High,
    Critical,
}

/// 驱动策略等级变化的信号
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicySignal {
    /// 保持当前等级
    Stable,
    /// 升级一级
    Incident,
    /// 降级一级（受冷却时间限制）
    Recovered,
    /// 严重事件，直接进入 halted
    Critical,
}

/// 策略变更审计记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyTransition {
    pub from_level: PolicyLevel,
    pub to_level: PolicyLevel,
    pub reason: String,
    pub changed_at: DateTime<Utc>,
}
