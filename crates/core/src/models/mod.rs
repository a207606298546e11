//! # 数据模型
//!
//! 准入与容错控制面的核心数据结构：队列条目、检查点与重放事件、
//! 选举投票以及策略等级。
//!
//! ## 设计原则
//!
//! - 所有时间字段使用 `DateTime<Utc>` 确保时区一致性
//! - 状态字段使用枚举类型，避免无效状态
//! - 实现 `serde::Serialize` 和 `serde::Deserialize`，便于持久化适配器快照与恢复
//!
//! ## 持久化映射
//!
//! 本模块不做任何 I/O，外部存储按以下表结构保存快照：
//!
//! ### checkpoints 表
//! - `(stream_id, sequence)` - 主键
//! - `timestamp` - 记录时间
//!
//! ### policy_history 表
//! - `from_level`, `to_level`, `reason`, `changed_at`

pub mod election;
pub mod policy;
pub mod queue;
pub mod replay;

pub use election::*;
pub use policy::*;
pub use queue::*;
pub use replay::*;
