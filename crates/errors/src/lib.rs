use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("检查点存储错误: {0}")]
    Storage(String),
    #[error("服务暂时不可用: {0}")]
    Unavailable(String),
    #[error("操作超时: {0}")]
    Timeout(String),
    #[error("序列回退: 流 {stream_id} 的序列 {sequence} 早于持久化起点 {origin}")]
    SequenceRegression {
        stream_id: String,
        sequence: u64,
        origin: u64,
    },
    #[error("缺口超出修复窗口: 流 {stream_id} 从 {highest} 跳到 {sequence} (窗口 {window})")]
    GapBeyondRepairWindow {
        stream_id: String,
        highest: u64,
        sequence: u64,
        window: u64,
    },
    #[error("检测到脑裂: 任期 {term} 中候选者 {candidates:?} 同时达到法定票数")]
    SplitBrain { term: u64, candidates: Vec<String> },
    #[error("不变量被破坏: {0}")]
    InvariantViolation(String),
    #[error("无效的参数: {0}")]
    InvalidArgument(String),
    #[error("操作已取消: {0}")]
    Cancelled(String),
    #[error("配置错误: {0}")]
    Configuration(String),
    #[error("序列化错误: {0}")]
    Serialization(String),
    #[error("内部错误: {0}")]
    Internal(String),
}

pub type AdmissionResult<T> = Result<T, AdmissionError>;

impl AdmissionError {
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        Self::Storage(msg.into())
    }
    pub fn invalid_argument<S: Into<String>>(msg: S) -> Self {
        Self::InvalidArgument(msg.into())
    }
    pub fn invariant<S: Into<String>>(msg: S) -> Self {
        Self::InvariantViolation(msg.into())
    }
    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }
    /// 需要人工介入的错误，重放遇到时必须停止对应的流
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AdmissionError::SequenceRegression { .. }
                | AdmissionError::GapBeyondRepairWindow { .. }
                | AdmissionError::InvariantViolation(_)
                | AdmissionError::SplitBrain { .. }
        )
    }
    /// 调用方可以退避后重试的瞬时错误
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AdmissionError::Storage(_) | AdmissionError::Unavailable(_) | AdmissionError::Timeout(_)
        )
    }
    pub fn user_message(&self) -> &str {
        match self {
            AdmissionError::Storage(_) | AdmissionError::Unavailable(_) => "系统繁忙，请稍后重试",
            AdmissionError::Timeout(_) => "操作超时，请稍后重试",
            AdmissionError::SequenceRegression { .. } | AdmissionError::GapBeyondRepairWindow { .. } => {
                "事件流状态异常，需要运维介入"
            }
            AdmissionError::SplitBrain { .. } => "集群领导者冲突，需要运维介入",
            AdmissionError::InvalidArgument(_) => "请求参数有误",
            _ => "系统内部错误",
        }
    }
}

impl From<serde_json::Error> for AdmissionError {
    fn from(err: serde_json::Error) -> Self {
        AdmissionError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for AdmissionError {
    fn from(err: anyhow::Error) -> Self {
        AdmissionError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests;
