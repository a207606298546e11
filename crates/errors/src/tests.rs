#[cfg(test)]
mod error_tests {
    use crate::*;

    #[test]
    fn test_admission_error_display() {
        let storage = AdmissionError::Storage("disk full".to_string());
        assert_eq!(storage.to_string(), "检查点存储错误: disk full");

        let regression = AdmissionError::SequenceRegression {
            stream_id: "berth-7".to_string(),
            sequence: 3,
            origin: 10,
        };
        assert_eq!(
            regression.to_string(),
            "序列回退: 流 berth-7 的序列 3 早于持久化起点 10"
        );

        let gap = AdmissionError::GapBeyondRepairWindow {
            stream_id: "berth-7".to_string(),
            highest: 10,
            sequence: 5000,
            window: 1024,
        };
        assert!(gap.to_string().contains("5000"));

        let invariant = AdmissionError::InvariantViolation("negative tokens".to_string());
        assert_eq!(invariant.to_string(), "不变量被破坏: negative tokens");
    }

    #[test]
    fn test_error_classification() {
        assert!(AdmissionError::storage("io").is_retryable());
        assert!(AdmissionError::Timeout("slow".to_string()).is_retryable());
        assert!(!AdmissionError::storage("io").is_fatal());

        let split = AdmissionError::SplitBrain {
            term: 4,
            candidates: vec!["a".to_string(), "b".to_string()],
        };
        assert!(split.is_fatal());
        assert!(!split.is_retryable());
        assert!(AdmissionError::invariant("x").is_fatal());
        assert!(!AdmissionError::invalid_argument("cost").is_fatal());
    }

    #[test]
    fn test_user_message() {
        assert_eq!(
            AdmissionError::storage("io").user_message(),
            "系统繁忙，请稍后重试"
        );
        assert_eq!(
            AdmissionError::invalid_argument("bad").user_message(),
            "请求参数有误"
        );
    }

    #[test]
    fn test_error_conversions() {
        let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let converted: AdmissionError = json_err.into();
        assert!(matches!(converted, AdmissionError::Serialization(_)));

        let converted: AdmissionError = anyhow::anyhow!("boom").into();
        assert!(matches!(converted, AdmissionError::Internal(msg) if msg == "boom"));
    }
}
