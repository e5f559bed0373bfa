//! Run-level error taxonomy for INIS QA.
//!
//! Per-record problems never surface here; they are recorded in the
//! [`crate::ledger::RunLedger`]. These errors abort a run or a tool.

/// Fatal pipeline errors.
#[derive(Debug, thiserror::Error)]
pub enum QaError {
    #[error("cannot list candidate records for {date}: {detail}")]
    Fetch { date: chrono::NaiveDate, detail: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("report delivery failed: {0}")]
    Report(String),

    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for fatal QA operations.
pub type Result<T> = std::result::Result<T, QaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_display() {
        let date = chrono::NaiveDate::from_ymd_opt(2025, 3, 14).unwrap();
        let err = QaError::Fetch {
            date,
            detail: "503 Service Unavailable".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("2025-03-14"));
        assert!(msg.contains("503"));
    }

    #[test]
    fn test_digest_mismatch_error() {
        let err = QaError::DigestMismatch {
            expected: "abc123".to_string(),
            actual: "def456".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("abc123"));
        assert!(msg.contains("def456"));
    }

    #[test]
    fn test_invalid_config_error() {
        let err = QaError::InvalidConfig("access token missing".to_string());
        assert!(err.to_string().contains("invalid configuration"));
    }
}
