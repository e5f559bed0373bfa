//! External collaborator contracts for the QA pipeline.
//!
//! These traits define the seams the orchestrator drives:
//! - `RecordSource`: lists candidate records for a day
//! - `QaClassifier`: turns a record into findings
//! - `RecordApi`: reads, patches and marks records
//! - `ReportSink`: receives the finished run report
//!
//! All traits are async and backend-agnostic. In-memory fakes live in the
//! `fakes` module; HTTP implementations live in `inis-qa-invenio`.

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::domain::{FieldPath, FieldValue, Finding, Listed, Record};
use crate::orchestrator::RunReport;
use crate::retry::Retryable;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Error returned by the record update API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    /// Network failure or server-side error; worth retrying.
    #[error("transient API error{}: {message}", status_suffix(.status))]
    Transient {
        status: Option<u16>,
        message: String,
    },

    /// Authorization or validation failure; retrying will not help.
    #[error("request rejected{}: {message}", status_suffix(.status))]
    Rejected {
        status: Option<u16>,
        message: String,
    },
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {s})")).unwrap_or_default()
}

impl ApiError {
    pub fn transient(message: impl Into<String>) -> Self {
        ApiError::Transient {
            status: None,
            message: message.into(),
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        ApiError::Rejected {
            status: None,
            message: message.into(),
        }
    }

    /// Classify an HTTP error status: 5xx, 408 and 429 are transient,
    /// everything else is a rejection.
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        let message = body.into();
        if status >= 500 || status == 408 || status == 429 {
            ApiError::Transient {
                status: Some(status),
                message,
            }
        } else {
            ApiError::Rejected {
                status: Some(status),
                message,
            }
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Transient { status, .. } | ApiError::Rejected { status, .. } => *status,
        }
    }
}

impl Retryable for ApiError {
    fn is_transient(&self) -> bool {
        matches!(self, ApiError::Transient { .. })
    }
}

/// The candidate listing could not be obtained at all.
#[derive(Debug, Clone, thiserror::Error)]
#[error("record listing failed: {0}")]
pub struct SourceError(pub String);

/// The classifier could not analyse one record.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClassifierError {
    #[error("classifier unavailable: {0}")]
    Unavailable(String),

    #[error("classifier returned an unusable reply: {0}")]
    InvalidResponse(String),
}

impl Retryable for ClassifierError {
    fn is_transient(&self) -> bool {
        matches!(self, ClassifierError::Unavailable(_))
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Lists records created on a given day that still need QA.
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Per-hit parse problems come back as `Err` items; a failed listing is
    /// a `SourceError`.
    async fn list_records(&self, date: NaiveDate) -> Result<Vec<Listed>, SourceError>;
}

/// Opaque QA analysis of one record.
#[async_trait]
pub trait QaClassifier: Send + Sync {
    async fn analyze(&self, record: &Record) -> Result<Vec<Finding>, ClassifierError>;
}

/// Field-scoped access to the record management API.
#[async_trait]
pub trait RecordApi: Send + Sync {
    /// Current value of `field` on the published record.
    async fn read_field(&self, record_id: &str, field: FieldPath) -> ApiResult<FieldValue>;

    /// Replace exactly `field` with `value`.
    async fn update_field(
        &self,
        record_id: &str,
        field: FieldPath,
        value: &FieldValue,
    ) -> ApiResult<()>;

    /// Whether the record's QA-processed flag is set.
    async fn is_processed(&self, record_id: &str) -> ApiResult<bool>;

    /// Set the record's QA-processed flag. Idempotent.
    async fn mark_processed(&self, record_id: &str) -> ApiResult<()>;
}

/// Consumes the finished run report.
#[async_trait]
pub trait ReportSink: Send + Sync {
    async fn deliver(&self, report: &RunReport) -> crate::domain::Result<()>;
}
