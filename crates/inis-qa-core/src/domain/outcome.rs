//! Outcomes of attempting a correction.

use serde::{Deserialize, Serialize};

use super::finding::FieldValue;

/// Benign reasons for not writing a patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkipReason {
    /// The record already holds the proposed value.
    AlreadyApplied,
    /// The record changed since the finding was computed.
    StaleFinding,
    /// The finding did not qualify for automatic application.
    Untrusted,
    /// Correction application is disabled for this run.
    ReportOnly,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::AlreadyApplied => "already-applied",
            SkipReason::StaleFinding => "stale-finding",
            SkipReason::Untrusted => "untrusted",
            SkipReason::ReportOnly => "report-only",
        }
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure taxonomy recorded in the run ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    /// Fetching or classifying one record failed.
    RecordError,
    /// Network or server error that survived every retry.
    Transport,
    /// The record API refused the request.
    Rejected,
    /// The correction landed but the QA-processed flag was not set.
    MarkFailed,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureKind::RecordError => "RECORD_ERROR",
            FailureKind::Transport => "TRANSPORT",
            FailureKind::Rejected => "REJECTED",
            FailureKind::MarkFailed => "MARK_FAILED",
        };
        f.write_str(s)
    }
}

/// Outcome of one correction attempt. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ApplicationResult {
    Applied { value: FieldValue },
    Skipped { reason: SkipReason },
    Failed { kind: FailureKind, detail: String },
}

impl ApplicationResult {
    pub fn skipped(reason: SkipReason) -> Self {
        ApplicationResult::Skipped { reason }
    }

    pub fn failed(kind: FailureKind, detail: impl Into<String>) -> Self {
        ApplicationResult::Failed {
            kind,
            detail: detail.into(),
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, ApplicationResult::Applied { .. })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, ApplicationResult::Skipped { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, ApplicationResult::Failed { .. })
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            ApplicationResult::Failed { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

impl std::fmt::Display for ApplicationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApplicationResult::Applied { value } => write!(f, "applied: {value}"),
            ApplicationResult::Skipped { reason } => write!(f, "skipped ({reason})"),
            ApplicationResult::Failed { kind, detail } => write!(f, "failed {kind}: {detail}"),
        }
    }
}

/// What the applier produced for one patch.
///
/// `follow_up` carries a `MARK_FAILED` failure when the field update
/// succeeded but marking the record processed did not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchOutcome {
    pub result: ApplicationResult,
    pub follow_up: Option<ApplicationResult>,
}

impl PatchOutcome {
    pub fn single(result: ApplicationResult) -> Self {
        Self {
            result,
            follow_up: None,
        }
    }

    pub fn into_results(self) -> impl Iterator<Item = ApplicationResult> {
        std::iter::once(self.result).chain(self.follow_up)
    }
}
