//! INIS QA Core Library
//!
//! Correction classification and application pipeline for the INIS daily QA
//! job: findings come in from a QA classifier, the trusted ones become field
//! patches, patches are applied idempotently through the record API, and
//! every outcome lands in a run ledger that is handed to reporting.

pub mod applier;
pub mod config;
pub mod domain;
pub mod fakes;
pub mod ledger;
pub mod orchestrator;
pub mod reporting;
pub mod retry;
pub mod services;
pub mod telemetry;
pub mod trust;

pub use domain::{
    ApplicationResult, CorrectionPatch, FailureKind, FieldPath, FieldValue, Finding,
    FindingCategory, Listed, MalformedRecord, PatchOutcome, QaError, Record, Result, Severity,
    SkipReason,
};

pub use applier::CorrectionApplier;
pub use config::{CorrectionMode, PipelineConfig, RunMode};
pub use ledger::{LedgerCounts, LedgerEntry, LedgerSnapshot, MarkEntry, RunLedger};
pub use orchestrator::{
    FindingSet, Orchestrator, RecordFindings, RunOutcome, RunReport, RunWindow,
};
pub use reporting::{read_findings, read_report, render_summary_md, FsReportSink};
pub use retry::{with_retry, RetryPolicy, Retryable};
pub use services::{
    ApiError, ApiResult, ClassifierError, QaClassifier, RecordApi, RecordSource, ReportSink,
    SourceError,
};
pub use telemetry::{init_tracing, level_for};
pub use trust::{classify, TrustPolicy};

pub use tokio_util::sync::CancellationToken;
