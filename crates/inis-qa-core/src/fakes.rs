//! In-memory fakes for the collaborator traits (testing only)
//!
//! Provides `MemoryRecordApi`, `StaticRecordSource`, `ScriptedClassifier` and
//! `CollectingReportSink`, which satisfy the service contracts without any
//! network access and count every call so tests can assert on side effects.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::domain::{FieldPath, FieldValue, Finding, Listed, QaError, Record, Result};
use crate::orchestrator::RunReport;
use crate::services::{
    ApiError, ApiResult, ClassifierError, QaClassifier, RecordApi, RecordSource, ReportSink,
    SourceError,
};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// MemoryRecordApi
// ---------------------------------------------------------------------------

/// Which API operation a scripted failure applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiOp {
    /// Field and processed-flag reads.
    Read,
    Update,
    Mark,
}

/// Record API backed by a `HashMap<record_id, Record>`.
///
/// Scripted failures are consumed one per call, in order, before the call
/// touches the store.
#[derive(Debug, Default)]
pub struct MemoryRecordApi {
    records: Mutex<HashMap<String, Record>>,
    failures: Mutex<HashMap<ApiOp, VecDeque<ApiError>>>,
    persistent: Mutex<HashMap<ApiOp, ApiError>>,
    reads: AtomicUsize,
    updates: AtomicUsize,
    marks: AtomicUsize,
}

impl MemoryRecordApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: impl IntoIterator<Item = Record>) -> Self {
        let api = Self::new();
        for record in records {
            api.insert(record);
        }
        api
    }

    pub fn insert(&self, record: Record) {
        lock(&self.records).insert(record.id.clone(), record);
    }

    pub fn record(&self, record_id: &str) -> Option<Record> {
        lock(&self.records).get(record_id).cloned()
    }

    /// Fail the next `times` calls of `op` with `error`.
    pub fn fail_next(&self, op: ApiOp, times: usize, error: ApiError) {
        let mut failures = lock(&self.failures);
        let queue = failures.entry(op).or_default();
        queue.extend(std::iter::repeat(error).take(times));
    }

    /// Fail every call of `op` with `error`.
    pub fn fail_always(&self, op: ApiOp, error: ApiError) {
        lock(&self.persistent).insert(op, error);
    }

    /// Calls made, including failed ones.
    pub fn calls(&self, op: ApiOp) -> usize {
        match op {
            ApiOp::Read => self.reads.load(Ordering::SeqCst),
            ApiOp::Update => self.updates.load(Ordering::SeqCst),
            ApiOp::Mark => self.marks.load(Ordering::SeqCst),
        }
    }

    fn enter(&self, op: ApiOp) -> ApiResult<()> {
        let counter = match op {
            ApiOp::Read => &self.reads,
            ApiOp::Update => &self.updates,
            ApiOp::Mark => &self.marks,
        };
        counter.fetch_add(1, Ordering::SeqCst);

        if let Some(err) = lock(&self.persistent).get(&op) {
            return Err(err.clone());
        }
        match lock(&self.failures).get_mut(&op).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn not_found(record_id: &str) -> ApiError {
        ApiError::Rejected {
            status: Some(404),
            message: format!("record {record_id} not found"),
        }
    }
}

#[async_trait]
impl RecordApi for MemoryRecordApi {
    async fn read_field(&self, record_id: &str, field: FieldPath) -> ApiResult<FieldValue> {
        self.enter(ApiOp::Read)?;
        lock(&self.records)
            .get(record_id)
            .map(|r| r.field(field))
            .ok_or_else(|| Self::not_found(record_id))
    }

    async fn is_processed(&self, record_id: &str) -> ApiResult<bool> {
        self.enter(ApiOp::Read)?;
        lock(&self.records)
            .get(record_id)
            .map(|r| r.qa_processed)
            .ok_or_else(|| Self::not_found(record_id))
    }

    async fn update_field(
        &self,
        record_id: &str,
        field: FieldPath,
        value: &FieldValue,
    ) -> ApiResult<()> {
        self.enter(ApiOp::Update)?;
        let mut records = lock(&self.records);
        let record = records
            .get_mut(record_id)
            .ok_or_else(|| Self::not_found(record_id))?;
        if !record.set_field(field, value) {
            return Err(ApiError::Rejected {
                status: Some(400),
                message: format!("value shape does not match {field}"),
            });
        }
        Ok(())
    }

    async fn mark_processed(&self, record_id: &str) -> ApiResult<()> {
        self.enter(ApiOp::Mark)?;
        let mut records = lock(&self.records);
        let record = records
            .get_mut(record_id)
            .ok_or_else(|| Self::not_found(record_id))?;
        record.qa_processed = true;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// StaticRecordSource
// ---------------------------------------------------------------------------

/// Record source returning fixed listings per day.
#[derive(Debug, Default)]
pub struct StaticRecordSource {
    listings: Mutex<HashMap<NaiveDate, Vec<Listed>>>,
    outage: Mutex<Option<String>>,
    calls: AtomicUsize,
}

impl StaticRecordSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(date: NaiveDate, records: impl IntoIterator<Item = Record>) -> Self {
        let source = Self::new();
        source.set_listing(date, records.into_iter().map(Ok).collect());
        source
    }

    pub fn set_listing(&self, date: NaiveDate, listing: Vec<Listed>) {
        lock(&self.listings).insert(date, listing);
    }

    /// Make every listing call fail.
    pub fn set_outage(&self, message: impl Into<String>) {
        *lock(&self.outage) = Some(message.into());
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecordSource for StaticRecordSource {
    async fn list_records(&self, date: NaiveDate) -> std::result::Result<Vec<Listed>, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = lock(&self.outage).clone() {
            return Err(SourceError(message));
        }
        Ok(lock(&self.listings).get(&date).cloned().unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// ScriptedClassifier
// ---------------------------------------------------------------------------

/// Classifier returning scripted findings per record id (none by default).
#[derive(Debug, Default)]
pub struct ScriptedClassifier {
    scripts: Mutex<HashMap<String, std::result::Result<Vec<Finding>, ClassifierError>>>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl ScriptedClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep for `delay` inside every `analyze` call.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn script(&self, record_id: impl Into<String>, findings: Vec<Finding>) {
        lock(&self.scripts).insert(record_id.into(), Ok(findings));
    }

    pub fn script_error(&self, record_id: impl Into<String>, error: ClassifierError) {
        lock(&self.scripts).insert(record_id.into(), Err(error));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of concurrent `analyze` calls observed.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QaClassifier for ScriptedClassifier {
    async fn analyze(&self, record: &Record) -> std::result::Result<Vec<Finding>, ClassifierError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let result = lock(&self.scripts)
            .get(&record.id)
            .cloned()
            .unwrap_or_else(|| Ok(Vec::new()));

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

// ---------------------------------------------------------------------------
// CollectingReportSink
// ---------------------------------------------------------------------------

/// Report sink that keeps every delivered report in memory.
#[derive(Debug, Default)]
pub struct CollectingReportSink {
    reports: Mutex<Vec<RunReport>>,
    fail_with: Mutex<Option<String>>,
}

impl CollectingReportSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failure(&self, message: impl Into<String>) {
        *lock(&self.fail_with) = Some(message.into());
    }

    pub fn reports(&self) -> Vec<RunReport> {
        lock(&self.reports).clone()
    }
}

#[async_trait]
impl ReportSink for CollectingReportSink {
    async fn deliver(&self, report: &RunReport) -> Result<()> {
        if let Some(message) = lock(&self.fail_with).clone() {
            return Err(QaError::Report(message));
        }
        lock(&self.reports).push(report.clone());
        Ok(())
    }
}
