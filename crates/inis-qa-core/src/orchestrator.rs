//! Batch orchestration of a QA run.
//!
//! `run` lists candidate records for a date window, analyses each record on a
//! bounded worker pool, routes trusted findings to the
//! [`CorrectionApplier`], records every outcome in a [`RunLedger`], and only
//! once every record has finished hands the report to the [`ReportSink`].
//!
//! `apply_findings` replays a stored [`FindingSet`] through the same trust
//! classifier and applier without fetching or analysing anything.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::applier::CorrectionApplier;
use crate::config::{PipelineConfig, RunMode};
use crate::domain::{ApplicationResult, Finding, Listed, QaError, Record, Result, SkipReason};
use crate::ledger::{LedgerSnapshot, RunLedger};
use crate::services::{QaClassifier, RecordSource, ReportSink};
use crate::trust::{self, TrustPolicy};

/// Inclusive range of creation dates covered by a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl RunWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if end < start {
            return Err(QaError::InvalidConfig(format!(
                "run window ends ({end}) before it starts ({start})"
            )));
        }
        Ok(Self { start, end })
    }

    pub fn single(date: NaiveDate) -> Self {
        Self {
            start: date,
            end: date,
        }
    }

    /// Every day of the window, in order.
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> {
        let end = self.end;
        std::iter::successors(Some(self.start), |d| d.succ_opt()).take_while(move |d| *d <= end)
    }

    /// The day before `today`, the default daily window.
    pub fn yesterday(today: NaiveDate) -> Self {
        Self::single(today - Duration::days(1))
    }
}

impl std::fmt::Display for RunWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}..={}", self.start, self.end)
        }
    }
}

/// Findings produced for one record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordFindings {
    pub record_id: String,
    pub findings: Vec<Finding>,
}

/// The findings document of a run, reusable in apply-only mode.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FindingSet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window: Option<RunWindow>,
    pub records: Vec<RecordFindings>,
}

impl FindingSet {
    pub fn finding_count(&self) -> usize {
        self.records.iter().map(|r| r.findings.len()).sum()
    }
}

/// Everything the reporting collaborator receives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub mode: RunMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window: Option<RunWindow>,
    pub corrections_enabled: bool,
    pub records_seen: usize,
    pub cancelled: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub ledger: LedgerSnapshot,
    pub findings: FindingSet,
}

impl RunReport {
    /// Directory-friendly label: the first day of the window, or the run id.
    pub fn label(&self) -> String {
        match self.window {
            Some(w) => w.start.to_string(),
            None => self.run_id.to_string(),
        }
    }
}

/// Result of [`Orchestrator::run`] and [`Orchestrator::apply_findings`].
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub report: RunReport,
    /// Whether the report sink accepted the report.
    pub delivered: bool,
}

enum WorkItem {
    Listed(Listed),
    Stored(RecordFindings),
}

impl WorkItem {
    fn record_id(&self) -> &str {
        match self {
            WorkItem::Listed(Ok(record)) => &record.id,
            WorkItem::Listed(Err(malformed)) => &malformed.record_id,
            WorkItem::Stored(stored) => &stored.record_id,
        }
    }
}

/// Per-run state shared by every record task.
struct RecordWorker {
    classifier: Arc<dyn QaClassifier>,
    applier: Arc<CorrectionApplier>,
    ledger: Arc<RunLedger>,
    findings: Mutex<Vec<RecordFindings>>,
    trust: TrustPolicy,
    apply_corrections: bool,
    mark_reviewed_records: bool,
}

impl RecordWorker {
    async fn process(&self, item: WorkItem) {
        match item {
            WorkItem::Listed(Ok(record)) => self.process_record(record).await,
            WorkItem::Listed(Err(malformed)) => {
                warn!(
                    record_id = %malformed.record_id,
                    detail = %malformed.detail,
                    "skipping malformed record"
                );
                self.ledger
                    .append_record_failure(malformed.record_id, malformed.detail);
            }
            WorkItem::Stored(stored) => {
                self.process_findings(&stored.record_id, &stored.findings)
                    .await
            }
        }
    }

    async fn process_record(&self, record: Record) {
        let findings = match self.classifier.analyze(&record).await {
            Ok(findings) => findings,
            Err(err) => {
                warn!(record_id = %record.id, error = %err, "analysis failed");
                self.ledger.append_record_failure(&record.id, err.to_string());
                return;
            }
        };
        info!(record_id = %record.id, findings = findings.len(), "record analysed");

        self.process_findings(&record.id, &findings).await;
        self.findings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordFindings {
                record_id: record.id,
                findings,
            });
    }

    async fn process_findings(&self, record_id: &str, findings: &[Finding]) {
        let mut touched = false;

        for finding in findings {
            let Some(patch) = trust::classify(finding, &self.trust) else {
                self.ledger.append(
                    &finding.record_id,
                    finding.category,
                    ApplicationResult::skipped(SkipReason::Untrusted),
                );
                continue;
            };

            if !self.apply_corrections {
                self.ledger.append(
                    &patch.record_id,
                    patch.category(),
                    ApplicationResult::skipped(SkipReason::ReportOnly),
                );
                continue;
            }

            let outcome = self.applier.apply(&patch).await;
            for result in outcome.into_results() {
                touched |= result.is_applied()
                    || result.is_failed()
                    || result == ApplicationResult::skipped(SkipReason::StaleFinding);
                self.ledger.append(&patch.record_id, patch.category(), result);
            }
        }

        if self.mark_reviewed_records && self.apply_corrections && !touched {
            let error = self
                .applier
                .mark_reviewed(record_id)
                .await
                .err()
                .map(|e| e.to_string());
            self.ledger.record_mark(record_id, error);
        }
    }

    fn take_findings(&self) -> Vec<RecordFindings> {
        let mut findings =
            std::mem::take(&mut *self.findings.lock().unwrap_or_else(PoisonError::into_inner));
        findings.sort_by(|a, b| a.record_id.cmp(&b.record_id));
        findings
    }
}

/// Sequences a QA run over its collaborators.
pub struct Orchestrator {
    source: Arc<dyn RecordSource>,
    classifier: Arc<dyn QaClassifier>,
    applier: Arc<CorrectionApplier>,
    reporter: Arc<dyn ReportSink>,
    config: PipelineConfig,
}

impl Orchestrator {
    pub fn new(
        source: Arc<dyn RecordSource>,
        classifier: Arc<dyn QaClassifier>,
        applier: Arc<CorrectionApplier>,
        reporter: Arc<dyn ReportSink>,
        config: PipelineConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            source,
            classifier,
            applier,
            reporter,
            config,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run the full pipeline over `window`.
    ///
    /// Fails only when a day's candidate listing cannot be obtained; that
    /// happens before any record is touched.
    #[instrument(
        skip(self, cancel),
        fields(window = %window, apply = self.config.apply_corrections)
    )]
    pub async fn run(&self, window: RunWindow, cancel: CancellationToken) -> Result<RunOutcome> {
        let started_at = Utc::now();

        let mut listed = Vec::new();
        for date in window.days() {
            let batch = self
                .source
                .list_records(date)
                .await
                .map_err(|e| QaError::Fetch {
                    date,
                    detail: e.to_string(),
                })?;
            info!(%date, count = batch.len(), "listed candidate records");
            listed.extend(batch);
        }

        let records_seen = listed.len();
        let items = listed.into_iter().map(WorkItem::Listed).collect();
        let (worker, cancelled) = self.process_all(items, &cancel).await;

        let report = RunReport {
            run_id: Uuid::new_v4(),
            mode: RunMode::Full,
            window: Some(window),
            corrections_enabled: self.config.apply_corrections,
            records_seen,
            cancelled,
            started_at,
            finished_at: Utc::now(),
            ledger: worker.ledger.snapshot(),
            findings: FindingSet {
                window: Some(window),
                records: worker.take_findings(),
            },
        };

        let delivered = match self.reporter.deliver(&report).await {
            Ok(()) => true,
            Err(err) => {
                error!(error = %err, "report delivery failed");
                false
            }
        };

        log_counts(&report);
        Ok(RunOutcome { report, delivered })
    }

    /// Re-apply a stored finding set. The report is returned, not delivered.
    #[instrument(skip(self, set, cancel), fields(records = set.records.len()))]
    pub async fn apply_findings(&self, set: FindingSet, cancel: CancellationToken) -> RunOutcome {
        let started_at = Utc::now();
        let window = set.window;
        let records_seen = set.records.len();
        let items = set.records.iter().cloned().map(WorkItem::Stored).collect();

        let (worker, cancelled) = self.process_all(items, &cancel).await;

        let report = RunReport {
            run_id: Uuid::new_v4(),
            mode: RunMode::ApplyOnly,
            window,
            corrections_enabled: self.config.apply_corrections,
            records_seen,
            cancelled,
            started_at,
            finished_at: Utc::now(),
            ledger: worker.ledger.snapshot(),
            findings: set,
        };
        log_counts(&report);
        RunOutcome {
            report,
            delivered: false,
        }
    }

    /// Process every item on the worker pool, checking `cancel` before each
    /// record starts. Returns the worker and whether the run was cut short.
    async fn process_all(
        &self,
        items: Vec<WorkItem>,
        cancel: &CancellationToken,
    ) -> (Arc<RecordWorker>, bool) {
        let worker = Arc::new(RecordWorker {
            classifier: Arc::clone(&self.classifier),
            applier: Arc::clone(&self.applier),
            ledger: Arc::new(RunLedger::new()),
            findings: Mutex::new(Vec::new()),
            trust: self.config.trust.clone(),
            apply_corrections: self.config.apply_corrections,
            mark_reviewed_records: self.config.mark_reviewed_records,
        });

        // Semaphore enforces max_concurrent_records
        let sem = Arc::new(Semaphore::new(self.config.max_concurrent_records));
        let mut tasks: Vec<(String, JoinHandle<()>)> = Vec::new();
        let mut cancelled = false;

        for item in items {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                permit = Arc::clone(&sem).acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                cancelled = true;
                break;
            };
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            let record_id = item.record_id().to_string();
            let worker = Arc::clone(&worker);
            let task = tokio::spawn(async move {
                let _permit = permit;
                worker.process(item).await;
            });
            tasks.push((record_id, task));
        }

        if cancelled {
            warn!(started = tasks.len(), "run cancelled; finishing in-flight records");
        }

        for (record_id, task) in tasks {
            if let Err(err) = task.await {
                error!(%record_id, error = %err, "record task aborted");
                worker
                    .ledger
                    .append_record_failure(record_id, format!("record task aborted: {err}"));
            }
        }

        (worker, cancelled)
    }
}

fn log_counts(report: &RunReport) {
    let counts = report.ledger.counts;
    info!(
        run_id = %report.run_id,
        records = report.records_seen,
        applied = counts.applied,
        skipped = counts.skipped,
        failed = counts.failed,
        cancelled = report.cancelled,
        "run finished"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_window_days_are_inclusive() {
        let w = RunWindow::new(day(2025, 2, 27), day(2025, 3, 2)).unwrap();
        let days: Vec<_> = w.days().collect();
        assert_eq!(
            days,
            vec![day(2025, 2, 27), day(2025, 2, 28), day(2025, 3, 1), day(2025, 3, 2)]
        );
        assert_eq!(RunWindow::single(day(2025, 1, 1)).days().count(), 1);
    }

    #[test]
    fn test_window_rejects_reversed_range() {
        assert!(RunWindow::new(day(2025, 3, 2), day(2025, 3, 1)).is_err());
    }

    #[test]
    fn test_yesterday_window() {
        let w = RunWindow::yesterday(day(2025, 3, 1));
        assert_eq!(w.start, day(2025, 2, 28));
        assert_eq!(w.to_string(), "2025-02-28");
    }
}
