//! Append-only record of every application outcome in a run.

use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{ApplicationResult, FailureKind, FindingCategory};

/// One ledger line.
///
/// `category` is `None` only for record-level failures, where no finding
/// exists to key the entry on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub record_id: String,
    pub category: Option<FindingCategory>,
    pub result: ApplicationResult,
    pub recorded_at: DateTime<Utc>,
}

/// Outcome of marking a record processed without applying a correction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkEntry {
    pub record_id: String,
    pub marked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// Aggregate counts handed to reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerCounts {
    pub applied: usize,
    pub skipped: usize,
    pub failed: usize,
    pub total: usize,
}

impl LedgerCounts {
    fn tally(entries: &[LedgerEntry]) -> Self {
        let mut counts = LedgerCounts {
            total: entries.len(),
            ..Default::default()
        };
        for entry in entries {
            match entry.result {
                ApplicationResult::Applied { .. } => counts.applied += 1,
                ApplicationResult::Skipped { .. } => counts.skipped += 1,
                ApplicationResult::Failed { .. } => counts.failed += 1,
            }
        }
        counts
    }
}

/// Frozen copy of the ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub counts: LedgerCounts,
    pub entries: Vec<LedgerEntry>,
    #[serde(default)]
    pub marks: Vec<MarkEntry>,
}

impl LedgerSnapshot {
    pub fn failures_of(&self, kind: FailureKind) -> usize {
        self.entries
            .iter()
            .filter(|e| e.result.failure_kind() == Some(kind))
            .count()
    }
}

#[derive(Debug, Default)]
struct Inner {
    entries: Vec<LedgerEntry>,
    marks: Vec<MarkEntry>,
}

/// Process-scoped run ledger, shared across record workers.
///
/// Appending is the only mutation. The lock is held only for the push, never
/// across an `.await`.
#[derive(Debug, Default)]
pub struct RunLedger {
    inner: Mutex<Inner>,
}

impl RunLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append the outcome for one finding.
    pub fn append(
        &self,
        record_id: impl Into<String>,
        category: FindingCategory,
        result: ApplicationResult,
    ) {
        self.push(record_id.into(), Some(category), result);
    }

    /// Append a `RECORD_ERROR` for a record that could not be processed.
    pub fn append_record_failure(&self, record_id: impl Into<String>, detail: impl Into<String>) {
        self.push(
            record_id.into(),
            None,
            ApplicationResult::failed(FailureKind::RecordError, detail),
        );
    }

    fn push(
        &self,
        record_id: String,
        category: Option<FindingCategory>,
        result: ApplicationResult,
    ) {
        let entry = LedgerEntry {
            record_id,
            category,
            result,
            recorded_at: Utc::now(),
        };
        self.lock().entries.push(entry);
    }

    /// Record the outcome of a mark-only call for a reviewed record.
    pub fn record_mark(&self, record_id: impl Into<String>, error: Option<String>) {
        let entry = MarkEntry {
            record_id: record_id.into(),
            marked: error.is_none(),
            error,
            recorded_at: Utc::now(),
        };
        self.lock().marks.push(entry);
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn entries(&self) -> Vec<LedgerEntry> {
        self.lock().entries.clone()
    }

    pub fn entries_for(&self, record_id: &str) -> Vec<LedgerEntry> {
        self.lock()
            .entries
            .iter()
            .filter(|e| e.record_id == record_id)
            .cloned()
            .collect()
    }

    pub fn marks(&self) -> Vec<MarkEntry> {
        self.lock().marks.clone()
    }

    pub fn counts(&self) -> LedgerCounts {
        LedgerCounts::tally(&self.lock().entries)
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        let inner = self.lock();
        LedgerSnapshot {
            counts: LedgerCounts::tally(&inner.entries),
            entries: inner.entries.clone(),
            marks: inner.marks.clone(),
        }
    }
}
