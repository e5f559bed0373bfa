//! Run report artifacts on the filesystem.
//!
//! Each run gets a directory holding `report.json`, its sha256 digest, the
//! replayable `findings.json` and a Markdown summary. `read_report` refuses
//! a report whose digest no longer matches.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::info;

use crate::domain::{ApplicationResult, QaError, Result};
use crate::orchestrator::{FindingSet, RunReport};
use crate::services::ReportSink;

pub const REPORT_FILE: &str = "report.json";
pub const FINDINGS_FILE: &str = "findings.json";
pub const SUMMARY_FILE: &str = "summary.md";
pub const DIGEST_FILE: &str = "report.digest";

/// Writes each run report into `<root>/<label>/`.
#[derive(Debug, Clone)]
pub struct FsReportSink {
    root: PathBuf,
}

impl FsReportSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn run_dir(&self, report: &RunReport) -> PathBuf {
        self.root.join(report.label())
    }

    /// Persist `report.json`, `report.digest`, `findings.json` and
    /// `summary.md`. Returns the run directory.
    pub fn write(&self, report: &RunReport) -> Result<PathBuf> {
        let run_dir = self.run_dir(report);
        std::fs::create_dir_all(&run_dir)?;

        let json = serde_json::to_vec_pretty(report)?;
        std::fs::write(run_dir.join(REPORT_FILE), &json)?;
        std::fs::write(run_dir.join(DIGEST_FILE), sha256_hex(&json).as_bytes())?;

        let findings = serde_json::to_vec_pretty(&report.findings)?;
        std::fs::write(run_dir.join(FINDINGS_FILE), findings)?;
        std::fs::write(run_dir.join(SUMMARY_FILE), render_summary_md(report))?;

        Ok(run_dir)
    }
}

#[async_trait]
impl ReportSink for FsReportSink {
    async fn deliver(&self, report: &RunReport) -> Result<()> {
        let dir = self.write(report)?;
        info!(dir = %dir.display(), "run report written");
        Ok(())
    }
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Load a findings document written by a previous run.
pub fn read_findings(path: &Path) -> Result<FindingSet> {
    let bytes = std::fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Read `<run_dir>/report.json` and verify it against `report.digest`.
pub fn read_report(run_dir: &Path) -> Result<RunReport> {
    let json = std::fs::read(run_dir.join(REPORT_FILE))?;
    let expected = std::fs::read_to_string(run_dir.join(DIGEST_FILE))?;
    let actual = sha256_hex(&json);
    if expected.trim() != actual {
        return Err(QaError::DigestMismatch {
            expected: expected.trim().to_string(),
            actual,
        });
    }
    Ok(serde_json::from_slice(&json)?)
}

/// Render the Markdown summary attached to a run.
pub fn render_summary_md(report: &RunReport) -> String {
    let counts = report.ledger.counts;
    let mut out = String::new();
    out.push_str("# INIS QA Run Summary\n\n");
    match report.window {
        Some(w) => out.push_str(&format!("- window: {w}\n")),
        None => out.push_str("- window: stored findings\n"),
    }
    out.push_str(&format!(
        "- run: `{}`\n- corrections: {}\n- records: {}\n- findings: {}\n",
        report.run_id,
        if report.corrections_enabled {
            "enabled"
        } else {
            "report only"
        },
        report.records_seen,
        report.findings.finding_count(),
    ));
    if report.cancelled {
        out.push_str("- **cancelled before all records were processed**\n");
    }
    out.push_str(&format!(
        "\n## Outcomes\n- applied: {}\n- skipped: {}\n- failed: {}\n",
        counts.applied, counts.skipped, counts.failed
    ));

    if !report.ledger.entries.is_empty() {
        out.push_str("\n| record | category | outcome | detail |\n|---|---|---|---|\n");
        for entry in &report.ledger.entries {
            let category = entry
                .category
                .map(|c| c.to_string())
                .unwrap_or_else(|| "-".to_string());
            let (outcome, detail) = match &entry.result {
                ApplicationResult::Applied { value } => ("applied".to_string(), value.to_string()),
                ApplicationResult::Skipped { reason } => {
                    ("skipped".to_string(), reason.to_string())
                }
                ApplicationResult::Failed { kind, detail } => {
                    (format!("failed {kind}"), detail.clone())
                }
            };
            out.push_str(&format!(
                "| `{}` | {} | {} | {} |\n",
                entry.record_id,
                category,
                outcome,
                detail.replace('|', "\\|")
            ));
        }
    }

    let unmarked: Vec<_> = report.ledger.marks.iter().filter(|m| !m.marked).collect();
    if !unmarked.is_empty() {
        out.push_str("\n## Records not marked as QA checked\n");
        for mark in unmarked {
            out.push_str(&format!(
                "- `{}`: {}\n",
                mark.record_id,
                mark.error.as_deref().unwrap_or("unknown error")
            ));
        }
    }
    out
}
