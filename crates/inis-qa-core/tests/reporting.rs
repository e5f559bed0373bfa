use chrono::{NaiveDate, Utc};
use inis_qa_core::reporting::{DIGEST_FILE, FINDINGS_FILE, REPORT_FILE, SUMMARY_FILE};
use inis_qa_core::{
    read_findings, read_report, render_summary_md, ApplicationResult, FailureKind, FieldValue,
    Finding, FindingCategory, FindingSet, FsReportSink, QaError, RecordFindings, ReportSink,
    RunLedger, RunMode, RunReport, RunWindow, SkipReason,
};
use uuid::Uuid;

fn sample_report() -> RunReport {
    let day = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
    let ledger = RunLedger::new();
    ledger.append(
        "r1",
        FindingCategory::Title,
        ApplicationResult::Applied {
            value: FieldValue::text("Reactor Safety"),
        },
    );
    ledger.append(
        "r2",
        FindingCategory::Other,
        ApplicationResult::skipped(SkipReason::Untrusted),
    );
    ledger.append_record_failure("r3", "classifier returned an unusable reply: not json");
    ledger.record_mark("r4", Some("transient API error (status 503): unavailable".into()));

    let findings = FindingSet {
        window: Some(RunWindow::single(day)),
        records: vec![RecordFindings {
            record_id: "r1".into(),
            findings: vec![Finding::new(
                "r1",
                FindingCategory::Title,
                FieldValue::text("Reaktor Safty"),
                FieldValue::text("Reactor Safety"),
            )
            .with_confidence(0.95)],
        }],
    };

    RunReport {
        run_id: Uuid::new_v4(),
        mode: RunMode::Full,
        window: Some(RunWindow::single(day)),
        corrections_enabled: true,
        records_seen: 4,
        cancelled: false,
        started_at: Utc::now(),
        finished_at: Utc::now(),
        ledger: ledger.snapshot(),
        findings,
    }
}

#[tokio::test]
async fn delivered_report_reads_back_with_valid_digest() {
    let dir = tempfile::tempdir().unwrap();
    let sink = FsReportSink::new(dir.path());
    let report = sample_report();

    sink.deliver(&report).await.expect("delivered");

    let run_dir = dir.path().join("2025-03-01");
    for file in [REPORT_FILE, DIGEST_FILE, FINDINGS_FILE, SUMMARY_FILE] {
        assert!(run_dir.join(file).exists(), "{file} missing");
    }
    let loaded = read_report(&run_dir).expect("digest verifies");
    assert_eq!(loaded, report);
}

#[test]
fn tampered_report_fails_digest_check() {
    let dir = tempfile::tempdir().unwrap();
    let sink = FsReportSink::new(dir.path());
    let run_dir = sink.write(&sample_report()).unwrap();

    let mut json = std::fs::read_to_string(run_dir.join(REPORT_FILE)).unwrap();
    json = json.replace("Reactor Safety", "Reactor Safeties");
    std::fs::write(run_dir.join(REPORT_FILE), json).unwrap();

    let err = read_report(&run_dir).unwrap_err();
    assert!(matches!(err, QaError::DigestMismatch { .. }));
}

#[test]
fn findings_file_feeds_apply_only_mode() {
    let dir = tempfile::tempdir().unwrap();
    let sink = FsReportSink::new(dir.path());
    let report = sample_report();
    let run_dir = sink.write(&report).unwrap();

    let set = read_findings(&run_dir.join(FINDINGS_FILE)).unwrap();
    assert_eq!(set, report.findings);
    assert_eq!(set.finding_count(), 1);
}

#[test]
fn missing_findings_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = read_findings(&dir.path().join("nope.json")).unwrap_err();
    assert!(matches!(err, QaError::Io(_)));
}

#[test]
fn summary_lists_outcomes_and_unmarked_records() {
    let report = sample_report();
    let md = render_summary_md(&report);

    assert!(md.starts_with("# INIS QA Run Summary"));
    assert!(md.contains("- window: 2025-03-01"));
    assert!(md.contains("- applied: 1"));
    assert!(md.contains("- skipped: 1"));
    assert!(md.contains("- failed: 1"));
    assert!(md.contains("| `r1` | TITLE | applied | Reactor Safety |"));
    assert!(md.contains("| `r2` | OTHER | skipped | untrusted |"));
    assert!(md.contains("## Records not marked as QA checked"));
    assert!(md.contains("`r4`"));
    assert_eq!(report.ledger.failures_of(FailureKind::RecordError), 1);
}
