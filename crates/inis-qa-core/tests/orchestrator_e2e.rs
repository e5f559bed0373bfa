//! End-to-end runs of the orchestrator over the in-memory collaborators.

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use inis_qa_core::fakes::{
    ApiOp, CollectingReportSink, MemoryRecordApi, ScriptedClassifier, StaticRecordSource,
};
use inis_qa_core::{
    ApiError, ApplicationResult, CancellationToken, ClassifierError, CorrectionApplier,
    FailureKind, FieldValue, Finding, FindingCategory, FindingSet, MalformedRecord, Orchestrator,
    PipelineConfig, QaError, Record, RecordFindings, RetryPolicy, RunMode, RunWindow, SkipReason,
};

fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 3, 1).unwrap()
}

struct Harness {
    source: Arc<StaticRecordSource>,
    classifier: Arc<ScriptedClassifier>,
    api: Arc<MemoryRecordApi>,
    sink: Arc<CollectingReportSink>,
    orchestrator: Orchestrator,
}

fn harness_with(
    records: Vec<Record>,
    classifier: ScriptedClassifier,
    config: PipelineConfig,
) -> Harness {
    let source = Arc::new(StaticRecordSource::with_records(day(), records.clone()));
    let classifier = Arc::new(classifier);
    let api = Arc::new(MemoryRecordApi::with_records(records));
    let sink = Arc::new(CollectingReportSink::new());
    let applier = Arc::new(CorrectionApplier::new(api.clone(), RetryPolicy::immediate(3)));
    let orchestrator = Orchestrator::new(
        source.clone(),
        classifier.clone(),
        applier,
        sink.clone(),
        config,
    )
    .expect("valid config");
    Harness {
        source,
        classifier,
        api,
        sink,
        orchestrator,
    }
}

fn applying() -> PipelineConfig {
    PipelineConfig {
        apply_corrections: true,
        ..PipelineConfig::default()
    }
}

fn title_fix(record_id: &str, from: &str, to: &str, confidence: f32) -> Finding {
    Finding::new(
        record_id,
        FindingCategory::Title,
        FieldValue::text(from),
        FieldValue::text(to),
    )
    .with_confidence(confidence)
}

fn missing_subject(record_id: &str) -> Finding {
    Finding::new(
        record_id,
        FindingCategory::Other,
        FieldValue::text(""),
        FieldValue::text("Add INIS subject category"),
    )
    .with_description("missing subject category")
}

#[tokio::test]
async fn trusted_title_fix_is_applied_and_other_is_reported() {
    let classifier = ScriptedClassifier::new();
    classifier.script("r1", vec![title_fix("r1", "Reaktor Safty", "Reactor Safety", 0.95)]);
    classifier.script("r2", vec![missing_subject("r2")]);
    let h = harness_with(
        vec![
            Record::new("r1", "Reaktor Safty"),
            Record::new("r2", "Neutron transport"),
        ],
        classifier,
        applying(),
    );

    let outcome = h
        .orchestrator
        .run(RunWindow::single(day()), CancellationToken::new())
        .await
        .expect("run succeeds");

    assert!(outcome.delivered);
    let report = &outcome.report;
    assert_eq!(report.records_seen, 2);
    assert!(!report.cancelled);
    assert_eq!(report.mode, RunMode::Full);

    assert_eq!(h.api.calls(ApiOp::Update), 1);
    assert_eq!(h.api.calls(ApiOp::Mark), 1);
    assert_eq!(h.api.record("r1").unwrap().title, "Reactor Safety");
    assert!(h.api.record("r1").unwrap().qa_processed);
    assert!(!h.api.record("r2").unwrap().qa_processed);

    let r1: Vec<_> = report
        .ledger
        .entries
        .iter()
        .filter(|e| e.record_id == "r1")
        .collect();
    assert_eq!(r1.len(), 1);
    assert_eq!(
        r1[0].result,
        ApplicationResult::Applied {
            value: FieldValue::text("Reactor Safety")
        }
    );

    let r2: Vec<_> = report
        .ledger
        .entries
        .iter()
        .filter(|e| e.record_id == "r2")
        .collect();
    assert_eq!(r2.len(), 1);
    assert_eq!(r2[0].category, Some(FindingCategory::Other));
    assert_eq!(r2[0].result, ApplicationResult::skipped(SkipReason::Untrusted));

    assert_eq!(report.ledger.counts.applied, 1);
    assert_eq!(report.ledger.counts.skipped, 1);
    assert_eq!(report.ledger.counts.total, 2);

    let ids: Vec<_> = report.findings.records.iter().map(|r| r.record_id.as_str()).collect();
    assert_eq!(ids, vec!["r1", "r2"]);
    assert_eq!(h.sink.reports().len(), 1);
}

#[tokio::test]
async fn low_confidence_finding_is_untrusted() {
    let classifier = ScriptedClassifier::new();
    classifier.script("r1", vec![title_fix("r1", "Reaktor Safty", "Reactor Safety", 0.3)]);
    let h = harness_with(vec![Record::new("r1", "Reaktor Safty")], classifier, applying());

    let outcome = h
        .orchestrator
        .run(RunWindow::single(day()), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(h.api.calls(ApiOp::Read), 0);
    assert_eq!(h.api.calls(ApiOp::Update), 0);
    assert_eq!(
        outcome.report.ledger.entries[0].result,
        ApplicationResult::skipped(SkipReason::Untrusted)
    );
}

#[tokio::test]
async fn empty_listing_still_delivers_a_report() {
    let h = harness_with(vec![], ScriptedClassifier::new(), applying());

    let outcome = h
        .orchestrator
        .run(RunWindow::single(day()), CancellationToken::new())
        .await
        .unwrap();

    assert!(outcome.delivered);
    assert_eq!(outcome.report.records_seen, 0);
    assert!(outcome.report.ledger.entries.is_empty());
    assert_eq!(outcome.report.ledger.counts.total, 0);
    assert_eq!(h.classifier.calls(), 0);
    assert_eq!(h.sink.reports().len(), 1);
}

#[tokio::test]
async fn listing_outage_aborts_before_any_record() {
    let h = harness_with(
        vec![Record::new("r1", "Reaktor Safty")],
        ScriptedClassifier::new(),
        applying(),
    );
    h.source.set_outage("connection refused");

    let err = h
        .orchestrator
        .run(RunWindow::single(day()), CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        QaError::Fetch { date, detail } => {
            assert_eq!(date, day());
            assert!(detail.contains("connection refused"));
        }
        other => panic!("expected fetch error, got {other:?}"),
    }
    assert_eq!(h.classifier.calls(), 0);
    assert_eq!(h.api.calls(ApiOp::Update), 0);
    assert!(h.sink.reports().is_empty());
}

#[tokio::test]
async fn classifier_failure_is_a_record_error_and_the_run_continues() {
    let classifier = ScriptedClassifier::new();
    classifier.script_error("r1", ClassifierError::Unavailable("model timed out".into()));
    classifier.script("r2", vec![title_fix("r2", "Reaktor Safty", "Reactor Safety", 0.9)]);
    let h = harness_with(
        vec![
            Record::new("r1", "Anything"),
            Record::new("r2", "Reaktor Safty"),
        ],
        classifier,
        applying(),
    );

    let outcome = h
        .orchestrator
        .run(RunWindow::single(day()), CancellationToken::new())
        .await
        .unwrap();

    let ledger = &outcome.report.ledger;
    assert_eq!(ledger.failures_of(FailureKind::RecordError), 1);
    let failed = ledger.entries.iter().find(|e| e.record_id == "r1").unwrap();
    assert_eq!(failed.category, None);
    assert_eq!(ledger.counts.applied, 1);
    assert_eq!(h.api.record("r2").unwrap().title, "Reactor Safety");
}

#[tokio::test]
async fn rejected_write_does_not_affect_other_records() {
    let classifier = ScriptedClassifier::new();
    classifier.script("r1", vec![title_fix("r1", "Reaktor Safty", "Reactor Safety", 0.9)]);
    classifier.script("r2", vec![title_fix("r2", "Plasma fisics", "Plasma physics", 0.9)]);
    let h = harness_with(
        vec![
            Record::new("r1", "Reaktor Safty"),
            Record::new("r2", "Plasma fisics"),
        ],
        classifier,
        PipelineConfig {
            max_concurrent_records: 1,
            ..applying()
        },
    );
    h.api.fail_next(ApiOp::Update, 1, ApiError::from_status(409, "draft locked"));

    let outcome = h
        .orchestrator
        .run(RunWindow::single(day()), CancellationToken::new())
        .await
        .unwrap();

    let ledger = &outcome.report.ledger;
    assert_eq!(ledger.failures_of(FailureKind::Rejected), 1);
    assert_eq!(ledger.counts.applied, 1);
    assert_eq!(h.api.record("r2").unwrap().title, "Plasma physics");
}

#[tokio::test]
async fn report_only_mode_never_writes() {
    let classifier = ScriptedClassifier::new();
    classifier.script("r1", vec![title_fix("r1", "Reaktor Safty", "Reactor Safety", 0.95)]);
    let h = harness_with(
        vec![Record::new("r1", "Reaktor Safty")],
        classifier,
        PipelineConfig::default(),
    );

    let outcome = h
        .orchestrator
        .run(RunWindow::single(day()), CancellationToken::new())
        .await
        .unwrap();

    assert!(!outcome.report.corrections_enabled);
    assert_eq!(h.api.calls(ApiOp::Read), 0);
    assert_eq!(h.api.calls(ApiOp::Update), 0);
    assert_eq!(h.api.calls(ApiOp::Mark), 0);
    assert_eq!(
        outcome.report.ledger.entries[0].result,
        ApplicationResult::skipped(SkipReason::ReportOnly)
    );
    assert_eq!(outcome.report.findings.finding_count(), 1);
}

#[tokio::test]
async fn apply_only_replays_stored_findings_without_fetching() {
    let h = harness_with(
        vec![Record::new("r1", "Reaktor Safty")],
        ScriptedClassifier::new(),
        applying(),
    );
    let set = FindingSet {
        window: Some(RunWindow::single(day())),
        records: vec![RecordFindings {
            record_id: "r1".into(),
            findings: vec![
                title_fix("r1", "Reaktor Safty", "Reactor Safety", 0.95),
                missing_subject("r1"),
            ],
        }],
    };

    let first = h
        .orchestrator
        .apply_findings(set.clone(), CancellationToken::new())
        .await;
    let second = h
        .orchestrator
        .apply_findings(set, CancellationToken::new())
        .await;

    assert_eq!(h.source.calls(), 0);
    assert_eq!(h.classifier.calls(), 0);
    assert!(h.sink.reports().is_empty());
    assert!(!first.delivered);
    assert_eq!(first.report.mode, RunMode::ApplyOnly);
    assert_eq!(first.report.ledger.counts.applied, 1);
    assert_eq!(first.report.ledger.counts.skipped, 1);
    assert_eq!(
        second.report.ledger.entries[0].result,
        ApplicationResult::skipped(SkipReason::AlreadyApplied)
    );
    assert_eq!(h.api.calls(ApiOp::Update), 1);
}

#[tokio::test]
async fn cancellation_before_start_processes_nothing_but_reports() {
    let classifier = ScriptedClassifier::new();
    classifier.script("r1", vec![title_fix("r1", "Reaktor Safty", "Reactor Safety", 0.95)]);
    let h = harness_with(vec![Record::new("r1", "Reaktor Safty")], classifier, applying());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let outcome = h
        .orchestrator
        .run(RunWindow::single(day()), cancel)
        .await
        .unwrap();

    assert!(outcome.report.cancelled);
    assert!(outcome.delivered);
    assert_eq!(outcome.report.records_seen, 1);
    assert_eq!(h.classifier.calls(), 0);
    assert_eq!(h.api.calls(ApiOp::Update), 0);
    assert!(outcome.report.ledger.entries.is_empty());
}

#[tokio::test(start_paused = true)]
async fn cancellation_mid_run_finishes_in_flight_records_and_reports() {
    let records: Vec<_> = (0..10)
        .map(|i| Record::new(format!("rec{i:02}"), "Title"))
        .collect();
    let classifier = ScriptedClassifier::with_delay(Duration::from_millis(100));
    for record in &records {
        classifier.script(record.id.clone(), vec![missing_subject(&record.id)]);
    }
    let h = harness_with(
        records,
        classifier,
        PipelineConfig {
            max_concurrent_records: 2,
            ..applying()
        },
    );

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        trigger.cancel();
    });

    let outcome = h
        .orchestrator
        .run(RunWindow::single(day()), cancel)
        .await
        .unwrap();

    let started = h.classifier.calls();
    assert!(outcome.report.cancelled);
    assert!(started > 0 && started < 10, "started {started} records");
    // every started record ran to completion
    assert_eq!(outcome.report.ledger.entries.len(), started);
    assert_eq!(outcome.report.findings.records.len(), started);
    assert_eq!(outcome.report.records_seen, 10);
    assert!(outcome.delivered);
    assert_eq!(h.sink.reports().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn worker_pool_respects_concurrency_bound() {
    let records: Vec<_> = (0..12)
        .map(|i| Record::new(format!("rec{i:02}"), "Title"))
        .collect();
    let h = harness_with(
        records,
        ScriptedClassifier::with_delay(Duration::from_millis(50)),
        PipelineConfig {
            max_concurrent_records: 3,
            ..applying()
        },
    );

    let outcome = h
        .orchestrator
        .run(RunWindow::single(day()), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(h.classifier.calls(), 12);
    assert!(h.classifier.peak_in_flight() <= 3);
    assert!(h.classifier.peak_in_flight() >= 2);
    assert_eq!(outcome.report.findings.records.len(), 12);
}

#[tokio::test]
async fn mark_reviewed_flags_clean_records_only() {
    let classifier = ScriptedClassifier::new();
    classifier.script("r1", vec![title_fix("r1", "Reaktor Safty", "Reactor Safety", 0.95)]);
    classifier.script("r2", vec![missing_subject("r2")]);
    let h = harness_with(
        vec![
            Record::new("r1", "Reaktor Safty"),
            Record::new("r2", "Neutron transport"),
            Record::new("r3", "Clean record"),
        ],
        classifier,
        PipelineConfig {
            mark_reviewed_records: true,
            ..applying()
        },
    );

    let outcome = h
        .orchestrator
        .run(RunWindow::single(day()), CancellationToken::new())
        .await
        .unwrap();

    assert!(h.api.record("r1").unwrap().qa_processed);
    assert!(h.api.record("r2").unwrap().qa_processed);
    assert!(h.api.record("r3").unwrap().qa_processed);
    // r1 is marked by the applier; r2 and r3 by the reviewer pass
    assert_eq!(h.api.calls(ApiOp::Mark), 3);
    let mut marked: Vec<_> = outcome
        .report
        .ledger
        .marks
        .iter()
        .map(|m| m.record_id.as_str())
        .collect();
    marked.sort();
    assert_eq!(marked, vec!["r2", "r3"]);
    assert!(outcome.report.ledger.marks.iter().all(|m| m.marked));
}

#[tokio::test]
async fn mark_reviewed_leaves_records_with_stale_findings_unmarked() {
    let classifier = ScriptedClassifier::new();
    classifier.script("r1", vec![title_fix("r1", "Reaktor Safty", "Reactor Safety", 0.95)]);
    let h = harness_with(
        vec![Record::new("r1", "Reactor safety (edited by curator)")],
        classifier,
        PipelineConfig {
            mark_reviewed_records: true,
            ..applying()
        },
    );

    let outcome = h
        .orchestrator
        .run(RunWindow::single(day()), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        outcome.report.ledger.entries[0].result,
        ApplicationResult::skipped(SkipReason::StaleFinding)
    );
    assert!(outcome.report.ledger.marks.is_empty());
    assert_eq!(h.api.calls(ApiOp::Mark), 0);
    assert!(!h.api.record("r1").unwrap().qa_processed);
}

#[tokio::test]
async fn malformed_listing_entry_becomes_record_error() {
    let h = harness_with(
        vec![Record::new("r1", "Fine")],
        ScriptedClassifier::new(),
        applying(),
    );
    h.source.set_listing(
        day(),
        vec![
            Ok(Record::new("r1", "Fine")),
            Err(MalformedRecord {
                record_id: "bad01-bad02".into(),
                detail: "metadata.title missing".into(),
            }),
        ],
    );

    let outcome = h
        .orchestrator
        .run(RunWindow::single(day()), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.report.records_seen, 2);
    assert_eq!(h.classifier.calls(), 1);
    let entries = &outcome.report.ledger.entries;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].record_id, "bad01-bad02");
    assert_eq!(entries[0].result.failure_kind(), Some(FailureKind::RecordError));
}

#[tokio::test]
async fn delivery_failure_is_not_fatal() {
    let classifier = ScriptedClassifier::new();
    classifier.script("r1", vec![title_fix("r1", "Reaktor Safty", "Reactor Safety", 0.95)]);
    let h = harness_with(vec![Record::new("r1", "Reaktor Safty")], classifier, applying());
    h.sink.set_failure("smtp relay down");

    let outcome = h
        .orchestrator
        .run(RunWindow::single(day()), CancellationToken::new())
        .await
        .unwrap();

    assert!(!outcome.delivered);
    assert_eq!(outcome.report.ledger.counts.applied, 1);
}

#[tokio::test]
async fn multi_day_window_lists_each_day() {
    let h = harness_with(vec![], ScriptedClassifier::new(), applying());
    let next = day().succ_opt().unwrap();
    h.source.set_listing(next, vec![Ok(Record::new("r9", "Later"))]);
    h.api.insert(Record::new("r9", "Later"));

    let outcome = h
        .orchestrator
        .run(RunWindow::new(day(), next).unwrap(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(h.source.calls(), 2);
    assert_eq!(outcome.report.records_seen, 1);
    assert_eq!(outcome.report.label(), "2025-03-01");
}

#[test]
fn zero_concurrency_is_rejected() {
    let api = Arc::new(MemoryRecordApi::new());
    let result = Orchestrator::new(
        Arc::new(StaticRecordSource::new()),
        Arc::new(ScriptedClassifier::new()),
        Arc::new(CorrectionApplier::new(api, RetryPolicy::default())),
        Arc::new(CollectingReportSink::new()),
        PipelineConfig {
            max_concurrent_records: 0,
            ..PipelineConfig::default()
        },
    );
    assert!(matches!(result, Err(QaError::InvalidConfig(_))));
}
