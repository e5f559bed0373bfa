//! INIS QA - daily metadata QA for the INIS repository
//!
//! The `inis-qa` command fetches the records created on a day (yesterday by
//! default), asks the QA model for findings, applies the trusted corrections
//! when an access token is configured and writes a run report.
//!
//! ## Modes
//!
//! - default: corrections are applied iff `INIS_ACCESS_TOKEN` is set
//! - `--apply-corrections` / `--no-apply-corrections`: force either way
//! - `--apply-only`: re-apply a stored `findings.json` without fetching or
//!   analysing anything

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{Local, NaiveDate};
use clap::{ArgAction, ArgGroup, Parser};
use tracing::{info, warn};

use inis_qa_core::reporting::FINDINGS_FILE;
use inis_qa_core::{
    init_tracing, level_for, read_findings, render_summary_md, CancellationToken,
    ClassifierError, CorrectionApplier, CorrectionMode, Finding, FsReportSink, Orchestrator,
    PipelineConfig, QaClassifier, Record, RetryPolicy, RunOutcome, RunWindow, TrustPolicy,
};
use inis_qa_invenio::classifier::{DEFAULT_DEPLOYMENT, DEFAULT_ENDPOINT};
use inis_qa_invenio::{
    AzureConfig, AzureQaClassifier, InvenioClient, InvenioConfig, DEFAULT_BASE_URL,
};

#[derive(Parser, Debug)]
#[command(name = "inis-qa")]
#[command(author = "INIS QA Maintainers")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Daily INIS metadata QA with trusted auto-corrections", long_about = None)]
#[command(group(
    ArgGroup::new("correction_mode")
        .args(["apply_corrections", "no_apply_corrections", "apply_only"])
))]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Emit JSON-formatted log lines
    #[arg(long)]
    json: bool,

    /// Creation date to check (default: yesterday)
    #[arg(long, value_name = "YYYY-MM-DD")]
    date: Option<NaiveDate>,

    /// Last creation date to check; makes the run cover `--date..=--until`
    #[arg(long, value_name = "YYYY-MM-DD")]
    until: Option<NaiveDate>,

    /// Apply trusted corrections (requires an access token)
    #[arg(long)]
    apply_corrections: bool,

    /// Report only, never write to the repository
    #[arg(long)]
    no_apply_corrections: bool,

    /// Re-apply a stored findings document instead of running QA
    #[arg(long)]
    apply_only: bool,

    /// Findings document for --apply-only (default: <reports-dir>/<date>/findings.json)
    #[arg(long, requires = "apply_only")]
    findings: Option<PathBuf>,

    /// Directory receiving run reports
    #[arg(long, env = "INIS_QA_REPORTS_DIR", default_value = "qa-reports")]
    reports_dir: PathBuf,

    /// Minimum finding confidence for automatic application
    #[arg(long, default_value_t = 0.8)]
    min_confidence: f32,

    /// Records processed concurrently
    #[arg(long, default_value_t = 4)]
    concurrency: usize,

    /// Mark records as QA checked even when nothing was corrected
    #[arg(long)]
    mark_reviewed: bool,

    /// Query the repository for records sharing a DOI or title
    #[arg(long)]
    check_duplicates: bool,

    /// InvenioRDM site URL
    #[arg(long, env = "INIS_BASE_URL", default_value = DEFAULT_BASE_URL)]
    base_url: String,

    /// InvenioRDM personal access token
    #[arg(long, env = "INIS_ACCESS_TOKEN", hide_env_values = true)]
    access_token: Option<String>,

    /// Azure OpenAI API key
    #[arg(long, env = "AZURE_OPENAI_API_KEY", hide_env_values = true)]
    azure_api_key: Option<String>,

    /// Azure OpenAI endpoint
    #[arg(long, env = "ENDPOINT_URL", default_value = DEFAULT_ENDPOINT)]
    endpoint_url: String,

    /// Azure OpenAI deployment
    #[arg(long, env = "DEPLOYMENT_NAME", default_value = DEFAULT_DEPLOYMENT)]
    deployment_name: String,

    /// System prompt for the QA model
    #[arg(long, env = "QA_INSTRUCTIONS_FILE", default_value = "instructions.txt")]
    instructions_file: PathBuf,
}

impl Cli {
    fn correction_mode(&self) -> CorrectionMode {
        if self.apply_corrections || self.apply_only {
            CorrectionMode::ForceOn
        } else if self.no_apply_corrections {
            CorrectionMode::ForceOff
        } else {
            CorrectionMode::Auto
        }
    }

    fn window(&self, today: NaiveDate) -> Result<RunWindow> {
        let start = match self.date {
            Some(date) => date,
            None => RunWindow::yesterday(today).start,
        };
        let end = self.until.unwrap_or(start);
        Ok(RunWindow::new(start, end)?)
    }

    fn findings_path(&self, window: &RunWindow) -> PathBuf {
        self.findings.clone().unwrap_or_else(|| {
            self.reports_dir
                .join(window.start.to_string())
                .join(FINDINGS_FILE)
        })
    }

    fn pipeline_config(&self, apply_corrections: bool) -> PipelineConfig {
        PipelineConfig {
            trust: TrustPolicy {
                min_confidence: self.min_confidence,
                ..TrustPolicy::default()
            },
            retry: RetryPolicy::default(),
            max_concurrent_records: self.concurrency,
            apply_corrections,
            mark_reviewed_records: self.mark_reviewed,
        }
    }

    fn invenio_config(&self) -> InvenioConfig {
        let config = InvenioConfig::new(&self.base_url);
        match self.access_token.as_deref().filter(|t| !t.trim().is_empty()) {
            Some(token) => config.with_token(token),
            None => config,
        }
    }
}

/// Stand-in classifier for apply-only runs, which never analyse records.
struct NoAnalysis;

#[async_trait]
impl QaClassifier for NoAnalysis {
    async fn analyze(&self, record: &Record) -> std::result::Result<Vec<Finding>, ClassifierError> {
        Err(ClassifierError::Unavailable(format!(
            "analysis of {} requested in apply-only mode",
            record.id
        )))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.json, level_for(cli.verbose));

    let invenio_config = cli.invenio_config();
    let apply = cli
        .correction_mode()
        .resolve(invenio_config.token.is_some())
        .context("Invalid correction mode")?;
    let config = cli.pipeline_config(apply);
    let window = cli.window(Local::now().date_naive())?;

    let invenio = Arc::new(
        InvenioClient::new(invenio_config).context("Failed to build InvenioRDM client")?,
    );
    let applier = Arc::new(CorrectionApplier::new(invenio.clone(), config.retry.clone()));
    let reporter = Arc::new(FsReportSink::new(&cli.reports_dir));

    let cancel = CancellationToken::new();
    let watcher = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing in-flight records");
            watcher.cancel();
        }
    });

    let outcome = if cli.apply_only {
        let path = cli.findings_path(&window);
        let set = read_findings(&path)
            .with_context(|| format!("Failed to read findings from {}", path.display()))?;
        info!(path = %path.display(), findings = set.finding_count(), "applying stored findings");

        let orchestrator =
            Orchestrator::new(invenio.clone(), Arc::new(NoAnalysis), applier, reporter, config)?;
        orchestrator.apply_findings(set, cancel).await
    } else {
        let api_key = cli
            .azure_api_key
            .as_deref()
            .context("AZURE_OPENAI_API_KEY is not set")?;
        let mut azure = AzureConfig::new(api_key);
        azure.endpoint = cli.endpoint_url.clone();
        azure.deployment = cli.deployment_name.clone();
        azure.instructions_file = cli.instructions_file.clone();

        let mut classifier =
            AzureQaClassifier::new(azure).context("Failed to build QA classifier")?;
        if cli.check_duplicates {
            classifier = classifier.with_duplicate_lookup(invenio.clone());
        }

        let orchestrator =
            Orchestrator::new(invenio.clone(), Arc::new(classifier), applier, reporter, config)?;
        orchestrator
            .run(window, cancel)
            .await
            .context("QA run aborted")?
    };

    print_outcome(&outcome, cli.json)?;
    Ok(())
}

fn print_outcome(outcome: &RunOutcome, json: bool) -> Result<()> {
    let report = &outcome.report;
    if json {
        let summary = serde_json::json!({
            "run_id": report.run_id,
            "mode": report.mode,
            "window": report.window,
            "corrections_enabled": report.corrections_enabled,
            "records": report.records_seen,
            "cancelled": report.cancelled,
            "delivered": outcome.delivered,
            "counts": report.ledger.counts,
        });
        println!("{}", serde_json::to_string(&summary)?);
    } else {
        print!("{}", render_summary_md(report));
        if !outcome.delivered && report.window.is_some() {
            println!("\nwarning: the run report could not be written");
        }
    }
    Ok(())
}
