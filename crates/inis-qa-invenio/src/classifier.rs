//! Azure OpenAI backed QA classifier
//!
//! Sends the full record JSON to a chat deployment with the QA instructions
//! as system prompt, parses the JSON reply into findings and adds the
//! deterministic record checks.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, instrument, warn};

use inis_qa_core::{with_retry, ClassifierError, Finding, QaClassifier, Record, RetryPolicy};

use crate::checks;
use crate::error::{classifier_error, truncate, InvenioError, Result};
use crate::qa_report;
use crate::records::InvenioClient;

pub const DEFAULT_ENDPOINT: &str = "https://pdf2json.openai.azure.com/";
pub const DEFAULT_DEPLOYMENT: &str = "o4-mini";
pub const API_VERSION: &str = "2025-01-01-preview";

/// Used when the instructions file is missing or empty.
pub const FALLBACK_PROMPT: &str = "You are an expert QA checker for INIS metadata. Return ONLY a JSON object \
with corrections, recommendations, scope_ok, and the booleans title_corrected, \
abstract_corrected, affiliation_correction_recommended.";

/// Azure OpenAI deployment settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AzureConfig {
    pub endpoint: String,
    pub deployment: String,
    pub api_version: String,
    #[serde(skip_serializing)]
    pub api_key: String,
    pub instructions_file: PathBuf,
    pub max_completion_tokens: u32,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl AzureConfig {
    pub fn new(api_key: &str) -> Self {
        AzureConfig {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            deployment: DEFAULT_DEPLOYMENT.to_string(),
            api_version: API_VERSION.to_string(),
            api_key: api_key.to_string(),
            instructions_file: PathBuf::from("instructions.txt"),
            max_completion_tokens: 10_240,
            timeout: Duration::from_secs(120),
            // 1 initial try + 3 retries, 1s -> 2s -> 4s
            retry: RetryPolicy {
                max_attempts: 4,
                base_delay_ms: 1_000,
                factor: 2,
                jitter_ratio: 0.0,
            },
        }
    }

    pub fn completions_url(&self) -> String {
        format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            self.endpoint.trim_end_matches('/'),
            self.deployment,
            self.api_version
        )
    }
}

/// Read the system prompt from `path`, falling back to [`FALLBACK_PROMPT`].
pub fn load_system_prompt(path: &Path) -> String {
    match std::fs::read_to_string(path) {
        Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
        Ok(_) => {
            warn!(path = %path.display(), "instructions file is empty, using fallback prompt");
            FALLBACK_PROMPT.to_string()
        }
        Err(err) => {
            warn!(
                path = %path.display(),
                error = %err,
                "instructions file unreadable, using fallback prompt"
            );
            FALLBACK_PROMPT.to_string()
        }
    }
}

#[derive(Debug, Deserialize)]
struct Completion {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Message {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

/// QA classifier calling an Azure OpenAI chat deployment
pub struct AzureQaClassifier {
    config: AzureConfig,
    system_prompt: String,
    http_client: reqwest::Client,
    duplicates: Option<Arc<InvenioClient>>,
}

impl AzureQaClassifier {
    pub fn new(config: AzureConfig) -> Result<Self> {
        if config.api_key.trim().is_empty() {
            return Err(InvenioError::MissingCredential("AZURE_OPENAI_API_KEY"));
        }
        if !config.endpoint.starts_with("https://") && !config.endpoint.starts_with("http://") {
            return Err(InvenioError::InvalidUrl(config.endpoint));
        }
        let system_prompt = load_system_prompt(&config.instructions_file);
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("inis-qa/", env!("CARGO_PKG_VERSION")))
            .timeout(config.timeout)
            .build()?;

        Ok(AzureQaClassifier {
            config,
            system_prompt,
            http_client,
            duplicates: None,
        })
    }

    /// Also flag records whose DOI or title already exists in the repository.
    pub fn with_duplicate_lookup(mut self, client: Arc<InvenioClient>) -> Self {
        self.duplicates = Some(client);
        self
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    fn request_body(&self, record: &Record) -> std::result::Result<Value, ClassifierError> {
        let document = if record.raw.is_null() {
            serde_json::to_value(record)
                .map_err(|e| ClassifierError::InvalidResponse(e.to_string()))?
        } else {
            record.raw.clone()
        };
        Ok(json!({
            "messages": [
                {"role": "system", "content": self.system_prompt},
                {"role": "user", "content": document.to_string()},
            ],
            "max_completion_tokens": self.config.max_completion_tokens,
            "response_format": {"type": "json_object"},
        }))
    }

    async fn complete(&self, body: &Value) -> std::result::Result<String, ClassifierError> {
        let response = self
            .http_client
            .post(self.config.completions_url())
            .header("api-key", &self.config.api_key)
            .json(body)
            .send()
            .await
            .map_err(classifier_error)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let detail = format!("status {}: {}", status.as_u16(), truncate(&text, 300));
            return Err(
                if status.is_server_error() || matches!(status.as_u16(), 408 | 429) {
                    ClassifierError::Unavailable(detail)
                } else {
                    ClassifierError::InvalidResponse(detail)
                },
            );
        }

        let completion: Completion = response.json().await.map_err(classifier_error)?;
        if let Some(usage) = &completion.usage {
            debug!(
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "completion usage"
            );
        }
        let choice = completion
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ClassifierError::InvalidResponse("no choices in completion".into()))?;
        if let Some(reason) = choice.finish_reason.as_deref() {
            if reason != "stop" {
                warn!(finish_reason = reason, "completion did not finish normally");
            }
        }
        choice
            .message
            .content
            .ok_or_else(|| ClassifierError::InvalidResponse("completion has no content".into()))
    }

    async fn duplicate_findings(&self, record: &Record) -> Vec<Finding> {
        let Some(client) = &self.duplicates else {
            return Vec::new();
        };
        match client.find_duplicates(&record.id, &record.raw).await {
            Ok(flags) => checks::duplicate_findings(record, flags),
            Err(err) => {
                warn!(record_id = %record.id, error = %err, "duplicate lookup failed");
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl QaClassifier for AzureQaClassifier {
    #[instrument(skip(self, record), fields(record_id = %record.id))]
    async fn analyze(&self, record: &Record) -> std::result::Result<Vec<Finding>, ClassifierError> {
        let body = self.request_body(record)?;
        let reply =
            with_retry(&self.config.retry, "qa_completion", || self.complete(&body)).await?;

        let report = qa_report::parse_reply(&reply).map_err(|e| {
            ClassifierError::InvalidResponse(format!(
                "assistant returned non-JSON ({e}): {}",
                truncate(&reply, 200)
            ))
        })?;
        if report.is_clean() {
            info!("model reports no issues");
        }

        let mut findings = report.into_findings(record);
        findings.extend(checks::record_findings(record, Utc::now().date_naive()));
        findings.extend(self.duplicate_findings(record).await);
        Ok(findings)
    }
}
