//! InvenioRDM records API client
//!
//! Lists candidate records for a creation date and edits published records
//! through the draft workflow: create draft, fetch it, change one field,
//! save it, publish.

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Method, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use inis_qa_core::{
    ApiError, ApiResult, FieldPath, FieldValue, Listed, RecordApi, RecordSource, SourceError,
};

use crate::checks::DuplicateFlags;
use crate::error::{api_error, truncate, InvenioError, Result};
use crate::fields;

pub const DEFAULT_BASE_URL: &str = "https://inis.iaea.org";

/// InvenioRDM connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvenioConfig {
    /// Site URL, without the `/api` suffix
    pub base_url: String,
    /// Personal access token; listing works without one
    #[serde(skip_serializing)]
    pub token: Option<String>,
    /// Hits requested per listing call
    pub page_size: usize,
    /// Per-request timeout
    pub timeout: Duration,
}

impl Default for InvenioConfig {
    fn default() -> Self {
        InvenioConfig {
            base_url: DEFAULT_BASE_URL.to_string(),
            token: None,
            page_size: 1000,
            timeout: Duration::from_secs(60),
        }
    }
}

impl InvenioConfig {
    pub fn new(base_url: &str) -> Self {
        InvenioConfig {
            base_url: base_url.trim_end_matches('/').to_string(),
            ..Self::default()
        }
    }

    pub fn with_token(mut self, token: &str) -> Self {
        self.token = Some(token.to_string());
        self
    }

    pub fn records_url(&self) -> String {
        format!("{}/api/records", self.base_url)
    }
}

/// Listing query for records created on `date` that still need QA.
pub fn listing_query(date: NaiveDate) -> String {
    format!(
        r#"created:"{date}" AND NOT custom_fields.iaea\:country_of_input.id: xa AND NOT custom_fields.iaea\:qa_checked: (true)"#
    )
}

fn quoted(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Client for the InvenioRDM records REST API
pub struct InvenioClient {
    config: InvenioConfig,
    http_client: reqwest::Client,
}

impl InvenioClient {
    pub fn new(config: InvenioConfig) -> Result<Self> {
        if !config.base_url.starts_with("http://") && !config.base_url.starts_with("https://") {
            return Err(InvenioError::InvalidUrl(config.base_url));
        }
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("inis-qa/", env!("CARGO_PKG_VERSION")))
            .timeout(config.timeout)
            .build()?;

        Ok(InvenioClient {
            config,
            http_client,
        })
    }

    pub fn config(&self) -> &InvenioConfig {
        &self.config
    }

    pub fn has_token(&self) -> bool {
        self.config.token.is_some()
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let builder = self
            .http_client
            .request(method, url)
            .header(reqwest::header::ACCEPT, "application/json");
        match &self.config.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> ApiResult<Value> {
        let response = builder.send().await.map_err(api_error)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::from_status(status.as_u16(), truncate(&body, 300)));
        }
        response.json::<Value>().await.map_err(api_error)
    }

    fn record_url(&self, record_id: &str) -> String {
        format!("{}/{}", self.config.records_url(), record_id)
    }

    fn draft_url(&self, record_id: &str) -> String {
        format!("{}/draft", self.record_url(record_id))
    }

    /// Run `edit` against a fresh draft of `record_id` and publish it.
    async fn edit_draft<F>(&self, record_id: &str, edit: F) -> ApiResult<()>
    where
        F: FnOnce(&mut Value) -> std::result::Result<(), String>,
    {
        let draft_url = self.draft_url(record_id);

        let created = self.send(self.request(Method::POST, &draft_url)).await?;
        if created.get("id").is_none() {
            return Err(ApiError::rejected(format!(
                "draft creation for {record_id} returned no id"
            )));
        }

        let mut draft = self.send(self.request(Method::GET, &draft_url)).await?;
        edit(&mut draft).map_err(|detail| ApiError::Rejected {
            status: None,
            message: detail,
        })?;

        self.send(self.request(Method::PUT, &draft_url).json(&draft))
            .await?;

        let published = self
            .send(self.request(Method::POST, &format!("{draft_url}/actions/publish")))
            .await?;
        if published.get("id").is_none() {
            return Err(ApiError::rejected(format!(
                "publishing {record_id} returned no id"
            )));
        }
        debug!(record_id, "draft published");
        Ok(())
    }

    async fn total_hits(&self, query: &str) -> ApiResult<u64> {
        let builder = self
            .request(Method::GET, &self.config.records_url())
            .query(&[("q", query), ("size", "1")]);
        let body = self.send(builder).await?;
        let total = body.pointer("/hits/total");
        Ok(total
            .and_then(Value::as_u64)
            .or_else(|| total.and_then(|t| t.get("value")).and_then(Value::as_u64))
            .unwrap_or(0))
    }

    /// Look for other records sharing this record's DOI or exact title.
    #[instrument(skip(self, doc))]
    pub async fn find_duplicates(&self, record_id: &str, doc: &Value) -> ApiResult<DuplicateFlags> {
        let mut flags = DuplicateFlags::default();

        if let Some(doi) = fields::doi(doc) {
            let query = format!(
                r#"identifiers.identifier:"{}" AND NOT id: {record_id}"#,
                quoted(doi)
            );
            flags.by_doi = self.total_hits(&query).await? > 0;
        }

        if let Some(title) = doc.pointer("/metadata/title").and_then(Value::as_str) {
            if !title.trim().is_empty() {
                let query = format!(
                    r#"metadata.title:"{}" AND NOT id: {record_id}"#,
                    quoted(title)
                );
                flags.by_title = self.total_hits(&query).await? > 0;
            }
        }

        Ok(flags)
    }
}

#[async_trait]
impl RecordSource for InvenioClient {
    #[instrument(skip(self))]
    async fn list_records(&self, date: NaiveDate) -> std::result::Result<Vec<Listed>, SourceError> {
        let page_size = self.config.page_size.to_string();
        let query = listing_query(date);
        let builder = self
            .request(Method::GET, &self.config.records_url())
            .query(&[
                ("q", query.as_str()),
                ("size", page_size.as_str()),
                ("sort", "oldest"),
            ]);

        let body = self
            .send(builder)
            .await
            .map_err(|e| SourceError(format!("listing {date} failed: {e}")))?;

        let hits = body
            .pointer("/hits/hits")
            .and_then(Value::as_array)
            .ok_or_else(|| SourceError(format!("listing {date} returned no hits array")))?;

        if hits.len() >= self.config.page_size {
            warn!(
                %date,
                page_size = self.config.page_size,
                "listing reached page size; later records are not included"
            );
        }
        info!(%date, hits = hits.len(), "listing fetched");

        Ok(hits.iter().cloned().map(fields::record_from_json).collect())
    }
}

#[async_trait]
impl RecordApi for InvenioClient {
    async fn read_field(&self, record_id: &str, field: FieldPath) -> ApiResult<FieldValue> {
        let doc = self
            .send(self.request(Method::GET, &self.record_url(record_id)))
            .await?;
        Ok(fields::read(&doc, field))
    }

    async fn is_processed(&self, record_id: &str) -> ApiResult<bool> {
        let doc = self
            .send(self.request(Method::GET, &self.record_url(record_id)))
            .await?;
        Ok(fields::is_qa_checked(&doc))
    }

    #[instrument(skip(self, value), fields(field = %field))]
    async fn update_field(
        &self,
        record_id: &str,
        field: FieldPath,
        value: &FieldValue,
    ) -> ApiResult<()> {
        self.edit_draft(record_id, |draft| fields::assign(draft, field, value))
            .await
    }

    #[instrument(skip(self))]
    async fn mark_processed(&self, record_id: &str) -> ApiResult<()> {
        self.edit_draft(record_id, fields::mark_checked).await
    }
}
