//! Error types for the InvenioRDM and Azure OpenAI clients

use thiserror::Error;

use inis_qa_core::{ApiError, ClassifierError};

/// Errors raised while building or configuring a client.
///
/// Per-request failures are reported through the core service errors
/// ([`ApiError`], [`ClassifierError`]) so the pipeline can classify them.
#[derive(Error, Debug)]
pub enum InvenioError {
    /// Base URL or endpoint is unusable
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// Required credential is missing
    #[error("missing credential: {0}")]
    MissingCredential(&'static str),

    /// HTTP client could not be constructed
    #[error("HTTP error: {0}")]
    Http(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<reqwest::Error> for InvenioError {
    fn from(err: reqwest::Error) -> Self {
        InvenioError::Http(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, InvenioError>;

/// Map a reqwest failure onto the record API taxonomy.
///
/// Anything without an HTTP status (connect, timeout, reset) is transient.
pub(crate) fn api_error(err: reqwest::Error) -> ApiError {
    match err.status() {
        Some(status) => ApiError::from_status(status.as_u16(), err.to_string()),
        None if err.is_decode() => ApiError::rejected(format!("undecodable response: {err}")),
        None => ApiError::transient(err.to_string()),
    }
}

pub(crate) fn classifier_error(err: reqwest::Error) -> ClassifierError {
    if err.is_decode() {
        ClassifierError::InvalidResponse(err.to_string())
    } else {
        ClassifierError::Unavailable(err.to_string())
    }
}

/// Keep error bodies short enough for a log line.
pub(crate) fn truncate(body: &str, max: usize) -> String {
    let body = body.trim();
    match body.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("  short  ", 10), "short");
        assert_eq!(truncate("Kernforschungsanlage Jülich", 22), "Kernforschungsanlage J...");
        assert_eq!(truncate("ééééé", 2), "éé...");
    }

    #[test]
    fn test_missing_credential_message() {
        let err = InvenioError::MissingCredential("AZURE_OPENAI_API_KEY");
        assert_eq!(err.to_string(), "missing credential: AZURE_OPENAI_API_KEY");
    }
}
