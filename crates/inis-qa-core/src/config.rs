//! Pipeline configuration, resolved once at the process boundary.

use serde::{Deserialize, Serialize};

use crate::domain::{QaError, Result};
use crate::retry::RetryPolicy;
use crate::trust::TrustPolicy;

/// Whether trusted corrections should be written back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrectionMode {
    /// Enabled if and only if an API access token is configured.
    #[default]
    Auto,
    ForceOn,
    ForceOff,
}

impl CorrectionMode {
    /// Decide whether corrections are applied for this process.
    ///
    /// `ForceOn` without a token is a configuration error: nothing could be
    /// written.
    pub fn resolve(self, has_access_token: bool) -> Result<bool> {
        match (self, has_access_token) {
            (CorrectionMode::Auto, token) => Ok(token),
            (CorrectionMode::ForceOn, true) => Ok(true),
            (CorrectionMode::ForceOn, false) => Err(QaError::InvalidConfig(
                "correction application forced on but no access token is configured".into(),
            )),
            (CorrectionMode::ForceOff, _) => Ok(false),
        }
    }
}

/// Which steps of the pipeline a run executes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Fetch, analyse, apply (when enabled), report.
    #[default]
    Full,
    /// Re-apply a previously computed finding set; nothing is fetched or
    /// analysed.
    ApplyOnly,
}

/// Explicit configuration handed to [`crate::orchestrator::Orchestrator`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub trust: TrustPolicy,
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Records analysed and patched concurrently.
    pub max_concurrent_records: usize,
    /// Resolved value of [`CorrectionMode`].
    pub apply_corrections: bool,
    /// Mark records processed even when no correction was applied to them.
    #[serde(default)]
    pub mark_reviewed_records: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            trust: TrustPolicy::default(),
            retry: RetryPolicy::default(),
            max_concurrent_records: 4,
            apply_corrections: false,
            mark_reviewed_records: false,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_records == 0 {
            return Err(QaError::InvalidConfig(
                "max_concurrent_records must be at least 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.trust.min_confidence) {
            return Err(QaError::InvalidConfig(format!(
                "min_confidence must be within 0.0..=1.0, got {}",
                self.trust.min_confidence
            )));
        }
        if self.retry.max_attempts == 0 {
            return Err(QaError::InvalidConfig(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
