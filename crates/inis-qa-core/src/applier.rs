//! Applies trusted patches to the record API.
//!
//! Every write is preceded by a re-read of the target field so that repeated
//! or overlapping runs never write the same correction twice and never apply
//! a correction computed against data that has since changed.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::domain::{ApplicationResult, CorrectionPatch, FailureKind, PatchOutcome, SkipReason};
use crate::retry::{with_retry, RetryPolicy};
use crate::services::{ApiError, RecordApi};

/// Applies one [`CorrectionPatch`] at a time through a [`RecordApi`].
pub struct CorrectionApplier {
    api: Arc<dyn RecordApi>,
    retry: RetryPolicy,
}

impl CorrectionApplier {
    pub fn new(api: Arc<dyn RecordApi>, retry: RetryPolicy) -> Self {
        Self { api, retry }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Apply `patch` and mark the record processed on success.
    #[instrument(
        skip(self, patch),
        fields(record_id = %patch.record_id, field = %patch.field_path)
    )]
    pub async fn apply(&self, patch: &CorrectionPatch) -> PatchOutcome {
        let record_id = patch.record_id.as_str();
        let field = patch.field_path;

        let current = match with_retry(&self.retry, "read_field", || {
            self.api.read_field(record_id, field)
        })
        .await
        {
            Ok(value) => value,
            Err(err) => return PatchOutcome::single(failure(err)),
        };

        if current == patch.new_value {
            debug!("field already holds the proposed value");
            return PatchOutcome {
                result: ApplicationResult::skipped(SkipReason::AlreadyApplied),
                follow_up: self.ensure_processed(record_id).await,
            };
        }
        if current != *patch.original_value() {
            info!(
                current = %current,
                expected = %patch.original_value(),
                "record changed since analysis"
            );
            return PatchOutcome::single(ApplicationResult::skipped(SkipReason::StaleFinding));
        }

        if let Err(err) = with_retry(&self.retry, "update_field", || {
            self.api.update_field(record_id, field, &patch.new_value)
        })
        .await
        {
            warn!(error = %err, "correction not applied");
            return PatchOutcome::single(failure(err));
        }
        info!(new_value = %patch.new_value, "correction applied");

        let follow_up = self.mark_processed(record_id).await.err().map(mark_failed);

        PatchOutcome {
            result: ApplicationResult::Applied {
                value: patch.new_value.clone(),
            },
            follow_up,
        }
    }

    /// Mark a record whose correction landed in an earlier run but whose
    /// mark step failed there.
    async fn ensure_processed(&self, record_id: &str) -> Option<ApplicationResult> {
        let processed = with_retry(&self.retry, "is_processed", || {
            self.api.is_processed(record_id)
        })
        .await;
        match processed {
            Ok(true) => None,
            Ok(false) => {
                info!("correction present but record unmarked, marking now");
                self.mark_processed(record_id).await.err().map(mark_failed)
            }
            Err(err) => Some(mark_failed(err)),
        }
    }

    /// Mark a reviewed record processed without touching any other field.
    #[instrument(skip(self))]
    pub async fn mark_reviewed(&self, record_id: &str) -> Result<(), ApiError> {
        self.mark_processed(record_id).await
    }

    async fn mark_processed(&self, record_id: &str) -> Result<(), ApiError> {
        let result = with_retry(&self.retry, "mark_processed", || {
            self.api.mark_processed(record_id)
        })
        .await;
        if let Err(err) = &result {
            warn!(record_id, error = %err, "could not mark record processed");
        }
        result
    }
}

fn mark_failed(err: ApiError) -> ApplicationResult {
    ApplicationResult::failed(FailureKind::MarkFailed, err.to_string())
}

fn failure(err: ApiError) -> ApplicationResult {
    let kind = match err {
        ApiError::Transient { .. } => FailureKind::Transport,
        ApiError::Rejected { .. } => FailureKind::Rejected,
    };
    ApplicationResult::failed(kind, err.to_string())
}
