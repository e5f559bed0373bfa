//! Trust classification for QA findings.
//!
//! Decides whether a finding may be applied without human review and, if so,
//! which field it patches. Pure: the same finding and policy always give the
//! same answer, so reprocessing a finding set is safe once combined with the
//! applier's idempotency guard.

use serde::{Deserialize, Serialize};

use crate::domain::{CorrectionPatch, FieldValue, Finding, Severity};

/// Thresholds a finding must meet to be trusted.
///
/// The trusted category set is fixed (see
/// [`crate::domain::FindingCategory::field_path`]); only the thresholds are
/// configurable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustPolicy {
    pub min_confidence: f32,
    pub min_severity: Severity,
}

impl Default for TrustPolicy {
    fn default() -> Self {
        Self {
            min_confidence: 0.8,
            min_severity: Severity::Low,
        }
    }
}

/// Map a finding to a patch, or `None` when it is not safe to apply.
pub fn classify(finding: &Finding, policy: &TrustPolicy) -> Option<CorrectionPatch> {
    let field_path = finding.category.field_path()?;

    // NaN confidence must never pass.
    if !(finding.confidence >= policy.min_confidence) {
        return None;
    }
    if finding.severity < policy.min_severity {
        return None;
    }

    let proposed = &finding.proposed_value;
    if proposed.is_blank() || *proposed == finding.original_value {
        return None;
    }
    if proposed.is_list() != field_path.is_list()
        || finding.original_value.is_list() != field_path.is_list()
    {
        return None;
    }
    // List fields are written back positionally: renames only.
    if let (FieldValue::List(old), FieldValue::List(new)) = (&finding.original_value, proposed) {
        if old.len() != new.len() {
            return None;
        }
    }

    Some(CorrectionPatch::from_trusted(finding, field_path))
}
