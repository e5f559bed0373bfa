//! The QA model's JSON reply and its conversion into findings.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use inis_qa_core::{FieldValue, Finding, FindingCategory, Record, Severity};

/// Reply document requested from the QA model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QaReport {
    /// Field name to corrected text, e.g. `title`, `abstract`.
    #[serde(default)]
    pub corrections: serde_json::Map<String, Value>,
    #[serde(default)]
    pub recommendations: Vec<Value>,
    #[serde(default)]
    pub affiliation_corrections: Vec<AffiliationCorrection>,
    #[serde(default)]
    pub organizational_author_corrections: Vec<OrgAuthorCorrection>,
    #[serde(default)]
    pub scope_ok: Option<bool>,
    /// Report-wide confidence, used where an item carries none.
    #[serde(default)]
    pub confidence: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AffiliationCorrection {
    #[serde(default)]
    pub old_affiliation: String,
    #[serde(default)]
    pub recommended_affiliation: String,
    #[serde(default)]
    pub confidence: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrgAuthorCorrection {
    #[serde(default)]
    pub old_organizational_author: String,
    #[serde(default)]
    pub recommended_organizational_author: String,
    #[serde(default)]
    pub confidence: Option<f32>,
}

fn fence_pattern() -> &'static Regex {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    FENCE.get_or_init(|| {
        Regex::new(r"(?s)^```[^\n]*\n(.*?)\n```$").expect("fence pattern compiles")
    })
}

/// Parse the assistant message, tolerating a Markdown code fence and a
/// leading `json` tag.
pub fn parse_reply(raw: &str) -> serde_json::Result<QaReport> {
    let mut text = raw.trim();
    if let Some(inner) = fence_pattern().captures(text).and_then(|c| c.get(1)) {
        text = inner.as_str().trim();
    }
    let text = text
        .strip_prefix("json")
        .unwrap_or(text)
        .trim_start_matches(':')
        .trim();
    serde_json::from_str(text)
}

impl QaReport {
    /// True when the model reported nothing to fix or recommend.
    pub fn is_clean(&self) -> bool {
        self.corrections.is_empty()
            && self.recommendations.is_empty()
            && self.affiliation_corrections.is_empty()
            && self.organizational_author_corrections.is_empty()
            && self.scope_ok != Some(false)
    }

    /// Findings for `record`, in a stable order: title, affiliations,
    /// organizational authors, other corrections, scope, recommendations.
    pub fn into_findings(self, record: &Record) -> Vec<Finding> {
        let default_confidence = self.confidence.unwrap_or(1.0);
        let mut findings = Vec::new();

        for (field, value) in &self.corrections {
            if field != "title" {
                continue;
            }
            if let Some(proposed) = correction_text(value) {
                findings.push(
                    Finding::new(
                        &record.id,
                        FindingCategory::Title,
                        FieldValue::text(&record.title),
                        FieldValue::text(proposed),
                    )
                    .with_confidence(item_confidence(value).unwrap_or(default_confidence))
                    .with_description("title correction"),
                );
            }
        }

        if !self.affiliation_corrections.is_empty() {
            let renames: Vec<_> = self
                .affiliation_corrections
                .iter()
                .map(|c| {
                    (
                        c.old_affiliation.as_str(),
                        c.recommended_affiliation.as_str(),
                        c.confidence,
                    )
                })
                .collect();
            findings.push(list_finding(
                record,
                FindingCategory::Affiliation,
                &record.affiliations,
                &renames,
                default_confidence,
            ));
        }

        if !self.organizational_author_corrections.is_empty() {
            let renames: Vec<_> = self
                .organizational_author_corrections
                .iter()
                .map(|c| {
                    (
                        c.old_organizational_author.as_str(),
                        c.recommended_organizational_author.as_str(),
                        c.confidence,
                    )
                })
                .collect();
            findings.push(list_finding(
                record,
                FindingCategory::OrgAuthor,
                &record.organizational_authors,
                &renames,
                default_confidence,
            ));
        }

        for (field, value) in &self.corrections {
            if field == "title" {
                continue;
            }
            let proposed = correction_text(value).unwrap_or_default();
            findings.push(
                Finding::new(
                    &record.id,
                    FindingCategory::Other,
                    FieldValue::text(""),
                    FieldValue::text(proposed),
                )
                .with_confidence(item_confidence(value).unwrap_or(default_confidence))
                .with_description(format!("{field} correction")),
            );
        }

        if self.scope_ok == Some(false) {
            findings.push(
                Finding::new(
                    &record.id,
                    FindingCategory::Other,
                    FieldValue::text(""),
                    FieldValue::text(""),
                )
                .with_severity(Severity::High)
                .with_confidence(default_confidence)
                .with_description("record may be outside INIS subject scope"),
            );
        }

        for recommendation in &self.recommendations {
            let text = match recommendation {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            findings.push(recommendation_finding(record, text, default_confidence));
        }

        findings
    }
}

/// An advisory OTHER finding carrying free text.
pub fn recommendation_finding(record: &Record, text: String, confidence: f32) -> Finding {
    Finding::new(
        &record.id,
        FindingCategory::Other,
        FieldValue::text(""),
        FieldValue::text(text.clone()),
    )
    .with_severity(Severity::Low)
    .with_confidence(confidence)
    .with_description(text)
}

fn list_finding(
    record: &Record,
    category: FindingCategory,
    current: &[String],
    renames: &[(&str, &str, Option<f32>)],
    default_confidence: f32,
) -> Finding {
    let proposed: Vec<String> = current
        .iter()
        .map(|name| {
            renames
                .iter()
                .find(|(old, new, _)| *old == name.as_str() && !new.trim().is_empty())
                .map(|(_, new, _)| new.to_string())
                .unwrap_or_else(|| name.clone())
        })
        .collect();

    let confidence = renames
        .iter()
        .map(|(_, _, c)| c.unwrap_or(default_confidence))
        .fold(f32::INFINITY, f32::min)
        .min(1.0);
    let description = renames
        .iter()
        .map(|(old, new, _)| format!("'{old}' -> '{new}'"))
        .collect::<Vec<_>>()
        .join(", ");

    Finding::new(
        &record.id,
        category,
        FieldValue::List(current.to_vec()),
        FieldValue::List(proposed),
    )
    .with_confidence(confidence)
    .with_description(description)
}

fn correction_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => map
            .get("value")
            .or_else(|| map.get("corrected"))
            .and_then(Value::as_str)
            .map(str::to_string),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn item_confidence(value: &Value) -> Option<f32> {
    value
        .get("confidence")
        .and_then(Value::as_f64)
        .map(|c| c as f32)
}
