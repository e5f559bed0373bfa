//! QA findings and the field-level patches derived from them.

use serde::{Deserialize, Serialize};

/// Category of a metadata defect reported by the QA classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FindingCategory {
    Title,
    Affiliation,
    OrgAuthor,
    Other,
}

impl FindingCategory {
    /// Field written when a finding of this category is trusted.
    ///
    /// `Other` never maps to a field, so no patch can be built from it.
    pub fn field_path(self) -> Option<FieldPath> {
        match self {
            FindingCategory::Title => Some(FieldPath::Title),
            FindingCategory::Affiliation => Some(FieldPath::Affiliations),
            FindingCategory::OrgAuthor => Some(FieldPath::OrganizationalAuthors),
            FindingCategory::Other => None,
        }
    }
}

impl std::fmt::Display for FindingCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FindingCategory::Title => "TITLE",
            FindingCategory::Affiliation => "AFFILIATION",
            FindingCategory::OrgAuthor => "ORG_AUTHOR",
            FindingCategory::Other => "OTHER",
        };
        f.write_str(s)
    }
}

/// How serious the classifier considers a finding.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    #[default]
    Medium,
    High,
}

/// Record fields the pipeline is allowed to patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldPath {
    /// `metadata.title`
    Title,
    /// Every `metadata.creators[].affiliations[].name`, in document order.
    Affiliations,
    /// `metadata.creators[].person_or_org.name` of organizational creators.
    OrganizationalAuthors,
}

impl FieldPath {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldPath::Title => "metadata.title",
            FieldPath::Affiliations => "metadata.creators[].affiliations[].name",
            FieldPath::OrganizationalAuthors => "metadata.creators[].person_or_org.name",
        }
    }

    /// Whether the field holds a list rather than a single string.
    pub fn is_list(&self) -> bool {
        !matches!(self, FieldPath::Title)
    }
}

impl std::fmt::Display for FieldPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Content of a patchable field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    List(Vec<String>),
}

impl FieldValue {
    pub fn text(value: impl Into<String>) -> Self {
        FieldValue::Text(value.into())
    }

    pub fn list<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        FieldValue::List(values.into_iter().map(Into::into).collect())
    }

    /// Empty text, an empty list, or a list holding a blank entry.
    pub fn is_blank(&self) -> bool {
        match self {
            FieldValue::Text(s) => s.trim().is_empty(),
            FieldValue::List(items) => {
                items.is_empty() || items.iter().any(|item| item.trim().is_empty())
            }
        }
    }

    pub fn is_list(&self) -> bool {
        matches!(self, FieldValue::List(_))
    }
}

impl std::fmt::Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldValue::Text(s) => write!(f, "{s}"),
            FieldValue::List(items) => write!(f, "[{}]", items.join("; ")),
        }
    }
}

/// A single metadata issue detected for one record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub record_id: String,
    pub category: FindingCategory,
    #[serde(default)]
    pub severity: Severity,
    /// Classifier confidence in `0.0..=1.0`.
    pub confidence: f32,
    /// Field content the finding was computed against.
    pub original_value: FieldValue,
    pub proposed_value: FieldValue,
    #[serde(default)]
    pub description: String,
}

impl Finding {
    pub fn new(
        record_id: impl Into<String>,
        category: FindingCategory,
        original_value: FieldValue,
        proposed_value: FieldValue,
    ) -> Self {
        Self {
            record_id: record_id.into(),
            category,
            severity: Severity::default(),
            confidence: 1.0,
            original_value,
            proposed_value,
            description: String::new(),
        }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Field-level update derived from a trusted finding.
///
/// Only [`crate::trust::classify`] constructs these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionPatch {
    pub record_id: String,
    pub field_path: FieldPath,
    pub new_value: FieldValue,
    pub source_finding: Finding,
}

impl CorrectionPatch {
    pub(crate) fn from_trusted(finding: &Finding, field_path: FieldPath) -> Self {
        Self {
            record_id: finding.record_id.clone(),
            field_path,
            new_value: finding.proposed_value.clone(),
            source_finding: finding.clone(),
        }
    }

    /// Value the record held when the finding was produced.
    pub fn original_value(&self) -> &FieldValue {
        &self.source_finding.original_value
    }

    pub fn category(&self) -> FindingCategory {
        self.source_finding.category
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_other_has_no_field() {
        assert_eq!(FindingCategory::Title.field_path(), Some(FieldPath::Title));
        assert_eq!(
            FindingCategory::Affiliation.field_path(),
            Some(FieldPath::Affiliations)
        );
        assert_eq!(
            FindingCategory::OrgAuthor.field_path(),
            Some(FieldPath::OrganizationalAuthors)
        );
        assert_eq!(FindingCategory::Other.field_path(), None);
    }

    #[test]
    fn test_blank_values() {
        assert!(FieldValue::text("  ").is_blank());
        assert!(FieldValue::List(vec![]).is_blank());
        assert!(FieldValue::list(["CEA", ""]).is_blank());
        assert!(!FieldValue::list(["CEA"]).is_blank());
        assert!(!FieldValue::text("Reactor Safety").is_blank());
    }

    #[test]
    fn test_category_wire_names() {
        let json = serde_json::to_string(&FindingCategory::OrgAuthor).unwrap();
        assert_eq!(json, "\"ORG_AUTHOR\"");
        let back: FindingCategory = serde_json::from_str("\"AFFILIATION\"").unwrap();
        assert_eq!(back, FindingCategory::Affiliation);
    }

    #[test]
    fn test_field_value_untagged_json() {
        let v: FieldValue = serde_json::from_str("[\"a\",\"b\"]").unwrap();
        assert_eq!(v, FieldValue::list(["a", "b"]));
        let v: FieldValue = serde_json::from_str("\"t\"").unwrap();
        assert_eq!(v, FieldValue::text("t"));
    }
}
