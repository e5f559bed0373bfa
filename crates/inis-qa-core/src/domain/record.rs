//! Repository records as seen by the QA pipeline.

use serde::{Deserialize, Serialize};

use super::finding::{FieldPath, FieldValue};

/// A bibliographic record fetched from the repository.
///
/// Owned by the repository; the pipeline only reads it and patches it
/// through [`crate::services::RecordApi`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub affiliations: Vec<String>,
    #[serde(default)]
    pub organizational_authors: Vec<String>,
    #[serde(default)]
    pub qa_processed: bool,
    /// Full source document, handed to the classifier as-is.
    #[serde(default)]
    pub raw: serde_json::Value,
}

impl Record {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            affiliations: Vec::new(),
            organizational_authors: Vec::new(),
            qa_processed: false,
            raw: serde_json::Value::Null,
        }
    }

    pub fn with_affiliations<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.affiliations = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_organizational_authors<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.organizational_authors = names.into_iter().map(Into::into).collect();
        self
    }

    /// Current value at `path`.
    pub fn field(&self, path: FieldPath) -> FieldValue {
        match path {
            FieldPath::Title => FieldValue::Text(self.title.clone()),
            FieldPath::Affiliations => FieldValue::List(self.affiliations.clone()),
            FieldPath::OrganizationalAuthors => {
                FieldValue::List(self.organizational_authors.clone())
            }
        }
    }

    /// Overwrite the value at `path`. Returns `false` on a shape mismatch.
    pub fn set_field(&mut self, path: FieldPath, value: &FieldValue) -> bool {
        match (path, value) {
            (FieldPath::Title, FieldValue::Text(s)) => self.title = s.clone(),
            (FieldPath::Affiliations, FieldValue::List(items)) => {
                self.affiliations = items.clone()
            }
            (FieldPath::OrganizationalAuthors, FieldValue::List(items)) => {
                self.organizational_authors = items.clone()
            }
            _ => return false,
        }
        true
    }
}

/// A listing hit that could not be turned into a [`Record`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("malformed record {record_id}: {detail}")]
pub struct MalformedRecord {
    pub record_id: String,
    pub detail: String,
}

/// One entry of a date listing.
pub type Listed = std::result::Result<Record, MalformedRecord>;
