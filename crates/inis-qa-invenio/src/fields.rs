//! Mapping between InvenioRDM record JSON and the pipeline's field model.
//!
//! Affiliations are every `metadata.creators[].affiliations[].name`, in
//! document order. Organizational authors are `person_or_org.name` of the
//! creators whose `person_or_org.type` is `organizational`. List updates are
//! positional renames, so the number of slots must not change.

use serde_json::Value;

use inis_qa_core::{FieldPath, FieldValue, Listed, MalformedRecord, Record};

pub const QA_CHECKED_FIELD: &str = "iaea:qa_checked";
pub const LEAD_RECORD_FIELD: &str = "iaea:lead_record_id";

/// Turn one listing hit into a [`Record`].
pub fn record_from_json(doc: Value) -> Listed {
    let Some(id) = doc.get("id").and_then(Value::as_str).map(str::to_string) else {
        return Err(MalformedRecord {
            record_id: "<unknown>".to_string(),
            detail: "hit has no string id".to_string(),
        });
    };
    let Some(title) = doc.pointer("/metadata/title").and_then(Value::as_str) else {
        return Err(MalformedRecord {
            record_id: id,
            detail: "metadata.title is missing or not a string".to_string(),
        });
    };

    Ok(Record {
        title: title.to_string(),
        affiliations: affiliations(&doc),
        organizational_authors: organizational_authors(&doc),
        qa_processed: is_qa_checked(&doc),
        id,
        raw: doc,
    })
}

/// Current value at `path`. Missing fields read as empty.
pub fn read(doc: &Value, path: FieldPath) -> FieldValue {
    match path {
        FieldPath::Title => FieldValue::Text(
            doc.pointer("/metadata/title")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        ),
        FieldPath::Affiliations => FieldValue::List(affiliations(doc)),
        FieldPath::OrganizationalAuthors => FieldValue::List(organizational_authors(doc)),
    }
}

/// Write `value` into `doc` at `path`, touching nothing else.
pub fn assign(doc: &mut Value, path: FieldPath, value: &FieldValue) -> Result<(), String> {
    match (path, value) {
        (FieldPath::Title, FieldValue::Text(title)) => {
            let metadata = doc
                .as_object_mut()
                .ok_or_else(|| "record document is not an object".to_string())?
                .entry("metadata")
                .or_insert_with(|| Value::Object(Default::default()));
            let metadata = metadata
                .as_object_mut()
                .ok_or_else(|| "metadata is not an object".to_string())?;
            metadata.insert("title".to_string(), Value::String(title.clone()));
            Ok(())
        }
        (FieldPath::Affiliations, FieldValue::List(names)) => {
            rename_slots(affiliation_slots(doc), names, path)
        }
        (FieldPath::OrganizationalAuthors, FieldValue::List(names)) => {
            rename_slots(organizational_slots(doc), names, path)
        }
        _ => Err(format!("value shape does not match {path}")),
    }
}

/// Set `custom_fields["iaea:qa_checked"] = true`.
pub fn mark_checked(doc: &mut Value) -> Result<(), String> {
    let root = doc
        .as_object_mut()
        .ok_or_else(|| "record document is not an object".to_string())?;
    let custom = root
        .entry("custom_fields")
        .or_insert_with(|| Value::Object(Default::default()));
    custom
        .as_object_mut()
        .ok_or_else(|| "custom_fields is not an object".to_string())?
        .insert(QA_CHECKED_FIELD.to_string(), Value::Bool(true));
    Ok(())
}

pub fn is_qa_checked(doc: &Value) -> bool {
    doc.get("custom_fields")
        .and_then(|c| c.get(QA_CHECKED_FIELD))
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

pub fn lead_record_id(doc: &Value) -> Option<&str> {
    doc.get("custom_fields")
        .and_then(|c| c.get(LEAD_RECORD_FIELD))
        .and_then(Value::as_str)
}

pub fn publication_date(doc: &Value) -> Option<&str> {
    doc.pointer("/metadata/publication_date")
        .and_then(Value::as_str)
}

/// First DOI among `metadata.identifiers`.
pub fn doi(doc: &Value) -> Option<&str> {
    doc.pointer("/metadata/identifiers")
        .and_then(Value::as_array)?
        .iter()
        .find(|i| i.get("scheme").and_then(Value::as_str) == Some("doi"))
        .and_then(|i| i.get("identifier"))
        .and_then(Value::as_str)
}

fn creators(doc: &Value) -> impl Iterator<Item = &Value> {
    doc.pointer("/metadata/creators")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
}

fn affiliations(doc: &Value) -> Vec<String> {
    creators(doc)
        .filter_map(|c| c.get("affiliations").and_then(Value::as_array))
        .flatten()
        .filter_map(|a| a.get("name").and_then(Value::as_str))
        .map(str::to_string)
        .collect()
}

fn organizational_authors(doc: &Value) -> Vec<String> {
    creators(doc)
        .filter_map(|c| c.get("person_or_org"))
        .filter(|p| p.get("type").and_then(Value::as_str) == Some("organizational"))
        .filter_map(|p| p.get("name").and_then(Value::as_str))
        .map(str::to_string)
        .collect()
}

fn creators_mut(doc: &mut Value) -> impl Iterator<Item = &mut Value> {
    doc.pointer_mut("/metadata/creators")
        .and_then(Value::as_array_mut)
        .into_iter()
        .flatten()
}

fn affiliation_slots(doc: &mut Value) -> Vec<&mut String> {
    creators_mut(doc)
        .filter_map(|c| c.get_mut("affiliations").and_then(Value::as_array_mut))
        .flatten()
        .filter_map(|a| match a.get_mut("name") {
            Some(Value::String(name)) => Some(name),
            _ => None,
        })
        .collect()
}

fn organizational_slots(doc: &mut Value) -> Vec<&mut String> {
    creators_mut(doc)
        .filter_map(|c| c.get_mut("person_or_org"))
        .filter(|p| p.get("type").and_then(Value::as_str) == Some("organizational"))
        .filter_map(|p| match p.get_mut("name") {
            Some(Value::String(name)) => Some(name),
            _ => None,
        })
        .collect()
}

fn rename_slots(slots: Vec<&mut String>, names: &[String], path: FieldPath) -> Result<(), String> {
    if slots.len() != names.len() {
        return Err(format!(
            "{path} has {} entries, correction has {}",
            slots.len(),
            names.len()
        ));
    }
    for (slot, name) in slots.into_iter().zip(names) {
        if *slot != *name {
            *slot = name.clone();
        }
    }
    Ok(())
}
