//! Deterministic record checks that run next to the QA model.
//!
//! Every check yields advisory OTHER findings; none of them is ever applied.

use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::Regex;

use inis_qa_core::{Finding, Record};

use crate::fields;
use crate::qa_report::recommendation_finding;

fn lead_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[a-z0-9]{5}-[a-z0-9]{5}$").expect("lead id pattern compiles")
    })
}

/// INIS record ids look like `abcde-12345`.
pub fn is_valid_lead_record_id(value: &str) -> bool {
    lead_id_pattern().is_match(value)
}

/// `YYYY-MM-DD` or `YYYY-MM` strictly after `today`. Unparseable dates are
/// not flagged.
pub fn is_future_date(value: &str, today: NaiveDate) -> bool {
    let parsed = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(&format!("{value}-01"), "%Y-%m-%d"));
    matches!(parsed, Ok(date) if date > today)
}

/// Whether another record already carries this record's DOI or title.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DuplicateFlags {
    pub by_doi: bool,
    pub by_title: bool,
}

/// Lead record id and publication date checks.
pub fn record_findings(record: &Record, today: NaiveDate) -> Vec<Finding> {
    let mut findings = Vec::new();

    if let Some(lead) = fields::lead_record_id(&record.raw) {
        if !lead.is_empty() && !is_valid_lead_record_id(lead) {
            findings.push(recommendation_finding(
                record,
                format!("Lead Record appears to be invalid: {lead}"),
                1.0,
            ));
        }
    }

    if let Some(date) = fields::publication_date(&record.raw) {
        if is_future_date(date, today) {
            findings.push(recommendation_finding(
                record,
                format!("Publication date is in the future: {date}"),
                1.0,
            ));
        }
    }

    findings
}

pub fn duplicate_findings(record: &Record, flags: DuplicateFlags) -> Vec<Finding> {
    let mut findings = Vec::new();
    if flags.by_doi {
        findings.push(recommendation_finding(
            record,
            "Another record with the same DOI exists".to_string(),
            1.0,
        ));
    }
    if flags.by_title {
        findings.push(recommendation_finding(
            record,
            "Another record with the same title exists".to_string(),
            1.0,
        ));
    }
    findings
}
