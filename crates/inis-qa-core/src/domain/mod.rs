//! Domain models for INIS QA.
//!
//! - `Record`: a repository record and the fields QA may patch
//! - `Finding`: one detected metadata issue
//! - `CorrectionPatch`: a field update derived from a trusted finding
//! - `ApplicationResult`: what happened when a patch was attempted

pub mod error;
pub mod finding;
pub mod outcome;
pub mod record;

pub use error::{QaError, Result};
pub use finding::{CorrectionPatch, FieldPath, FieldValue, Finding, FindingCategory, Severity};
pub use outcome::{ApplicationResult, FailureKind, PatchOutcome, SkipReason};
pub use record::{Listed, MalformedRecord, Record};
