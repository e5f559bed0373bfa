//! INIS QA service clients
//!
//! HTTP implementations of the core collaborator traits: the InvenioRDM
//! records API as [`RecordSource`](inis_qa_core::RecordSource) and
//! [`RecordApi`](inis_qa_core::RecordApi), and an Azure OpenAI chat
//! deployment as [`QaClassifier`](inis_qa_core::QaClassifier).

pub mod checks;
pub mod classifier;
pub mod error;
pub mod fields;
pub mod qa_report;
pub mod records;

pub use checks::DuplicateFlags;
pub use classifier::{load_system_prompt, AzureConfig, AzureQaClassifier, FALLBACK_PROMPT};
pub use error::{InvenioError, Result};
pub use qa_report::{parse_reply, QaReport};
pub use records::{listing_query, InvenioClient, InvenioConfig, DEFAULT_BASE_URL};
