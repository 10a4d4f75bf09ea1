//! Per-entity enrichment strategies
//!
//! The batching engine is the same for every entity kind; what differs is
//! which records a stage handles, how identifiers become requests, how
//! answers map back to identifiers and how a document is written into a
//! record. Those four decisions live behind [`EnrichmentStrategy`].
//!
//! | Strategy       | Namespace            | Kinds          | Requests            |
//! |----------------|----------------------|----------------|---------------------|
//! | thesis         | `thesesfr`           | PHD_THESIS, ABS| one per packet      |
//! | person         | `thesesfr-personne`  | RECORD         | one per packet      |
//! | organization   | `thesesfr-organisme` | RECORD         | one per identifier  |
//! | biography      | `thesesfr-persons`   | BIO            | one per packet      |

pub mod biography;
pub mod organization;
pub mod person;
pub mod thesis;

pub use biography::BiographyStrategy;
pub use organization::OrganizationStrategy;
pub use person::PersonStrategy;
pub use thesis::ThesisStrategy;

use serde_json::Value;

use crate::fields::NOT_PROVIDED;
use crate::query::{QueryAnswer, QueryRequest};
use crate::record::Record;

/// Results requested per search query; `PipelineConfig::validate` keeps
/// packets within it
pub const SEARCH_PAGE_SIZE: usize = 200;

pub trait EnrichmentStrategy: Send + Sync {
    /// Cache namespace and statistics group
    fn namespace(&self) -> &'static str;

    /// Whether records of this kind are handled by the stage
    fn accepts(&self, record: &Record) -> bool;

    /// Requests covering the given identifiers; empty when none is queryable
    fn build_requests(&self, identifiers: &[String]) -> Vec<QueryRequest>;

    /// Documents of an answer keyed by the identifier they describe
    fn parse_response(&self, request: &QueryRequest, answer: QueryAnswer) -> Vec<(String, Value)>;

    /// Write a document into a record; returns whether anything was written.
    /// Applying the same document twice leaves the record unchanged.
    fn apply(&self, record: &mut Record, document: &Value) -> bool;
}

/// `{api}/{path}?nombre=200&q={query}` with the query percent-encoded
pub(crate) fn search_url(api_url: &str, path: &str, query: &str) -> String {
    format!(
        "{}/{}?nombre={}&q={}",
        api_url.trim_end_matches('/'),
        path,
        SEARCH_PAGE_SIZE,
        urlencoding::encode(query)
    )
}

/// Non-empty string attribute of a document
pub(crate) fn text<'a>(doc: &'a Value, key: &str) -> Option<&'a str> {
    doc.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

/// Non-empty array attribute of a document
pub(crate) fn list<'a>(doc: &'a Value, key: &str) -> Option<&'a Vec<Value>> {
    doc.get(key)
        .and_then(Value::as_array)
        .filter(|items| !items.is_empty())
}

/// String attribute or the "not provided" sentinel
pub(crate) fn text_or_nr<'a>(doc: &'a Value, key: &str) -> &'a str {
    text(doc, key).unwrap_or(NOT_PROVIDED)
}

/// "nom prenom" of a person object
pub(crate) fn full_name(person: &Value) -> String {
    let nom = person.get("nom").and_then(Value::as_str).unwrap_or_default();
    let prenom = person.get("prenom").and_then(Value::as_str).unwrap_or_default();
    format!("{} {}", nom, prenom).trim().to_string()
}
