//! Person pages
//!
//! A `RECORD` identifier may be a person or an organization PPN. This
//! strategy searches every one as a person; records that resolve are
//! switched to `BIO` so the organization stage that follows only sees the
//! remaining `RECORD`s.

use serde_json::Value;
use tracing::debug;

use super::{search_url, text, EnrichmentStrategy};
use crate::fields::Field;
use crate::query::{documents_by_id, Payload, QueryAnswer, QueryRequest};
use crate::record::{Record, RecordKind};

const ENRICHED: [Field; 2] = [Field::PersonneN, Field::PersonnePpn];

pub struct PersonStrategy {
    api_url: String,
}

impl PersonStrategy {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
        }
    }
}

impl EnrichmentStrategy for PersonStrategy {
    fn namespace(&self) -> &'static str {
        "thesesfr-personne"
    }

    fn accepts(&self, record: &Record) -> bool {
        record.is_kind(&[RecordKind::Record])
    }

    fn build_requests(&self, identifiers: &[String]) -> Vec<QueryRequest> {
        if identifiers.is_empty() {
            return Vec::new();
        }
        vec![QueryRequest {
            url: search_url(&self.api_url, "personnes/recherche/", &identifiers.join(" OR ")),
            identifiers: identifiers.to_vec(),
            payload: Payload::JsonArray("personnes"),
        }]
    }

    fn parse_response(&self, _request: &QueryRequest, answer: QueryAnswer) -> Vec<(String, Value)> {
        match answer {
            QueryAnswer::Documents(docs) => documents_by_id(docs),
            QueryAnswer::NotFound | QueryAnswer::Text(_) => Vec::new(),
        }
    }

    fn apply(&self, record: &mut Record, document: &Value) -> bool {
        let (Some(nom), Some(prenom)) = (text(document, "nom"), text(document, "prenom")) else {
            return false;
        };
        let Some(ppn) = record.identifier().map(str::to_string) else {
            return false;
        };

        record.set(Field::PersonneN, format!("{} {}", nom, prenom));
        record.set(Field::PersonnePpn, ppn);
        record.rtype = Some(RecordKind::Biography);
        record.mark_not_applicable(Field::output_except(&ENRICHED));

        debug!(
            personne = record.get(Field::PersonneN).unwrap_or_default(),
            "Person enriched"
        );
        true
    }
}
