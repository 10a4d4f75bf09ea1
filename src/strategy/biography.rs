//! Legacy biography enrichment of `BIO` records: surname and first name
//! from the person search, kept for older report layouts.

use serde_json::Value;

use super::{search_url, text, EnrichmentStrategy};
use crate::fields::Field;
use crate::query::{documents_by_id, Payload, QueryAnswer, QueryRequest};
use crate::record::{Record, RecordKind};

pub struct BiographyStrategy {
    api_url: String,
}

impl BiographyStrategy {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
        }
    }
}

impl EnrichmentStrategy for BiographyStrategy {
    fn namespace(&self) -> &'static str {
        "thesesfr-persons"
    }

    fn accepts(&self, record: &Record) -> bool {
        record.is_kind(&[RecordKind::Biography])
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
            _ => Vec::new(),
        }
    }

    fn apply(&self, record: &mut Record, document: &Value) -> bool {
        let mut written = false;
        if let Some(nom) = text(document, "nom") {
            record.set(Field::PersonneNom, nom);
            written = true;
        }
        if let Some(prenom) = text(document, "prenom") {
            record.set(Field::PersonnePrenom, prenom);
            written = true;
        }
        written
    }
}
