//! Organization pages
//!
//! The organization name endpoint takes one PPN per call and answers with
//! the bare name as text. An empty body means the PPN is not an
//! organization.

use serde_json::Value;

use super::EnrichmentStrategy;
use crate::fields::Field;
use crate::query::{Payload, QueryAnswer, QueryRequest};
use crate::record::{Record, RecordKind};

const ENRICHED: [Field; 2] = [Field::OrganismeN, Field::OrganismePpn];

pub struct OrganizationStrategy {
    api_url: String,
}

impl OrganizationStrategy {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
        }
    }

    fn name_url(&self, id: &str) -> String {
        format!(
            "{}/theses/getorganismename/{}",
            self.api_url.trim_end_matches('/'),
            urlencoding::encode(id)
        )
    }
}

impl EnrichmentStrategy for OrganizationStrategy {
    fn namespace(&self) -> &'static str {
        "thesesfr-organisme"
    }

    fn accepts(&self, record: &Record) -> bool {
        record.is_kind(&[RecordKind::Record])
    }

    fn build_requests(&self, identifiers: &[String]) -> Vec<QueryRequest> {
        identifiers
            .iter()
            .map(|id| QueryRequest {
                url: self.name_url(id),
                identifiers: vec![id.clone()],
                payload: Payload::Text,
            })
            .collect()
    }

    fn parse_response(&self, request: &QueryRequest, answer: QueryAnswer) -> Vec<(String, Value)> {
        let QueryAnswer::Text(name) = answer else {
            return Vec::new();
        };
        let name = name.trim();
        if name.is_empty() {
            return Vec::new();
        }
        request
            .identifiers
            .iter()
            .map(|id| (id.clone(), Value::String(name.to_string())))
            .collect()
    }

    fn apply(&self, record: &mut Record, document: &Value) -> bool {
        let Some(name) = document.as_str().filter(|s| !s.is_empty()) else {
            return false;
        };
        let Some(ppn) = record.identifier().map(str::to_string) else {
            return false;
        };

        record.set(Field::OrganismeN, name);
        record.set(Field::OrganismePpn, ppn);
        record.mark_not_applicable(Field::output_except(&ENRICHED));
        true
    }
}
