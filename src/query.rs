//! Remote metadata queries
//!
//! A packet's identifiers become one or more [`QueryRequest`]s (built by the
//! stage's strategy). Each request is fetched through the [`HttpFetcher`]
//! seam inside the stage's [`RetryPolicy`]; answers are interpreted the same
//! way for every entity kind:
//!
//! - 404 is an empty result set
//! - any status other than 2xx or 304 is a failed attempt
//! - a JSON payload must carry its top-level result array
//! - a text payload is taken as is (possibly empty)

use bytes::Bytes;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::metrics::{Counter, MetricsSink};
use crate::retry::RetryPolicy;
use crate::strategy::EnrichmentStrategy;
use crate::types::{EnrichError, Result};

/// Raw HTTP answer
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub reason: String,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            reason: String::new(),
            body: body.into(),
        }
    }

    /// JSON answer with status 200
    pub fn json(value: &Value) -> Self {
        Self::new(200, value.to_string())
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }
}

/// GET transport used by the query stage and the mapping loader
#[async_trait::async_trait]
pub trait HttpFetcher: Send + Sync {
    async fn get(&self, url: &str) -> Result<HttpResponse>;
}

/// reqwest-backed fetcher
#[derive(Debug, Clone)]
pub struct ReqwestFetcher {
    client: reqwest::Client,
}

impl ReqwestFetcher {
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(|e| EnrichError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl HttpFetcher for ReqwestFetcher {
    async fn get(&self, url: &str) -> Result<HttpResponse> {
        let response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "application/json, text/plain, */*")
            .send()
            .await?;

        let status = response.status();
        let body = response.bytes().await?;

        Ok(HttpResponse {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or_default().to_string(),
            body,
        })
    }
}

/// Shape of the payload a request expects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Payload {
    /// JSON object holding the documents under this key
    JsonArray(&'static str),
    /// Bare text body
    Text,
}

/// One remote request covering some identifiers of a packet
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub url: String,
    pub identifiers: Vec<String>,
    pub payload: Payload,
}

/// Interpreted answer to a request
#[derive(Debug, Clone, PartialEq)]
pub enum QueryAnswer {
    /// 404: nothing known for these identifiers
    NotFound,
    /// Documents from a JSON payload
    Documents(Vec<Value>),
    /// Text payload
    Text(String),
}

impl QueryAnswer {
    /// Apply the shared status and payload rules
    pub fn interpret(payload: Payload, response: HttpResponse) -> Result<Self> {
        if response.status == 404 {
            return Ok(QueryAnswer::NotFound);
        }
        if !(200..300).contains(&response.status) && response.status != 304 {
            return Err(EnrichError::Status {
                status: response.status,
                reason: response.reason,
            });
        }

        match payload {
            Payload::Text => Ok(QueryAnswer::Text(
                String::from_utf8_lossy(&response.body).into_owned(),
            )),
            Payload::JsonArray(key) => {
                let mut value: Value = serde_json::from_slice(&response.body)
                    .map_err(|_| EnrichError::InvalidResponse("invalid response".into()))?;
                match value.get_mut(key).map(Value::take) {
                    Some(Value::Array(docs)) => Ok(QueryAnswer::Documents(docs)),
                    _ => Err(EnrichError::InvalidResponse(format!(
                        "invalid response: no `{}` array",
                        key
                    ))),
                }
            }
        }
    }
}

/// Documents whose `id` field is a string, keyed by it
pub fn documents_by_id(docs: Vec<Value>) -> Vec<(String, Value)> {
    docs.into_iter()
        .filter_map(|doc| {
            let id = doc.get("id").and_then(Value::as_str)?.to_string();
            Some((id, doc))
        })
        .collect()
}

/// Query stage of one enrichment stage
pub struct MetadataQuery {
    strategy: Arc<dyn EnrichmentStrategy>,
    fetcher: Arc<dyn HttpFetcher>,
    metrics: Arc<dyn MetricsSink>,
    retry: RetryPolicy,
}

impl MetadataQuery {
    pub fn new(
        strategy: Arc<dyn EnrichmentStrategy>,
        fetcher: Arc<dyn HttpFetcher>,
        metrics: Arc<dyn MetricsSink>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            strategy,
            fetcher,
            metrics,
            retry,
        }
    }

    /// Look up a packet's identifiers; keys of the result are identifiers
    /// the remote service knows. Any request exhausting its retries fails
    /// the whole packet.
    pub async fn query(&self, identifiers: &[String]) -> Result<HashMap<String, Value>> {
        let namespace = self.strategy.namespace();
        let mut results = HashMap::new();

        let requests = self.strategy.build_requests(identifiers);
        if requests.is_empty() {
            debug!(namespace, count = identifiers.len(), "No queryable identifier in packet");
            return Ok(results);
        }

        for request in requests {
            info!(namespace, url = %request.url, "Querying metadata service");

            let answer = self
                .retry
                .run(namespace, |_| self.attempt(&request))
                .await?;

            if matches!(&answer, QueryAnswer::Text(text) if text.trim().is_empty()) {
                self.metrics.increment(namespace, Counter::QueryEmptyResponses);
                debug!(namespace, identifiers = ?request.identifiers, "Empty text response");
            }

            results.extend(self.strategy.parse_response(&request, answer));
        }

        Ok(results)
    }

    async fn attempt(&self, request: &QueryRequest) -> Result<QueryAnswer> {
        let namespace = self.strategy.namespace();
        self.metrics.increment(namespace, Counter::Queries);

        let outcome = match self.fetcher.get(&request.url).await {
            Ok(response) => QueryAnswer::interpret(request.payload, response),
            Err(e) => Err(e),
        };

        if outcome.is_err() {
            self.metrics.increment(namespace, Counter::QueryFails);
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_not_found_is_empty_result() {
        let answer =
            QueryAnswer::interpret(Payload::JsonArray("theses"), HttpResponse::new(404, ""))
                .unwrap();
        assert_eq!(answer, QueryAnswer::NotFound);
    }

    #[test]
    fn test_error_status_carries_reason() {
        let response = HttpResponse::new(503, "").with_reason("Service Unavailable");
        let err = QueryAnswer::interpret(Payload::Text, response).unwrap_err();
        assert_eq!(err.to_string(), "503 Service Unavailable");
        assert!(err.is_retryable());
    }

    #[test]
    fn test_missing_result_array_is_invalid() {
        let response = HttpResponse::json(&json!({"personnes": []}));
        let err = QueryAnswer::interpret(Payload::JsonArray("theses"), response).unwrap_err();
        assert!(matches!(err, EnrichError::InvalidResponse(_)));

        let response = HttpResponse::new(200, "<html>");
        let err = QueryAnswer::interpret(Payload::JsonArray("theses"), response).unwrap_err();
        assert!(matches!(err, EnrichError::InvalidResponse(_)));
    }

    #[test]
    fn test_documents_extracted() {
        let response = HttpResponse::json(&json!({"theses": [{"id": "s1"}, {"id": "s2"}]}));
        match QueryAnswer::interpret(Payload::JsonArray("theses"), response).unwrap() {
            QueryAnswer::Documents(docs) => assert_eq!(docs.len(), 2),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_text_payload_may_be_empty() {
        let answer = QueryAnswer::interpret(Payload::Text, HttpResponse::new(200, "")).unwrap();
        assert_eq!(answer, QueryAnswer::Text(String::new()));
    }

    #[test]
    fn test_documents_without_id_are_dropped() {
        let keyed = documents_by_id(vec![json!({"id": "A"}), json!({"nom": "x"}), json!(null)]);
        assert_eq!(keyed.len(), 1);
        assert_eq!(keyed[0].0, "A");
    }
}
