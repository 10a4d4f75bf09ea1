//! Error types for the enrichment stages
//!
//! One flat enum with string payloads and `From` conversions for the
//! client libraries we talk to.

/// Main error type for enrichment operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum EnrichError {
    /// Invalid configuration or cache unavailable at start-up
    #[error("Configuration error: {0}")]
    Config(String),

    /// Cache index / TTL verification failed at start-up
    #[error("Failed to verify cache indexes: {0}")]
    IndexVerification(String),

    /// Cache read or write failure
    #[error("Cache error: {0}")]
    Cache(String),

    /// Network-level failure talking to the metadata service
    #[error("Transport error: {0}")]
    Transport(String),

    /// Metadata service answered with an unexpected status
    #[error("{status} {reason}")]
    Status { status: u16, reason: String },

    /// Payload did not have the expected shape
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Every attempt of a remote query failed
    #[error("Failed to query {stage} {attempts} times in a row: {last_error}")]
    RetriesExhausted {
        stage: String,
        attempts: u32,
        last_error: String,
    },

    /// Neither the remote table nor the fallback file could be loaded
    #[error("Failed to load mapping table {table}: {reason}")]
    MappingLoad { table: String, reason: String },

    /// Record rejected at the boundary
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EnrichError {
    /// Whether this error aborts stage initialization
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::IndexVerification(_) | Self::MappingLoad { .. }
        )
    }

    /// Whether the retry loop should try again after this error
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Status { .. } | Self::InvalidResponse(_)
        )
    }
}

impl From<std::io::Error> for EnrichError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for EnrichError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidResponse(format!("JSON error: {}", err))
    }
}

impl From<reqwest::Error> for EnrichError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<mongodb::error::Error> for EnrichError {
    fn from(err: mongodb::error::Error) -> Self {
        Self::Cache(err.to_string())
    }
}

impl From<bson::ser::Error> for EnrichError {
    fn from(err: bson::ser::Error) -> Self {
        Self::Cache(format!("BSON encode error: {}", err))
    }
}

/// Result type alias for enrichment operations
pub type Result<T> = std::result::Result<T, EnrichError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_display_matches_http_line() {
        let err = EnrichError::Status {
            status: 503,
            reason: "Service Unavailable".into(),
        };
        assert_eq!(err.to_string(), "503 Service Unavailable");
    }

    #[test]
    fn test_fatal_and_retryable_are_disjoint() {
        let errors = vec![
            EnrichError::Config("x".into()),
            EnrichError::IndexVerification("x".into()),
            EnrichError::Cache("x".into()),
            EnrichError::Transport("x".into()),
            EnrichError::Status { status: 500, reason: "x".into() },
            EnrichError::InvalidResponse("x".into()),
            EnrichError::MappingLoad { table: "t".into(), reason: "x".into() },
        ];

        for err in errors {
            assert!(!(err.is_fatal() && err.is_retryable()), "{err}");
        }
        assert!(EnrichError::Transport("down".into()).is_retryable());
        assert!(!EnrichError::Cache("down".into()).is_retryable());
    }
}
