//! Persistent lookup cache
//!
//! Stages consult the cache before querying the metadata service and write
//! every answer back, including an explicit empty marker for identifiers the
//! service does not know. Each entity kind uses its own namespace.
//!
//! - [`MongoCache`] - one MongoDB collection per namespace, TTL index on
//!   write time (production)
//! - [`MemoryCache`] - process-local map with the same TTL semantics

pub mod memory;
pub mod mongo;

pub use memory::MemoryCache;
pub use mongo::{MongoCache, MongoCacheClient};

use serde_json::Value;
use std::time::Duration;

use crate::types::Result;

/// Default time-to-live of cached documents (7 days)
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600 * 24 * 7);

/// Value stored for an identifier
#[derive(Debug, Clone, PartialEq)]
pub enum CachedValue {
    /// The metadata service has no document for this identifier
    Empty,
    /// Document returned by the metadata service
    Document(Value),
}

impl CachedValue {
    /// Interpret a stored value; `{}`, `""` and `null` are the empty marker
    pub fn from_stored(value: Value) -> Self {
        let empty = match &value {
            Value::Null => true,
            Value::Object(map) => map.is_empty(),
            Value::String(s) => s.is_empty(),
            _ => false,
        };
        if empty {
            CachedValue::Empty
        } else {
            CachedValue::Document(value)
        }
    }

    /// Representation written to the store
    pub fn to_stored(&self) -> Value {
        match self {
            CachedValue::Empty => Value::Object(Default::default()),
            CachedValue::Document(doc) => doc.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, CachedValue::Empty)
    }
}

impl From<Option<Value>> for CachedValue {
    fn from(value: Option<Value>) -> Self {
        value.map(Self::from_stored).unwrap_or(CachedValue::Empty)
    }
}

/// Key/document store consumed by the enrichment stages
#[async_trait::async_trait]
pub trait CacheStore: Send + Sync {
    /// Verify indexes and time-to-live; called once before processing
    async fn ensure_indexes(&self, ttl: Duration) -> Result<()>;

    /// Look up an identifier; `None` is a miss
    async fn get(&self, key: &str) -> Result<Option<CachedValue>>;

    /// Store the answer for an identifier, restarting its TTL
    async fn set(&self, key: &str, value: &CachedValue) -> Result<()>;
}
