//! MongoDB cache store
//!
//! One collection per namespace. Documents are `{ id, data, createdAt }`
//! with a unique index on `id` and a TTL index on `createdAt`, so entries
//! expire `ttl` after their last write.

use bson::{doc, DateTime, Document};
use futures_util::TryStreamExt;
use mongodb::{options::IndexOptions, Client, Collection, IndexModel};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{CacheStore, CachedValue};
use crate::types::{EnrichError, Result};

const ID_INDEX: &str = "id_unique";
const TTL_INDEX: &str = "createdAt_ttl";

/// Document stored for each identifier
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct CacheEntryDoc {
    /// Identifier (cache key)
    pub id: String,
    /// Remote document, or `{}` for the empty marker
    pub data: Value,
    /// Last write time, drives the TTL index
    #[serde(rename = "createdAt")]
    pub created_at: DateTime,
}

/// Index definitions for a cache collection
fn cache_indexes(ttl: Duration) -> Vec<IndexModel> {
    vec![
        IndexModel::builder()
            .keys(doc! { "id": 1 })
            .options(
                IndexOptions::builder()
                    .unique(true)
                    .name(ID_INDEX.to_string())
                    .build(),
            )
            .build(),
        IndexModel::builder()
            .keys(doc! { "createdAt": 1 })
            .options(
                IndexOptions::builder()
                    .expire_after(ttl)
                    .name(TTL_INDEX.to_string())
                    .build(),
            )
            .build(),
    ]
}

/// Shared MongoDB connection handing out cache namespaces
#[derive(Clone)]
pub struct MongoCacheClient {
    client: Client,
    db_name: String,
}

impl MongoCacheClient {
    /// Connect and ping; failure means the cache is unavailable
    pub async fn connect(uri: &str, db_name: &str) -> Result<Self> {
        info!("Connecting to MongoDB at {}", uri);

        // Fail fast instead of hanging on an unreachable server
        let timeout_uri = if uri.contains('?') {
            format!("{}&serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        } else {
            format!("{}?serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        };

        let client = Client::with_uri_str(&timeout_uri)
            .await
            .map_err(|e| EnrichError::Config(format!("Failed to connect to MongoDB: {}", e)))?;

        client
            .database(db_name)
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| {
                EnrichError::Config(format!("MongoDB ping failed, cache not available: {}", e))
            })?;

        info!("Connected to MongoDB database '{}'", db_name);

        Ok(Self {
            client,
            db_name: db_name.to_string(),
        })
    }

    /// Cache store for one entity namespace
    pub fn namespace(&self, name: &str) -> MongoCache {
        MongoCache {
            inner: self
                .client
                .database(&self.db_name)
                .collection::<CacheEntryDoc>(name),
            namespace: name.to_string(),
        }
    }
}

/// Cache namespace backed by one collection
#[derive(Debug, Clone)]
pub struct MongoCache {
    inner: Collection<CacheEntryDoc>,
    namespace: String,
}

impl MongoCache {
    /// Drop the TTL index when it was created with another lifetime;
    /// MongoDB refuses to redefine an index in place.
    async fn drop_stale_ttl_index(&self, ttl: Duration) -> Result<()> {
        let existing: Vec<IndexModel> = match self.inner.list_indexes().await {
            Ok(cursor) => cursor.try_collect().await?,
            // Collection does not exist yet
            Err(e) => {
                debug!(namespace = %self.namespace, error = %e, "No indexes listed");
                Vec::new()
            }
        };

        let stale = existing.iter().any(|index| {
            index.options.as_ref().is_some_and(|opts| {
                opts.name.as_deref() == Some(TTL_INDEX) && opts.expire_after != Some(ttl)
            })
        });

        if stale {
            warn!(
                namespace = %self.namespace,
                ttl_secs = ttl.as_secs(),
                "TTL changed, recreating cache TTL index"
            );
            self.inner.drop_index(TTL_INDEX).await?;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl CacheStore for MongoCache {
    async fn ensure_indexes(&self, ttl: Duration) -> Result<()> {
        self.drop_stale_ttl_index(ttl)
            .await
            .map_err(|e| EnrichError::IndexVerification(e.to_string()))?;

        self.inner
            .create_indexes(cache_indexes(ttl))
            .await
            .map_err(|e| EnrichError::IndexVerification(e.to_string()))?;

        info!(namespace = %self.namespace, ttl_secs = ttl.as_secs(), "Cache indexes verified");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<CachedValue>> {
        let found = self.inner.find_one(doc! { "id": key }).await?;
        Ok(found.map(|entry| CachedValue::from_stored(entry.data)))
    }

    async fn set(&self, key: &str, value: &CachedValue) -> Result<()> {
        let data = bson::to_bson(&value.to_stored())?;
        let update: Document = doc! {
            "$set": {
                "data": data,
                "createdAt": DateTime::now(),
            }
        };

        self.inner
            .update_one(doc! { "id": key }, update)
            .upsert(true)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Store round trips need a running MongoDB instance; index shapes do not.

    #[test]
    fn test_ttl_index_carries_lifetime() {
        let indexes = cache_indexes(Duration::from_secs(604800));
        let ttl = indexes
            .iter()
            .filter_map(|i| i.options.as_ref())
            .find(|o| o.name.as_deref() == Some(TTL_INDEX))
            .expect("ttl index");
        assert_eq!(ttl.expire_after, Some(Duration::from_secs(604800)));
    }

    #[test]
    fn test_id_index_is_unique() {
        let indexes = cache_indexes(Duration::from_secs(1));
        let id = indexes
            .iter()
            .find(|i| i.keys == doc! { "id": 1 })
            .and_then(|i| i.options.as_ref())
            .expect("id index");
        assert_eq!(id.unique, Some(true));
    }
}
