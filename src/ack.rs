//! Completion tokens
//!
//! Every record handed to a stage travels with an [`Ack`]. Completing the
//! ack consumes it and hands the record back to the source together with
//! its [`Outcome`], so a record can only be completed once. If an ack is
//! dropped without being completed the source sees
//! [`EnrichError::Internal`] instead of waiting forever.

use serde::Serialize;
use tokio::sync::oneshot;
use tracing::error;

use crate::record::Record;
use crate::types::{EnrichError, Result};

/// How a record left a stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome", content = "reason")]
pub enum Outcome {
    /// Enriched from a fresh remote lookup
    Enriched,
    /// Remote lookup found nothing; empty marker cached
    NotFound,
    /// Enriched from the cache, no remote lookup
    CacheHit,
    /// Cache holds the empty marker, no remote lookup
    CacheNegative,
    /// Not handled by this stage (no identifier, other kind)
    Skipped,
    /// Packet failed terminally
    Failed(String),
}

impl Outcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failed(_))
    }
}

/// A record returned to its source
#[derive(Debug)]
pub struct Completed {
    pub record: Record,
    pub outcome: Outcome,
}

/// One-shot completion token bound to a single record
#[derive(Debug)]
pub struct Ack {
    tx: Option<oneshot::Sender<Completed>>,
    id: Option<String>,
}

/// Receiving side held by the record source
#[derive(Debug)]
pub struct AckReceiver {
    rx: oneshot::Receiver<Completed>,
}

impl Ack {
    /// Hand the record back to the source
    pub fn complete(mut self, record: Record, outcome: Outcome) {
        if let Some(tx) = self.tx.take() {
            // Receiver gone means the source stopped listening; nothing to do.
            let _ = tx.send(Completed { record, outcome });
        }
    }
}

impl Drop for Ack {
    fn drop(&mut self) {
        if self.tx.is_some() {
            error!(unitid = ?self.id, "Completion token dropped without being completed");
        }
    }
}

impl AckReceiver {
    /// Wait for the stage to complete the record
    pub async fn wait(self) -> Result<Completed> {
        self.rx
            .await
            .map_err(|_| EnrichError::Internal("completion token dropped".into()))
    }
}

/// A record paired with its completion token
#[derive(Debug)]
pub struct Entry {
    pub record: Record,
    pub ack: Ack,
}

impl Entry {
    /// Wrap a record, returning the entry and the source's receiver
    pub fn new(record: Record) -> (Self, AckReceiver) {
        let (tx, rx) = oneshot::channel();
        let ack = Ack {
            tx: Some(tx),
            id: record.unitid.clone(),
        };
        (Self { record, ack }, AckReceiver { rx })
    }

    /// Identifier of the wrapped record (empty when unusable)
    pub fn identifier(&self) -> &str {
        self.record.identifier().unwrap_or_default()
    }

    /// Complete the entry with the given outcome
    pub fn complete(self, outcome: Outcome) {
        self.ack.complete(self.record, outcome);
    }
}
