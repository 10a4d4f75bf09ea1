//! Batched enrichment stage
//!
//! One stage per entity kind, each running as a tokio task fed by a bounded
//! channel:
//!
//! ```text
//! submit ──► filter ──► PacketBuffer ──► MetadataQuery (+retry) ──► reconcile ──► Ack
//!              │
//!              └── skipped / cache hit / cache negative ──────────────────────────► Ack
//! ```
//!
//! Packets drained from the buffer are awaited before the task reads more
//! records, so at most one buffer is in flight per stage.

use chrono::Utc;
use futures_util::{stream, StreamExt};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::buffer::{Packet, PacketBuffer};
use super::{RunSummary, StageRun};
use crate::ack::{AckReceiver, Entry, Outcome};
use crate::cache::{CacheStore, CachedValue};
use crate::config::PipelineConfig;
use crate::metrics::{Counter, MetricsSink};
use crate::query::{HttpFetcher, MetadataQuery};
use crate::record::Record;
use crate::strategy::EnrichmentStrategy;
use crate::types::{EnrichError, Result};

/// What the filter decided for a record
#[derive(Debug, Clone, PartialEq)]
pub enum FilterDecision {
    /// Needs a remote lookup
    Forward,
    /// Finished without a remote lookup
    Done(Outcome),
}

pub struct EnrichmentStage {
    strategy: Arc<dyn EnrichmentStrategy>,
    config: PipelineConfig,
    cache: Arc<dyn CacheStore>,
    metrics: Arc<dyn MetricsSink>,
    query: MetadataQuery,
}

impl EnrichmentStage {
    pub fn new(
        strategy: Arc<dyn EnrichmentStrategy>,
        config: PipelineConfig,
        cache: Arc<dyn CacheStore>,
        metrics: Arc<dyn MetricsSink>,
        fetcher: Arc<dyn HttpFetcher>,
    ) -> Result<Self> {
        config.validate()?;
        let query = MetadataQuery::new(
            Arc::clone(&strategy),
            fetcher,
            Arc::clone(&metrics),
            config.retry_policy(),
        );

        Ok(Self {
            strategy,
            config,
            cache,
            metrics,
            query,
        })
    }

    pub fn namespace(&self) -> &'static str {
        self.strategy.namespace()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Reset counters and verify cache indexes; must succeed before records
    /// are submitted
    pub async fn init(&self) -> Result<()> {
        let namespace = self.namespace();
        for counter in Counter::ALL {
            self.metrics.reset(namespace, counter);
        }

        info!(
            namespace,
            cache = if self.config.cache_enabled { "enabled" } else { "disabled" },
            packet_size = self.config.packet_size,
            buffer_size = self.config.buffer_size,
            "Initializing enrichment stage"
        );

        if self.config.cache_enabled {
            self.cache.ensure_indexes(self.config.ttl).await.map_err(|e| {
                error!(namespace, error = %e, "Failed to verify cache indexes");
                match e {
                    EnrichError::IndexVerification(_) => e,
                    other => EnrichError::IndexVerification(other.to_string()),
                }
            })?;
        }
        Ok(())
    }

    /// Decide whether a record needs a remote lookup. Cache hits are
    /// applied here.
    pub async fn filter(&self, record: &mut Record) -> FilterDecision {
        let namespace = self.namespace();

        if !self.strategy.accepts(record) {
            return FilterDecision::Done(Outcome::Skipped);
        }
        let Some(id) = record.identifier().map(str::to_string) else {
            return FilterDecision::Done(Outcome::Skipped);
        };
        if !self.config.cache_enabled {
            return FilterDecision::Forward;
        }

        match self.cache.get(&id).await {
            Ok(None) => FilterDecision::Forward,
            Ok(Some(CachedValue::Empty)) => {
                warn!(namespace, unitid = %id, rtype = ?record.kind(), "Cached empty document");
                self.metrics.increment(namespace, Counter::CacheNegatives);
                FilterDecision::Done(Outcome::CacheNegative)
            }
            Ok(Some(CachedValue::Document(doc))) => {
                debug!(namespace, unitid = %id, "Enriching from cache");
                self.strategy.apply(record, &doc);
                self.metrics.increment(namespace, Counter::CacheHits);
                FilterDecision::Done(Outcome::CacheHit)
            }
            Err(e) => {
                warn!(namespace, unitid = %id, error = %e, "Cache read failed, querying instead");
                self.metrics.increment(namespace, Counter::CacheReadFails);
                FilterDecision::Forward
            }
        }
    }

    /// Query a packet and complete every entry exactly once. On retry
    /// exhaustion every entry is completed as failed and the error returned.
    pub async fn process_packet(&self, packet: Packet) -> Result<()> {
        if packet.is_empty() {
            return Ok(());
        }
        let namespace = self.namespace();

        let identifiers: Vec<String> = packet
            .iter()
            .map(|entry| entry.identifier().to_string())
            .collect();

        let documents = match self.query.query(&identifiers).await {
            Ok(documents) => documents,
            Err(e) => {
                error!(namespace, size = packet.len(), error = %e, "Packet failed");
                self.metrics.increment(namespace, Counter::PacketsFailed);
                let reason = e.to_string();
                for entry in packet {
                    entry.complete(Outcome::Failed(reason.clone()));
                }
                return Err(e);
            }
        };

        self.reconcile(packet, &documents).await;
        Ok(())
    }

    async fn reconcile(&self, packet: Packet, documents: &HashMap<String, Value>) {
        let namespace = self.namespace();

        for mut entry in packet {
            let id = entry.identifier().to_string();
            let document = documents.get(&id);

            if self.config.cache_enabled {
                let value = CachedValue::from(document.cloned());
                if let Err(e) = self.cache.set(&id, &value).await {
                    warn!(namespace, unitid = %id, error = %e, "Cache write failed");
                    self.metrics.increment(namespace, Counter::CacheFails);
                }
            }

            let outcome = match document {
                Some(doc) => {
                    self.strategy.apply(&mut entry.record, doc);
                    self.metrics.increment(namespace, Counter::Enriched);
                    Outcome::Enriched
                }
                None => {
                    self.metrics.increment(namespace, Counter::NotFound);
                    Outcome::NotFound
                }
            };
            entry.complete(outcome);
        }
    }

    /// Run the stage as a task. Dropping every [`StageHandle`] flushes the
    /// buffer and ends the task.
    pub fn spawn(self: Arc<Self>) -> (StageHandle, JoinHandle<RunSummary>) {
        let (tx, rx) = mpsc::channel(self.config.buffer_size);
        let span = info_span!("stage", namespace = self.namespace());
        let task = tokio::spawn(self.run(rx).instrument(span));
        (StageHandle { tx }, task)
    }

    async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<Entry>) -> RunSummary {
        let mut summary = RunSummary {
            run_id: Uuid::new_v4(),
            namespace: self.namespace().to_string(),
            started_at: Utc::now(),
            finished_at: None,
            records: 0,
            forwarded: 0,
            packets: 0,
            packets_failed: 0,
        };
        let mut buffer = PacketBuffer::new(self.config.buffer_size, self.config.packet_size);

        while let Some(mut entry) = rx.recv().await {
            summary.records += 1;
            match self.filter(&mut entry.record).await {
                FilterDecision::Done(outcome) => entry.complete(outcome),
                FilterDecision::Forward => {
                    summary.forwarded += 1;
                    if let Some(packets) = buffer.push(entry) {
                        self.process_packets(packets, &mut summary).await;
                    }
                }
            }
        }

        let remaining = buffer.flush();
        self.process_packets(remaining, &mut summary).await;

        summary.finished_at = Some(Utc::now());
        info!(
            records = summary.records,
            forwarded = summary.forwarded,
            packets = summary.packets,
            packets_failed = summary.packets_failed,
            "Stage finished"
        );
        summary
    }

    async fn process_packets(&self, packets: Vec<Packet>, summary: &mut RunSummary) {
        let mut results = stream::iter(packets.into_iter().map(|p| self.process_packet(p)))
            .buffered(self.config.max_in_flight_packets);

        while let Some(result) = results.next().await {
            summary.packets += 1;
            if result.is_err() {
                summary.packets_failed += 1;
            }
        }
    }

    /// Run every record through the stage, returning them in input order
    /// along with the task's summary
    pub async fn enrich_all(self: &Arc<Self>, records: Vec<Record>) -> Result<StageRun> {
        let (handle, task) = Arc::clone(self).spawn();

        let mut receivers = Vec::with_capacity(records.len());
        for record in records {
            receivers.push(handle.submit(record).await?);
        }
        drop(handle);

        let mut completed = Vec::with_capacity(receivers.len());
        for rx in receivers {
            completed.push(rx.wait().await?);
        }

        let summary = task
            .await
            .map_err(|e| EnrichError::Internal(format!("stage task failed: {}", e)))?;
        Ok(StageRun { completed, summary })
    }
}

/// Sending side of a running stage
#[derive(Debug, Clone)]
pub struct StageHandle {
    tx: mpsc::Sender<Entry>,
}

impl StageHandle {
    /// Submit a record; the receiver resolves once the stage completes it
    pub async fn submit(&self, record: Record) -> Result<AckReceiver> {
        let (entry, rx) = Entry::new(record);
        self.tx
            .send(entry)
            .await
            .map_err(|_| EnrichError::Internal("stage closed".into()))?;
        Ok(rx)
    }
}
