//! Batched enrichment pipeline
//!
//! - [`PacketBuffer`] - accumulate accepted records, drain into packets
//! - [`EnrichmentStage`] - filter, query, reconcile; one task per stage
//! - [`RunSummary`] - what a stage task did, returned when it ends
//! - [`StageRun`] - completed records of one run plus its summary

pub mod buffer;
pub mod stage;

pub use buffer::{Packet, PacketBuffer};
pub use stage::{EnrichmentStage, FilterDecision, StageHandle};

use chrono::{DateTime, Utc};

use crate::ack::Completed;
use serde::Serialize;
use uuid::Uuid;

/// Activity of one stage task
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub namespace: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Records submitted
    pub records: u64,
    /// Records that needed a remote lookup
    pub forwarded: u64,
    pub packets: u64,
    pub packets_failed: u64,
}

impl RunSummary {
    /// Wall time of the run, once finished
    pub fn duration_ms(&self) -> Option<i64> {
        self.finished_at
            .map(|end| (end - self.started_at).num_milliseconds())
    }
}

/// Result of [`EnrichmentStage::enrich_all`]
#[derive(Debug)]
pub struct StageRun {
    /// One entry per submitted record, in input order
    pub completed: Vec<Completed>,
    pub summary: RunSummary,
}
