//! thesesfr-enrich - theses.fr enrichment of access events
//!
//! Access events (ECs) produced by the theses.fr log parser carry an
//! identifier (NNT, subject number or PPN) and a resource kind. The stages
//! in this crate look those identifiers up against the theses.fr API and
//! write the metadata back into the events, caching every answer.
//!
//! ## Stages
//!
//! - **thesis**: defended theses and theses in preparation (`thesesfr`)
//! - **person**: person pages (`thesesfr-personne`)
//! - **organization**: organization pages (`thesesfr-organisme`)
//! - **biography**: legacy person names (`thesesfr-persons`)
//! - **idp**: identity provider to institution mapping
//!
//! The first four share one batching engine ([`pipeline::EnrichmentStage`])
//! parameterized by an [`strategy::EnrichmentStrategy`].

pub mod ack;
pub mod cache;
pub mod config;
pub mod fields;
pub mod idp;
pub mod mapping;
pub mod metrics;
pub mod pipeline;
pub mod query;
pub mod record;
pub mod retry;
pub mod strategy;
pub mod types;

pub use ack::{Ack, AckReceiver, Completed, Entry, Outcome};
pub use config::{Args, PipelineConfig};
pub use pipeline::{EnrichmentStage, RunSummary, StageRun};
pub use record::{Record, RecordKind};
pub use types::{EnrichError, Result};
