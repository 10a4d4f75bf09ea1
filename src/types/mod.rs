//! Shared types for the enrichment stages

pub mod error;

pub use error::{EnrichError, Result};
