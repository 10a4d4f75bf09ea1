//! Configuration for the enrichment stages
//!
//! CLI arguments and environment variable handling using clap. Every flag
//! has a `THESESFR_*` environment fallback; `.env` files are loaded by the
//! binary through dotenvy before parsing.

use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

use crate::cache::DEFAULT_TTL;
use crate::retry::RetryPolicy;
use crate::strategy::SEARCH_PAGE_SIZE;
use crate::types::{EnrichError, Result};

/// theses.fr public API
pub const DEFAULT_API_URL: &str = "https://theses.fr/api/v1";

/// Institution short-code table (SPARQL JSON results)
pub const DEFAULT_SHORT_CODE_URL: &str =
    "https://movies.abes.fr/api-git/abes-esr/movies-api/subdir/v1/TH_liste_etabs_code_court.json";

/// Identity provider to institution table (SPARQL JSON results)
pub const DEFAULT_IDP_URL: &str =
    "https://movies.abes.fr/api-git/abes-esr/movies-api/subdir/v1/TH_liste_etabs_idp.json";

/// Longest accepted cache lifetime (ten years)
pub const MAX_TTL: Duration = Duration::from_secs(10 * 365 * 24 * 3600);

pub const DEFAULT_USER_AGENT: &str = "ezPAARSE (https://readmetrics.org; mailto:ezteam@couperin.org)";

/// Tuning shared by every batched enrichment stage
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Consult and populate the cache
    pub cache_enabled: bool,
    /// Lifetime of cached documents
    pub ttl: Duration,
    /// Minimum wait before each request
    pub throttle: Duration,
    /// Attempts per request before giving up
    pub max_tries: u32,
    /// Base of the exponential backoff after a failure
    pub base_wait_time: Duration,
    /// Maximum identifiers per packet
    pub packet_size: usize,
    /// Accepted records kept before packets are emitted
    pub buffer_size: usize,
    /// Packets queried concurrently
    pub max_in_flight_packets: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            ttl: DEFAULT_TTL,
            throttle: Duration::from_millis(10),
            max_tries: 5,
            base_wait_time: Duration::from_millis(10),
            packet_size: 100,
            buffer_size: 1000,
            max_in_flight_packets: 1,
        }
    }
}

impl PipelineConfig {
    /// Reject values the batching engine cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.packet_size == 0 {
            return Err(EnrichError::Config("packet_size must be at least 1".into()));
        }
        if self.packet_size > SEARCH_PAGE_SIZE {
            return Err(EnrichError::Config(format!(
                "packet_size must not exceed {} (results per search page)",
                SEARCH_PAGE_SIZE
            )));
        }
        if self.ttl.is_zero() || self.ttl > MAX_TTL {
            return Err(EnrichError::Config(format!(
                "ttl must be between 1 and {} seconds",
                MAX_TTL.as_secs()
            )));
        }
        if self.buffer_size == 0 {
            return Err(EnrichError::Config("buffer_size must be at least 1".into()));
        }
        if self.max_tries == 0 {
            return Err(EnrichError::Config("max_tries must be at least 1".into()));
        }
        if self.max_in_flight_packets == 0 {
            return Err(EnrichError::Config(
                "max_in_flight_packets must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Retry policy wrapped around each remote request
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.throttle, self.base_wait_time, self.max_tries)
    }

    pub fn with_cache_enabled(mut self, enabled: bool) -> Self {
        self.cache_enabled = enabled;
        self
    }

    pub fn with_batching(mut self, packet_size: usize, buffer_size: usize) -> Self {
        self.packet_size = packet_size;
        self.buffer_size = buffer_size;
        self
    }
}

/// Cache backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CacheBackend {
    /// Process-local cache, lost on exit
    Memory,
    /// MongoDB collections with TTL indexes
    Mongo,
}

/// Stages that can be chained by the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StageKind {
    /// Theses and thesis notices (PHD_THESIS, ABS)
    Thesis,
    /// Person pages (RECORD)
    Person,
    /// Organization pages (RECORD left after the person stage)
    Organization,
    /// Legacy biography enrichment (BIO)
    Biography,
    /// Identity provider mapping
    Idp,
}

/// thesesfr-enrich - batched theses.fr enrichment of access events
#[derive(Parser, Debug, Clone)]
#[command(name = "thesesfr-enrich")]
#[command(about = "Enrich access-event records with theses.fr metadata")]
pub struct Args {
    /// Input file of JSON lines (stdin when omitted)
    #[arg(long, short = 'i', env = "THESESFR_INPUT")]
    pub input: Option<PathBuf>,

    /// Output file of JSON lines (stdout when omitted)
    #[arg(long, short = 'o', env = "THESESFR_OUTPUT")]
    pub output: Option<PathBuf>,

    /// Stages to run, in order
    #[arg(
        long,
        env = "THESESFR_STAGES",
        value_enum,
        value_delimiter = ',',
        default_value = "thesis,person,organization,idp"
    )]
    pub stages: Vec<StageKind>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON
    #[arg(long, env = "THESESFR_LOG_JSON", default_value = "false")]
    pub log_json: bool,

    /// Cache backend
    #[arg(long, env = "THESESFR_CACHE_BACKEND", value_enum, default_value = "mongo")]
    pub cache_backend: CacheBackend,

    /// Consult and populate the cache
    #[arg(long, env = "THESESFR_CACHE", default_value = "true", action = clap::ArgAction::Set)]
    pub cache: bool,

    /// MongoDB connection URI
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
    pub mongodb_uri: String,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "ezpaarse")]
    pub mongodb_db: String,

    /// Time-to-live of cached documents in seconds
    #[arg(long, env = "THESESFR_TTL", default_value = "604800")]
    pub ttl_secs: u64,

    /// Minimum wait before each request in milliseconds
    #[arg(long, env = "THESESFR_THROTTLE", default_value = "10")]
    pub throttle_ms: u64,

    /// Attempts per request
    #[arg(long, env = "THESESFR_MAX_TRIES", default_value = "5")]
    pub max_tries: u32,

    /// Base backoff after a failed request in milliseconds
    #[arg(long, env = "THESESFR_BASE_WAIT_TIME", default_value = "10")]
    pub base_wait_time_ms: u64,

    /// Maximum identifiers per request
    #[arg(long, env = "THESESFR_PACKET_SIZE", default_value = "100")]
    pub packet_size: usize,

    /// Records buffered before querying
    #[arg(long, env = "THESESFR_BUFFER_SIZE", default_value = "1000")]
    pub buffer_size: usize,

    /// Packets queried concurrently
    #[arg(long, env = "THESESFR_MAX_IN_FLIGHT", default_value = "1")]
    pub max_in_flight_packets: usize,

    /// theses.fr API base URL
    #[arg(long, env = "THESESFR_API_URL", default_value = DEFAULT_API_URL)]
    pub api_url: String,

    /// Institution short-code table URL
    #[arg(long, env = "THESESFR_SHORT_CODE_URL", default_value = DEFAULT_SHORT_CODE_URL)]
    pub short_code_url: String,

    /// Local copy of the short-code table
    #[arg(
        long,
        env = "THESESFR_SHORT_CODE_FILE",
        default_value = "data/list_code_court.json"
    )]
    pub short_code_file: PathBuf,

    /// Identity provider table URL
    #[arg(long, env = "THESESFR_IDP_URL", default_value = DEFAULT_IDP_URL)]
    pub idp_url: String,

    /// Local copy of the identity provider table
    #[arg(long, env = "THESESFR_IDP_FILE", default_value = "data/list_idp.json")]
    pub idp_file: PathBuf,

    /// User-Agent sent to remote services
    #[arg(long, env = "THESESFR_USER_AGENT", default_value = DEFAULT_USER_AGENT)]
    pub user_agent: String,

    /// Request timeout in milliseconds
    #[arg(long, env = "REQUEST_TIMEOUT_MS", default_value = "30000")]
    pub request_timeout_ms: u64,
}

impl Args {
    /// Stage tuning from the command line
    pub fn pipeline_config(&self) -> Result<PipelineConfig> {
        let config = PipelineConfig {
            cache_enabled: self.cache,
            ttl: Duration::from_secs(self.ttl_secs),
            throttle: Duration::from_millis(self.throttle_ms),
            max_tries: self.max_tries,
            base_wait_time: Duration::from_millis(self.base_wait_time_ms),
            packet_size: self.packet_size,
            buffer_size: self.buffer_size,
            max_in_flight_packets: self.max_in_flight_packets,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Whether any stage needs the mapping tables
    pub fn needs_mappings(&self) -> bool {
        self.stages
            .iter()
            .any(|s| matches!(s, StageKind::Thesis | StageKind::Idp))
    }
}
