//! thesesfr-enrich - enrich JSON-lines access events with theses.fr metadata

use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use thesesfr_enrich::{
    cache::{CacheStore, MemoryCache, MongoCacheClient},
    config::{Args, CacheBackend, StageKind},
    idp::IdentityProviderStage,
    mapping::{MappingSources, MappingTables},
    metrics::RunReport,
    query::{HttpFetcher, ReqwestFetcher},
    strategy::{
        BiographyStrategy, EnrichmentStrategy, OrganizationStrategy, PersonStrategy,
        ThesisStrategy,
    },
    EnrichmentStage, Record,
};

/// Hands out one cache namespace per stage
enum CacheFactory {
    Memory,
    Mongo(MongoCacheClient),
}

impl CacheFactory {
    fn namespace(&self, name: &str) -> Arc<dyn CacheStore> {
        match self {
            CacheFactory::Memory => Arc::new(MemoryCache::new(name)),
            CacheFactory::Mongo(client) => Arc::new(client.namespace(name)),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    // Records go to stdout, logs to stderr
    let log_level = args.log_level.clone();
    let json_logs = args.log_json;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("thesesfr_enrich={},warn", log_level).into()),
        )
        .with(json_logs.then(|| tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr)))
        .with((!json_logs).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr)))
        .init();

    let config = match args.pipeline_config() {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    info!("======================================");
    info!("  thesesfr-enrich");
    info!("======================================");
    info!("Stages: {:?}", args.stages);
    info!("API: {}", args.api_url);
    info!(
        "Cache: {} ({:?}, ttl {}s)",
        if config.cache_enabled { "enabled" } else { "disabled" },
        args.cache_backend,
        config.ttl.as_secs()
    );
    info!("Packets: {} per request, buffer {}", config.packet_size, config.buffer_size);
    info!("======================================");

    let fetcher: Arc<dyn HttpFetcher> =
        Arc::new(ReqwestFetcher::new(args.request_timeout(), &args.user_agent)?);
    let report = Arc::new(RunReport::new());

    let caches = match (config.cache_enabled, args.cache_backend) {
        (true, CacheBackend::Mongo) => {
            let client = MongoCacheClient::connect(&args.mongodb_uri, &args.mongodb_db)
                .await
                .context("failed to connect to mongodb, cache not available")?;
            CacheFactory::Mongo(client)
        }
        _ => CacheFactory::Memory,
    };

    let mappings = if args.needs_mappings() {
        let sources = MappingSources {
            short_code_url: args.short_code_url.clone(),
            short_code_file: args.short_code_file.clone(),
            idp_url: args.idp_url.clone(),
            idp_file: args.idp_file.clone(),
        };
        Arc::new(MappingTables::load(fetcher.as_ref(), &sources).await?)
    } else {
        Arc::new(MappingTables::default())
    };

    let (mut records, layout) = read_records(&args).await?;
    info!(
        "Read {} records ({} lines passed through)",
        records.len(),
        layout.len() - records.len()
    );

    let mut summaries = Vec::with_capacity(args.stages.len());
    for kind in &args.stages {
        let strategy: Arc<dyn EnrichmentStrategy> = match kind {
            StageKind::Thesis => Arc::new(ThesisStrategy::new(&args.api_url, Arc::clone(&mappings))),
            StageKind::Person => Arc::new(PersonStrategy::new(&args.api_url)),
            StageKind::Organization => Arc::new(OrganizationStrategy::new(&args.api_url)),
            StageKind::Biography => Arc::new(BiographyStrategy::new(&args.api_url)),
            StageKind::Idp => {
                let stage = IdentityProviderStage::new(Arc::clone(&mappings));
                let mapped = records
                    .iter_mut()
                    .map(|record| stage.apply(record))
                    .filter(|mapped| *mapped)
                    .count();
                info!("Identity provider stage mapped {} records", mapped);
                continue;
            }
        };

        let namespace = strategy.namespace();
        let stage = Arc::new(EnrichmentStage::new(
            strategy,
            config.clone(),
            caches.namespace(namespace),
            report.clone(),
            Arc::clone(&fetcher),
        )?);
        stage
            .init()
            .await
            .with_context(|| format!("failed to initialize stage {}", namespace))?;

        let run = stage.enrich_all(records).await?;
        let failed = run.completed.iter().filter(|c| c.outcome.is_failure()).count();
        if failed > 0 {
            warn!("{}: {} records could not be enriched", namespace, failed);
        }
        info!(
            run_id = %run.summary.run_id,
            namespace,
            records = run.summary.records,
            forwarded = run.summary.forwarded,
            packets = run.summary.packets,
            packets_failed = run.summary.packets_failed,
            duration_ms = run.summary.duration_ms().unwrap_or_default(),
            "Stage complete"
        );
        summaries.push(run.summary);
        records = run.completed.into_iter().map(|c| c.record).collect();
    }

    write_records(&args, records, layout).await?;

    let summary = serde_json::json!({
        "stages": summaries,
        "counters": report.snapshot(),
    });
    info!("Run complete");
    eprintln!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

/// One input line: a record handed to the stages, or a line that is not a
/// record and is written back out as read
enum InputLine {
    Record,
    Raw(String),
}

/// Records from the input, plus the layout needed to write every line back
async fn read_records(args: &Args) -> anyhow::Result<(Vec<Record>, Vec<InputLine>)> {
    let reader: Box<dyn AsyncBufRead + Unpin + Send> = match &args.input {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("failed to open {}", path.display()))?;
            Box::new(BufReader::new(file))
        }
        None => Box::new(BufReader::new(tokio::io::stdin())),
    };
    let mut lines = reader.lines();

    let mut records = Vec::new();
    let mut layout = Vec::new();
    let mut line_number = 0usize;
    while let Some(line) = lines.next_line().await? {
        line_number += 1;
        if line.trim().is_empty() {
            continue;
        }
        match Record::from_json_line(&line) {
            Ok(record) => {
                records.push(record);
                layout.push(InputLine::Record);
            }
            Err(e) => {
                warn!(line = line_number, error = %e, "Passing through invalid record");
                layout.push(InputLine::Raw(line));
            }
        }
    }
    Ok((records, layout))
}

async fn write_records(
    args: &Args,
    records: Vec<Record>,
    layout: Vec<InputLine>,
) -> anyhow::Result<()> {
    let mut out: Box<dyn AsyncWrite + Unpin + Send> = match &args.output {
        Some(path) => Box::new(
            tokio::fs::File::create(path)
                .await
                .with_context(|| format!("failed to create {}", path.display()))?,
        ),
        None => Box::new(tokio::io::stdout()),
    };

    let mut records = records.into_iter();
    for slot in layout {
        let mut line = match slot {
            InputLine::Record => match records.next() {
                Some(record) => serde_json::to_vec(&record)?,
                None => anyhow::bail!("stages returned fewer records than were read"),
            },
            InputLine::Raw(raw) => raw.into_bytes(),
        };
        line.push(b'\n');
        out.write_all(&line).await?;
    }
    out.flush().await?;
    Ok(())
}
