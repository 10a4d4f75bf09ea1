//! Batched enrichment stage integration tests
//!
//! Drives whole stages through `enrich_all` with scripted HTTP answers and
//! the in-memory cache:
//! - packet / buffer partitioning and reconciliation
//! - retry exhaustion and packet failure
//! - cache-aside behavior (hits, empty markers, disabled cache, failures)

use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

use thesesfr_enrich::cache::{CacheStore, CachedValue, MemoryCache};
use thesesfr_enrich::fields::Field;
use thesesfr_enrich::mapping::MappingTables;
use thesesfr_enrich::metrics::{Counter, MetricsSink, RunReport};
use thesesfr_enrich::query::{HttpFetcher, HttpResponse};
use thesesfr_enrich::strategy::{
    EnrichmentStrategy, OrganizationStrategy, PersonStrategy, ThesisStrategy,
};
use thesesfr_enrich::{
    Completed, EnrichError, EnrichmentStage, Outcome, PipelineConfig, Record, RecordKind, Result,
};

// =============================================================================
// Test doubles
// =============================================================================

type Handler = Box<dyn Fn(&str) -> Result<HttpResponse> + Send + Sync>;

/// Answers with a closure and remembers every URL and call time
struct ScriptedFetcher {
    handler: Handler,
    calls: Mutex<Vec<(String, Instant)>>,
}

impl ScriptedFetcher {
    fn new(handler: impl Fn(&str) -> Result<HttpResponse> + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Every search answered with the same documents under `key`
    fn documents(key: &'static str, docs: Value) -> Arc<Self> {
        Self::new(move |_| Ok(HttpResponse::json(&json!({ key: docs.clone() }))))
    }

    fn urls(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|(u, _)| u.clone()).collect()
    }

    fn call_times(&self) -> Vec<Instant> {
        self.calls.lock().unwrap().iter().map(|(_, t)| *t).collect()
    }
}

#[async_trait::async_trait]
impl HttpFetcher for ScriptedFetcher {
    async fn get(&self, url: &str) -> Result<HttpResponse> {
        self.calls
            .lock()
            .unwrap()
            .push((url.to_string(), Instant::now()));
        (self.handler)(url)
    }
}

/// Cache whose reads and writes can be made to fail
struct FlakyCache {
    inner: Arc<MemoryCache>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    fail_indexes: AtomicBool,
}

#[async_trait::async_trait]
impl CacheStore for FlakyCache {
    async fn ensure_indexes(&self, ttl: Duration) -> Result<()> {
        if self.fail_indexes.load(Ordering::SeqCst) {
            return Err(EnrichError::Cache("not primary".into()));
        }
        self.inner.ensure_indexes(ttl).await
    }

    async fn get(&self, key: &str) -> Result<Option<CachedValue>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(EnrichError::Cache("connection reset".into()));
        }
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &CachedValue) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(EnrichError::Cache("connection reset".into()));
        }
        self.inner.set(key, value).await
    }
}

impl FlakyCache {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Arc::new(MemoryCache::new("flaky")),
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            fail_indexes: AtomicBool::new(false),
        })
    }
}

// =============================================================================
// Helpers
// =============================================================================

const API: &str = "http://theses.test/api/v1";

fn config(packet_size: usize, buffer_size: usize) -> PipelineConfig {
    PipelineConfig::default().with_batching(packet_size, buffer_size)
}

async fn stage(
    strategy: Arc<dyn EnrichmentStrategy>,
    config: PipelineConfig,
    cache: Arc<dyn CacheStore>,
    metrics: Arc<RunReport>,
    fetcher: Arc<ScriptedFetcher>,
) -> Arc<EnrichmentStage> {
    let stage = EnrichmentStage::new(strategy, config, cache, metrics, fetcher).unwrap();
    stage.init().await.unwrap();
    Arc::new(stage)
}

fn persons(ids: &[&str]) -> Vec<Record> {
    ids.iter().map(|id| Record::new(*id, RecordKind::Record)).collect()
}

fn outcomes(done: &[Completed]) -> Vec<Outcome> {
    done.iter().map(|c| c.outcome.clone()).collect()
}

fn curie() -> Value {
    json!([{"id": "A", "nom": "Curie", "prenom": "Marie"}])
}

fn defended_thesis() -> Value {
    json!([{
        "id": "2020EMAC0007",
        "nnt": "2020EMAC0007",
        "status": "soutenue",
        "etabSoutenanceN": "IMT Mines Albi",
        "etabSoutenancePpn": "027361802",
        "dateSoutenance": "23/10/2020",
        "auteurs": [{"nom": "Martin", "prenom": "Claire"}],
        "directeurs": [{"nom": "Durand", "prenom": "Paul", "ppn": "987654321"}],
        "president": {"nom": "Leroy", "prenom": "Marc", "ppn": "1"}
    }])
}

fn thesis_strategy() -> Arc<dyn EnrichmentStrategy> {
    let tables = MappingTables::default().with_short_code("027361802", "EMAC");
    Arc::new(ThesisStrategy::new(API, Arc::new(tables)))
}

// =============================================================================
// Batching and reconciliation
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_packet_of_two_with_one_match() {
    let cache = Arc::new(MemoryCache::new("thesesfr-personne"));
    let fetcher = ScriptedFetcher::documents("personnes", curie());
    let report = Arc::new(RunReport::new());
    let stage = stage(
        Arc::new(PersonStrategy::new(API)),
        config(2, 2),
        cache.clone(),
        report.clone(),
        fetcher.clone(),
    )
    .await;

    let done = stage.enrich_all(persons(&["A", "B"])).await.unwrap().completed;

    assert_eq!(outcomes(&done), vec![Outcome::Enriched, Outcome::NotFound]);
    assert_eq!(done[0].record.get(Field::PersonneN), Some("Curie Marie"));
    assert_eq!(done[1].record.get(Field::PersonneN), None);

    assert!(matches!(cache.peek("A"), Some(CachedValue::Document(_))));
    assert_eq!(cache.peek("B"), Some(CachedValue::Empty));

    let urls = fetcher.urls();
    assert_eq!(urls.len(), 1);
    assert!(urls[0].ends_with("q=A%20OR%20B"));
    assert_eq!(report.get("thesesfr-personne", Counter::Queries), 1);
    assert_eq!(report.get("thesesfr-personne", Counter::Enriched), 1);
    assert_eq!(report.get("thesesfr-personne", Counter::NotFound), 1);
}

#[tokio::test(start_paused = true)]
async fn test_buffer_splits_into_bounded_packets() {
    let fetcher = ScriptedFetcher::documents("personnes", json!([]));
    let stage = stage(
        Arc::new(PersonStrategy::new(API)),
        config(2, 5),
        Arc::new(MemoryCache::new("thesesfr-personne")),
        Arc::new(RunReport::new()),
        fetcher.clone(),
    )
    .await;

    let ids = ["a", "b", "c", "d", "e", "f", "g"];
    let done = stage.enrich_all(persons(&ids)).await.unwrap().completed;

    // Every record completed once, in input order
    let returned: Vec<_> = done.iter().map(|c| c.record.identifier().unwrap()).collect();
    assert_eq!(returned, ids);

    // Full buffer of 5 -> 2 + 2 + 1, final flush of 2 -> 2
    let urls = fetcher.urls();
    assert_eq!(urls.len(), 4);
    assert!(urls[0].ends_with("q=a%20OR%20b"));
    assert!(urls[2].ends_with("q=e"));
    assert!(urls[3].ends_with("q=f%20OR%20g"));
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_identifiers_are_not_deduplicated() {
    let fetcher = ScriptedFetcher::documents("personnes", curie());
    let stage = stage(
        Arc::new(PersonStrategy::new(API)),
        config(10, 10),
        Arc::new(MemoryCache::new("thesesfr-personne")),
        Arc::new(RunReport::new()),
        fetcher.clone(),
    )
    .await;

    let done = stage.enrich_all(persons(&["A", "A"])).await.unwrap().completed;

    assert_eq!(outcomes(&done), vec![Outcome::Enriched, Outcome::Enriched]);
    assert!(fetcher.urls()[0].ends_with("q=A%20OR%20A"));
}

/// Answers every search with all persons after a per-packet delay, and
/// tracks how many requests overlap
struct SlowFetcher {
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    calls: AtomicUsize,
}

#[async_trait::async_trait]
impl HttpFetcher for SlowFetcher {
    async fn get(&self, url: &str) -> Result<HttpResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        // The first packet answers last
        let delay = if url.ends_with("q=a%20OR%20b") { 500 } else { 50 };
        tokio::time::sleep(Duration::from_millis(delay)).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        let docs: Vec<Value> = ["a", "b", "c", "d", "e", "f"]
            .iter()
            .map(|id| json!({"id": id, "nom": "Nom", "prenom": id}))
            .collect();
        Ok(HttpResponse::json(&json!({ "personnes": docs })))
    }
}

#[tokio::test(start_paused = true)]
async fn test_packets_in_flight_complete_in_order() {
    let fetcher = Arc::new(SlowFetcher {
        in_flight: AtomicUsize::new(0),
        max_in_flight: AtomicUsize::new(0),
        calls: AtomicUsize::new(0),
    });
    let report = Arc::new(RunReport::new());
    let config = PipelineConfig {
        max_in_flight_packets: 2,
        ..config(2, 6)
    };
    let stage = EnrichmentStage::new(
        Arc::new(PersonStrategy::new(API)),
        config,
        Arc::new(MemoryCache::new("thesesfr-personne")),
        report.clone(),
        fetcher.clone(),
    )
    .unwrap();
    stage.init().await.unwrap();
    let stage = Arc::new(stage);

    let ids = ["a", "b", "c", "d", "e", "f"];
    let run = stage.enrich_all(persons(&ids)).await.unwrap();

    let returned: Vec<_> = run
        .completed
        .iter()
        .map(|c| c.record.identifier().unwrap())
        .collect();
    assert_eq!(returned, ids);
    assert!(run.completed.iter().all(|c| c.outcome == Outcome::Enriched));
    assert_eq!(run.completed[5].record.get(Field::PersonneN), Some("Nom f"));

    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 3);
    assert_eq!(fetcher.max_in_flight.load(Ordering::SeqCst), 2);

    assert_eq!(run.summary.records, 6);
    assert_eq!(run.summary.forwarded, 6);
    assert_eq!(run.summary.packets, 3);
    assert_eq!(run.summary.packets_failed, 0);
    assert_eq!(report.get("thesesfr-personne", Counter::Enriched), 6);
}

// =============================================================================
// Retry and failure
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_five_failures_fail_packet_after_exactly_five_attempts() {
    let cache = Arc::new(MemoryCache::new("thesesfr-personne"));
    let fetcher = ScriptedFetcher::new(|_| {
        Ok(HttpResponse::new(503, "").with_reason("Service Unavailable"))
    });
    let report = Arc::new(RunReport::new());
    let stage = stage(
        Arc::new(PersonStrategy::new(API)),
        config(2, 2),
        cache.clone(),
        report.clone(),
        fetcher.clone(),
    )
    .await;

    let start = Instant::now();
    let done = stage.enrich_all(persons(&["A", "B"])).await.unwrap().completed;

    assert_eq!(done.len(), 2);
    for completed in &done {
        match &completed.outcome {
            Outcome::Failed(reason) => assert!(reason.contains("5 times")),
            other => panic!("expected failure, got {:?}", other),
        }
    }

    let times = fetcher.call_times();
    assert_eq!(times.len(), 5);
    // First attempt waits exactly the throttle, retry n at least base * 2^n
    assert_eq!(times[0] - start, Duration::from_millis(10));
    for (n, pair) in times.windows(2).enumerate() {
        let min = Duration::from_millis(10) * 2u32.pow(n as u32 + 1);
        assert!(pair[1] - pair[0] >= min);
    }

    assert_eq!(report.get("thesesfr-personne", Counter::Queries), 5);
    assert_eq!(report.get("thesesfr-personne", Counter::QueryFails), 5);
    assert_eq!(report.get("thesesfr-personne", Counter::PacketsFailed), 1);
    assert_eq!(cache.writes(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_failed_packet_does_not_stop_later_packets() {
    let fetcher = ScriptedFetcher::new(|url| {
        if url.ends_with("q=X") {
            Err(EnrichError::Transport("connection refused".into()))
        } else {
            Ok(HttpResponse::json(&json!({"personnes": curie()})))
        }
    });
    let stage = stage(
        Arc::new(PersonStrategy::new(API)),
        config(1, 1),
        Arc::new(MemoryCache::new("thesesfr-personne")),
        Arc::new(RunReport::new()),
        fetcher.clone(),
    )
    .await;

    let run = stage.enrich_all(persons(&["X", "A"])).await.unwrap();
    let done = run.completed;

    assert!(done[0].outcome.is_failure());
    assert_eq!(done[1].outcome, Outcome::Enriched);
    assert_eq!(fetcher.urls().len(), 6);

    assert_eq!(run.summary.records, 2);
    assert_eq!(run.summary.packets, 2);
    assert_eq!(run.summary.packets_failed, 1);
    assert!(run.summary.finished_at.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_recovers_after_transient_failure() {
    let attempts = Arc::new(Mutex::new(0u32));
    let counter = attempts.clone();
    let fetcher = ScriptedFetcher::new(move |_| {
        let mut n = counter.lock().unwrap();
        *n += 1;
        if *n < 3 {
            Ok(HttpResponse::json(&json!({"unexpected": true})))
        } else {
            Ok(HttpResponse::json(&json!({"personnes": curie()})))
        }
    });
    let report = Arc::new(RunReport::new());
    let stage = stage(
        Arc::new(PersonStrategy::new(API)),
        config(2, 2),
        Arc::new(MemoryCache::new("thesesfr-personne")),
        report.clone(),
        fetcher,
    )
    .await;

    let done = stage.enrich_all(persons(&["A"])).await.unwrap().completed;

    assert_eq!(done[0].outcome, Outcome::Enriched);
    assert_eq!(report.get("thesesfr-personne", Counter::Queries), 3);
    assert_eq!(report.get("thesesfr-personne", Counter::QueryFails), 2);
}

#[tokio::test(start_paused = true)]
async fn test_not_found_status_is_empty_result() {
    let cache = Arc::new(MemoryCache::new("thesesfr-personne"));
    let fetcher = ScriptedFetcher::new(|_| Ok(HttpResponse::new(404, "")));
    let report = Arc::new(RunReport::new());
    let stage = stage(
        Arc::new(PersonStrategy::new(API)),
        config(2, 2),
        cache.clone(),
        report.clone(),
        fetcher,
    )
    .await;

    let done = stage.enrich_all(persons(&["A"])).await.unwrap().completed;

    assert_eq!(done[0].outcome, Outcome::NotFound);
    assert_eq!(cache.peek("A"), Some(CachedValue::Empty));
    assert_eq!(report.get("thesesfr-personne", Counter::QueryFails), 0);
}

// =============================================================================
// Cache-aside
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_records_without_identifier_never_reach_cache_or_remote() {
    let cache = Arc::new(MemoryCache::new("thesesfr-personne"));
    let fetcher = ScriptedFetcher::documents("personnes", curie());
    let stage = stage(
        Arc::new(PersonStrategy::new(API)),
        config(2, 2),
        cache.clone(),
        Arc::new(RunReport::new()),
        fetcher.clone(),
    )
    .await;

    let mut blank = Record::new("", RecordKind::Record);
    blank.unitid = None;
    let other_kind = Record::new("A", RecordKind::PhdThesis);

    let done = stage.enrich_all(vec![blank, other_kind]).await.unwrap().completed;

    assert_eq!(outcomes(&done), vec![Outcome::Skipped, Outcome::Skipped]);
    assert_eq!(cache.reads(), 0);
    assert!(fetcher.urls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_numeric_identifier_passes_through_untouched() {
    let cache = Arc::new(MemoryCache::new("thesesfr-personne"));
    let fetcher = ScriptedFetcher::documents("personnes", curie());
    let stage = stage(
        Arc::new(PersonStrategy::new(API)),
        config(2, 2),
        cache.clone(),
        Arc::new(RunReport::new()),
        fetcher.clone(),
    )
    .await;

    let raw = json!({"unitid": 123456789, "rtype": "RECORD", "url": "/123456789"});
    let record = Record::from_json(raw.clone()).unwrap();

    let done = stage.enrich_all(vec![record]).await.unwrap().completed;

    assert_eq!(done[0].outcome, Outcome::Skipped);
    assert_eq!(serde_json::to_value(&done[0].record).unwrap(), raw);
    assert_eq!(cache.reads(), 0);
    assert!(fetcher.urls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_cached_empty_marker_skips_remote() {
    let cache = Arc::new(MemoryCache::new("thesesfr-personne"));
    cache.set("B", &CachedValue::Empty).await.unwrap();
    let fetcher = ScriptedFetcher::documents("personnes", curie());
    let report = Arc::new(RunReport::new());
    let stage = stage(
        Arc::new(PersonStrategy::new(API)),
        config(2, 2),
        cache.clone(),
        report.clone(),
        fetcher.clone(),
    )
    .await;

    let input = persons(&["B"]);
    let done = stage.enrich_all(input.clone()).await.unwrap().completed;

    assert_eq!(done[0].outcome, Outcome::CacheNegative);
    assert_eq!(done[0].record, input[0]);
    assert!(fetcher.urls().is_empty());
    assert_eq!(report.get("thesesfr-personne", Counter::CacheNegatives), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cache_hit_matches_remote_enrichment() {
    let cache = Arc::new(MemoryCache::new("thesesfr"));
    let fetcher = ScriptedFetcher::documents("theses", defended_thesis());
    let record = Record::new("2020EMAC0007", RecordKind::PhdThesis)
        .with_identity_provider("https://idp.example.org");

    let first = stage(
        thesis_strategy(),
        config(10, 10),
        cache.clone(),
        Arc::new(RunReport::new()),
        fetcher.clone(),
    )
    .await;
    let remote = first.enrich_all(vec![record.clone()]).await.unwrap().completed;
    assert_eq!(remote[0].outcome, Outcome::Enriched);

    let second = stage(
        thesis_strategy(),
        config(10, 10),
        cache.clone(),
        Arc::new(RunReport::new()),
        fetcher.clone(),
    )
    .await;
    let cached = second.enrich_all(vec![record]).await.unwrap().completed;

    assert_eq!(cached[0].outcome, Outcome::CacheHit);
    assert_eq!(cached[0].record, remote[0].record);
    assert_eq!(cached[0].record.get(Field::CodeCourt), Some("EMAC"));
    assert_eq!(fetcher.urls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_enrichment_is_idempotent() {
    let fetcher = ScriptedFetcher::documents("theses", defended_thesis());
    let stage = stage(
        thesis_strategy(),
        config(10, 10).with_cache_enabled(false),
        Arc::new(MemoryCache::new("thesesfr")),
        Arc::new(RunReport::new()),
        fetcher,
    )
    .await;

    let once = stage
        .enrich_all(vec![Record::new("2020EMAC0007", RecordKind::PhdThesis)])
        .await
        .unwrap()
        .completed;
    let twice = stage
        .enrich_all(vec![once[0].record.clone()])
        .await
        .unwrap()
        .completed;

    assert_eq!(once[0].record, twice[0].record);
}

#[tokio::test(start_paused = true)]
async fn test_cache_disabled_queries_every_eligible_record() {
    let cache = Arc::new(MemoryCache::new("thesesfr-personne"));
    cache
        .set("A", &CachedValue::Document(curie()[0].clone()))
        .await
        .unwrap();
    let fetcher = ScriptedFetcher::documents("personnes", curie());
    let stage = stage(
        Arc::new(PersonStrategy::new(API)),
        config(10, 10).with_cache_enabled(false),
        cache.clone(),
        Arc::new(RunReport::new()),
        fetcher.clone(),
    )
    .await;

    let done = stage.enrich_all(persons(&["A", "B"])).await.unwrap().completed;

    assert_eq!(outcomes(&done), vec![Outcome::Enriched, Outcome::NotFound]);
    assert!(fetcher.urls()[0].ends_with("q=A%20OR%20B"));
    assert_eq!(cache.reads(), 0);
    assert_eq!(cache.writes(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cache_failures_are_counted_not_fatal() {
    let cache = FlakyCache::new();
    cache.fail_reads.store(true, Ordering::SeqCst);
    cache.fail_writes.store(true, Ordering::SeqCst);
    let report = Arc::new(RunReport::new());
    let stage = stage(
        Arc::new(PersonStrategy::new(API)),
        config(2, 2),
        cache,
        report.clone(),
        ScriptedFetcher::documents("personnes", curie()),
    )
    .await;

    let done = stage.enrich_all(persons(&["A"])).await.unwrap().completed;

    assert_eq!(done[0].outcome, Outcome::Enriched);
    assert_eq!(report.get("thesesfr-personne", Counter::CacheReadFails), 1);
    assert_eq!(report.get("thesesfr-personne", Counter::CacheFails), 1);
}

#[tokio::test]
async fn test_index_verification_failure_is_fatal() {
    let cache = FlakyCache::new();
    cache.fail_indexes.store(true, Ordering::SeqCst);
    let stage = EnrichmentStage::new(
        Arc::new(PersonStrategy::new(API)),
        PipelineConfig::default(),
        cache,
        Arc::new(RunReport::new()),
        ScriptedFetcher::documents("personnes", json!([])),
    )
    .unwrap();

    let err = stage.init().await.unwrap_err();
    assert!(matches!(err, EnrichError::IndexVerification(_)));
    assert!(err.is_fatal());
}

#[test]
fn test_packet_larger_than_search_page_is_refused() {
    let result = EnrichmentStage::new(
        Arc::new(PersonStrategy::new(API)),
        config(300, 1000),
        Arc::new(MemoryCache::new("thesesfr-personne")),
        Arc::new(RunReport::new()),
        ScriptedFetcher::documents("personnes", json!([])),
    );
    assert!(matches!(result, Err(EnrichError::Config(_))));
}

// =============================================================================
// Entity specifics
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_unsearchable_thesis_identifiers_send_no_request() {
    let cache = Arc::new(MemoryCache::new("thesesfr"));
    let fetcher = ScriptedFetcher::documents("theses", defended_thesis());
    let stage = stage(
        thesis_strategy(),
        config(10, 10),
        cache.clone(),
        Arc::new(RunReport::new()),
        fetcher.clone(),
    )
    .await;

    let done = stage
        .enrich_all(vec![Record::new("027361802", RecordKind::Abstract)])
        .await
        .unwrap()
        .completed;

    assert_eq!(done[0].outcome, Outcome::NotFound);
    assert_eq!(cache.peek("027361802"), Some(CachedValue::Empty));
    assert!(fetcher.urls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_person_then_organization_stages() {
    let report = Arc::new(RunReport::new());
    let person_fetcher = ScriptedFetcher::documents(
        "personnes",
        json!([{"id": "P1", "nom": "Curie", "prenom": "Marie"}]),
    );
    let org_fetcher = ScriptedFetcher::new(|url| {
        if url.ends_with("/getorganismename/O1") {
            Ok(HttpResponse::new(200, "Université Paris 1"))
        } else {
            Ok(HttpResponse::new(200, " \n"))
        }
    });

    let person = stage(
        Arc::new(PersonStrategy::new(API)),
        config(10, 10),
        Arc::new(MemoryCache::new("thesesfr-personne")),
        report.clone(),
        person_fetcher,
    )
    .await;
    let organization = stage(
        Arc::new(OrganizationStrategy::new(API)),
        config(10, 10),
        Arc::new(MemoryCache::new("thesesfr-organisme")),
        report.clone(),
        org_fetcher.clone(),
    )
    .await;

    let after_person: Vec<Record> = person
        .enrich_all(persons(&["P1", "O1", "Z9"]))
        .await
        .unwrap()
        .completed
        .into_iter()
        .map(|c| c.record)
        .collect();
    assert_eq!(after_person[0].kind(), Some(&RecordKind::Biography));

    let done = organization.enrich_all(after_person).await.unwrap().completed;

    assert_eq!(
        outcomes(&done),
        vec![Outcome::Skipped, Outcome::Enriched, Outcome::NotFound]
    );
    assert_eq!(done[1].record.get(Field::OrganismeN), Some("Université Paris 1"));
    assert_eq!(done[1].record.get(Field::OrganismePpn), Some("O1"));

    // One request per remaining RECORD, none for the resolved person
    assert_eq!(org_fetcher.urls().len(), 2);
    assert_eq!(report.get("thesesfr-organisme", Counter::QueryEmptyResponses), 1);
}
