// tests/fetcher_cache.rs
//
// Source fetcher contract: cache MISS → HIT within the TTL, immediate stop
// on upstream quota errors (no retry), long-band preference on band
// duplicates, timeout as a per-source failure, and degraded enrichment.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use video_scout::config::DiscoveryConfig;
use video_scout::discovery::fetcher::{AdmissionMode, SourceFetcher, SourceSpec};
use video_scout::discovery::types::TrackedSource;
use video_scout::quota::AdmissionController;
use video_scout::transport::{
    DurationBand, RawSearchHit, RawVideoDetails, TransportError, VideoTransport,
};

#[derive(Clone)]
enum Mode {
    /// Same fixture ids on both bands (band-duplicate scenario).
    Mirrored(Vec<RawSearchHit>),
    /// Fixtures on the medium band only.
    MediumOnly(Vec<RawSearchHit>),
    Quota,
    FailSearch(u16),
    FailDetails(Vec<RawSearchHit>),
    Hang,
}

struct MockTransport {
    mode: Mutex<Mode>,
    search_calls: AtomicUsize,
    details_calls: AtomicUsize,
}

impl MockTransport {
    fn new(mode: Mode) -> Arc<Self> {
        Arc::new(Self {
            mode: Mutex::new(mode),
            search_calls: AtomicUsize::new(0),
            details_calls: AtomicUsize::new(0),
        })
    }

    async fn respond(
        &self,
        band: DurationBand,
    ) -> Result<Vec<RawSearchHit>, TransportError> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        let mode = self.mode.lock().unwrap().clone();
        match mode {
            Mode::Mirrored(hits) => Ok(hits),
            Mode::MediumOnly(hits) if band == DurationBand::Medium => Ok(hits),
            Mode::MediumOnly(_) => Ok(vec![]),
            Mode::Quota => Err(TransportError::QuotaExceeded { status: 403 }),
            Mode::FailSearch(status) => Err(TransportError::from_status(status)),
            Mode::FailDetails(hits) if band == DurationBand::Medium => Ok(hits),
            Mode::FailDetails(_) => Ok(vec![]),
            Mode::Hang => {
                tokio::time::sleep(std::time::Duration::from_secs(3_600)).await;
                Ok(vec![])
            }
        }
    }
}

#[async_trait]
impl VideoTransport for MockTransport {
    async fn search_by_channel(
        &self,
        _channel_id: &str,
        _published_after: Option<DateTime<Utc>>,
        band: DurationBand,
        _max_results: u32,
    ) -> Result<Vec<RawSearchHit>, TransportError> {
        self.respond(band).await
    }

    async fn search_by_topic(
        &self,
        _query: &str,
        _published_after: Option<DateTime<Utc>>,
        band: DurationBand,
        _max_results: u32,
    ) -> Result<Vec<RawSearchHit>, TransportError> {
        self.respond(band).await
    }

    async fn video_details(
        &self,
        ids: &[String],
    ) -> Result<Vec<RawVideoDetails>, TransportError> {
        self.details_calls.fetch_add(1, Ordering::SeqCst);
        if matches!(*self.mode.lock().unwrap(), Mode::FailDetails(_)) {
            return Err(TransportError::Http { status: 500 });
        }
        Ok(ids
            .iter()
            .map(|id| RawVideoDetails {
                external_id: id.clone(),
                duration_seconds: if id.contains("long") { 2_400 } else { 600 },
                view_count: 1_000,
                like_count: 50,
                comment_count: 5,
            })
            .collect())
    }
}

fn hit(id: &str) -> RawSearchHit {
    RawSearchHit {
        external_id: id.to_string(),
        title: format!("Video {id}"),
        channel_id: "chan-a".to_string(),
        channel_name: "Chan A".to_string(),
        published_at: (Utc::now() - Duration::hours(2)).timestamp() as u64,
        description: String::new(),
        thumbnail_url: None,
    }
}

fn fetcher_over(
    transport: Arc<MockTransport>,
    limit: u64,
    tweak: impl FnOnce(&mut DiscoveryConfig),
) -> (SourceFetcher, AdmissionController) {
    let mut cfg = DiscoveryConfig::default();
    tweak(&mut cfg);
    let admission = AdmissionController::ephemeral(limit);
    let fetcher = SourceFetcher::new(transport, admission.clone(), cfg);
    (fetcher, admission)
}

fn spec() -> SourceSpec {
    SourceSpec::Tracked(TrackedSource {
        channel_id: "chan-a".to_string(),
        channel_name: "Chan A".to_string(),
        rating: 4,
        since: None,
    })
}

#[tokio::test]
async fn repeat_fetch_within_ttl_spends_nothing() {
    let transport = MockTransport::new(Mode::MediumOnly(vec![hit("v1"), hit("v2")]));
    let (fetcher, admission) = fetcher_over(transport.clone(), 10_000, |_| {});

    let first = fetcher
        .fetch_source(&spec(), &AdmissionMode::Direct, 25)
        .await;
    assert_eq!(first.items.len(), 2);
    assert_eq!(first.calls_made, 3);
    let spent = admission.snapshot().used;
    assert_eq!(spent, 201);

    let second = fetcher
        .fetch_source(&spec(), &AdmissionMode::Direct, 25)
        .await;
    assert_eq!(second.items.len(), 2);
    assert_eq!(second.calls_made, 0, "served from cache");
    assert_eq!(admission.snapshot().used, spent, "no further spend");
    assert_eq!(transport.search_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn different_max_results_bypasses_the_cache() {
    let transport = MockTransport::new(Mode::MediumOnly(vec![hit("v1")]));
    let (fetcher, _) = fetcher_over(transport.clone(), 10_000, |_| {});

    fetcher
        .fetch_source(&spec(), &AdmissionMode::Direct, 25)
        .await;
    fetcher
        .fetch_source(&spec(), &AdmissionMode::Direct, 10)
        .await;
    assert_eq!(transport.search_calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn upstream_quota_error_stops_immediately_without_retry() {
    let transport = MockTransport::new(Mode::Quota);
    let (fetcher, admission) = fetcher_over(transport.clone(), 10_000, |_| {});

    let result = fetcher
        .fetch_source(&spec(), &AdmissionMode::Direct, 25)
        .await;
    assert!(result.quota_exceeded);
    assert!(result.items.is_empty());
    // One search went out, hit the 403, and nothing else was attempted.
    assert_eq!(transport.search_calls.load(Ordering::SeqCst), 1);
    assert_eq!(transport.details_calls.load(Ordering::SeqCst), 0);
    // The admission charge for the attempted call stands.
    assert_eq!(admission.snapshot().used, 100);
}

#[tokio::test]
async fn local_admission_denial_flags_quota_before_any_network_call() {
    let transport = MockTransport::new(Mode::MediumOnly(vec![hit("v1")]));
    let (fetcher, _) = fetcher_over(transport.clone(), 50, |_| {});

    let result = fetcher
        .fetch_source(&spec(), &AdmissionMode::Direct, 25)
        .await;
    assert!(result.quota_exceeded);
    assert_eq!(result.calls_made, 0);
    assert_eq!(transport.search_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn band_duplicates_resolve_to_the_long_band_record() {
    let transport = MockTransport::new(Mode::Mirrored(vec![hit("v-long-1")]));
    let (fetcher, _) = fetcher_over(transport, 10_000, |_| {});

    let result = fetcher
        .fetch_source(&spec(), &AdmissionMode::Direct, 25)
        .await;
    assert_eq!(result.items.len(), 1, "same id across bands merges to one");
    assert_eq!(result.items[0].found_in_band, DurationBand::Long);
}

#[tokio::test(start_paused = true)]
async fn hanging_search_times_out_as_a_source_failure() {
    let transport = MockTransport::new(Mode::Hang);
    let (fetcher, _) = fetcher_over(transport, 10_000, |cfg| {
        cfg.call_timeout_secs = 5;
    });

    let result = fetcher
        .fetch_source(&spec(), &AdmissionMode::Direct, 25)
        .await;
    assert!(!result.quota_exceeded);
    let err = result.error.expect("timeout surfaces as a failure");
    assert!(err.contains("timed out"), "got: {err}");
}

#[tokio::test]
async fn failed_enrichment_degrades_items_instead_of_dropping_them() {
    let transport = MockTransport::new(Mode::FailDetails(vec![hit("v1")]));
    let (fetcher, _) = fetcher_over(transport, 10_000, |_| {});

    let result = fetcher
        .fetch_source(&spec(), &AdmissionMode::Direct, 25)
        .await;
    assert_eq!(result.items.len(), 1);
    assert_eq!(result.items[0].duration_seconds, 0);
    assert_eq!(result.items[0].view_count, 0);
}

#[tokio::test]
async fn prepaid_mode_debits_the_reservation_not_the_ledger() {
    let transport = MockTransport::new(Mode::MediumOnly(vec![hit("v1")]));
    let (fetcher, admission) = fetcher_over(transport, 10_000, |_| {});

    let mut plan = std::collections::BTreeMap::new();
    plan.insert(video_scout::quota::OperationKind::SearchVideos, 2u64);
    plan.insert(video_scout::quota::OperationKind::VideoDetails, 1u64);
    let grant = admission.reserve(&plan).granted().unwrap();

    let mode = AdmissionMode::Prepaid {
        token: grant.token.clone(),
    };
    let result = fetcher.fetch_source(&spec(), &mode, 25).await;
    assert_eq!(result.items.len(), 1);
    assert!(!result.quota_exceeded);

    // Nothing consumed yet; the hold still stands until confirm.
    let snap = admission.snapshot();
    assert_eq!(snap.used, 0);
    assert_eq!(snap.reserved, grant.reserved_amount);

    assert!(admission.confirm(&grant.token));
    assert_eq!(admission.snapshot().used, grant.reserved_amount);
}
