// src/discovery/fetcher.rs
//! Per-source fetch: two duration-banded searches for diversity, detail
//! enrichment in ≤50-ID batches, and an admission check in front of every
//! network call. Results are normalized into the common item shape.

use metrics::counter;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::DiscoveryConfig;
use crate::quota::{AdmissionController, OperationKind};
use crate::transport::{
    DurationBand, RawSearchHit, TransportError, VideoTransport, MAX_DETAILS_BATCH,
};

use super::cache::{CacheKey, SearchCache};
use super::normalize_text;
use super::types::{DiscoveredItem, TopicQuery, TrackedSource};

/// How fetch calls are paid for: directly against the ledger, or debited
/// from a reservation taken out for the whole run (onboarding).
#[derive(Debug, Clone)]
pub enum AdmissionMode {
    Direct,
    Prepaid { token: String },
}

/// One logical source to fetch.
#[derive(Debug, Clone)]
pub enum SourceSpec {
    Tracked(TrackedSource),
    Topic(TopicQuery),
}

impl SourceSpec {
    pub fn label(&self) -> String {
        match self {
            SourceSpec::Tracked(t) => format!("channel:{}", t.channel_id),
            SourceSpec::Topic(t) => format!("topic:{}", t.query),
        }
    }

    fn since_unix(&self) -> u64 {
        match self {
            SourceSpec::Tracked(t) => t.since.map(|d| d.timestamp().max(0) as u64).unwrap_or(0),
            SourceSpec::Topic(t) => t
                .published_after
                .map(|d| d.timestamp().max(0) as u64)
                .unwrap_or(0),
        }
    }
}

/// Outcome of fetching one source. A quota stop and a generic failure are
/// both values here; the orchestrator decides what the run makes of them.
#[derive(Debug, Default)]
pub struct SourceFetchResult {
    pub items: Vec<DiscoveredItem>,
    /// Local admission denial or an upstream 403/quota response.
    pub quota_exceeded: bool,
    /// Generic failure message when the source produced nothing usable.
    pub error: Option<String>,
    /// Network calls actually issued (zero on a cache hit).
    pub calls_made: u32,
}

pub struct SourceFetcher {
    transport: Arc<dyn VideoTransport>,
    admission: AdmissionController,
    cache: SearchCache,
    cfg: DiscoveryConfig,
    call_timeout: Duration,
}

impl SourceFetcher {
    pub fn new(
        transport: Arc<dyn VideoTransport>,
        admission: AdmissionController,
        cfg: DiscoveryConfig,
    ) -> Self {
        let cache = SearchCache::with_ttl_minutes(cfg.cache_ttl_minutes);
        let call_timeout = Duration::from_secs(cfg.call_timeout_secs.max(1));
        Self {
            transport,
            admission,
            cache,
            cfg,
            call_timeout,
        }
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    /// Fetch one source: banded searches, merge, enrich. Consults the cache
    /// first so repeat discovery within the TTL spends nothing.
    pub async fn fetch_source(
        &self,
        spec: &SourceSpec,
        mode: &AdmissionMode,
        max_results: u32,
    ) -> SourceFetchResult {
        let key = CacheKey {
            source_key: spec.label(),
            since_unix: spec.since_unix(),
            max_results,
        };
        if let Some(items) = self.cache.get(&key) {
            return SourceFetchResult {
                items,
                ..Default::default()
            };
        }

        let mut result = SourceFetchResult::default();
        let mut band_errors: Vec<String> = Vec::new();
        // External ID → best record; long-band records win collisions.
        let mut merged: HashMap<String, (RawSearchHit, DurationBand)> = HashMap::new();

        for band in [DurationBand::Medium, DurationBand::Long] {
            if !self.admit(mode, OperationKind::SearchVideos) {
                result.quota_exceeded = true;
                break;
            }
            result.calls_made += 1;
            counter!("discovery_transport_calls_total").increment(1);

            match self.search_band(spec, band, max_results).await {
                Ok(hits) => {
                    for hit in hits {
                        match merged.get(&hit.external_id) {
                            Some((_, existing_band))
                                if *existing_band == DurationBand::Long =>
                            {
                                // Keep the more complete long-band record.
                            }
                            _ => {
                                merged.insert(hit.external_id.clone(), (hit, band));
                            }
                        }
                    }
                }
                Err(e) if e.is_quota_exceeded() => {
                    counter!("discovery_quota_stops_total").increment(1);
                    result.quota_exceeded = true;
                    break;
                }
                Err(e) => {
                    counter!("discovery_source_errors_total").increment(1);
                    band_errors.push(format!("{} [{}]: {}", spec.label(), band.api_param(), e));
                }
            }
        }

        let mut hits: Vec<(RawSearchHit, DurationBand)> = merged.into_values().collect();
        // Deterministic order for downstream processing and tests.
        hits.sort_by(|a, b| b.0.published_at.cmp(&a.0.published_at));

        if hits.is_empty() && band_errors.len() >= 2 {
            // Both bands failed outright; nothing usable from this source.
            result.error = Some(band_errors.join("; "));
            return result;
        }
        if !band_errors.is_empty() {
            result.error = Some(band_errors.join("; "));
        }

        let details = if result.quota_exceeded {
            HashMap::new()
        } else {
            self.enrich(&hits, mode, &mut result).await
        };

        result.items = hits
            .into_iter()
            .map(|(hit, band)| {
                let d = details.get(&hit.external_id);
                DiscoveredItem {
                    external_id: hit.external_id,
                    title: normalize_text(&hit.title),
                    channel_id: hit.channel_id,
                    channel_name: hit.channel_name,
                    published_at: hit.published_at,
                    duration_seconds: d.map(|d| d.duration_seconds).unwrap_or(0),
                    view_count: d.map(|d| d.view_count).unwrap_or(0),
                    like_count: d.map(|d| d.like_count).unwrap_or(0),
                    comment_count: d.map(|d| d.comment_count).unwrap_or(0),
                    thumbnail_url: hit.thumbnail_url,
                    description: normalize_text(&hit.description),
                    found_in_band: band,
                }
            })
            .collect();

        counter!("discovery_items_total").increment(result.items.len() as u64);

        // Only clean, complete fetches are worth caching.
        if !result.quota_exceeded && result.error.is_none() {
            self.cache.put(key, result.items.clone());
        }
        result
    }

    async fn search_band(
        &self,
        spec: &SourceSpec,
        band: DurationBand,
        max_results: u32,
    ) -> Result<Vec<RawSearchHit>, TransportError> {
        let fut = async {
            match spec {
                SourceSpec::Tracked(t) => {
                    self.transport
                        .search_by_channel(&t.channel_id, t.since, band, max_results)
                        .await
                }
                SourceSpec::Topic(t) => {
                    self.transport
                        .search_by_topic(&t.query, t.published_after, band, max_results)
                        .await
                }
            }
        };
        match tokio::time::timeout(self.call_timeout, fut).await {
            Ok(r) => r,
            Err(_) => Err(TransportError::Network(format!(
                "search timed out after {}s",
                self.call_timeout.as_secs()
            ))),
        }
    }

    /// Batched detail enrichment. A failed batch degrades those items to
    /// unenriched rather than failing the source.
    async fn enrich(
        &self,
        hits: &[(RawSearchHit, DurationBand)],
        mode: &AdmissionMode,
        result: &mut SourceFetchResult,
    ) -> HashMap<String, crate::transport::RawVideoDetails> {
        let ids: Vec<String> = hits.iter().map(|(h, _)| h.external_id.clone()).collect();
        let mut out = HashMap::new();

        for chunk in ids.chunks(MAX_DETAILS_BATCH) {
            if !self.admit(mode, OperationKind::VideoDetails) {
                result.quota_exceeded = true;
                break;
            }
            result.calls_made += 1;
            counter!("discovery_transport_calls_total").increment(1);

            let fut = self.transport.video_details(chunk);
            let r = match tokio::time::timeout(self.call_timeout, fut).await {
                Ok(r) => r,
                Err(_) => Err(TransportError::Network(format!(
                    "details timed out after {}s",
                    self.call_timeout.as_secs()
                ))),
            };
            match r {
                Ok(details) => {
                    for d in details {
                        out.insert(d.external_id.clone(), d);
                    }
                }
                Err(e) if e.is_quota_exceeded() => {
                    counter!("discovery_quota_stops_total").increment(1);
                    result.quota_exceeded = true;
                    break;
                }
                Err(e) => {
                    counter!("discovery_source_errors_total").increment(1);
                    tracing::warn!(error = %e, "details enrichment failed for one batch");
                }
            }
        }
        out
    }

    fn admit(&self, mode: &AdmissionMode, kind: OperationKind) -> bool {
        match mode {
            AdmissionMode::Direct => self.admission.try_consume(kind, 1),
            AdmissionMode::Prepaid { token } => {
                self.admission.debit_reservation(token, kind, 1)
            }
        }
    }

    /// Cost estimate for one source fetch, used to size onboarding
    /// reservations: two banded searches plus the detail batches they can
    /// produce at most.
    pub fn per_source_plan(&self, max_results: u32) -> Vec<(OperationKind, u64)> {
        let max_ids = (max_results as usize) * 2;
        let detail_calls = max_ids.div_ceil(MAX_DETAILS_BATCH).max(1) as u64;
        vec![
            (OperationKind::SearchVideos, 2),
            (OperationKind::VideoDetails, detail_calls),
        ]
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.cfg
    }
}
