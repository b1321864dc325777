// src/discovery/types.rs
//! Data model shared across the discovery pipeline: request/report DTOs,
//! the normalized item shape, and the cooperative cancellation flag.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::DiscoveryConfig;
use crate::transport::DurationBand;

/// A normalized, enriched item as produced by the source fetcher.
/// Immutable once constructed within one discovery cycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiscoveredItem {
    pub external_id: String,
    pub title: String,
    pub channel_id: String,
    pub channel_name: String,
    pub published_at: u64,
    pub duration_seconds: u32,
    pub view_count: u64,
    pub like_count: u64,
    pub comment_count: u64,
    pub thumbnail_url: Option<String>,
    pub description: String,
    /// Band of the search query that produced this record.
    pub found_in_band: DurationBand,
}

impl DiscoveredItem {
    /// Band of the item itself, from its enriched duration.
    pub fn duration_band(&self, cfg: &DiscoveryConfig) -> DurationBand {
        classify_duration(self.duration_seconds, cfg)
    }
}

pub fn classify_duration(secs: u32, cfg: &DiscoveryConfig) -> DurationBand {
    if secs < cfg.medium_band_min_secs {
        DurationBand::Short
    } else if secs <= cfg.medium_band_max_secs {
        DurationBand::Medium
    } else {
        DurationBand::Long
    }
}

/// A channel the user follows, with their 1–5 star rating and the watermark
/// of the last item already seen.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedSource {
    pub channel_id: String,
    pub channel_name: String,
    pub rating: u8,
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
}

/// A free-text interest query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicQuery {
    pub query: String,
    #[serde(default)]
    pub published_after: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryRequest {
    pub user_id: String,
    #[serde(default)]
    pub tracked_sources: Vec<TrackedSource>,
    #[serde(default)]
    pub topic_queries: Vec<TopicQuery>,
    #[serde(default)]
    pub max_results_per_source: Option<u32>,
}

/// How an item was discovered in this run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceClassification {
    SingleTracked,
    SingleTopic,
    Both,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Completed,
    /// Some sources failed; results cover the rest.
    Partial,
    /// Admission control ran dry mid-run; results cover what was gathered.
    QuotaLimited,
    /// Every source failed (or an unexpected fault was converted here).
    Failed,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DiscoveryStats {
    pub tracked_sources_queried: usize,
    pub topic_queries_run: usize,
    pub tracked_items_found: usize,
    pub topic_items_found: usize,
    pub duplicates_removed: usize,
    pub excluded_low_rating: usize,
    pub skipped_already_pending: usize,
    pub failed_sources: usize,
    pub network_calls: usize,
    pub scoring_failures: usize,
    pub quota_units_consumed: u64,
}

/// Aggregate outcome of one discovery invocation. Created once per run and
/// discarded after the caller persists whatever subset it keeps.
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryReport {
    pub status: RunStatus,
    pub stats: DiscoveryStats,
    pub warnings: Vec<String>,
    pub candidates: Vec<crate::scoring::ScoredCandidate>,
    /// Set when the run stopped early on an exhausted budget.
    pub quota_exhausted: bool,
    /// Human-readable failure message when `status == Failed`.
    pub failure: Option<String>,
}

impl DiscoveryReport {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: RunStatus::Failed,
            stats: DiscoveryStats::default(),
            warnings: Vec::new(),
            candidates: Vec::new(),
            quota_exhausted: false,
            failure: Some(message.into()),
        }
    }
}

/// Cooperative cancellation: stops new fetches from being issued while
/// letting in-flight calls finish on their own timeout budget.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    flag: Arc<AtomicBool>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DiscoveryConfig;

    #[test]
    fn duration_classification_uses_configured_bands() {
        let cfg = DiscoveryConfig::default();
        assert_eq!(classify_duration(30, &cfg), DurationBand::Short);
        assert_eq!(classify_duration(240, &cfg), DurationBand::Medium);
        assert_eq!(classify_duration(1200, &cfg), DurationBand::Medium);
        assert_eq!(classify_duration(1201, &cfg), DurationBand::Long);
    }

    #[test]
    fn cancel_flag_is_shared_across_clones() {
        let flag = CancelFlag::new();
        let clone = flag.clone();
        assert!(!clone.is_cancelled());
        flag.cancel();
        assert!(clone.is_cancelled());
    }
}
