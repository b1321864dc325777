// src/discovery/mod.rs
pub mod cache;
pub mod fetcher;
pub mod types;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use once_cell::sync::OnceCell;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::config::{DiscoveryConfig, SelectionConfig};
use crate::quota::{AdmissionController, OperationKind, ReserveOutcome};
use crate::scoring::{ScoredCandidate, ScoringEngine};
use crate::selection;
use crate::storage::SuggestionStore;

use fetcher::{AdmissionMode, SourceFetcher, SourceSpec};
use types::{
    CancelFlag, DiscoveryReport, DiscoveryRequest, DiscoveryStats, RunStatus,
    SourceClassification,
};

/// One-time metrics registration (so series show up on /metrics).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("discovery_runs_total", "Discovery runs started.");
        describe_counter!("discovery_items_total", "Items fetched from sources.");
        describe_counter!(
            "discovery_dedup_total",
            "Items removed by cross-channel deduplication."
        );
        describe_counter!(
            "discovery_source_errors_total",
            "Source fetch/parse errors."
        );
        describe_counter!(
            "discovery_quota_stops_total",
            "Fetches cut short by admission control or upstream quota."
        );
        describe_counter!("discovery_cache_hits_total", "Search cache hits.");
        describe_counter!("discovery_cache_misses_total", "Search cache misses.");
        describe_counter!(
            "discovery_transport_calls_total",
            "Network calls issued to the platform API."
        );
        describe_gauge!(
            "discovery_last_run_ts",
            "Unix ts when a discovery run last finished."
        );
    });
}

/// Normalize text: decode entities, strip tags and smart quotes, collapse
/// whitespace, cap the length.
pub fn normalize_text(s: &str) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").unwrap());
    out = re_tags.replace_all(&out, "").to_string();

    // 3) Normalize typographic quotes to ASCII
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    // 4) Collapse whitespace
    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").unwrap());
    out = re_ws.replace_all(&out, " ").to_string();
    out = out.trim().to_string();

    // 5) Length cap: 1500 chars
    if out.chars().count() > 1500 {
        out = out.chars().take(1500).collect();
    }

    out
}

enum Channel {
    Tracked { rating: u8 },
    Topic { query: String },
}

struct Collected {
    item: types::DiscoveredItem,
    found_tracked: bool,
    found_topic: bool,
    tracked_rating: Option<u8>,
    matched_topics: Vec<String>,
}

pub struct DiscoveryOrchestrator {
    fetcher: Arc<SourceFetcher>,
    admission: AdmissionController,
    scoring: ScoringEngine,
    store: Arc<dyn SuggestionStore>,
    cfg: DiscoveryConfig,
    sel_cfg: SelectionConfig,
}

impl DiscoveryOrchestrator {
    pub fn new(
        fetcher: Arc<SourceFetcher>,
        admission: AdmissionController,
        scoring: ScoringEngine,
        store: Arc<dyn SuggestionStore>,
        cfg: DiscoveryConfig,
        sel_cfg: SelectionConfig,
    ) -> Self {
        ensure_metrics_described();
        Self {
            fetcher,
            admission,
            scoring,
            store,
            cfg,
            sel_cfg,
        }
    }

    /// Normal discovery run: fan out, merge, dedup, score, apply the score
    /// floor. Never panics across the boundary; unexpected faults become a
    /// failed report.
    pub async fn discover(&self, req: &DiscoveryRequest, cancel: &CancelFlag) -> DiscoveryReport {
        if let Some(msg) = validate(req) {
            return DiscoveryReport::failed(msg);
        }
        counter!("discovery_runs_total").increment(1);
        let used_before = self.admission.snapshot().used;

        let (collected, mut stats, warnings, quota_hit, all_failed) = self
            .fan_out(req, cancel, &AdmissionMode::Direct)
            .await;

        if all_failed {
            let mut report =
                DiscoveryReport::failed("all sources failed; no results gathered");
            report.warnings = warnings;
            report.stats.quota_units_consumed =
                self.admission.snapshot().used.saturating_sub(used_before);
            return report;
        }

        let mut warnings = warnings;
        let mut candidates = self
            .score_collected(req, collected, &mut stats, &mut warnings)
            .await;

        candidates.retain(|c| c.score >= self.cfg.min_score);
        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        if let Err(e) = self.apply_pending_cap(req, &mut candidates).await {
            warnings.push(format!("pending cap check failed: {e}"));
        }

        stats.quota_units_consumed =
            self.admission.snapshot().used.saturating_sub(used_before);
        gauge!("discovery_last_run_ts").set(chrono::Utc::now().timestamp() as f64);

        let status = if quota_hit {
            RunStatus::QuotaLimited
        } else if stats.failed_sources > 0 || stats.scoring_failures > 0 {
            RunStatus::Partial
        } else {
            RunStatus::Completed
        };

        DiscoveryReport {
            status,
            stats,
            warnings,
            candidates,
            quota_exhausted: quota_hit,
            failure: None,
        }
    }

    /// First-contact seeding: reserve the whole budget up front, fetch
    /// prepaid, then run the phased selector instead of the score floor.
    pub async fn onboard(&self, req: &DiscoveryRequest, cancel: &CancelFlag) -> DiscoveryReport {
        if let Some(msg) = validate(req) {
            return DiscoveryReport::failed(msg);
        }
        counter!("discovery_runs_total").increment(1);
        let used_before = self.admission.snapshot().used;

        let max_results = self.pool_max_results(req);
        let source_count = req.tracked_sources.iter().filter(|t| t.rating > 1).count()
            + req.topic_queries.len();
        let mut plan: BTreeMap<OperationKind, u64> = BTreeMap::new();
        for (kind, count) in self.fetcher.per_source_plan(max_results) {
            *plan.entry(kind).or_insert(0) += count * source_count as u64;
        }

        let grant = match self.admission.reserve(&plan) {
            ReserveOutcome::Granted(g) => g,
            ReserveOutcome::InsufficientBudget { requested, available } => {
                let mut report = DiscoveryReport {
                    status: RunStatus::QuotaLimited,
                    stats: DiscoveryStats::default(),
                    warnings: vec![format!(
                        "onboarding needs {requested} units but only {available} remain; retry after reset"
                    )],
                    candidates: Vec::new(),
                    quota_exhausted: true,
                    failure: None,
                };
                report.stats.quota_units_consumed = 0;
                return report;
            }
        };

        let mode = AdmissionMode::Prepaid {
            token: grant.token.clone(),
        };
        let mut req = req.clone();
        req.max_results_per_source = Some(max_results);

        let (collected, mut stats, mut warnings, quota_hit, all_failed) =
            self.fan_out(&req, cancel, &mode).await;

        // Reservations charge in full on confirm; only a run that issued no
        // network call at all (all cache hits, or cancelled on arrival) may
        // release its hold.
        if stats.network_calls == 0 {
            self.admission.release(&grant.token);
        } else {
            self.admission.confirm(&grant.token);
        }

        if all_failed {
            let mut report =
                DiscoveryReport::failed("all sources failed; onboarding gathered nothing");
            report.warnings = warnings;
            report.stats.quota_units_consumed =
                self.admission.snapshot().used.saturating_sub(used_before);
            return report;
        }

        let pool = self
            .score_collected(&req, collected, &mut stats, &mut warnings)
            .await;
        let scoring_failed = stats.scoring_failures > 0;

        let selected = if scoring_failed {
            selection::fallback_select(pool, self.sel_cfg.onboarding_quota)
        } else {
            selection::select_first_contact(pool, &self.sel_cfg, &self.cfg)
        };

        stats.quota_units_consumed =
            self.admission.snapshot().used.saturating_sub(used_before);
        gauge!("discovery_last_run_ts").set(chrono::Utc::now().timestamp() as f64);

        let status = if quota_hit {
            RunStatus::QuotaLimited
        } else if stats.failed_sources > 0 || scoring_failed {
            RunStatus::Partial
        } else {
            RunStatus::Completed
        };

        DiscoveryReport {
            status,
            stats,
            warnings,
            candidates: selected,
            quota_exhausted: quota_hit,
            failure: None,
        }
    }

    /// Fan a request out across all sources with bounded concurrency, then
    /// merge and deduplicate. Classification happens only after every source
    /// completed or failed.
    async fn fan_out(
        &self,
        req: &DiscoveryRequest,
        cancel: &CancelFlag,
        mode: &AdmissionMode,
    ) -> (Vec<Collected>, DiscoveryStats, Vec<String>, bool, bool) {
        let mut stats = DiscoveryStats::default();
        let mut warnings: Vec<String> = Vec::new();
        let max_results = req
            .max_results_per_source
            .unwrap_or(self.cfg.max_results_per_source);

        let semaphore = Arc::new(Semaphore::new(self.cfg.max_concurrent_fetches));
        let quota_hit = Arc::new(AtomicBool::new(false));
        let mut join_set: JoinSet<(Channel, fetcher::SourceFetchResult)> = JoinSet::new();
        let mut sources_total = 0usize;

        for tracked in &req.tracked_sources {
            if tracked.rating <= 1 {
                warnings.push(format!(
                    "skipped one-star channel {} ({})",
                    tracked.channel_name, tracked.channel_id
                ));
                continue;
            }
            sources_total += 1;
            stats.tracked_sources_queried += 1;
            let spec = SourceSpec::Tracked(tracked.clone());
            let rating = tracked.rating;
            self.spawn_fetch(
                &mut join_set,
                spec,
                Channel::Tracked { rating },
                mode.clone(),
                max_results,
                semaphore.clone(),
                cancel.clone(),
                quota_hit.clone(),
            );
        }
        for topic in &req.topic_queries {
            sources_total += 1;
            stats.topic_queries_run += 1;
            let spec = SourceSpec::Topic(topic.clone());
            let query = topic.query.clone();
            self.spawn_fetch(
                &mut join_set,
                spec,
                Channel::Topic { query },
                mode.clone(),
                max_results,
                semaphore.clone(),
                cancel.clone(),
                quota_hit.clone(),
            );
        }

        // Dedup across both channels once everything has settled.
        let mut merged: HashMap<String, Collected> = HashMap::new();
        let mut failed_sources = 0usize;
        let mut raw_total = 0usize;

        while let Some(joined) = join_set.join_next().await {
            let (channel, result) = match joined {
                Ok(t) => t,
                Err(e) => {
                    // A panicked fetch task is contained here.
                    failed_sources += 1;
                    warnings.push(format!("source task failed unexpectedly: {e}"));
                    continue;
                }
            };

            stats.network_calls += result.calls_made as usize;
            if let Some(err) = &result.error {
                warnings.push(err.clone());
                if result.items.is_empty() {
                    failed_sources += 1;
                }
            }
            if result.quota_exceeded {
                quota_hit.store(true, Ordering::SeqCst);
            }

            for item in result.items {
                raw_total += 1;
                match &channel {
                    Channel::Tracked { .. } => stats.tracked_items_found += 1,
                    Channel::Topic { .. } => stats.topic_items_found += 1,
                }
                let entry = merged
                    .entry(item.external_id.clone())
                    .or_insert_with(|| Collected {
                        item,
                        found_tracked: false,
                        found_topic: false,
                        tracked_rating: None,
                        matched_topics: Vec::new(),
                    });
                match &channel {
                    Channel::Tracked { rating } => {
                        entry.found_tracked = true;
                        entry.tracked_rating =
                            Some(entry.tracked_rating.map_or(*rating, |r| r.max(*rating)));
                    }
                    Channel::Topic { query } => {
                        entry.found_topic = true;
                        if !entry.matched_topics.contains(query) {
                            entry.matched_topics.push(query.clone());
                        }
                    }
                }
            }
        }

        let unique = merged.len();
        stats.duplicates_removed = raw_total.saturating_sub(unique);
        stats.failed_sources = failed_sources;
        counter!("discovery_dedup_total").increment(stats.duplicates_removed as u64);

        let all_failed = sources_total > 0 && failed_sources >= sources_total;
        let quota = quota_hit.load(Ordering::SeqCst);
        (merged.into_values().collect(), stats, warnings, quota, all_failed)
    }

    #[allow(clippy::too_many_arguments)]
    fn spawn_fetch(
        &self,
        join_set: &mut JoinSet<(Channel, fetcher::SourceFetchResult)>,
        spec: SourceSpec,
        channel: Channel,
        mode: AdmissionMode,
        max_results: u32,
        semaphore: Arc<Semaphore>,
        cancel: CancelFlag,
        quota_hit: Arc<AtomicBool>,
    ) {
        let fetcher = self.fetcher.clone();
        join_set.spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(p) => p,
                Err(_) => return (channel, fetcher::SourceFetchResult::default()),
            };
            // Cancellation and exhaustion stop new fetches; in-flight calls
            // elsewhere finish on their own timeout budget.
            if cancel.is_cancelled() || quota_hit.load(Ordering::SeqCst) {
                return (channel, fetcher::SourceFetchResult::default());
            }
            let result = fetcher.fetch_source(&spec, &mode, max_results).await;
            (channel, result)
        });
    }

    /// Classify, filter, and score the merged set.
    async fn score_collected(
        &self,
        req: &DiscoveryRequest,
        collected: Vec<Collected>,
        stats: &mut DiscoveryStats,
        warnings: &mut Vec<String>,
    ) -> Vec<ScoredCandidate> {
        let user_topics: Vec<String> =
            req.topic_queries.iter().map(|t| t.query.clone()).collect();
        // Ratings the user assigned to channels they track; topic finds from
        // a tracked one-star channel must not slip through either.
        let tracked_ratings: HashMap<&str, u8> = req
            .tracked_sources
            .iter()
            .map(|t| (t.channel_id.as_str(), t.rating))
            .collect();
        let now_unix = chrono::Utc::now().timestamp().max(0) as u64;

        let mut out = Vec::with_capacity(collected.len());
        for c in collected {
            let rating = c
                .tracked_rating
                .or_else(|| tracked_ratings.get(c.item.channel_id.as_str()).copied())
                .unwrap_or(self.cfg.default_channel_rating);
            if rating <= 1 {
                stats.excluded_low_rating += 1;
                continue;
            }

            match self
                .store
                .has_pending_candidate(&req.user_id, &c.item.external_id)
                .await
            {
                Ok(true) => {
                    stats.skipped_already_pending += 1;
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "pending lookup failed; keeping candidate");
                }
            }

            let classification = match (c.found_tracked, c.found_topic) {
                (true, true) => SourceClassification::Both,
                (true, false) => SourceClassification::SingleTracked,
                _ => SourceClassification::SingleTopic,
            };

            match self.scoring.score(
                &c.item,
                &user_topics,
                rating,
                classification,
                c.matched_topics,
                now_unix,
            ) {
                Ok(scored) => out.push(scored),
                Err(e) => {
                    stats.scoring_failures += 1;
                    warnings.push(format!("scoring failed for {}: {e}", c.item.external_id));
                }
            }
        }
        out
    }

    /// Optional cap on new pending suggestions per user (0 disables).
    async fn apply_pending_cap(
        &self,
        req: &DiscoveryRequest,
        candidates: &mut Vec<ScoredCandidate>,
    ) -> anyhow::Result<()> {
        if self.cfg.max_pending_suggestions == 0 {
            return Ok(());
        }
        let pending = self.store.count_pending(&req.user_id).await?;
        let allowed = (self.cfg.max_pending_suggestions as usize).saturating_sub(pending);
        candidates.truncate(allowed);
        Ok(())
    }

    fn pool_max_results(&self, req: &DiscoveryRequest) -> u32 {
        let source_count = (req.tracked_sources.len() + req.topic_queries.len()).max(1);
        let per_source =
            (self.sel_cfg.onboarding_pool_target / source_count).clamp(5, 50) as u32;
        req.max_results_per_source.unwrap_or(per_source)
    }
}

/// Validation failures are rejected before any network or budget activity.
fn validate(req: &DiscoveryRequest) -> Option<String> {
    if req.user_id.trim().is_empty() {
        return Some("user_id must not be empty".to_string());
    }
    if req.tracked_sources.is_empty() && req.topic_queries.is_empty() {
        return Some("at least one tracked source or topic query is required".to_string());
    }
    if let Some(n) = req.max_results_per_source {
        if n == 0 || n > 50 {
            return Some(format!("max_results_per_source out of range: {n}"));
        }
    }
    if req
        .topic_queries
        .iter()
        .any(|t| t.query.trim().is_empty())
    {
        return Some("topic queries must not be empty".to_string());
    }
    None
}
