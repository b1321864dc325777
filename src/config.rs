// src/config.rs
//! Typed application configuration: TOML file + env overrides + built-in
//! defaults. Every tunable the engine recognizes lives here so the scoring
//! weights, banding thresholds, and quota numbers stay configuration, not
//! literals scattered through the code.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_PATH: &str = "config/video_scout.toml";
pub const ENV_CONFIG_PATH: &str = "VIDEO_SCOUT_CONFIG_PATH";
pub const ENV_DAILY_QUOTA: &str = "VIDEO_SCOUT_DAILY_QUOTA";
pub const ENV_STATE_PATH: &str = "VIDEO_SCOUT_STATE_PATH";
pub const ENV_BIND_ADDR: &str = "VIDEO_SCOUT_BIND_ADDR";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
    /// Daily budget in API cost units.
    pub daily_limit: u64,
    /// Usage percentage that fires the Warning threshold event.
    pub warning_threshold_pct: u8,
    /// Usage percentage that fires the Critical threshold event.
    pub critical_threshold_pct: u8,
    /// Hour of day (UTC) at which the budget resets.
    pub reset_hour_utc: u8,
    /// Seconds until an unconfirmed reservation expires.
    pub reservation_expiry_secs: u64,
    /// Persist the ledger snapshot across restarts.
    pub persist: bool,
    /// Snapshot file location.
    pub state_path: String,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            daily_limit: 10_000,
            warning_threshold_pct: 80,
            critical_threshold_pct: 95,
            reset_hour_utc: 8,
            reservation_expiry_secs: 300,
            persist: true,
            state_path: "state/quota_ledger.json".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Simultaneous in-flight source fetches.
    pub max_concurrent_fetches: usize,
    /// Fixed per-network-call timeout.
    pub call_timeout_secs: u64,
    /// Search cache TTL.
    pub cache_ttl_minutes: u64,
    /// Max results requested per source and band.
    pub max_results_per_source: u32,
    /// Lower bound of the medium duration band (seconds).
    pub medium_band_min_secs: u32,
    /// Upper bound of the medium duration band; anything longer is "long".
    pub medium_band_max_secs: u32,
    /// Candidates below this score are dropped from normal discovery runs.
    pub min_score: f64,
    /// Cap on new pending suggestions per run; 0 disables the cap.
    pub max_pending_suggestions: u32,
    /// Rating assumed for channels the user has not rated (topic finds).
    pub default_channel_rating: u8,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            max_concurrent_fetches: 4,
            call_timeout_secs: 30,
            cache_ttl_minutes: 15,
            max_results_per_source: 25,
            medium_band_min_secs: 240,
            medium_band_max_secs: 1200,
            min_score: 4.0,
            max_pending_suggestions: 0,
            default_channel_rating: 3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub rating_weight: f64,
    pub topic_weight: f64,
    pub recency_weight: f64,
    /// Flat bonus for items found via both a tracked channel and a topic.
    pub dual_source_bonus: f64,
    /// Half-life of the recency decay curve, in days.
    pub recency_half_life_days: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        // Active upstream balance; still being tuned, keep it configurable.
        Self {
            rating_weight: 0.60,
            topic_weight: 0.25,
            recency_weight: 0.15,
            dual_source_bonus: 1.0,
            recency_half_life_days: 30.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    /// Candidate pool size scored during onboarding.
    pub onboarding_pool_target: usize,
    /// Output quota of the onboarding selector.
    pub onboarding_quota: usize,
    /// Phase-1/2 relevance bar.
    pub high_relevance_score: f64,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            onboarding_pool_target: 100,
            onboarding_quota: 50,
            high_relevance_score: 7.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8000".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub quota: QuotaConfig,
    pub discovery: DiscoveryConfig,
    pub scoring: ScoringConfig,
    pub selection: SelectionConfig,
    pub server: ServerConfig,
}

impl AppConfig {
    /// Load from $VIDEO_SCOUT_CONFIG_PATH, then `config/video_scout.toml`,
    /// then built-in defaults. Env overrides are applied last.
    pub fn load() -> Result<Self> {
        let mut cfg = if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            Self::from_path(Path::new(&p))?
        } else {
            let default = PathBuf::from(DEFAULT_CONFIG_PATH);
            if default.exists() {
                Self::from_path(&default)?
            } else {
                Self::default()
            }
        };
        cfg.apply_env_overrides();
        cfg.validate();
        Ok(cfg)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let cfg: AppConfig = toml::from_str(s).context("parsing video-scout config TOML")?;
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) {
        if let Some(limit) = parse_env_u64(ENV_DAILY_QUOTA) {
            self.quota.daily_limit = limit;
        }
        if let Ok(p) = std::env::var(ENV_STATE_PATH) {
            if !p.trim().is_empty() {
                self.quota.state_path = p;
            }
        }
        if let Ok(a) = std::env::var(ENV_BIND_ADDR) {
            if !a.trim().is_empty() {
                self.server.bind_addr = a;
            }
        }
    }

    /// Harden odd values instead of failing startup.
    fn validate(&mut self) {
        self.quota.warning_threshold_pct = self.quota.warning_threshold_pct.clamp(1, 99);
        self.quota.critical_threshold_pct = self
            .quota
            .critical_threshold_pct
            .clamp(self.quota.warning_threshold_pct, 100);
        self.quota.reset_hour_utc %= 24;
        if self.discovery.max_concurrent_fetches == 0 {
            self.discovery.max_concurrent_fetches = 1;
        }
        if self.discovery.max_results_per_source == 0 {
            self.discovery.max_results_per_source = 1;
        }
        self.discovery.default_channel_rating = self.discovery.default_channel_rating.clamp(1, 5);
        if !self.scoring.recency_half_life_days.is_finite()
            || self.scoring.recency_half_life_days <= 0.0
        {
            self.scoring.recency_half_life_days = ScoringConfig::default().recency_half_life_days;
        }
    }
}

fn parse_env_u64(name: &str) -> Option<u64> {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
}
