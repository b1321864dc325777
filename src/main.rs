//! video-scout — Binary Entrypoint
//! Boots the Axum HTTP server, wiring the quota ledger, discovery engine,
//! background jobs, and middleware.
//!
//! See `README.md` for quickstart and `DESIGN.md` for architecture notes.

use std::sync::Arc;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use video_scout::api::{create_router, AppState};
use video_scout::config::AppConfig;
use video_scout::discovery::fetcher::SourceFetcher;
use video_scout::discovery::DiscoveryOrchestrator;
use video_scout::metrics::Metrics;
use video_scout::notify::{spawn_quota_listener, NotifierMux};
use video_scout::quota::{spawn_reset_sweep, AdmissionController};
use video_scout::scoring::ScoringEngine;
use video_scout::storage::MemoryStore;
use video_scout::transport::HttpVideoTransport;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("video_scout=info,warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = AppConfig::load()?;
    tracing::info!(
        daily_limit = cfg.quota.daily_limit,
        bind = %cfg.server.bind_addr,
        "starting video-scout"
    );

    // The ledger is constructed here and injected everywhere; there is no
    // ambient quota singleton.
    let admission = AdmissionController::from_config(&cfg.quota);

    // Quota events → fire-and-forget notifications.
    let events = admission.subscribe();
    let _notify_task =
        spawn_quota_listener(events, NotifierMux::from_env(), "VideoData API".to_string());

    // Proactive reset/expiry sweep besides the lazy per-call one.
    let _sweep_task = spawn_reset_sweep(admission.clone(), 60);

    let transport = Arc::new(HttpVideoTransport::from_env(cfg.discovery.call_timeout_secs));
    let fetcher = Arc::new(SourceFetcher::new(
        transport,
        admission.clone(),
        cfg.discovery.clone(),
    ));
    let store = Arc::new(MemoryStore::new());
    let orchestrator = Arc::new(DiscoveryOrchestrator::new(
        fetcher.clone(),
        admission.clone(),
        ScoringEngine::new(cfg.scoring.clone()),
        store.clone(),
        cfg.discovery.clone(),
        cfg.selection.clone(),
    ));

    let metrics = Metrics::init(cfg.discovery.cache_ttl_minutes);
    let state = AppState {
        admission,
        orchestrator,
        fetcher,
        store,
    };
    let router = create_router(state).merge(metrics.router());

    let listener = tokio::net::TcpListener::bind(&cfg.server.bind_addr).await?;
    axum::serve(listener, router).await?;
    Ok(())
}
