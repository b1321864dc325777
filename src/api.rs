// src/api.rs
use std::sync::Arc;

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::CorsLayer;

use crate::discovery::fetcher::SourceFetcher;
use crate::discovery::types::{CancelFlag, DiscoveryReport, DiscoveryRequest};
use crate::discovery::DiscoveryOrchestrator;
use crate::quota::{AdmissionController, UsageSample};
use crate::storage::SuggestionStore;

#[derive(Clone)]
pub struct AppState {
    pub admission: AdmissionController,
    pub orchestrator: Arc<DiscoveryOrchestrator>,
    pub fetcher: Arc<SourceFetcher>,
    pub store: Arc<dyn SuggestionStore>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/quota", get(quota_status))
        .route("/discover", post(discover))
        .route("/onboard", post(onboard))
        .route("/debug/cache", get(debug_cache))
        .route("/debug/usage-history", get(debug_usage_history))
        .route("/debug/reservations", get(debug_reservations))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

#[derive(serde::Serialize)]
struct QuotaStatus {
    limit: u64,
    used: u64,
    reserved: u64,
    available: u64,
    used_pct: f64,
    reset_at: String,
    active_reservations: usize,
}

async fn quota_status(State(state): State<AppState>) -> Json<QuotaStatus> {
    let snap = state.admission.snapshot();
    Json(QuotaStatus {
        limit: snap.limit,
        used: snap.used,
        reserved: snap.reserved,
        available: snap.available(),
        used_pct: snap.used_pct(),
        reset_at: snap.reset_at.to_rfc3339(),
        active_reservations: snap.active_reservations,
    })
}

async fn discover(
    State(state): State<AppState>,
    Json(req): Json<DiscoveryRequest>,
) -> Json<DiscoveryReport> {
    let cancel = CancelFlag::new();
    let mut report = state.orchestrator.discover(&req, &cancel).await;
    persist_kept(&state, &mut report).await;
    Json(report)
}

async fn onboard(
    State(state): State<AppState>,
    Json(req): Json<DiscoveryRequest>,
) -> Json<DiscoveryReport> {
    let cancel = CancelFlag::new();
    let mut report = state.orchestrator.onboard(&req, &cancel).await;
    persist_kept(&state, &mut report).await;
    Json(report)
}

/// The engine hands back candidates; whatever the caller keeps goes through
/// the storage collaborator here. Failures downgrade to warnings.
async fn persist_kept(state: &AppState, report: &mut DiscoveryReport) {
    for c in &report.candidates {
        if let Err(e) = state
            .store
            .ensure_source_exists(&c.item.channel_id, &c.item.channel_name)
            .await
        {
            report.warnings.push(format!(
                "persist source {} failed: {e}",
                c.item.channel_id
            ));
            continue;
        }
        if let Err(e) = state.store.ensure_item_exists(&c.item).await {
            report
                .warnings
                .push(format!("persist item {} failed: {e}", c.item.external_id));
        }
    }
}

#[derive(serde::Serialize)]
struct CacheInfo {
    entries: usize,
}

async fn debug_cache(State(state): State<AppState>) -> Json<CacheInfo> {
    Json(CacheInfo {
        entries: state.fetcher.cache_len(),
    })
}

async fn debug_usage_history(State(state): State<AppState>) -> Json<Vec<UsageSample>> {
    Json(state.admission.usage_history())
}

#[derive(serde::Serialize)]
struct ReservationInfo {
    active: usize,
    reserved_units: u64,
}

async fn debug_reservations(State(state): State<AppState>) -> Json<ReservationInfo> {
    let snap = state.admission.snapshot();
    Json(ReservationInfo {
        active: snap.active_reservations,
        reserved_units: snap.reserved,
    })
}
