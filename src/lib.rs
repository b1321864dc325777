// src/lib.rs
// Public library surface for integration tests (and potential reuse).

pub mod api;
pub mod config;
pub mod discovery;
pub mod metrics;
pub mod notify;
pub mod quota;
pub mod scoring;
pub mod selection;
pub mod storage;
pub mod transport;

// ---- Re-exports for stable public API ----
pub use crate::api::{create_router, AppState};
pub use crate::config::AppConfig;
pub use crate::discovery::types::{CancelFlag, DiscoveryReport, DiscoveryRequest};
pub use crate::discovery::DiscoveryOrchestrator;
pub use crate::notify::{NotificationEvent, Notifier, NotifierMux};
pub use crate::quota::{AdmissionController, BudgetSnapshot, OperationKind, QuotaEvent};
pub use crate::scoring::{ScoredCandidate, ScoringEngine};
