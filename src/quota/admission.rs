// src/quota/admission.rs
//! Admission control over the daily API budget: try/reserve/confirm/release
//! semantics plus edge-triggered threshold events. One mutex guards the
//! numeric ledger state, the reservation map, and the subscriber registry —
//! they are a single shared resource, not independent collections.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use metrics::{counter, gauge};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::UnboundedReceiver;

use crate::config::QuotaConfig;

use super::costs::{CostTable, OperationKind};
use super::events::{EventSubscribers, QuotaEvent};
use super::ledger::{
    BudgetSnapshot, ConsumeOutcome, LedgerState, Reservation,
    UsageSample,
};
use super::persist::SnapshotStore;

/// Granted reservation handle returned to callers.
#[derive(Debug, Clone, Serialize)]
pub struct ReservationGrant {
    pub token: String,
    pub reserved_amount: u64,
    pub expires_at: DateTime<Utc>,
}

/// Reserve outcome; insufficient budget is an expected value, not an error.
#[derive(Debug, Clone)]
pub enum ReserveOutcome {
    Granted(ReservationGrant),
    InsufficientBudget { requested: u64, available: u64 },
}

impl ReserveOutcome {
    pub fn granted(self) -> Option<ReservationGrant> {
        match self {
            ReserveOutcome::Granted(g) => Some(g),
            ReserveOutcome::InsufficientBudget { .. } => None,
        }
    }
}

struct Inner {
    ledger: LedgerState,
    costs: CostTable,
    subscribers: EventSubscribers,
    store: Option<SnapshotStore>,
    reservation_expiry: ChronoDuration,
    token_seq: u64,
}

/// Clone-able handle; all clones share one guarded state.
#[derive(Clone)]
pub struct AdmissionController {
    inner: Arc<Mutex<Inner>>,
}

impl AdmissionController {
    /// Build from configuration, restoring the persisted snapshot when
    /// present (a stale `reset_at` resets immediately on load).
    pub fn from_config(cfg: &QuotaConfig) -> Self {
        let store = cfg.persist.then(|| SnapshotStore::new(&cfg.state_path));
        let now = Utc::now();
        let ledger = match store.as_ref().and_then(|s| s.load()) {
            Some(p) => LedgerState::from_persisted(
                p,
                cfg.reset_hour_utc,
                cfg.warning_threshold_pct,
                cfg.critical_threshold_pct,
                now,
            ),
            None => LedgerState::new(
                cfg.daily_limit,
                cfg.reset_hour_utc,
                cfg.warning_threshold_pct,
                cfg.critical_threshold_pct,
            ),
        };
        Self::with_parts(ledger, CostTable::default(), store, cfg.reservation_expiry_secs)
    }

    pub fn with_parts(
        ledger: LedgerState,
        costs: CostTable,
        store: Option<SnapshotStore>,
        reservation_expiry_secs: u64,
    ) -> Self {
        super::ensure_metrics_described();
        let ctrl = Self {
            inner: Arc::new(Mutex::new(Inner {
                ledger,
                costs,
                subscribers: EventSubscribers::default(),
                store,
                reservation_expiry: ChronoDuration::seconds(reservation_expiry_secs.max(1) as i64),
                token_seq: 0,
            })),
        };
        ctrl.publish_gauges();
        ctrl
    }

    /// In-memory controller for tests and embedded use.
    pub fn ephemeral(limit: u64) -> Self {
        Self::with_parts(
            LedgerState::new(limit, 8, 80, 95),
            CostTable::default(),
            None,
            300,
        )
    }

    /// Register an observer; events arrive on an unbounded channel and the
    /// controller never blocks on delivery.
    pub fn subscribe(&self) -> UnboundedReceiver<QuotaEvent> {
        let mut inner = self.lock();
        inner.subscribers.subscribe()
    }

    /// Current snapshot. Opportunistically applies the daily reset first.
    pub fn snapshot(&self) -> BudgetSnapshot {
        let mut inner = self.lock();
        Self::housekeep(&mut inner);
        let snap = inner.ledger.snapshot();
        drop(inner);
        self.publish_gauges();
        snap
    }

    pub fn usage_history(&self) -> Vec<UsageSample> {
        let inner = self.lock();
        inner.ledger.history().copied().collect()
    }

    pub fn active_reservations(&self) -> Vec<Reservation> {
        let mut inner = self.lock();
        Self::housekeep(&mut inner);
        inner.ledger.reservations().cloned().collect()
    }

    /// Read-only affordability estimate; consumes nothing.
    pub fn can_afford(&self, kind: OperationKind, count: u64) -> bool {
        let mut inner = self.lock();
        Self::housekeep(&mut inner);
        let cost = inner.costs.cost_of(kind, count);
        cost <= inner.ledger.available()
    }

    pub fn unit_cost(&self, kind: OperationKind) -> u64 {
        self.lock().costs.unit_cost(kind)
    }

    /// Atomically consume if affordable, else a no-op returning false.
    pub fn try_consume(&self, kind: OperationKind, count: u64) -> bool {
        let mut inner = self.lock();
        Self::housekeep(&mut inner);
        let now = Utc::now();
        let outcome = {
            let Inner { ledger, costs, .. } = &mut *inner;
            ledger.consume(kind, count, costs, now)
        };
        match outcome {
            ConsumeOutcome::Consumed { cost } => {
                counter!("quota_consumed_units_total").increment(cost);
                Self::after_mutation(&mut inner);
                drop(inner);
                self.publish_gauges();
                true
            }
            ConsumeOutcome::InsufficientBudget { requested, available } => {
                counter!("quota_denied_total").increment(1);
                tracing::debug!(
                    kind = kind.as_str(),
                    requested,
                    available,
                    "admission denied: insufficient budget"
                );
                false
            }
        }
    }

    /// Pre-allocate budget for a multi-step operation. The hold counts
    /// against availability until confirmed, released, or expired.
    pub fn reserve(&self, operations: &BTreeMap<OperationKind, u64>) -> ReserveOutcome {
        let mut inner = self.lock();
        Self::housekeep(&mut inner);
        let now = Utc::now();

        let requested = inner.costs.cost_of_plan(operations.iter());
        let available = inner.ledger.available();
        if requested == 0 || requested > available {
            counter!("quota_denied_total").increment(1);
            return ReserveOutcome::InsufficientBudget {
                requested,
                available,
            };
        }

        inner.token_seq = inner.token_seq.wrapping_add(1);
        let token = mint_token(inner.token_seq, now);
        let expires_at = now + inner.reservation_expiry;
        inner.ledger.insert_reservation(Reservation {
            token: token.clone(),
            requested_cost: requested,
            created_at: now,
            expires_at,
            operations: operations.clone(),
        });
        counter!("quota_reservations_granted_total").increment(1);
        Self::after_mutation(&mut inner);
        drop(inner);
        self.publish_gauges();

        ReserveOutcome::Granted(ReservationGrant {
            token,
            reserved_amount: requested,
            expires_at,
        })
    }

    /// Convert a reservation into consumed quota. Resolving an unknown or
    /// already-resolved token is a soft failure (false), never an error.
    pub fn confirm(&self, token: &str) -> bool {
        let mut inner = self.lock();
        Self::housekeep(&mut inner);
        let Some(r) = inner.ledger.take_reservation(token) else {
            tracing::debug!(token = %anon_token(token), "confirm on unknown/resolved token");
            return false;
        };
        inner.ledger.charge(r.requested_cost, Utc::now());
        counter!("quota_reservations_confirmed_total").increment(1);
        Self::after_mutation(&mut inner);
        drop(inner);
        self.publish_gauges();
        true
    }

    /// Return a reservation's hold to the pool. Soft-fails like `confirm`.
    pub fn release(&self, token: &str) -> bool {
        let mut inner = self.lock();
        Self::housekeep(&mut inner);
        if inner.ledger.take_reservation(token).is_none() {
            tracing::debug!(token = %anon_token(token), "release on unknown/resolved token");
            return false;
        }
        counter!("quota_reservations_released_total").increment(1);
        Self::after_mutation(&mut inner);
        drop(inner);
        self.publish_gauges();
        true
    }

    /// Debit one prepaid call from a live reservation's per-kind allowance.
    /// False when the token is gone or the allowance ran out.
    pub fn debit_reservation(&self, token: &str, kind: OperationKind, count: u64) -> bool {
        let mut inner = self.lock();
        Self::housekeep(&mut inner);
        let Some(r) = inner.ledger.reservation_mut(token) else {
            return false;
        };
        match r.operations.get_mut(&kind) {
            Some(remaining) if *remaining >= count => {
                *remaining -= count;
                true
            }
            _ => false,
        }
    }

    // --- internals ---

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A panic while holding this lock is already a bug; keep serving.
        match self.inner.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Lazy reset + expiry sweep, fired at the top of every operation.
    fn housekeep(inner: &mut Inner) {
        let now = Utc::now();
        let swept = inner.ledger.sweep_expired(now);
        if swept > 0 {
            counter!("quota_reservations_expired_total").increment(swept as u64);
        }
        if inner.ledger.reset_if_due(now) {
            tracing::info!(
                next_reset = %inner.ledger.reset_at(),
                "daily quota reset applied"
            );
            let ev = QuotaEvent::BudgetReset {
                snapshot: inner.ledger.snapshot(),
            };
            inner.subscribers.dispatch(&ev);
            if let Some(store) = &inner.store {
                store.save_best_effort(&inner.ledger.to_persisted());
            }
        }
    }

    /// Threshold dispatch + persistence after any mutation.
    fn after_mutation(inner: &mut Inner) {
        for ev in inner.ledger.threshold_crossings() {
            match &ev {
                QuotaEvent::Exhausted { next_reset_at, .. } => {
                    // Expected condition: surfaced, never logged as an error.
                    tracing::info!(next_reset = %next_reset_at, "daily quota exhausted");
                }
                QuotaEvent::ThresholdReached { level, snapshot } => {
                    tracing::info!(?level, used = snapshot.used, limit = snapshot.limit, "quota threshold crossed");
                }
                QuotaEvent::BudgetReset { .. } => {}
            }
            inner.subscribers.dispatch(&ev);
        }
        if let Some(store) = &inner.store {
            store.save_best_effort(&inner.ledger.to_persisted());
        }
    }

    fn publish_gauges(&self) {
        let inner = self.lock();
        let snap = inner.ledger.snapshot();
        gauge!("quota_used_units").set(snap.used as f64);
        gauge!("quota_limit_units").set(snap.limit as f64);
        gauge!("quota_reserved_units").set(snap.reserved as f64);
        gauge!("quota_active_reservations").set(snap.active_reservations as f64);
    }
}

/// Opaque single-use token: short sha2 hex over a process-local sequence.
fn mint_token(seq: u64, now: DateTime<Utc>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(seq.to_le_bytes());
    hasher.update(now.timestamp_nanos_opt().unwrap_or_default().to_le_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(16);
    for b in digest.iter().take(8) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

/// Never log full tokens; a short prefix is enough to correlate.
fn anon_token(token: &str) -> String {
    token.chars().take(6).collect()
}
