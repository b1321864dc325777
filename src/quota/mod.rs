// src/quota/mod.rs
pub mod admission;
pub mod costs;
pub mod events;
pub mod ledger;
pub mod persist;

pub use admission::{AdmissionController, ReservationGrant, ReserveOutcome};
pub use costs::{CostTable, OperationKind};
pub use events::{QuotaEvent, ThresholdLevel};
pub use ledger::{BudgetSnapshot, Reservation, UsageSample};

use metrics::{describe_counter, describe_gauge};
use once_cell::sync::OnceCell;

/// One-time metrics registration (so series show up on /metrics).
pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_gauge!("quota_used_units", "Units consumed in the current budget day.");
        describe_gauge!("quota_limit_units", "Configured daily budget limit.");
        describe_gauge!(
            "quota_reserved_units",
            "Units held by unresolved reservations."
        );
        describe_gauge!(
            "quota_active_reservations",
            "Number of unresolved reservations."
        );
        describe_counter!(
            "quota_consumed_units_total",
            "Units consumed across budget days."
        );
        describe_counter!(
            "quota_denied_total",
            "Consume/reserve attempts denied for insufficient budget."
        );
        describe_counter!(
            "quota_reservations_granted_total",
            "Reservations granted."
        );
        describe_counter!(
            "quota_reservations_confirmed_total",
            "Reservations converted to consumed quota."
        );
        describe_counter!(
            "quota_reservations_released_total",
            "Reservations returned to the pool."
        );
        describe_counter!(
            "quota_reservations_expired_total",
            "Reservations swept after expiry."
        );
    });
}

/// Periodic proactive sweep so resets and expiries do not wait for traffic.
pub fn spawn_reset_sweep(
    controller: AdmissionController,
    interval_secs: u64,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker =
            tokio::time::interval(std::time::Duration::from_secs(interval_secs.max(1)));
        loop {
            ticker.tick().await;
            // snapshot() runs the lazy reset + expiry sweep internally.
            let snap = controller.snapshot();
            tracing::trace!(used = snap.used, reserved = snap.reserved, "quota sweep tick");
        }
    })
}
