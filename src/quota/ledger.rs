// src/quota/ledger.rs
//! Budget ledger state: consumed units, active reservations, lazy daily
//! reset, and a rolling usage history. All mutation happens under the
//! admission controller's mutex; nothing in here locks on its own.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};

use super::costs::{CostTable, OperationKind};
use super::events::{QuotaEvent, ThresholdLevel};

/// Samples kept in the rolling usage history.
const HISTORY_CAP: usize = 500;

/// Point-in-time view of the budget, safe to hand to callers and events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetSnapshot {
    pub limit: u64,
    pub used: u64,
    /// Sum of all unresolved reservation holds.
    pub reserved: u64,
    pub reset_at: DateTime<Utc>,
    pub active_reservations: usize,
}

impl BudgetSnapshot {
    /// Units still available for direct consumption or new reservations.
    pub fn available(&self) -> u64 {
        self.limit.saturating_sub(self.used).saturating_sub(self.reserved)
    }

    pub fn used_pct(&self) -> f64 {
        if self.limit == 0 {
            return 100.0;
        }
        (self.used as f64) * 100.0 / (self.limit as f64)
    }
}

/// A pre-allocated hold on budget for a multi-call operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reservation {
    pub token: String,
    pub requested_cost: u64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Remaining per-kind call allowance (debited in prepaid fetches).
    pub operations: BTreeMap<OperationKind, u64>,
}

impl Reservation {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct UsageSample {
    pub ts: DateTime<Utc>,
    pub used: u64,
}

/// Which threshold levels already fired in the current budget day.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct FiredLevels {
    pub warning: bool,
    pub critical: bool,
    pub exhausted: bool,
}

/// Outcome of a consume attempt. Insufficient budget is a normal outcome,
/// not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeOutcome {
    Consumed { cost: u64 },
    InsufficientBudget { requested: u64, available: u64 },
}

impl ConsumeOutcome {
    pub fn is_consumed(&self) -> bool {
        matches!(self, ConsumeOutcome::Consumed { .. })
    }
}

#[derive(Debug)]
pub struct LedgerState {
    limit: u64,
    used: u64,
    reset_at: DateTime<Utc>,
    reset_hour_utc: u8,
    warning_pct: u8,
    critical_pct: u8,
    reservations: HashMap<String, Reservation>,
    history: VecDeque<UsageSample>,
    fired: FiredLevels,
}

impl LedgerState {
    pub fn new(limit: u64, reset_hour_utc: u8, warning_pct: u8, critical_pct: u8) -> Self {
        let now = Utc::now();
        Self {
            limit,
            used: 0,
            reset_at: next_reset_after(now, reset_hour_utc),
            reset_hour_utc,
            warning_pct,
            critical_pct,
            reservations: HashMap::new(),
            history: VecDeque::new(),
            fired: FiredLevels::default(),
        }
    }

    pub fn snapshot(&self) -> BudgetSnapshot {
        BudgetSnapshot {
            limit: self.limit,
            used: self.used,
            reserved: self.reserved_total(),
            reset_at: self.reset_at,
            active_reservations: self.reservations.len(),
        }
    }

    pub fn reserved_total(&self) -> u64 {
        self.reservations.values().map(|r| r.requested_cost).sum()
    }

    pub fn available(&self) -> u64 {
        self.limit
            .saturating_sub(self.used)
            .saturating_sub(self.reserved_total())
    }

    pub fn used(&self) -> u64 {
        self.used
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn reset_at(&self) -> DateTime<Utc> {
        self.reset_at
    }

    pub fn history(&self) -> impl Iterator<Item = &UsageSample> {
        self.history.iter()
    }

    pub fn reservations(&self) -> impl Iterator<Item = &Reservation> {
        self.reservations.values()
    }

    /// Lazy reset: the first caller past `reset_at` zeroes the day. Expired
    /// reservations are dropped; live ones keep their hold into the new day.
    pub fn reset_if_due(&mut self, now: DateTime<Utc>) -> bool {
        if now < self.reset_at {
            return false;
        }
        self.used = 0;
        self.sweep_expired(now);
        self.reset_at = next_reset_after(now, self.reset_hour_utc);
        self.fired = FiredLevels::default();
        self.record_sample(now);
        true
    }

    /// Drop expired reservations, silently releasing their hold.
    pub fn sweep_expired(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.reservations.len();
        self.reservations.retain(|_, r| !r.is_expired(now));
        before - self.reservations.len()
    }

    /// Atomic consume: succeeds only if the full cost fits beside `used`
    /// and every unresolved reservation hold.
    pub fn consume(
        &mut self,
        kind: OperationKind,
        count: u64,
        costs: &CostTable,
        now: DateTime<Utc>,
    ) -> ConsumeOutcome {
        let cost = costs.cost_of(kind, count);
        let available = self.available();
        if cost > available {
            return ConsumeOutcome::InsufficientBudget {
                requested: cost,
                available,
            };
        }
        self.used = self.used.saturating_add(cost);
        self.record_sample(now);
        ConsumeOutcome::Consumed { cost }
    }

    /// Charge an already-held reservation amount as consumed.
    pub fn charge(&mut self, cost: u64, now: DateTime<Utc>) {
        self.used = self.used.saturating_add(cost).min(self.limit);
        self.record_sample(now);
    }

    pub fn insert_reservation(&mut self, r: Reservation) {
        self.reservations.insert(r.token.clone(), r);
    }

    pub fn take_reservation(&mut self, token: &str) -> Option<Reservation> {
        self.reservations.remove(token)
    }

    pub fn reservation_mut(&mut self, token: &str) -> Option<&mut Reservation> {
        self.reservations.get_mut(token)
    }

    /// Edge-triggered threshold check. Returns the events to dispatch for
    /// crossings that happened since the last call; each level fires at most
    /// once per budget day.
    pub fn threshold_crossings(&mut self) -> Vec<QuotaEvent> {
        let mut out = Vec::new();
        let pct = self.snapshot().used_pct();

        if !self.fired.warning && pct >= self.warning_pct as f64 {
            self.fired.warning = true;
            out.push(QuotaEvent::ThresholdReached {
                level: ThresholdLevel::Warning,
                snapshot: self.snapshot(),
            });
        }
        if !self.fired.critical && pct >= self.critical_pct as f64 {
            self.fired.critical = true;
            out.push(QuotaEvent::ThresholdReached {
                level: ThresholdLevel::Critical,
                snapshot: self.snapshot(),
            });
        }
        if !self.fired.exhausted && self.used >= self.limit {
            self.fired.exhausted = true;
            out.push(QuotaEvent::Exhausted {
                snapshot: self.snapshot(),
                next_reset_at: self.reset_at,
            });
        }
        out
    }

    fn record_sample(&mut self, now: DateTime<Utc>) {
        self.history.push_back(UsageSample {
            ts: now,
            used: self.used,
        });
        while self.history.len() > HISTORY_CAP {
            self.history.pop_front();
        }
    }

    // --- persistence plumbing ---

    pub fn to_persisted(&self) -> PersistedLedger {
        PersistedLedger {
            limit: self.limit,
            used: self.used,
            reset_at: self.reset_at,
            reservations: self.reservations.values().cloned().collect(),
            history: self.history.iter().copied().collect(),
            fired: self.fired,
        }
    }

    /// Rebuild state from a persisted snapshot. If the persisted `reset_at`
    /// has already passed, an immediate reset applies before the state is
    /// considered valid.
    pub fn from_persisted(
        p: PersistedLedger,
        reset_hour_utc: u8,
        warning_pct: u8,
        critical_pct: u8,
        now: DateTime<Utc>,
    ) -> Self {
        let mut state = Self {
            limit: p.limit,
            used: p.used,
            reset_at: p.reset_at,
            reset_hour_utc,
            warning_pct,
            critical_pct,
            reservations: p
                .reservations
                .into_iter()
                .map(|r| (r.token.clone(), r))
                .collect(),
            history: p.history.into_iter().collect(),
            fired: p.fired,
        };
        state.sweep_expired(now);
        state.reset_if_due(now);
        state
    }
}

/// On-disk shape of the ledger snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedLedger {
    pub limit: u64,
    pub used: u64,
    pub reset_at: DateTime<Utc>,
    #[serde(default)]
    pub reservations: Vec<Reservation>,
    #[serde(default)]
    pub history: Vec<UsageSample>,
    #[serde(default)]
    pub fired: FiredLevels,
}

/// First wall-clock instant strictly after `now` where the UTC hour equals
/// `reset_hour_utc` on the hour.
pub fn next_reset_after(now: DateTime<Utc>, reset_hour_utc: u8) -> DateTime<Utc> {
    let today_reset = now
        .date_naive()
        .and_hms_opt(reset_hour_utc as u32 % 24, 0, 0)
        .expect("valid reset hour")
        .and_utc();
    if now < today_reset {
        today_reset
    } else {
        today_reset + ChronoDuration::days(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Timelike};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 5, 12, 0, 0).unwrap()
    }

    fn ledger(limit: u64) -> LedgerState {
        let mut l = LedgerState::new(limit, 8, 80, 95);
        // Pin reset_at past the test clock so lazy reset stays quiet.
        l.reset_at = now() + ChronoDuration::hours(20);
        l
    }

    #[test]
    fn consume_accumulates_and_respects_limit() {
        let costs = CostTable::default();
        let mut l = ledger(250);
        assert!(l
            .consume(OperationKind::SearchVideos, 2, &costs, now())
            .is_consumed());
        assert_eq!(l.used(), 200);
        let out = l.consume(OperationKind::SearchVideos, 1, &costs, now());
        assert_eq!(
            out,
            ConsumeOutcome::InsufficientBudget {
                requested: 100,
                available: 50
            }
        );
        assert_eq!(l.used(), 200);
    }

    #[test]
    fn reservations_block_direct_consumption() {
        let costs = CostTable::default();
        let mut l = ledger(300);
        l.insert_reservation(Reservation {
            token: "t1".into(),
            requested_cost: 250,
            created_at: now(),
            expires_at: now() + ChronoDuration::minutes(5),
            operations: BTreeMap::new(),
        });
        // 300 - 250 reserved leaves 50; a search (100) must not fit.
        assert!(!l
            .consume(OperationKind::SearchVideos, 1, &costs, now())
            .is_consumed());
        assert!(l
            .consume(OperationKind::VideoDetails, 50, &costs, now())
            .is_consumed());
    }

    #[test]
    fn expired_reservations_release_their_hold() {
        let costs = CostTable::default();
        let mut l = ledger(300);
        l.insert_reservation(Reservation {
            token: "t1".into(),
            requested_cost: 250,
            created_at: now() - ChronoDuration::minutes(10),
            expires_at: now() - ChronoDuration::minutes(5),
            operations: BTreeMap::new(),
        });
        assert_eq!(l.sweep_expired(now()), 1);
        assert!(l
            .consume(OperationKind::SearchVideos, 1, &costs, now())
            .is_consumed());
    }

    #[test]
    fn reset_zeroes_used_and_rearms_thresholds() {
        let costs = CostTable::default();
        let mut l = ledger(100);
        l.consume(OperationKind::SearchVideos, 1, &costs, now());
        assert!(!l.threshold_crossings().is_empty());

        let past_reset = l.reset_at() + ChronoDuration::seconds(1);
        assert!(l.reset_if_due(past_reset));
        assert_eq!(l.used(), 0);
        assert!(l.reset_at() > past_reset);
        // A second opportunistic call is a no-op.
        assert!(!l.reset_if_due(past_reset));
    }

    #[test]
    fn threshold_crossings_fire_once_per_level() {
        let costs = CostTable::default();
        let mut l = ledger(1000);
        l.consume(OperationKind::SearchVideos, 8, &costs, now()); // 80%
        let first = l.threshold_crossings();
        assert_eq!(first.len(), 1);
        assert!(matches!(
            first[0],
            QuotaEvent::ThresholdReached {
                level: ThresholdLevel::Warning,
                ..
            }
        ));
        // Still above warning, nothing new.
        assert!(l.threshold_crossings().is_empty());

        l.consume(OperationKind::SearchVideos, 2, &costs, now()); // 100%
        let second = l.threshold_crossings();
        assert_eq!(second.len(), 2); // Critical + Exhausted in one jump
        assert!(matches!(
            second[0],
            QuotaEvent::ThresholdReached {
                level: ThresholdLevel::Critical,
                ..
            }
        ));
        assert!(matches!(second[1], QuotaEvent::Exhausted { .. }));
        assert!(l.threshold_crossings().is_empty());
    }

    #[test]
    fn persisted_roundtrip_with_stale_reset_applies_reset() {
        let costs = CostTable::default();
        let mut l = ledger(1000);
        l.consume(OperationKind::SearchVideos, 3, &costs, now());
        let mut p = l.to_persisted();
        // Pretend the snapshot was written yesterday.
        p.reset_at = now() - ChronoDuration::hours(1);

        let restored = LedgerState::from_persisted(p, 8, 80, 95, now());
        assert_eq!(restored.used(), 0, "stale reset_at must reset on load");
        assert!(restored.reset_at() > now());
    }

    #[test]
    fn next_reset_rolls_to_tomorrow_when_past() {
        let at_noon = now();
        let r = next_reset_after(at_noon, 8);
        assert_eq!(r.hour(), 8);
        assert!(r > at_noon);
        assert_eq!((r - at_noon).num_hours(), 20);
    }
}
