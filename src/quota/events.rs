// src/quota/events.rs
//! Threshold events emitted by the admission controller. Subscribers get an
//! unbounded channel; the controller never blocks on delivery and a closed
//! receiver is simply dropped from the registry on the next dispatch.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use super::ledger::BudgetSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum ThresholdLevel {
    Warning,
    Critical,
}

#[derive(Debug, Clone, Serialize)]
pub enum QuotaEvent {
    /// Usage crossed a configured percentage. Fired once per crossing.
    ThresholdReached {
        level: ThresholdLevel,
        snapshot: BudgetSnapshot,
    },
    /// The budget is fully consumed until `next_reset_at`.
    Exhausted {
        snapshot: BudgetSnapshot,
        next_reset_at: DateTime<Utc>,
    },
    /// The daily reset ran; all threshold levels are re-armed.
    BudgetReset { snapshot: BudgetSnapshot },
}

/// Explicit observer registry (replaces the original multicast delegate).
#[derive(Debug, Default)]
pub struct EventSubscribers {
    senders: Vec<UnboundedSender<QuotaEvent>>,
}

impl EventSubscribers {
    pub fn subscribe(&mut self) -> UnboundedReceiver<QuotaEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders.push(tx);
        rx
    }

    /// Fan an event out to every live subscriber, pruning closed ones.
    pub fn dispatch(&mut self, event: &QuotaEvent) {
        self.senders.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn len(&self) -> usize {
        self.senders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }
}
