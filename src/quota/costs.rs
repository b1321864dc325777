// src/quota/costs.rs
//! Static cost table: what each platform API operation charges against the
//! daily budget. Consulted by the ledger and by callers estimating cost
//! before committing to work.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Operation kinds metered by the platform API.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum OperationKind {
    /// A banded search query (the expensive one).
    SearchVideos,
    /// A batched video-details lookup.
    VideoDetails,
    /// A channel metadata lookup.
    ChannelDetails,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::SearchVideos => "search_videos",
            OperationKind::VideoDetails => "video_details",
            OperationKind::ChannelDetails => "channel_details",
        }
    }
}

/// Per-kind unit costs. Defaults mirror the platform's published pricing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostTable {
    costs: BTreeMap<OperationKind, u64>,
}

impl Default for CostTable {
    fn default() -> Self {
        let mut costs = BTreeMap::new();
        costs.insert(OperationKind::SearchVideos, 100);
        costs.insert(OperationKind::VideoDetails, 1);
        costs.insert(OperationKind::ChannelDetails, 1);
        Self { costs }
    }
}

impl CostTable {
    /// Unit cost of one operation of `kind`.
    pub fn unit_cost(&self, kind: OperationKind) -> u64 {
        // Every kind is seeded in the default table; an override table that
        // drops a kind falls back to 1 rather than 0 so nothing is ever free.
        self.costs.get(&kind).copied().unwrap_or(1).max(1)
    }

    /// Total cost of `count` operations of `kind`.
    pub fn cost_of(&self, kind: OperationKind, count: u64) -> u64 {
        self.unit_cost(kind).saturating_mul(count)
    }

    /// Total cost of a multi-step operation plan.
    pub fn cost_of_plan<'a, I>(&self, plan: I) -> u64
    where
        I: IntoIterator<Item = (&'a OperationKind, &'a u64)>,
    {
        plan.into_iter()
            .fold(0u64, |acc, (kind, count)| {
                acc.saturating_add(self.cost_of(*kind, *count))
            })
    }

    pub fn with_override(mut self, kind: OperationKind, cost: u64) -> Self {
        self.costs.insert(kind, cost.max(1));
        self
    }
}
