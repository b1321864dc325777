// src/selection.rs
//! First-contact (onboarding) selection: narrow a scored candidate pool to a
//! fixed quota in four ordered phases. Pure computation, no I/O.

use std::collections::HashSet;

use crate::config::{DiscoveryConfig, SelectionConfig};
use crate::scoring::ScoredCandidate;
use crate::transport::DurationBand;

/// Phased, tie-broken selection. Each phase fills remaining capacity before
/// the next one runs, and never re-picks an external ID a prior phase took:
/// 1. highly-relevant medium-duration items
/// 2. highly-relevant long-duration items
/// 3. remaining medium-duration items
/// 4. remaining long-duration items
/// Within a phase: score descending, newest-first tiebreak.
pub fn select_first_contact(
    pool: Vec<ScoredCandidate>,
    sel_cfg: &SelectionConfig,
    disc_cfg: &DiscoveryConfig,
) -> Vec<ScoredCandidate> {
    let quota = sel_cfg.onboarding_quota;
    if pool.len() <= quota {
        // Fewer candidates than the quota is not an error; take them all.
        let mut all = pool;
        sort_score_then_recency(&mut all);
        return all;
    }

    let high = sel_cfg.high_relevance_score;
    let mut selected: Vec<ScoredCandidate> = Vec::with_capacity(quota);
    let mut seen: HashSet<String> = HashSet::new();

    // (needs_high_relevance, wants_long_duration) per phase.
    let phases = [(true, false), (true, true), (false, false), (false, true)];

    for (needs_high, wants_long) in phases {
        if selected.len() >= quota {
            break;
        }
        let mut batch: Vec<&ScoredCandidate> = pool
            .iter()
            .filter(|c| {
                (!needs_high || c.score >= high)
                    && is_long(c, disc_cfg) == wants_long
                    && !seen.contains(&c.item.external_id)
            })
            .collect();
        batch.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.item.published_at.cmp(&a.item.published_at))
        });
        for c in batch {
            if selected.len() >= quota {
                break;
            }
            if !seen.insert(c.item.external_id.clone()) {
                continue;
            }
            selected.push(c.clone());
        }
    }

    selected
}

/// Degraded path for scoring failures mid-pass: plain score-then-recency
/// order over whatever scores were computed.
pub fn fallback_select(
    mut scored: Vec<ScoredCandidate>,
    quota: usize,
) -> Vec<ScoredCandidate> {
    sort_score_then_recency(&mut scored);
    scored.truncate(quota);
    scored
}

fn sort_score_then_recency(candidates: &mut [ScoredCandidate]) {
    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(b.item.published_at.cmp(&a.item.published_at))
    });
}

/// Items shorter than the medium band lower bound are grouped with medium;
/// the phase split only distinguishes long from everything else.
fn is_long(c: &ScoredCandidate, cfg: &DiscoveryConfig) -> bool {
    c.item.duration_band(cfg) == DurationBand::Long
}
