// src/scoring.rs
//! Relevance scoring: an explicit, auditable linear blend of channel rating,
//! topic keyword overlap, and recency. No trained model anywhere — every
//! component lands in the breakdown so a score can always be explained.

use anyhow::{bail, Result};
use once_cell::sync::OnceCell;
use regex::Regex;
use serde::Serialize;

use crate::config::ScoringConfig;
use crate::discovery::types::{DiscoveredItem, SourceClassification};

/// Neutral topic score for empty or all-stopword topics.
const NEUTRAL_TOPIC_SCORE: f64 = 5.0;
const TOPIC_SCORE_CAP: f64 = 10.0;
const TITLE_MATCH_POINTS: f64 = 1.5;
const DESCRIPTION_MATCH_POINTS: f64 = 0.5;
const PHRASE_MATCH_BONUS: f64 = 2.0;
const EXTRA_TITLE_MATCH_BONUS: f64 = 0.5;

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ScoreBreakdown {
    pub rating_component: f64,
    pub topic_component: f64,
    pub recency_component: f64,
    pub dual_source_bonus: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScoredCandidate {
    pub item: DiscoveredItem,
    pub score: f64,
    pub classification: SourceClassification,
    pub matched_topics: Vec<String>,
    pub breakdown: ScoreBreakdown,
}

#[derive(Debug, Clone)]
pub struct ScoringEngine {
    cfg: ScoringConfig,
}

impl ScoringEngine {
    pub fn new(cfg: ScoringConfig) -> Self {
        Self { cfg }
    }

    /// Score one discovered item. One-star channels are excluded upstream;
    /// seeing one here means the pipeline is broken, so this is an error,
    /// not a down-weight.
    pub fn score(
        &self,
        item: &DiscoveredItem,
        user_topics: &[String],
        channel_rating: u8,
        classification: SourceClassification,
        matched_topics: Vec<String>,
        now_unix: u64,
    ) -> Result<ScoredCandidate> {
        if channel_rating <= 1 {
            bail!(
                "channel {} rated {} reached scoring; one-star channels are filtered upstream",
                item.channel_id,
                channel_rating
            );
        }

        let rating10 = normalized_rating(channel_rating);
        let topic10 = user_topics
            .iter()
            .map(|t| topic_relevance(t, &item.title, &item.description))
            .fold(None::<f64>, |acc, s| Some(acc.map_or(s, |a| a.max(s))))
            .unwrap_or(NEUTRAL_TOPIC_SCORE);
        let age_secs = now_unix.saturating_sub(item.published_at);
        let recency10 = recency_decay(age_secs, self.cfg.recency_half_life_days);

        let dual_bonus = if classification == SourceClassification::Both {
            self.cfg.dual_source_bonus
        } else {
            0.0
        };

        let base = self.cfg.rating_weight * rating10
            + self.cfg.topic_weight * topic10
            + self.cfg.recency_weight * recency10;

        Ok(ScoredCandidate {
            item: item.clone(),
            score: base + dual_bonus,
            classification,
            matched_topics,
            breakdown: ScoreBreakdown {
                rating_component: rating10,
                topic_component: topic10,
                recency_component: recency10,
                dual_source_bonus: dual_bonus,
            },
        })
    }
}

/// Map a 1–5 star rating onto 0–10.
pub fn normalized_rating(stars: u8) -> f64 {
    (stars.clamp(1, 5) as f64 - 1.0) * 2.5
}

/// Exponential decay of publish age: 10 at zero age, halving every
/// `half_life_days`. Monotone decreasing, so newer always scores >= older.
pub fn recency_decay(age_secs: u64, half_life_days: f64) -> f64 {
    let age_days = age_secs as f64 / 86_400.0;
    10.0 * 0.5f64.powf(age_days / half_life_days.max(0.001))
}

/// Keyword-overlap topic relevance in 0–10.
///
/// Significant words are longer than two characters and not stopwords.
/// +1.5 per title match, +0.5 per description-only match, +2.0 for the whole
/// phrase appearing in the title, +0.5 per title match beyond the first,
/// capped at 10. Matching is singular/plural tolerant.
pub fn topic_relevance(topic: &str, title: &str, description: &str) -> f64 {
    let words = significant_words(topic);
    if words.is_empty() {
        return NEUTRAL_TOPIC_SCORE;
    }

    let title_tokens = stemmed_tokens(title);
    let desc_tokens = stemmed_tokens(description);

    let mut title_matches = 0usize;
    let mut desc_only_matches = 0usize;
    for w in &words {
        let stem = stem(w);
        if title_tokens.iter().any(|t| *t == stem) {
            title_matches += 1;
        } else if desc_tokens.iter().any(|t| *t == stem) {
            desc_only_matches += 1;
        }
    }

    let mut score = title_matches as f64 * TITLE_MATCH_POINTS
        + desc_only_matches as f64 * DESCRIPTION_MATCH_POINTS;

    if title_matches > 1 {
        score += (title_matches - 1) as f64 * EXTRA_TITLE_MATCH_BONUS;
    }

    // A one-word topic is not a phrase; the bonus is for multi-word runs.
    let phrase: Vec<String> = words.iter().map(|w| stem(w)).collect();
    if phrase.len() >= 2 && contains_consecutive(&title_tokens, &phrase) {
        score += PHRASE_MATCH_BONUS;
    }

    score.min(TOPIC_SCORE_CAP)
}

fn tokenize_lower(input: &str) -> Vec<String> {
    static RE: OnceCell<Regex> = OnceCell::new();
    let re = RE.get_or_init(|| Regex::new(r"(?u)\b\w+\b").expect("tokenizer regex"));
    re.find_iter(input)
        .map(|m| m.as_str().to_lowercase())
        .collect()
}

fn stemmed_tokens(input: &str) -> Vec<String> {
    tokenize_lower(input).iter().map(|t| stem(t)).collect()
}

/// Significant words of a topic: length > 2, not a stopword.
fn significant_words(topic: &str) -> Vec<String> {
    tokenize_lower(topic)
        .into_iter()
        .filter(|w| w.chars().count() > 2 && !is_stopword(w))
        .collect()
}

fn is_stopword(w: &str) -> bool {
    matches!(
        w,
        "the" | "and" | "for" | "with" | "from" | "that" | "this" | "are" | "was" | "were"
            | "has" | "have" | "had" | "can" | "will" | "not" | "you" | "your" | "its" | "our"
            | "all" | "any" | "about" | "into" | "over"
    )
}

/// Singular/plural tolerant stem: strip one trailing `s` from words long
/// enough for it to be a plural marker.
fn stem(w: &str) -> String {
    if w.chars().count() > 3 && w.ends_with('s') && !w.ends_with("ss") {
        w[..w.len() - 1].to_string()
    } else {
        w.to_string()
    }
}

fn contains_consecutive(haystack: &[String], needle: &[String]) -> bool {
    if needle.is_empty() || needle.len() > haystack.len() {
        return false;
    }
    haystack.windows(needle.len()).any(|w| w == needle)
}
