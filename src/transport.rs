// src/transport.rs
//! Raw HTTP transport to the video platform API, behind a trait so the
//! discovery engine can be driven by in-memory fakes in tests. The platform
//! meters every call; callers are expected to clear admission *before*
//! invoking anything here.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// The details endpoint accepts at most this many IDs per call.
pub const MAX_DETAILS_BATCH: usize = 50;

/// Duration band used to diversify search results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, Deserialize)]
pub enum DurationBand {
    Short,
    Medium,
    Long,
}

impl DurationBand {
    /// Wire value for the search endpoint's duration filter.
    pub fn api_param(&self) -> &'static str {
        match self {
            DurationBand::Short => "short",
            DurationBand::Medium => "medium",
            DurationBand::Long => "long",
        }
    }
}

/// A bare search hit; view/like/comment counts and exact duration arrive
/// only with the follow-up details call.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSearchHit {
    pub external_id: String,
    pub title: String,
    pub channel_id: String,
    pub channel_name: String,
    pub published_at: u64,
    pub description: String,
    pub thumbnail_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawVideoDetails {
    pub external_id: String,
    pub duration_seconds: u32,
    pub view_count: u64,
    pub like_count: u64,
    pub comment_count: u64,
}

/// Typed transport failure. Quota exhaustion must be distinguishable from
/// ordinary upstream trouble so callers can stop spending immediately.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("quota exceeded or access forbidden (HTTP {status})")]
    QuotaExceeded { status: u16 },
    #[error("upstream HTTP error {status}")]
    Http { status: u16 },
    #[error("network error: {0}")]
    Network(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("too many ids in one details call: {0} > {MAX_DETAILS_BATCH}")]
    BatchTooLarge(usize),
}

impl TransportError {
    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, TransportError::QuotaExceeded { .. })
    }

    pub fn from_status(status: u16) -> Self {
        match status {
            403 | 429 => TransportError::QuotaExceeded { status },
            s => TransportError::Http { status: s },
        }
    }
}

#[async_trait]
pub trait VideoTransport: Send + Sync {
    async fn search_by_channel(
        &self,
        channel_id: &str,
        published_after: Option<DateTime<Utc>>,
        band: DurationBand,
        max_results: u32,
    ) -> Result<Vec<RawSearchHit>, TransportError>;

    async fn search_by_topic(
        &self,
        query: &str,
        published_after: Option<DateTime<Utc>>,
        band: DurationBand,
        max_results: u32,
    ) -> Result<Vec<RawSearchHit>, TransportError>;

    async fn video_details(
        &self,
        ids: &[String],
    ) -> Result<Vec<RawVideoDetails>, TransportError>;
}

/* ----------------------------
Wire DTOs (platform JSON)
---------------------------- */

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    id: SearchItemId,
    snippet: Snippet,
}

#[derive(Debug, Deserialize)]
struct SearchItemId {
    #[serde(rename = "videoId")]
    video_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Snippet {
    title: Option<String>,
    #[serde(rename = "channelId")]
    channel_id: Option<String>,
    #[serde(rename = "channelTitle")]
    channel_title: Option<String>,
    #[serde(rename = "publishedAt")]
    published_at: Option<String>,
    description: Option<String>,
    thumbnails: Option<Thumbnails>,
}

#[derive(Debug, Deserialize)]
struct Thumbnails {
    medium: Option<Thumbnail>,
    default: Option<Thumbnail>,
}

#[derive(Debug, Deserialize)]
struct Thumbnail {
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DetailsResponse {
    #[serde(default)]
    items: Vec<DetailsItem>,
}

#[derive(Debug, Deserialize)]
struct DetailsItem {
    id: String,
    #[serde(rename = "contentDetails")]
    content_details: Option<ContentDetails>,
    statistics: Option<Statistics>,
}

#[derive(Debug, Deserialize)]
struct ContentDetails {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Statistics {
    #[serde(rename = "viewCount")]
    view_count: Option<String>,
    #[serde(rename = "likeCount")]
    like_count: Option<String>,
    #[serde(rename = "commentCount")]
    comment_count: Option<String>,
}

/* ----------------------------
HTTP implementation
---------------------------- */

pub struct HttpVideoTransport {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    timeout: Duration,
}

impl HttpVideoTransport {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            timeout: Duration::from_secs(timeout_secs.max(1)),
        }
    }

    pub fn from_env(timeout_secs: u64) -> Self {
        let base = std::env::var("VIDEO_API_BASE_URL")
            .unwrap_or_else(|_| "https://www.googleapis.com/youtube/v3".to_string());
        let key = std::env::var("VIDEO_API_KEY").unwrap_or_default();
        Self::new(base, key, timeout_secs)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&'static str, String)],
    ) -> Result<T, TransportError> {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), path);
        let resp = self
            .client
            .get(&url)
            .query(query)
            .query(&[("key", self.api_key.as_str())])
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(TransportError::from_status(status.as_u16()));
        }
        resp.json::<T>()
            .await
            .map_err(|e| TransportError::Decode(e.to_string()))
    }

    async fn search(
        &self,
        mut query: Vec<(&'static str, String)>,
        published_after: Option<DateTime<Utc>>,
        band: DurationBand,
        max_results: u32,
    ) -> Result<Vec<RawSearchHit>, TransportError> {
        query.push(("part", "snippet".to_string()));
        query.push(("type", "video".to_string()));
        query.push(("order", "date".to_string()));
        query.push(("videoDuration", band.api_param().to_string()));
        query.push(("maxResults", max_results.min(50).to_string()));
        if let Some(after) = published_after {
            query.push(("publishedAfter", after.to_rfc3339()));
        }

        let resp: SearchResponse = self.get_json("search", &query).await?;
        Ok(resp.items.into_iter().filter_map(hit_from_item).collect())
    }
}

fn hit_from_item(item: SearchItem) -> Option<RawSearchHit> {
    let id = item.id.video_id?;
    let sn = item.snippet;
    Some(RawSearchHit {
        external_id: id,
        title: sn.title.unwrap_or_default(),
        channel_id: sn.channel_id.unwrap_or_default(),
        channel_name: sn.channel_title.unwrap_or_default(),
        published_at: sn
            .published_at
            .as_deref()
            .map(parse_rfc3339_to_unix)
            .unwrap_or(0),
        description: sn.description.unwrap_or_default(),
        thumbnail_url: sn.thumbnails.and_then(|t| {
            t.medium
                .and_then(|m| m.url)
                .or_else(|| t.default.and_then(|d| d.url))
        }),
    })
}

#[async_trait]
impl VideoTransport for HttpVideoTransport {
    async fn search_by_channel(
        &self,
        channel_id: &str,
        published_after: Option<DateTime<Utc>>,
        band: DurationBand,
        max_results: u32,
    ) -> Result<Vec<RawSearchHit>, TransportError> {
        self.search(
            vec![("channelId", channel_id.to_string())],
            published_after,
            band,
            max_results,
        )
        .await
    }

    async fn search_by_topic(
        &self,
        query: &str,
        published_after: Option<DateTime<Utc>>,
        band: DurationBand,
        max_results: u32,
    ) -> Result<Vec<RawSearchHit>, TransportError> {
        self.search(
            vec![("q", query.to_string())],
            published_after,
            band,
            max_results,
        )
        .await
    }

    async fn video_details(
        &self,
        ids: &[String],
    ) -> Result<Vec<RawVideoDetails>, TransportError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        if ids.len() > MAX_DETAILS_BATCH {
            return Err(TransportError::BatchTooLarge(ids.len()));
        }

        let query = vec![
            ("part", "contentDetails,statistics".to_string()),
            ("id", ids.join(",")),
        ];
        let resp: DetailsResponse = self.get_json("videos", &query).await?;
        Ok(resp
            .items
            .into_iter()
            .map(|it| RawVideoDetails {
                external_id: it.id,
                duration_seconds: it
                    .content_details
                    .and_then(|c| c.duration)
                    .as_deref()
                    .map(parse_iso8601_duration_secs)
                    .unwrap_or(0),
                view_count: parse_count(it.statistics.as_ref().and_then(|s| s.view_count.as_deref())),
                like_count: parse_count(it.statistics.as_ref().and_then(|s| s.like_count.as_deref())),
                comment_count: parse_count(
                    it.statistics.as_ref().and_then(|s| s.comment_count.as_deref()),
                ),
            })
            .collect())
    }
}

fn parse_count(raw: Option<&str>) -> u64 {
    raw.and_then(|s| s.parse::<u64>().ok()).unwrap_or(0)
}

pub fn parse_rfc3339_to_unix(ts: &str) -> u64 {
    OffsetDateTime::parse(ts, &Rfc3339)
        .ok()
        .map(|dt| dt.unix_timestamp())
        .and_then(|x| u64::try_from(x).ok())
        .unwrap_or(0)
}

/// Parse the platform's ISO-8601 duration ("PT1H2M3S") into seconds.
/// Unknown shapes yield 0 rather than failing the whole details batch.
pub fn parse_iso8601_duration_secs(raw: &str) -> u32 {
    let mut rest = raw.trim();
    if let Some(stripped) = rest.strip_prefix("PT") {
        rest = stripped;
    } else if let Some(stripped) = rest.strip_prefix('P') {
        // Day-resolution durations ("P1DT2H") are rare; handle the day part.
        rest = stripped;
    } else {
        return 0;
    }

    let mut total: u64 = 0;
    let mut num = String::new();
    for ch in rest.chars() {
        if ch.is_ascii_digit() {
            num.push(ch);
            continue;
        }
        let value: u64 = num.parse().unwrap_or(0);
        num.clear();
        match ch {
            'D' => total += value * 86_400,
            'H' => total += value * 3_600,
            'M' => total += value * 60,
            'S' => total += value,
            'T' => {}
            _ => return 0,
        }
    }
    u32::try_from(total).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfc3339_parses_to_unix_seconds() {
        assert_eq!(parse_rfc3339_to_unix("2026-01-02T03:04:05Z"), 1_767_323_045);
        assert_eq!(parse_rfc3339_to_unix("garbage"), 0);
    }

    #[test]
    fn iso8601_durations_cover_common_shapes() {
        assert_eq!(parse_iso8601_duration_secs("PT15M33S"), 933);
        assert_eq!(parse_iso8601_duration_secs("PT1H2M3S"), 3_723);
        assert_eq!(parse_iso8601_duration_secs("PT45S"), 45);
        assert_eq!(parse_iso8601_duration_secs("P1DT1H"), 90_000);
        assert_eq!(parse_iso8601_duration_secs("nonsense"), 0);
    }

    #[test]
    fn status_mapping_flags_quota_distinctly() {
        assert!(TransportError::from_status(403).is_quota_exceeded());
        assert!(TransportError::from_status(429).is_quota_exceeded());
        assert!(!TransportError::from_status(500).is_quota_exceeded());
        assert!(!TransportError::from_status(404).is_quota_exceeded());
    }

    #[test]
    fn search_json_maps_to_hits() {
        let body = serde_json::json!({
            "items": [
                {
                    "id": { "videoId": "abc123" },
                    "snippet": {
                        "title": "A video",
                        "channelId": "chan-1",
                        "channelTitle": "Chan One",
                        "publishedAt": "2026-07-01T10:00:00Z",
                        "description": "desc",
                        "thumbnails": { "medium": { "url": "https://img/1.jpg" } }
                    }
                },
                { "id": {}, "snippet": { "title": "playlist result, no videoId" } }
            ]
        });
        let resp: SearchResponse = serde_json::from_value(body).unwrap();
        let hits: Vec<_> = resp.items.into_iter().filter_map(hit_from_item).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].external_id, "abc123");
        assert_eq!(hits[0].channel_name, "Chan One");
        assert!(hits[0].published_at > 0);
    }

    #[test]
    fn details_json_tolerates_missing_statistics() {
        let body = serde_json::json!({
            "items": [
                {
                    "id": "abc123",
                    "contentDetails": { "duration": "PT10M" },
                    "statistics": { "viewCount": "1000", "likeCount": "50" }
                },
                { "id": "def456" }
            ]
        });
        let resp: DetailsResponse = serde_json::from_value(body).unwrap();
        assert_eq!(resp.items.len(), 2);
        assert_eq!(
            resp.items[0].content_details.as_ref().unwrap().duration.as_deref(),
            Some("PT10M")
        );
    }
}
