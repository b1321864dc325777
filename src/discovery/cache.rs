// src/discovery/cache.rs
//! Short-lived search cache so repeated discovery within a few minutes does
//! not re-spend quota. Absolute TTL, no sliding refresh.

use metrics::counter;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::types::DiscoveredItem;

/// Cache key: one logical source fetch.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub source_key: String,
    pub since_unix: u64,
    pub max_results: u32,
}

struct Entry {
    items: Vec<DiscoveredItem>,
    inserted_at: Instant,
}

pub struct SearchCache {
    inner: Mutex<HashMap<CacheKey, Entry>>,
    ttl: Duration,
}

impl SearchCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    pub fn with_ttl_minutes(minutes: u64) -> Self {
        Self::new(Duration::from_secs(minutes * 60))
    }

    pub fn get(&self, key: &CacheKey) -> Option<Vec<DiscoveredItem>> {
        let inner = self.inner.lock().expect("search cache mutex poisoned");
        match inner.get(key) {
            Some(e) if e.inserted_at.elapsed() < self.ttl => {
                counter!("discovery_cache_hits_total").increment(1);
                Some(e.items.clone())
            }
            _ => {
                counter!("discovery_cache_misses_total").increment(1);
                None
            }
        }
    }

    pub fn put(&self, key: CacheKey, items: Vec<DiscoveredItem>) {
        let mut inner = self.inner.lock().expect("search cache mutex poisoned");
        // Prune dead entries while we hold the lock anyway.
        let ttl = self.ttl;
        inner.retain(|_, e| e.inserted_at.elapsed() < ttl);
        inner.insert(
            key,
            Entry {
                items,
                inserted_at: Instant::now(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("search cache mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::DurationBand;

    fn item(id: &str) -> DiscoveredItem {
        DiscoveredItem {
            external_id: id.to_string(),
            title: "t".into(),
            channel_id: "c".into(),
            channel_name: "cn".into(),
            published_at: 0,
            duration_seconds: 300,
            view_count: 0,
            like_count: 0,
            comment_count: 0,
            thumbnail_url: None,
            description: String::new(),
            found_in_band: DurationBand::Medium,
        }
    }

    fn key(source: &str) -> CacheKey {
        CacheKey {
            source_key: source.to_string(),
            since_unix: 100,
            max_results: 25,
        }
    }

    #[test]
    fn miss_then_hit_for_same_key() {
        let cache = SearchCache::new(Duration::from_secs(60));
        assert!(cache.get(&key("chan:a")).is_none());
        cache.put(key("chan:a"), vec![item("v1")]);
        let got = cache.get(&key("chan:a")).expect("hit");
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].external_id, "v1");
    }

    #[test]
    fn different_since_is_a_different_key() {
        let cache = SearchCache::new(Duration::from_secs(60));
        cache.put(key("chan:a"), vec![item("v1")]);
        let mut other = key("chan:a");
        other.since_unix = 200;
        assert!(cache.get(&other).is_none());
    }

    #[test]
    fn absolute_ttl_expires_entries() {
        let cache = SearchCache::new(Duration::from_millis(10));
        cache.put(key("chan:a"), vec![item("v1")]);
        std::thread::sleep(Duration::from_millis(30));
        assert!(cache.get(&key("chan:a")).is_none());
        // Insertion prunes the dead entry.
        cache.put(key("chan:b"), vec![item("v2")]);
        assert_eq!(cache.len(), 1);
    }
}
