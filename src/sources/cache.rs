//! Fetch cache
//!
//! TTL cache shared across providers. Keys are name-prefixed so entries
//! cannot alias across sources. Expired entries are treated as misses on
//! read and reaped by a background sweeper; total size is bounded by LRU
//! eviction at `max_entries`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::types::{GeoPoint, ProviderReading};

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct WeatherCache {
    inner: Arc<CacheInner>,
}

struct CacheInner {
    entries: RwLock<HashMap<String, CacheEntry>>,
    ttl: Duration,
    max_entries: usize,
    // Monotonic tick used as the LRU recency stamp; bumped on every touch.
    clock: AtomicU64,
}

struct CacheEntry {
    reading: ProviderReading,
    expires_at: Instant,
    last_used: AtomicU64,
}

pub fn cache_key(source: &str, point: &GeoPoint) -> String {
    format!("{}:{:.6}:{:.6}", source, point.latitude, point.longitude)
}

impl WeatherCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                entries: RwLock::new(HashMap::new()),
                ttl,
                max_entries: max_entries.max(1),
                clock: AtomicU64::new(0),
            }),
        }
    }

    pub async fn get(&self, key: &str) -> Option<ProviderReading> {
        let entries = self.inner.entries.read().await;
        let entry = entries.get(key)?;
        if Instant::now() > entry.expires_at {
            return None;
        }
        let tick = self.inner.clock.fetch_add(1, Ordering::Relaxed);
        entry.last_used.store(tick, Ordering::Relaxed);
        Some(entry.reading.clone())
    }

    pub async fn insert(&self, key: String, reading: ProviderReading) {
        let mut entries = self.inner.entries.write().await;
        if !entries.contains_key(&key) && entries.len() >= self.inner.max_entries {
            if let Some(victim) = entries
                .iter()
                .min_by_key(|(_, e)| e.last_used.load(Ordering::Relaxed))
                .map(|(k, _)| k.clone())
            {
                entries.remove(&victim);
            }
        }
        let tick = self.inner.clock.fetch_add(1, Ordering::Relaxed);
        entries.insert(
            key,
            CacheEntry {
                reading,
                expires_at: Instant::now() + self.inner.ttl,
                last_used: AtomicU64::new(tick),
            },
        );
    }

    pub async fn len(&self) -> usize {
        self.inner.entries.read().await.len()
    }

    /// Drop expired entries. The sweeper calls this every minute; reads do
    /// lazy eviction in the meantime.
    pub async fn sweep(&self) {
        let mut entries = self.inner.entries.write().await;
        let now = Instant::now();
        let before = entries.len();
        entries.retain(|_, e| now <= e.expires_at);
        let removed = before - entries.len();
        if removed > 0 {
            debug!(removed, "swept expired cache entries");
        }
    }

    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                cache.sweep().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn reading(source: &str, temp: f64) -> ProviderReading {
        ProviderReading {
            source: source.to_string(),
            temperature_c: temp,
            humidity_pct: None,
            wind_mps: None,
            precip_mm: None,
            pressure_hpa: None,
            measured_at: Utc::now(),
            confidence: None,
        }
    }

    #[tokio::test]
    async fn test_get_set_roundtrip() {
        let cache = WeatherCache::new(Duration::from_secs(300), 100);
        let point = GeoPoint::new(51.5074, -0.1278);
        let key = cache_key("OpenMeteo", &point);
        assert!(cache.get(&key).await.is_none());

        cache.insert(key.clone(), reading("OpenMeteo", 18.0)).await;
        let hit = cache.get(&key).await.unwrap();
        assert!((hit.temperature_c - 18.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_keys_do_not_alias_across_sources() {
        let cache = WeatherCache::new(Duration::from_secs(300), 100);
        let point = GeoPoint::new(51.5074, -0.1278);
        cache
            .insert(cache_key("OpenMeteo", &point), reading("OpenMeteo", 18.0))
            .await;
        assert!(cache.get(&cache_key("WeatherAPI", &point)).await.is_none());
    }

    #[tokio::test]
    async fn test_expired_entry_is_a_miss() {
        let cache = WeatherCache::new(Duration::from_millis(0), 100);
        let key = cache_key("OpenMeteo", &GeoPoint::new(0.0, 0.0));
        cache.insert(key.clone(), reading("OpenMeteo", 18.0)).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(cache.get(&key).await.is_none());

        cache.sweep().await;
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test]
    async fn test_lru_eviction_at_capacity() {
        let cache = WeatherCache::new(Duration::from_secs(300), 2);
        cache.insert("a".into(), reading("a", 1.0)).await;
        cache.insert("b".into(), reading("b", 2.0)).await;
        // Touch "a" so "b" becomes the least recently used.
        cache.get("a").await.unwrap();
        cache.insert("c".into(), reading("c", 3.0)).await;

        assert_eq!(cache.len().await, 2);
        assert!(cache.get("a").await.is_some());
        assert!(cache.get("b").await.is_none());
        assert!(cache.get("c").await.is_some());
    }
}
