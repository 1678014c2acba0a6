//! In-memory, content-addressed cache for fetched/transformed documents.
//!
//! Namespaced, TTL-bounded, LRU-trimmed by `maxKeys`, with update
//! listeners consumed by the MCP resource-change notification relay.
//! Map iteration order is preserved via `IndexMap`, giving insertion
//! (and, after `touch`, access) order for free.

pub mod hash;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use tokio::sync::{RwLock, mpsc};

pub use hash::{CacheKeyParts, create_cache_key, parse_cache_key, stable_stringify, to_resource_uri};

/// A single cached entry.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub url: String,
    pub title: Option<String>,
    pub content: String,
    pub fetched_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Metadata accompanying a `set` call.
#[derive(Debug, Clone, Default)]
pub struct CacheEntryMeta {
    pub title: Option<String>,
}

/// Event delivered to cache-update listeners after a successful write.
#[derive(Debug, Clone)]
pub struct CacheUpdateEvent {
    pub cache_key: String,
    pub namespace: String,
    pub url_hash: String,
}

struct Inner {
    entries: IndexMap<String, CacheEntry>,
}

/// Namespaced, TTL+LRU bounded content cache.
pub struct ContentCache {
    inner: Arc<RwLock<Inner>>,
    ttl: Duration,
    max_keys: usize,
    enabled: bool,
    listeners: Arc<RwLock<Vec<mpsc::UnboundedSender<CacheUpdateEvent>>>>,
}

impl ContentCache {
    pub fn new(enabled: bool, ttl: Duration, max_keys: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner { entries: IndexMap::new() })),
            ttl,
            max_keys,
            enabled,
            listeners: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Returns `None` if the entry is missing or has expired (expired
    /// entries are deleted lazily on the next access).
    pub async fn get(&self, key: &str) -> Option<CacheEntry> {
        let mut inner = self.inner.write().await;
        let entry = inner.entries.get(key)?.clone();
        if Utc::now() >= entry.expires_at {
            inner.entries.shift_remove(key);
            return None;
        }
        inner.entries.shift_remove(key);
        inner.entries.insert(key.to_string(), entry.clone());
        Some(entry)
    }

    /// No-op if caching is disabled or `content` is empty. Otherwise
    /// overwrites the entry, stamps `fetched_at`/`expires_at`, and
    /// fires update events after the write completes.
    pub async fn set(&self, key: &str, content: String, meta: CacheEntryMeta, url: &str) {
        if !self.enabled || content.is_empty() {
            return;
        }

        let now = Utc::now();
        let entry = CacheEntry {
            url: url.to_string(),
            title: meta.title,
            content,
            fetched_at: now,
            expires_at: now + chrono::Duration::from_std(self.ttl).unwrap_or_default(),
        };

        {
            let mut inner = self.inner.write().await;
            inner.entries.shift_remove(key);
            inner.entries.insert(key.to_string(), entry);
            self.trim_locked(&mut inner);
        }

        self.notify(key).await;
    }

    fn trim_locked(&self, inner: &mut Inner) {
        while inner.entries.len() > self.max_keys {
            inner.entries.shift_remove_index(0);
        }
    }

    pub async fn keys(&self) -> Vec<String> {
        self.inner.read().await.entries.keys().cloned().collect()
    }

    pub async fn clear(&self) {
        self.inner.write().await.entries.clear();
    }

    /// Remove every entry whose `expires_at` has passed. Called by the
    /// background eviction loop; safe to call directly in tests.
    pub async fn evict_expired(&self) {
        let now = Utc::now();
        let mut inner = self.inner.write().await;
        inner.entries.retain(|_, v| v.expires_at > now);
    }

    /// Subscribe to cache-update events. Dropping the receiver
    /// unsubscribes lazily: the next `notify` prunes dead senders.
    pub async fn on_cache_update(&self) -> mpsc::UnboundedReceiver<CacheUpdateEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.listeners.write().await.push(tx);
        rx
    }

    async fn notify(&self, key: &str) {
        let Some(parts) = parse_cache_key(key) else { return };
        let event =
            CacheUpdateEvent { cache_key: key.to_string(), namespace: parts.namespace, url_hash: parts.url_hash };

        let mut listeners = self.listeners.write().await;
        listeners.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Spawn the background eviction loop. Period is clamped to
    /// `[10s, 60s]`, scaled down from the TTL so short-lived caches
    /// sweep more often without ever dropping below the floor.
    pub fn spawn_eviction_loop(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let period = eviction_period(self.ttl);
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                cache.evict_expired().await;
            }
        })
    }
}

fn eviction_period(ttl: Duration) -> Duration {
    (ttl / 10).clamp(Duration::from_secs(10), Duration::from_secs(60))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> ContentCache {
        ContentCache::new(true, Duration::from_secs(3600), 2)
    }

    #[tokio::test]
    async fn test_set_then_get_round_trip() {
        let cache = cache();
        let key = create_cache_key("markdown", "https://example.com", None);
        cache.set(&key, "hello".into(), CacheEntryMeta::default(), "https://example.com").await;

        let entry = cache.get(&key).await.unwrap();
        assert_eq!(entry.content, "hello");
    }

    #[tokio::test]
    async fn test_get_missing_returns_none() {
        let cache = cache();
        assert!(cache.get("markdown:deadbeef00000000").await.is_none());
    }

    #[tokio::test]
    async fn test_set_empty_content_is_noop() {
        let cache = cache();
        let key = "markdown:deadbeef00000000";
        cache.set(key, String::new(), CacheEntryMeta::default(), "https://example.com").await;
        assert!(cache.get(key).await.is_none());
    }

    #[tokio::test]
    async fn test_disabled_cache_set_is_noop() {
        let cache = ContentCache::new(false, Duration::from_secs(3600), 10);
        let key = "markdown:deadbeef00000000";
        cache.set(key, "content".into(), CacheEntryMeta::default(), "https://example.com").await;
        assert!(cache.get(key).await.is_none());
    }

    #[tokio::test]
    async fn test_lru_eviction_beyond_max_keys() {
        let cache = cache();
        cache.set("markdown:a", "1".into(), CacheEntryMeta::default(), "https://a.test").await;
        cache.set("markdown:b", "2".into(), CacheEntryMeta::default(), "https://b.test").await;
        cache.set("markdown:c", "3".into(), CacheEntryMeta::default(), "https://c.test").await;

        let keys = cache.keys().await;
        assert_eq!(keys.len(), 2);
        assert!(!keys.contains(&"markdown:a".to_string()));
    }

    #[tokio::test]
    async fn test_touch_moves_entry_to_tail() {
        let cache = cache();
        cache.set("markdown:a", "1".into(), CacheEntryMeta::default(), "https://a.test").await;
        cache.set("markdown:b", "2".into(), CacheEntryMeta::default(), "https://b.test").await;

        // touch "a" via get, then insert "c" — "b" should be evicted, not "a"
        let _ = cache.get("markdown:a").await;
        cache.set("markdown:c", "3".into(), CacheEntryMeta::default(), "https://c.test").await;

        let keys = cache.keys().await;
        assert!(keys.contains(&"markdown:a".to_string()));
        assert!(!keys.contains(&"markdown:b".to_string()));
    }

    #[tokio::test]
    async fn test_evict_expired_removes_stale_entries() {
        let cache = ContentCache::new(true, Duration::from_millis(1), 10);
        cache.set("markdown:a", "1".into(), CacheEntryMeta::default(), "https://a.test").await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        cache.evict_expired().await;
        assert!(cache.keys().await.is_empty());
    }

    #[tokio::test]
    async fn test_cache_update_listener_fires() {
        let cache = cache();
        let mut rx = cache.on_cache_update().await;
        let key = create_cache_key("markdown", "https://example.com", None);
        cache.set(&key, "content".into(), CacheEntryMeta::default(), "https://example.com").await;

        let event = rx.try_recv().expect("listener should have fired");
        assert_eq!(event.cache_key, key);
        assert_eq!(event.namespace, "markdown");
    }

    #[test]
    fn test_eviction_period_clamped() {
        assert_eq!(eviction_period(Duration::from_secs(1)), Duration::from_secs(10));
        assert_eq!(eviction_period(Duration::from_secs(10_000)), Duration::from_secs(60));
    }
}
