//! Session lifecycle and slot admission control.
//!
//! Sessions move `Reserved → Connecting → Initialized → Active →
//! Closed`. A process-wide in-flight counter guards
//! pre-initialization concurrency so a burst of un-initialized
//! connections can't starve the capacity a `SessionEntry` needs once
//! it's promoted.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Initialized,
    Active,
}

#[derive(Debug, Clone)]
pub struct SessionEntry {
    pub session_id: String,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub protocol_initialized: bool,
}

/// Reserved-but-not-yet-initialized slot. Must be released exactly
/// once regardless of how the connection attempt ends.
pub struct SlotTracker {
    store: Arc<SessionStore>,
    released: bool,
}

impl SlotTracker {
    /// Promote this reservation to a live `SessionEntry`, consuming the
    /// tracker (its slot is now owned by the store's session map).
    pub async fn promote(mut self, session_id: String) {
        self.released = true;
        self.store.in_flight.fetch_sub(1, Ordering::SeqCst);
        let now = Utc::now();
        let entry = SessionEntry {
            session_id: session_id.clone(),
            state: SessionState::Initialized,
            created_at: now,
            last_seen: now,
            protocol_initialized: true,
        };
        let mut sessions = self.store.sessions.write().await;
        sessions.shift_remove(&session_id);
        sessions.insert(session_id, entry);
    }

    /// Release the slot without promoting it (init failure, timeout).
    pub fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.store.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Drop for SlotTracker {
    fn drop(&mut self) {
        self.release();
    }
}

struct SessionStore {
    sessions: RwLock<IndexMap<String, SessionEntry>>,
    in_flight: AtomicUsize,
}

/// Tracks active sessions with LRU order, TTL eviction, and bounded
/// pre-initialization concurrency.
pub struct SessionManager {
    store: Arc<SessionStore>,
    max_sessions: usize,
    ttl: Duration,
}

impl SessionManager {
    pub fn new(max_sessions: usize, ttl: Duration) -> Self {
        Self {
            store: Arc::new(SessionStore { sessions: RwLock::new(IndexMap::new()), in_flight: AtomicUsize::new(0) }),
            max_sessions,
            ttl,
        }
    }

    /// Reserve a slot for a new, not-yet-initialized session. Attempts
    /// one LRU eviction to make room if the store is at capacity.
    pub async fn reserve_slot(&self) -> Option<SlotTracker> {
        let current = {
            let sessions = self.store.sessions.read().await;
            sessions.len() + self.store.in_flight.load(Ordering::SeqCst)
        };

        if current >= self.max_sessions && !self.ensure_capacity().await {
            return None;
        }

        self.store.in_flight.fetch_add(1, Ordering::SeqCst);
        Some(SlotTracker { store: Arc::clone(&self.store), released: false })
    }

    /// Evict the single oldest session (by insertion/access order) to
    /// reclaim one slot. Returns `false` if there was nothing to evict.
    async fn ensure_capacity(&self) -> bool {
        let mut sessions = self.store.sessions.write().await;
        if sessions.is_empty() {
            return false;
        }
        sessions.shift_remove_index(0);
        true
    }

    /// Move `session_id` to the tail of the insertion-order map and
    /// update its `last_seen` timestamp. Called on every inbound
    /// message for that session.
    pub async fn touch(&self, session_id: &str) -> bool {
        let mut sessions = self.store.sessions.write().await;
        let Some(mut entry) = sessions.shift_remove(session_id) else { return false };
        entry.last_seen = Utc::now();
        entry.state = SessionState::Active;
        sessions.insert(session_id.to_string(), entry);
        true
    }

    pub async fn close(&self, session_id: &str) -> bool {
        self.store.sessions.write().await.shift_remove(session_id).is_some()
    }

    /// Drain every tracked session at once, for shutdown. Returns the
    /// ids that were cleared; actual transport teardown is the
    /// transport layer's own responsibility.
    pub async fn close_all(&self) -> Vec<String> {
        let mut sessions = self.store.sessions.write().await;
        let ids: Vec<String> = sessions.keys().cloned().collect();
        sessions.clear();
        ids
    }

    pub async fn contains(&self, session_id: &str) -> bool {
        self.store.sessions.read().await.contains_key(session_id)
    }

    pub async fn active_count(&self) -> usize {
        self.store.sessions.read().await.len()
    }

    pub fn in_flight_count(&self) -> usize {
        self.store.in_flight.load(Ordering::SeqCst)
    }

    /// Remove every session idle longer than `ttl`. Errors closing the
    /// underlying transport are the caller's responsibility to log;
    /// this only mutates the map.
    pub async fn evict_idle(&self) -> Vec<String> {
        let now = Utc::now();
        let ttl = self.ttl;
        let mut sessions = self.store.sessions.write().await;
        let stale: Vec<String> = sessions
            .iter()
            .filter(|(_, entry)| {
                now.signed_duration_since(entry.last_seen).to_std().map(|d| d > ttl).unwrap_or(false)
            })
            .map(|(id, _)| id.clone())
            .collect();
        for id in &stale {
            sessions.shift_remove(id);
        }
        stale
    }

    /// Spawn the idle-cleanup background loop at the §4.5 period:
    /// `clamp(ttl/2, 10s, 60s)`.
    pub fn spawn_idle_cleanup(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let period = idle_cleanup_period(self.ttl);
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                let evicted = manager.evict_idle().await;
                if !evicted.is_empty() {
                    tracing::debug!(count = evicted.len(), "evicted idle sessions");
                }
            }
        })
    }
}

fn idle_cleanup_period(ttl: Duration) -> Duration {
    (ttl / 2).clamp(Duration::from_secs(10), Duration::from_secs(60))
}

pub fn new_session_id() -> String {
    Uuid::new_v4().to_string()
}
