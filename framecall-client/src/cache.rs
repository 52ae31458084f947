//! Connection cache with idle eviction.
//!
//! The cache owns at most one persistent connection per remote
//! endpoint, keyed by `"ip,port"`. Lookups use a checkout model: taking
//! a connection removes its entry and cancels its idle timer, so a
//! connection is either fully owned by exactly one caller or fully
//! absent — never half-closed and still reachable through the cache.

use crate::connection::Connection;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

struct CacheEntry {
    conn: Connection,
    /// Eviction task; aborted in O(1) when the connection is reused.
    idle_timer: JoinHandle<()>,
}

/// Cache of persistent connections, one per remote endpoint.
pub struct ConnectionCache {
    entries: Arc<Mutex<HashMap<String, CacheEntry>>>,
    idle_timeout: Duration,
}

impl ConnectionCache {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            idle_timeout,
        }
    }

    /// Takes the cached connection for `key`, cancelling its idle timer.
    pub async fn checkout(&self, key: &str) -> Option<Connection> {
        let entry = self.entries.lock().await.remove(key)?;
        entry.idle_timer.abort();
        tracing::debug!(endpoint = key, "reusing cached connection");
        Some(entry.conn)
    }

    /// Inserts a connection for `key` and schedules its idle eviction.
    ///
    /// Replaces (and closes) any connection already cached for the same
    /// endpoint, preserving the one-entry-per-endpoint invariant.
    pub async fn store(&self, key: String, conn: Connection) {
        let entries = Arc::clone(&self.entries);
        let timer_key = key.clone();
        let idle_timeout = self.idle_timeout;
        let idle_timer = tokio::spawn(async move {
            tokio::time::sleep(idle_timeout).await;
            let evicted = entries.lock().await.remove(&timer_key);
            if let Some(entry) = evicted {
                tracing::debug!(endpoint = %timer_key, "evicting idle connection");
                entry.conn.close().await;
            }
        });

        let replaced = self
            .entries
            .lock()
            .await
            .insert(key, CacheEntry { conn, idle_timer });
        if let Some(old) = replaced {
            old.idle_timer.abort();
            old.conn.close().await;
        }
    }

    /// Returns the number of cached connections.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Closes every cached connection and cancels every idle timer.
    pub async fn close_all(&self) {
        let drained: Vec<_> = self.entries.lock().await.drain().collect();
        for (key, entry) in drained {
            tracing::debug!(endpoint = %key, "closing cached connection on shutdown");
            entry.idle_timer.abort();
            entry.conn.close().await;
        }
    }
}
