//! The caller runtime: the public `invoke` entry point.

use crate::cache::ConnectionCache;
use crate::connection::{Connection, ConnectionConfig};
use crate::error::ClientError;
use framecall_protocol::DEFAULT_MAX_FRAME_SIZE;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Default TCP connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default per-call reply timeout.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(2);

/// Default idle interval after which a cached connection is evicted.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Caller runtime configuration.
#[derive(Debug, Clone)]
pub struct CallerConfig {
    /// Time bound for the initial TCP connect.
    pub connect_timeout: Duration,
    /// Default reply timeout for `invoke`.
    pub call_timeout: Duration,
    /// Idle interval after which a cached connection is evicted.
    pub idle_timeout: Duration,
    /// Maximum decodable frame size.
    pub max_frame_size: usize,
    /// Optional `host` label for sent envelopes; defaults to the local
    /// socket address.
    pub client_host: Option<String>,
}

impl Default for CallerConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            client_host: None,
        }
    }
}

impl CallerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    pub fn with_client_host(mut self, host: impl Into<String>) -> Self {
        self.client_host = Some(host.into());
        self
    }
}

/// The caller runtime.
///
/// Owns the process-wide connection cache and the envelope id sequence.
/// Create one at startup, share it, and call [`Caller::shutdown`] when
/// done so cached sockets and idle timers are released.
pub struct Caller {
    config: CallerConfig,
    cache: ConnectionCache,
    next_id: AtomicU64,
}

impl Caller {
    pub fn new(config: CallerConfig) -> Self {
        let cache = ConnectionCache::new(config.idle_timeout);
        Self {
            config,
            cache,
            next_id: AtomicU64::new(1),
        }
    }

    /// Invokes `method` on `service` at `ip:port` with the default
    /// call timeout.
    pub async fn invoke(
        &self,
        ip: &str,
        port: u16,
        service: &str,
        method: &str,
        args: Value,
    ) -> Result<Value, ClientError> {
        self.invoke_with_timeout(ip, port, service, method, args, self.config.call_timeout)
            .await
    }

    /// Invokes `method` on `service` at `ip:port`.
    ///
    /// A transport or framing failure on a *cached* connection evicts
    /// it and retries the whole call exactly once on a fresh
    /// connection; a second failure propagates. This bounds worst-case
    /// latency to roughly twice the timeout and permits at most two
    /// server-side executions of a non-idempotent call. Protocol
    /// violations and remote application errors are never retried.
    pub async fn invoke_with_timeout(
        &self,
        ip: &str,
        port: u16,
        service: &str,
        method: &str,
        args: Value,
        timeout: Duration,
    ) -> Result<Value, ClientError> {
        let key = endpoint_key(ip, port);

        // First attempt: reuse the cached connection when one exists.
        // Checkout removes it from the cache, so a failure here leaves
        // nothing stale behind.
        if let Some(conn) = self.cache.checkout(&key).await {
            match self
                .call_on(conn, &key, service, method, args.clone(), timeout)
                .await
            {
                Err(e) if e.is_transport() => {
                    tracing::warn!(
                        endpoint = %key,
                        error = %e,
                        "cached connection failed, retrying on a fresh connection"
                    );
                }
                other => return other,
            }
        }

        // Fresh connection: first call to this endpoint, or the single
        // retry after a cached-connection transport failure. Failures
        // here propagate without another retry.
        let conn = Connection::open(ip, port, &self.connection_config(), self.next_id()).await?;
        self.call_on(conn, &key, service, method, args, timeout)
            .await
    }

    /// Runs one call attempt and, on success, returns the connection to
    /// the cache (if keep-alive was negotiated) with a fresh idle timer.
    async fn call_on(
        &self,
        mut conn: Connection,
        key: &str,
        service: &str,
        method: &str,
        args: Value,
        timeout: Duration,
    ) -> Result<Value, ClientError> {
        let id = self.next_id();
        match conn.call(id, service, method, args, timeout).await {
            Ok(value) => {
                if conn.is_keep_alive() {
                    self.cache.store(key.to_string(), conn).await;
                } else {
                    conn.close().await;
                }
                Ok(value)
            }
            Err(e) => {
                // The socket may be in an arbitrary state; never return
                // a failed connection to the cache.
                conn.close().await;
                Err(e)
            }
        }
    }

    fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            connect_timeout: self.config.connect_timeout,
            read_timeout: self.config.call_timeout,
            max_frame_size: self.config.max_frame_size,
            host_label: self.config.client_host.clone(),
        }
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Returns the number of currently cached connections.
    pub async fn cached_connections(&self) -> usize {
        self.cache.len().await
    }

    /// Closes all cached connections and cancels their idle timers.
    pub async fn shutdown(&self) {
        self.cache.close_all().await;
    }
}

impl Default for Caller {
    fn default() -> Self {
        Self::new(CallerConfig::default())
    }
}

fn endpoint_key(ip: &str, port: u16) -> String {
    format!("{ip},{port}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = CallerConfig::default();
        assert_eq!(config.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
        assert_eq!(config.call_timeout, DEFAULT_CALL_TIMEOUT);
        assert_eq!(config.idle_timeout, DEFAULT_IDLE_TIMEOUT);
        assert_eq!(config.max_frame_size, DEFAULT_MAX_FRAME_SIZE);
    }

    #[test]
    fn test_config_builders() {
        let config = CallerConfig::new()
            .with_call_timeout(Duration::from_millis(250))
            .with_idle_timeout(Duration::from_secs(5))
            .with_max_frame_size(1024);
        assert_eq!(config.call_timeout, Duration::from_millis(250));
        assert_eq!(config.idle_timeout, Duration::from_secs(5));
        assert_eq!(config.max_frame_size, 1024);
    }

    #[test]
    fn test_endpoint_key() {
        assert_eq!(endpoint_key("10.0.0.1", 5599), "10.0.0.1,5599");
    }

    #[tokio::test]
    async fn test_caller_starts_empty() {
        let caller = Caller::default();
        assert_eq!(caller.cached_connections().await, 0);
    }
}
