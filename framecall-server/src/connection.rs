//! Per-connection protocol state machine and envelope dispatch.

use crate::error::ServerError;
use crate::registry::MethodRegistry;
use crate::server::ServerStats;
use framecall_protocol::{Envelope, EnvelopeKind, FramedStream, ProtocolError, KEEP_ALIVE};
use serde_json::{json, Value};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::broadcast;

/// Lifecycle state of an accepted connection.
///
/// `Fresh` connections close after answering one invoke envelope;
/// a control envelope requesting keep-alive promotes the connection to
/// `Persistent`, which survives across invoke/reply cycles until a read
/// timeout, end-of-stream, or an unreadable stream completes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Fresh,
    Persistent,
    Completed,
}

/// Drives one accepted connection until it completes.
pub struct ConnectionDriver<S> {
    framed: FramedStream<S>,
    /// Peer address, for logging.
    peer: String,
    /// This server's identifying address string, stamped on replies.
    host: String,
    state: ConnState,
    next_reply_id: u64,
    registry: Arc<MethodRegistry>,
    stats: Arc<ServerStats>,
}

impl<S: AsyncRead + AsyncWrite + Unpin> ConnectionDriver<S> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        stream: S,
        read_timeout: Duration,
        max_frame_size: usize,
        peer: String,
        host: String,
        registry: Arc<MethodRegistry>,
        stats: Arc<ServerStats>,
    ) -> Self {
        Self {
            framed: FramedStream::with_max_frame_size(stream, read_timeout, max_frame_size),
            peer,
            host,
            state: ConnState::Fresh,
            next_reply_id: 0,
            registry,
            stats,
        }
    }

    /// Services the connection until it completes.
    ///
    /// Every exit path marks the connection `Completed`; the socket
    /// closes when the driver is dropped.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> Result<(), ServerError> {
        let result = self.serve(&mut shutdown).await;
        if self.state == ConnState::Persistent {
            self.stats
                .persistent_connections
                .fetch_sub(1, Ordering::Relaxed);
        }
        self.state = ConnState::Completed;
        result
    }

    async fn serve(&mut self, shutdown: &mut broadcast::Receiver<()>) -> Result<(), ServerError> {
        loop {
            let envelope = tokio::select! {
                biased;

                _ = shutdown.recv() => {
                    tracing::debug!(peer = %self.peer, "shutdown signal, completing connection");
                    return Err(ServerError::ShuttingDown);
                }

                result = self.framed.read_envelope() => match result {
                    Ok(envelope) => envelope,
                    Err(ProtocolError::ReadTimeout) => {
                        tracing::debug!(peer = %self.peer, "read timeout, completing connection");
                        return Ok(());
                    }
                    Err(ProtocolError::UnexpectedEof) => {
                        tracing::debug!(peer = %self.peer, "peer closed connection");
                        return Ok(());
                    }
                    Err(e) => {
                        // Stream is unreadable; terminate without a reply.
                        tracing::debug!(peer = %self.peer, error = %e, "unreadable stream, completing connection");
                        return Err(e.into());
                    }
                },
            };

            self.stats.requests_total.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                peer = %self.peer,
                id = envelope.id,
                kind = ?envelope.kind,
                "envelope received"
            );

            match envelope.kind {
                EnvelopeKind::Control => self.handle_control(envelope).await?,
                EnvelopeKind::Invoke => {
                    self.handle_invoke(envelope).await?;
                    if self.state != ConnState::Persistent {
                        tracing::debug!(peer = %self.peer, "single invoke answered, completing connection");
                        return Ok(());
                    }
                }
                _ => self.handle_unrecognized(envelope).await?,
            }
        }
    }

    /// Answers a control envelope, promoting the connection to
    /// `Persistent` when keep-alive was requested.
    async fn handle_control(&mut self, request: Envelope) -> Result<(), ServerError> {
        let mut reply = Envelope::ok(self.next_reply_id(), self.host.clone(), request.id);

        if request.wants_keep_alive() {
            if self.state != ConnState::Persistent {
                self.state = ConnState::Persistent;
                self.stats
                    .persistent_connections
                    .fetch_add(1, Ordering::Relaxed);
            }
            reply = reply.with_value(json!({ "connection": KEEP_ALIVE }));
            tracing::debug!(peer = %self.peer, "keep-alive negotiated");
        }

        self.framed.send_envelope(&reply).await?;
        Ok(())
    }

    /// Dispatches an invoke envelope and writes back OK or ERROR.
    async fn handle_invoke(&mut self, request: Envelope) -> Result<(), ServerError> {
        let reply_id = self.next_reply_id();
        let reply = match self.dispatch(&request) {
            Ok(value) => {
                Envelope::ok(reply_id, self.host.clone(), request.id).with_value(value)
            }
            Err(message) => {
                self.stats.errors_total.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(peer = %self.peer, id = request.id, %message, "invoke failed");
                let callargs = serde_json::to_value(&request).unwrap_or(Value::Null);
                Envelope::error(reply_id, self.host.clone(), request.id, message)
                    .with_callargs(callargs)
            }
        };
        self.framed.send_envelope(&reply).await?;
        Ok(())
    }

    /// Looks up and runs the target handler.
    ///
    /// A missing service and a missing method both report as "not
    /// registered". Handler errors and panics are converted to the
    /// error message of an `ERROR` reply; they never reach the service
    /// loop.
    fn dispatch(&self, request: &Envelope) -> Result<Value, String> {
        let app = request.require_app().map_err(|e| e.to_string())?;
        let method = request.require_method().map_err(|e| e.to_string())?;
        let args = request.require_args().map_err(|e| e.to_string())?;

        let handler = self
            .registry
            .lookup(app, method)
            .ok_or_else(|| format!("{app}.{method} is not registered"))?;

        match std::panic::catch_unwind(AssertUnwindSafe(|| handler.call(args.clone()))) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(format!("{app}.{method} failed: {e}")),
            Err(_) => Err(format!("{app}.{method} panicked")),
        }
    }

    /// Answers an envelope of unrecognized type with an ERROR reply;
    /// the connection state is left unchanged.
    async fn handle_unrecognized(&mut self, request: Envelope) -> Result<(), ServerError> {
        self.stats.errors_total.fetch_add(1, Ordering::Relaxed);
        let reply = Envelope::error(
            self.next_reply_id(),
            self.host.clone(),
            request.id,
            "unrecognized envelope type",
        );
        self.framed.send_envelope(&reply).await?;
        Ok(())
    }

    fn next_reply_id(&mut self) -> u64 {
        let id = self.next_reply_id;
        self.next_reply_id += 1;
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::MethodError;
    use tokio::io::{duplex, DuplexStream};

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn test_registry() -> Arc<MethodRegistry> {
        let registry = Arc::new(MethodRegistry::new());
        registry.register("echo", "ping", |args: Value| Ok(args));
        registry.register("calc", "boom", |_: Value| -> Result<Value, MethodError> {
            panic!("handler bug")
        });
        registry
    }

    fn spawn_driver(
        registry: Arc<MethodRegistry>,
        stats: Arc<ServerStats>,
    ) -> (FramedStream<DuplexStream>, broadcast::Sender<()>) {
        let (client_side, server_side) = duplex(64 * 1024);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let driver = ConnectionDriver::new(
            server_side,
            TIMEOUT,
            framecall_protocol::DEFAULT_MAX_FRAME_SIZE,
            "test-peer".to_string(),
            "test-server".to_string(),
            registry,
            stats,
        );
        tokio::spawn(driver.run(shutdown_rx));
        (FramedStream::new(client_side, TIMEOUT), shutdown_tx)
    }

    #[tokio::test]
    async fn test_keep_alive_negotiation_and_reuse() {
        let stats = Arc::new(ServerStats::default());
        let (mut client, _shutdown) = spawn_driver(test_registry(), Arc::clone(&stats));

        client.send_envelope(&Envelope::connect(1, "client")).await.unwrap();
        let ack = client.read_envelope().await.unwrap();
        assert_eq!(ack.kind, EnvelopeKind::Ok);
        assert_eq!(ack.callid, Some(1));
        assert!(ack.confirms_keep_alive());
        assert_eq!(stats.persistent_connections.load(Ordering::Relaxed), 1);

        // Two sequential invokes on the same socket; callids match the
        // ids sent, in order.
        for id in [2u64, 3] {
            let invoke = Envelope::invoke(id, "client", "echo", "ping", json!({"seq": id}));
            client.send_envelope(&invoke).await.unwrap();
            let reply = client.read_envelope().await.unwrap();
            assert_eq!(reply.kind, EnvelopeKind::Ok);
            assert_eq!(reply.callid, Some(id));
            assert_eq!(reply.value.unwrap()["seq"], id);
        }
    }

    #[tokio::test]
    async fn test_connection_closes_after_single_invoke() {
        let stats = Arc::new(ServerStats::default());
        let (mut client, _shutdown) = spawn_driver(test_registry(), stats);

        // No keep-alive negotiation: one invoke/reply cycle, then the
        // server completes the connection.
        let invoke = Envelope::invoke(1, "client", "echo", "ping", json!({}));
        client.send_envelope(&invoke).await.unwrap();
        let reply = client.read_envelope().await.unwrap();
        assert_eq!(reply.kind, EnvelopeKind::Ok);

        assert!(matches!(
            client.read_envelope().await,
            Err(ProtocolError::UnexpectedEof)
        ));
    }

    #[tokio::test]
    async fn test_control_without_keep_alive_stays_fresh() {
        let stats = Arc::new(ServerStats::default());
        let (mut client, _shutdown) = spawn_driver(test_registry(), Arc::clone(&stats));

        let mut control = Envelope::connect(1, "client");
        control.options = None;
        client.send_envelope(&control).await.unwrap();

        let ack = client.read_envelope().await.unwrap();
        assert_eq!(ack.kind, EnvelopeKind::Ok);
        assert!(!ack.confirms_keep_alive());
        assert_eq!(stats.persistent_connections.load(Ordering::Relaxed), 0);

        // Still Fresh: the next invoke completes the connection.
        let invoke = Envelope::invoke(2, "client", "echo", "ping", json!({}));
        client.send_envelope(&invoke).await.unwrap();
        client.read_envelope().await.unwrap();
        assert!(matches!(
            client.read_envelope().await,
            Err(ProtocolError::UnexpectedEof)
        ));
    }

    #[tokio::test]
    async fn test_unregistered_target_echoes_callargs() {
        let stats = Arc::new(ServerStats::default());
        let (mut client, _shutdown) = spawn_driver(test_registry(), stats);

        let invoke = Envelope::invoke(9, "client", "nope", "nope", json!({"a": 1}));
        client.send_envelope(&invoke).await.unwrap();

        let reply = client.read_envelope().await.unwrap();
        assert_eq!(reply.kind, EnvelopeKind::Error);
        assert_eq!(reply.callid, Some(9));
        assert!(reply.error_message().contains("not registered"));

        let callargs = reply.callargs.unwrap();
        assert_eq!(callargs["id"], 9);
        assert_eq!(callargs["app"], "nope");
        assert_eq!(callargs["args"]["a"], 1);
    }

    #[tokio::test]
    async fn test_handler_panic_becomes_error_reply() {
        let stats = Arc::new(ServerStats::default());
        let (mut client, _shutdown) = spawn_driver(test_registry(), stats);

        client.send_envelope(&Envelope::connect(1, "client")).await.unwrap();
        client.read_envelope().await.unwrap();

        let invoke = Envelope::invoke(2, "client", "calc", "boom", json!({}));
        client.send_envelope(&invoke).await.unwrap();
        let reply = client.read_envelope().await.unwrap();
        assert_eq!(reply.kind, EnvelopeKind::Error);
        assert!(reply.error_message().contains("panicked"));

        // The loop survived the panic.
        let invoke = Envelope::invoke(3, "client", "echo", "ping", json!({"ok": true}));
        client.send_envelope(&invoke).await.unwrap();
        let reply = client.read_envelope().await.unwrap();
        assert_eq!(reply.kind, EnvelopeKind::Ok);
    }

    #[tokio::test]
    async fn test_missing_method_field_answered_with_error() {
        let stats = Arc::new(ServerStats::default());
        let (mut client, _shutdown) = spawn_driver(test_registry(), stats);

        let mut invoke = Envelope::invoke(4, "client", "echo", "ping", json!({}));
        invoke.method = None;
        client.send_envelope(&invoke).await.unwrap();

        let reply = client.read_envelope().await.unwrap();
        assert_eq!(reply.kind, EnvelopeKind::Error);
        assert!(reply.error_message().contains("method"));
    }

    #[tokio::test]
    async fn test_unrecognized_type_answered_with_error() {
        let stats = Arc::new(ServerStats::default());
        let (mut client, _shutdown) = spawn_driver(test_registry(), stats);

        client.send_envelope(&Envelope::connect(1, "client")).await.unwrap();
        client.read_envelope().await.unwrap();

        client
            .send_text(r#"{"id": 2, "type": "banana", "host": "client"}"#)
            .await
            .unwrap();
        let reply = client.read_envelope().await.unwrap();
        assert_eq!(reply.kind, EnvelopeKind::Error);
        assert_eq!(reply.callid, Some(2));
        assert!(reply.error_message().contains("unrecognized"));

        // State unchanged: the persistent connection still serves.
        let invoke = Envelope::invoke(3, "client", "echo", "ping", json!({}));
        client.send_envelope(&invoke).await.unwrap();
        assert_eq!(client.read_envelope().await.unwrap().kind, EnvelopeKind::Ok);
    }
}
