//! A single client connection: connect, handshake, one call at a time.

use crate::error::ClientError;
use framecall_protocol::{Envelope, EnvelopeKind, FramedStream};
use serde_json::Value;
use std::time::Duration;
use tokio::net::TcpStream;

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Time bound for the initial TCP connect.
    pub connect_timeout: Duration,
    /// Read timeout applied to every frame read.
    pub read_timeout: Duration,
    /// Maximum decodable frame size.
    pub max_frame_size: usize,
    /// Optional `host` label for sent envelopes; defaults to the local
    /// socket address.
    pub host_label: Option<String>,
}

/// One framed connection to a callee runtime.
///
/// The protocol carries at most one in-flight call per connection, so
/// the call path is strictly send-then-read.
pub struct Connection {
    framed: FramedStream<TcpStream>,
    /// Local address string used as the `host` field on sent envelopes.
    local_host: String,
    /// Whether the server acknowledged keep-alive during the handshake.
    keep_alive: bool,
}

impl Connection {
    /// Opens a TCP connection and performs the keep-alive handshake.
    ///
    /// `handshake_id` is the caller-assigned sequence number for the
    /// control envelope.
    pub async fn open(
        ip: &str,
        port: u16,
        config: &ConnectionConfig,
        handshake_id: u64,
    ) -> Result<Self, ClientError> {
        let stream = tokio::time::timeout(
            config.connect_timeout,
            TcpStream::connect((ip, port)),
        )
        .await
        .map_err(|_| ClientError::ConnectTimeout)??;
        stream.set_nodelay(true).ok();

        let local_host = match config.host_label {
            Some(ref label) => label.clone(),
            None => stream
                .local_addr()
                .map(|a| a.to_string())
                .unwrap_or_else(|_| "unknown".to_string()),
        };

        let mut conn = Self {
            framed: FramedStream::with_max_frame_size(
                stream,
                config.read_timeout,
                config.max_frame_size,
            ),
            local_host,
            keep_alive: false,
        };
        conn.handshake(handshake_id).await?;
        Ok(conn)
    }

    /// Sends the control/connect envelope and records whether the peer
    /// agreed to keep the connection alive.
    async fn handshake(&mut self, id: u64) -> Result<(), ClientError> {
        let connect = Envelope::connect(id, self.local_host.clone());
        tracing::debug!(id, host = %self.local_host, "sending connect handshake");
        self.framed.send_envelope(&connect).await?;

        let reply = self.framed.read_envelope().await?;
        Self::check_correlation(id, &reply)?;

        match reply.kind {
            EnvelopeKind::Ok => {
                self.keep_alive = reply.confirms_keep_alive();
                tracing::debug!(keep_alive = self.keep_alive, "handshake complete");
                Ok(())
            }
            EnvelopeKind::Error => {
                Err(ClientError::HandshakeRejected(reply.error_message().to_string()))
            }
            other => Err(ClientError::UnexpectedReplyType(format!("{other:?}"))),
        }
    }

    /// Sends one invoke envelope and reads its reply.
    pub async fn call(
        &mut self,
        id: u64,
        service: &str,
        method: &str,
        args: Value,
        timeout: Duration,
    ) -> Result<Value, ClientError> {
        self.framed.set_read_timeout(timeout);

        let invoke = Envelope::invoke(id, self.local_host.clone(), service, method, args);
        tracing::debug!(id, service, method, "sending invoke");
        self.framed.send_envelope(&invoke).await?;

        let reply = self.framed.read_envelope().await?;
        Self::check_correlation(id, &reply)?;

        match reply.kind {
            EnvelopeKind::Ok => Ok(reply.value.unwrap_or(Value::Null)),
            EnvelopeKind::Error => Err(ClientError::Remote(reply.error_message().to_string())),
            other => Err(ClientError::UnexpectedReplyType(format!("{other:?}"))),
        }
    }

    fn check_correlation(sent: u64, reply: &Envelope) -> Result<(), ClientError> {
        if reply.callid != Some(sent) {
            return Err(ClientError::CorrelationMismatch {
                sent,
                received: reply.callid,
            });
        }
        Ok(())
    }

    /// Returns whether the server acknowledged keep-alive.
    pub fn is_keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// Shuts down the connection's write half; dropping closes the rest.
    pub async fn close(mut self) {
        let _ = self.framed.shutdown().await;
    }
}
