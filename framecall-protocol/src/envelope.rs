//! JSON envelope types carried as frame payloads.
//!
//! Every RPC message is one of four envelope kinds: a `control` message
//! (connection negotiation), an `invoke` request, an `OK` reply, or an
//! `ERROR` reply. Replies echo the id of the message they answer in
//! `callid`; the caller rejects a reply whose `callid` does not match
//! its outstanding call.

use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Value of `options.connection` requesting or acknowledging a
/// persistent connection.
pub const KEEP_ALIVE: &str = "keep-alive";

/// Control sub-type sent when opening a connection.
pub const ACTION_CONNECT: &str = "connect";

/// Envelope kinds.
///
/// Unknown `type` strings deserialize to [`EnvelopeKind::Unknown`] so
/// the receiver can answer with an `ERROR` envelope instead of tearing
/// the connection down over a decode failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnvelopeKind {
    #[serde(rename = "control")]
    Control,
    #[serde(rename = "invoke")]
    Invoke,
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "ERROR")]
    Error,
    #[serde(other, rename = "unknown")]
    Unknown,
}

/// Connection options carried by control envelopes and echoed in
/// keep-alive acknowledgments.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection: Option<String>,
}

impl ConnectionOptions {
    pub fn keep_alive() -> Self {
        Self {
            connection: Some(KEEP_ALIVE.to_string()),
        }
    }

    /// Returns whether these options request or confirm keep-alive.
    pub fn is_keep_alive(&self) -> bool {
        self.connection.as_deref() == Some(KEEP_ALIVE)
    }
}

/// The RPC message envelope.
///
/// One struct covers all four kinds; which optional fields are present
/// depends on the kind. The accessor helpers turn an absent required
/// field into [`ProtocolError::MissingField`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Sender-assigned sequence number, incremented once per message.
    pub id: u64,

    /// Envelope kind.
    #[serde(rename = "type")]
    pub kind: EnvelopeKind,

    /// Sender's identifying address string.
    pub host: String,

    /// Control sub-type, e.g. "connect" (control envelopes only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,

    /// Connection options (control envelopes only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<ConnectionOptions>,

    /// Target service name (invoke envelopes only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app: Option<String>,

    /// Target method name (invoke envelopes only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,

    /// Argument payload (invoke envelopes only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<Value>,

    /// Result payload (OK replies only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,

    /// Id of the envelope being replied to (replies only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callid: Option<u64>,

    /// Human-readable failure text (ERROR replies only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Short-form failure text accepted for compatibility.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,

    /// Echo of the failing request (ERROR replies to invokes only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callargs: Option<Value>,
}

impl Envelope {
    fn new(id: u64, kind: EnvelopeKind, host: impl Into<String>) -> Self {
        Self {
            id,
            kind,
            host: host.into(),
            action: None,
            options: None,
            app: None,
            method: None,
            args: None,
            value: None,
            callid: None,
            message: None,
            msg: None,
            callargs: None,
        }
    }

    /// Builds a control/connect envelope requesting keep-alive.
    pub fn connect(id: u64, host: impl Into<String>) -> Self {
        let mut env = Self::new(id, EnvelopeKind::Control, host);
        env.action = Some(ACTION_CONNECT.to_string());
        env.options = Some(ConnectionOptions::keep_alive());
        env
    }

    /// Builds an invoke envelope targeting `app`/`method`.
    pub fn invoke(
        id: u64,
        host: impl Into<String>,
        app: impl Into<String>,
        method: impl Into<String>,
        args: Value,
    ) -> Self {
        let mut env = Self::new(id, EnvelopeKind::Invoke, host);
        env.app = Some(app.into());
        env.method = Some(method.into());
        env.args = Some(args);
        env
    }

    /// Builds an OK reply to envelope `callid`.
    pub fn ok(id: u64, host: impl Into<String>, callid: u64) -> Self {
        let mut env = Self::new(id, EnvelopeKind::Ok, host);
        env.callid = Some(callid);
        env
    }

    /// Builds an ERROR reply to envelope `callid`.
    pub fn error(id: u64, host: impl Into<String>, callid: u64, message: impl Into<String>) -> Self {
        let mut env = Self::new(id, EnvelopeKind::Error, host);
        env.callid = Some(callid);
        env.message = Some(message.into());
        env
    }

    pub fn with_value(mut self, value: Value) -> Self {
        self.value = Some(value);
        self
    }

    pub fn with_callargs(mut self, callargs: Value) -> Self {
        self.callargs = Some(callargs);
        self
    }

    /// Returns whether this is a reply kind (OK or ERROR).
    pub fn is_reply(&self) -> bool {
        matches!(self.kind, EnvelopeKind::Ok | EnvelopeKind::Error)
    }

    /// Returns whether a control envelope requested keep-alive.
    pub fn wants_keep_alive(&self) -> bool {
        self.options
            .as_ref()
            .map(ConnectionOptions::is_keep_alive)
            .unwrap_or(false)
    }

    /// Returns whether an OK reply acknowledged keep-alive.
    pub fn confirms_keep_alive(&self) -> bool {
        self.value
            .as_ref()
            .and_then(|v| v.get("connection"))
            .and_then(Value::as_str)
            == Some(KEEP_ALIVE)
    }

    /// Returns the target service name of an invoke envelope.
    pub fn require_app(&self) -> Result<&str, ProtocolError> {
        self.app.as_deref().ok_or(ProtocolError::MissingField("app"))
    }

    /// Returns the target method name of an invoke envelope.
    pub fn require_method(&self) -> Result<&str, ProtocolError> {
        self.method
            .as_deref()
            .ok_or(ProtocolError::MissingField("method"))
    }

    /// Returns the argument payload of an invoke envelope.
    pub fn require_args(&self) -> Result<&Value, ProtocolError> {
        self.args.as_ref().ok_or(ProtocolError::MissingField("args"))
    }

    /// Returns the correlation id of a reply envelope.
    pub fn require_callid(&self) -> Result<u64, ProtocolError> {
        self.callid.ok_or(ProtocolError::MissingField("callid"))
    }

    /// Returns the failure text of an ERROR reply.
    ///
    /// The long `message` key is authoritative; `msg` is accepted as a
    /// fallback for older peers.
    pub fn error_message(&self) -> &str {
        self.message
            .as_deref()
            .or(self.msg.as_deref())
            .unwrap_or("remote error (no message)")
    }
}
