//! Live channel frames.

use crate::batch::{ConfigSnapshot, UpdateBatch};
use crate::error::{CodecError, CodecResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Credentials sent by a client when authentication is enabled.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// User name.
    pub username: String,
    /// Password, as stored in the running configuration.
    pub password: String,
}

impl Credentials {
    /// Creates a credentials pair.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// A frame sent from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "lowercase")]
pub enum ClientFrame {
    /// Authentication challenge answer.
    Auth(Credentials),
    /// One or more field writes.
    Message(UpdateBatch),
}

impl ClientFrame {
    /// Returns the event name used on the wire.
    pub fn event_name(&self) -> &'static str {
        match self {
            ClientFrame::Auth(_) => "auth",
            ClientFrame::Message(_) => "message",
        }
    }

    /// Encodes to a JSON text frame.
    pub fn encode(&self) -> CodecResult<String> {
        serde_json::to_string(self).map_err(|e| CodecError::encoding_failed(e.to_string()))
    }

    /// Decodes from a JSON text frame.
    pub fn decode(text: &str) -> CodecResult<Self> {
        serde_json::from_str(text).map_err(|e| CodecError::decoding_failed(e.to_string()))
    }
}

/// A frame sent from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "lowercase")]
pub enum ServerFrame {
    /// Credentials were not accepted.
    Reject,
    /// Capability snapshot pushed on connect.
    Config(ConfigSnapshot),
    /// Authoritative update broadcast.
    Message(UpdateBatch),
    /// Informational log entry.
    Log(String),
    /// Server-side error to show to the user.
    Err(String),
}

impl ServerFrame {
    /// Returns the event name used on the wire.
    pub fn event_name(&self) -> &'static str {
        match self {
            ServerFrame::Reject => "reject",
            ServerFrame::Config(_) => "config",
            ServerFrame::Message(_) => "message",
            ServerFrame::Log(_) => "log",
            ServerFrame::Err(_) => "err",
        }
    }

    /// Encodes to a JSON text frame.
    pub fn encode(&self) -> CodecResult<String> {
        serde_json::to_string(self).map_err(|e| CodecError::encoding_failed(e.to_string()))
    }

    /// Decodes from a JSON text frame.
    pub fn decode(text: &str) -> CodecResult<Self> {
        serde_json::from_str(text).map_err(|e| CodecError::decoding_failed(e.to_string()))
    }
}
