//! # Downstream Client Protocol
//!
//! Text frames exchanged with the browser client. Audio travels as binary
//! frames and never passes through these types.
//!
//! - **Client → Server**: `{"type":"start"}`, `{"type":"stop"}`, `{"type":"ping"}`
//! - **Server → Client**: `status`, `pong`, `transcript`, `error`

use crate::error::SessionError;
use crate::translation::events::Role;
use serde::{Deserialize, Serialize};

/// Control messages sent by the client.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientControl {
    Start,
    Stop,
    Ping,
    /// Valid JSON with a `type` this server doesn't handle
    #[serde(other)]
    Unknown,
}

impl ClientControl {
    /// Parse a client text frame.
    ///
    /// Only text that is not JSON at all is an error. JSON without a
    /// recognizable `type` maps to `Unknown` so the caller can ignore it.
    pub fn parse(text: &str) -> Result<Self, SessionError> {
        let value: serde_json::Value = serde_json::from_str(text)
            .map_err(|e| SessionError::ControlMessageMalformed(e.to_string()))?;
        Ok(serde_json::from_value(value).unwrap_or(ClientControl::Unknown))
    }
}

/// Messages sent to the client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    Status {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        source: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        target: Option<String>,
    },
    Pong,
    Transcript {
        role: &'static str,
        text: String,
    },
    Error {
        message: String,
    },
}

impl ServerMessage {
    pub fn status(message: &str) -> Self {
        ServerMessage::Status {
            message: message.to_string(),
            session_id: None,
            source: None,
            target: None,
        }
    }

    /// The `ready` status, sent once the upstream audio block is open.
    pub fn ready(session_id: &str, source: &str, target: &str) -> Self {
        ServerMessage::Status {
            message: "ready".to_string(),
            session_id: Some(session_id.to_string()),
            source: Some(source.to_string()),
            target: Some(target.to_string()),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error { message: message.into() }
    }

    /// A transcript line, or `None` for roles the client doesn't render.
    pub fn transcript(role: Role, text: &str) -> Option<Self> {
        let role = match role {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System | Role::Tool => return None,
        };
        Some(ServerMessage::Transcript {
            role,
            text: text.to_string(),
        })
    }

    pub fn to_json(&self) -> String {
        // Every variant holds plain strings, serialization can't fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}
