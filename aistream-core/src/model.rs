use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// User-facing summary sent with every `aiError` caused by a failed generation.
pub const GENERATION_FAILED_MESSAGE: &str = "Failed to process your request";

/// User-facing summary sent when a connection already has a response streaming.
pub const BUSY_MESSAGE: &str = "A response is already in progress";

/// Opaque identifier for one live connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// One inbound `askAi`, stamped on receipt.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub id: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub sender: ConnectionId,
}

impl Request {
    pub fn new(sender: ConnectionId, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            content: content.into(),
            timestamp: Utc::now(),
            sender,
        }
    }
}

/// Result of a call to a generation provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Generation {
    pub response: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AskPayload {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkPayload {
    pub chunk: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
    pub error: String,
}

/// Events sent by the client. One JSON text frame per event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    #[serde(rename = "askAi")]
    AskAi(AskPayload),
}

/// Events sent by the server.
///
/// `AiResponse` may repeat; `AiResponseComplete` and `AiError` are terminal
/// and mutually exclusive for one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "aiResponse")]
    AiResponse(ChunkPayload),
    #[serde(rename = "aiResponseComplete")]
    AiResponseComplete,
    #[serde(rename = "aiError")]
    AiError(ErrorPayload),
}

impl ServerEvent {
    pub fn chunk(text: impl Into<String>) -> Self {
        Self::AiResponse(ChunkPayload { chunk: text.into() })
    }

    pub fn error(message: impl Into<String>, error: impl Into<String>) -> Self {
        Self::AiError(ErrorPayload {
            message: message.into(),
            error: error.into(),
        })
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::AiResponseComplete | Self::AiError(_))
    }

    pub fn as_chunk(&self) -> Option<&str> {
        match self {
            Self::AiResponse(p) => Some(p.chunk.as_str()),
            _ => None,
        }
    }
}
