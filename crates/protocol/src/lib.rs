//! Socket wire protocol.
//!
//! Every frame in either direction is a JSON envelope `{event, data}`.
//! Inbound events are client intents (send, status, typing, presence,
//! call signalling); outbound events are the closed server-push set.

use serde::{Deserialize, Serialize};

pub mod events;
pub mod payloads;

pub use payloads::*;

// ── Constants ────────────────────────────────────────────────────────────────

/// Maximum inbound frame size (bytes). Configurable; this is the default.
pub const MAX_FRAME_BYTES: usize = 64 * 1024;
/// Default interval between server pings.
pub const PING_INTERVAL_SECS: u64 = 25;
/// Default read deadline: dropped when no frame/pong arrives in time.
pub const PONG_TIMEOUT_SECS: u64 = 35;
/// Default bounded per-connection send queue length.
pub const SEND_QUEUE_LEN: usize = 256;

// ── Envelope ─────────────────────────────────────────────────────────────────

/// The outer JSON object framing every socket event, in both directions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub event: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl Envelope {
    pub fn new(event: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    /// Build an envelope from a serializable payload.
    ///
    /// Falls back to `null` data when serialization fails; payload types in
    /// this crate cannot fail to serialize.
    pub fn from_payload<T: Serialize>(event: impl Into<String>, payload: &T) -> Self {
        Self {
            event: event.into(),
            data: serde_json::to_value(payload).unwrap_or(serde_json::Value::Null),
        }
    }

    /// An `error` envelope carrying a surface code and message.
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self::new(
            events::outbound::ERROR,
            serde_json::json!({ "code": code, "message": message.into() }),
        )
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| r#"{"event":"error","data":null}"#.into())
    }
}

// ── Message wire types ───────────────────────────────────────────────────────

/// Message content kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
    Video,
    Audio,
    Document,
    Location,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Document => "document",
            Self::Location => "location",
        }
    }
}

/// Type-discriminated message content. Text carries a body; media kinds
/// carry a media reference; location packs coordinates into the body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
}

impl MessageContent {
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            body: Some(body.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_none()
            && self.media_id.is_none()
            && self.caption.is_none()
            && self.filename.is_none()
            && self.duration_ms.is_none()
    }
}

/// Per-recipient delivery state. Ordered: transitions may only move right.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryState {
    Sent,
    Delivered,
    Read,
}

impl DeliveryState {
    /// Monotonic rank; a transition is accepted only when the new rank is
    /// strictly greater than the stored one.
    pub fn rank(&self) -> i64 {
        match self {
            Self::Sent => 0,
            Self::Delivered => 1,
            Self::Read => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Read => "read",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sent" => Some(Self::Sent),
            "delivered" => Some(Self::Delivered),
            "read" => Some(Self::Read),
            _ => None,
        }
    }
}
