//! Typed payloads for the `data` half of the envelope.

use serde::{Deserialize, Serialize};

use crate::{MessageContent, MessageKind};

// ── Client → server ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageIn {
    pub chat_id: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub payload: MessageContent,
    pub client_msg_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_message_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusIn {
    pub message_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<String>,
    /// Routing hint: when present the fast path targets only the author.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteIn {
    pub message_id: String,
    pub chat_id: String,
    #[serde(default)]
    pub for_everyone: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypingIn {
    pub chat_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceSubscribeIn {
    pub user_ids: Vec<String>,
}

/// Call signalling payload. The server relays `payload` opaquely; SDP and
/// ICE are never interpreted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallSignalIn {
    pub call_id: String,
    pub target_user_id: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

// ── Server → client ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageSentAck {
    pub client_msg_id: String,
    pub message_id: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageNewOut {
    pub message_id: String,
    pub chat_id: String,
    pub sender_id: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub payload: MessageContent,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageStatusOut {
    pub message_id: String,
    pub chat_id: String,
    /// The recipient whose state changed.
    pub user_id: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageDeletedOut {
    pub message_id: String,
    pub chat_id: String,
    pub user_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageReactionOut {
    pub message_id: String,
    pub chat_id: String,
    pub user_id: String,
    pub emoji: String,
    pub removed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypingOut {
    pub chat_id: String,
    pub user_id: String,
    pub typing: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceOut {
    pub user_id: String,
    pub online: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PongOut {
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallSignalOut {
    pub call_id: String,
    pub caller_id: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::Envelope;

    #[test]
    fn send_payload_decodes_wire_shape() {
        let raw = r#"{
            "chat_id": "c1",
            "type": "text",
            "payload": {"body": "hi"},
            "client_msg_id": "k1"
        }"#;
        let p: SendMessageIn = serde_json::from_str(raw).unwrap();
        assert_eq!(p.kind, MessageKind::Text);
        assert_eq!(p.payload.body.as_deref(), Some("hi"));
        assert!(p.reply_to_message_id.is_none());
    }

    #[test]
    fn ack_envelope_shape() {
        let env = Envelope::from_payload(
            crate::events::outbound::MESSAGE_SENT,
            &MessageSentAck {
                client_msg_id: "k1".into(),
                message_id: "m1".into(),
                created_at: "2026-01-01T00:00:00Z".into(),
            },
        );
        assert_eq!(env.event, "message.sent");
        assert_eq!(env.data["client_msg_id"], "k1");
        assert_eq!(env.data["message_id"], "m1");
    }

    #[test]
    fn status_in_accepts_optional_hints() {
        let p: StatusIn = serde_json::from_str(r#"{"message_id":"m1"}"#).unwrap();
        assert!(p.chat_id.is_none());
        assert!(p.sender_id.is_none());
    }
}
