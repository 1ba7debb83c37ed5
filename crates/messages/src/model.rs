use std::collections::HashMap;

use {
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
};

use parley_protocol::{DeliveryState, MessageContent, MessageKind};

/// Per-recipient delivery record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipientStatus {
    pub status: DeliveryState,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reaction {
    pub user_id: String,
    pub emoji: String,
    pub reacted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwardedFrom {
    pub chat_id: String,
    pub message_id: String,
}

/// Trimmed view of a replied-to message attached to listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyPreview {
    pub message_id: String,
    pub sender_id: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub body: String,
}

/// The authoritative persisted message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub message_id: String,
    pub chat_id: String,
    pub sender_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_msg_id: Option<String>,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub payload: MessageContent,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to_message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to_preview: Option<ReplyPreview>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forwarded_from: Option<ForwardedFrom>,
    /// Delivery state per recipient user id.
    pub status: HashMap<String, RecipientStatus>,
    pub reactions: Vec<Reaction>,
    pub is_deleted: bool,
    pub is_starred_by: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SendMessageRequest {
    pub chat_id: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub payload: MessageContent,
    /// Client-supplied idempotency key. Absent for server-originated sends
    /// (forwarding), which generate their own.
    #[serde(default)]
    pub client_msg_id: Option<String>,
    #[serde(default)]
    pub reply_to_message_id: Option<String>,
    #[serde(default)]
    pub forwarded_from: Option<ForwardedFrom>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListMessagesQuery {
    pub chat_id: String,
    /// RFC 3339 `created_at` of the oldest message already seen.
    #[serde(default)]
    pub cursor: Option<String>,
    /// Tie-break message id at the cursor timestamp.
    #[serde(default)]
    pub cursor_id: Option<String>,
    #[serde(default)]
    pub limit: Option<i64>,
    /// Restrict to messages the viewer starred.
    #[serde(default)]
    pub starred: bool,
}

/// One row of the receipts listing.
#[derive(Debug, Clone, Serialize)]
pub struct Receipt {
    pub user_id: String,
    pub status: DeliveryState,
    pub updated_at: DateTime<Utc>,
}

/// Maximum reaction length in bytes; standard emoji fit well within this.
pub const MAX_EMOJI_BYTES: usize = 32;
/// Page-size cap for listings and search.
pub const MAX_PAGE_SIZE: i64 = 100;
pub const DEFAULT_PAGE_SIZE: i64 = 50;
/// Reply previews trim the original body to this many characters.
pub const REPLY_PREVIEW_CHARS: usize = 100;
