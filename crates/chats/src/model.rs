use {
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatType {
    Direct,
    Group,
}

impl ChatType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Group => "group",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "direct" => Some(Self::Direct),
            "group" => Some(Self::Group),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Member,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Member => "member",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chat {
    pub id: String,
    #[serde(rename = "type")]
    pub chat_type: ChatType,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A user's membership in a chat, with per-user per-chat state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub chat_id: String,
    pub user_id: String,
    pub role: Role,
    pub is_muted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mute_until: Option<DateTime<Utc>>,
    pub is_pinned: bool,
    /// Disappearing-messages timer in seconds, when enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_delete_secs: Option<i64>,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupInfo {
    pub chat_id: String,
    pub name: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    pub created_by: String,
    pub is_admin_only: bool,
}

/// Permission summary consumed by the message send path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatPermission {
    pub is_member: bool,
    pub chat_type: Option<ChatType>,
    pub is_admin_only: bool,
    pub is_admin: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateGroupRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub member_ids: Vec<String>,
    #[serde(default)]
    pub is_admin_only: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateGroupRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub avatar_url: Option<String>,
    pub is_admin_only: Option<bool>,
}

impl UpdateGroupRequest {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.avatar_url.is_none()
            && self.is_admin_only.is_none()
    }
}

/// One row of the chat-list screen, before message previews and unread
/// counts are attached by the HTTP layer.
#[derive(Debug, Clone, Serialize)]
pub struct ChatListItem {
    pub chat: Chat,
    pub participant: Participant,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<GroupInfo>,
    /// The other participant ids (direct chats carry exactly one).
    pub peer_ids: Vec<String>,
}

/// Allowed disappearing-messages timers, in seconds: 24h, 7d, 90d.
pub const AUTO_DELETE_TIMERS: &[i64] = &[86_400, 604_800, 7_776_000];
