//! Subject, stream, and key layout shared by publishers and consumers.

/// Durable-bus subjects.
pub mod subject {
    pub const MSG_NEW: &str = "msg.new";
    pub const MSG_STATUS_UPDATED: &str = "msg.status.updated";
    pub const MSG_DELETED: &str = "msg.deleted";
    pub const MSG_REACTION: &str = "msg.reaction";
    pub const CHAT_CREATED: &str = "chat.created";
    pub const CHAT_UPDATED: &str = "chat.updated";
    pub const GROUP_MEMBER_ADDED: &str = "group.member.added";
    pub const GROUP_MEMBER_REMOVED: &str = "group.member.removed";
}

/// Durable streams and their subject bindings.
pub mod stream {
    pub const MESSAGES: &str = "MESSAGES";
    pub const MESSAGES_SUBJECTS: &[&str] = &["msg.>"];
    pub const CHATS: &str = "CHATS";
    pub const CHATS_SUBJECTS: &[&str] = &["chat.>", "group.>"];

    /// Which stream a subject belongs to.
    pub fn for_subject(subject: &str) -> &'static str {
        if subject.starts_with("msg.") {
            MESSAGES
        } else {
            CHATS
        }
    }
}

/// Ephemeral-layer channel and key layout.
pub mod key {
    /// Per-user outbound envelope channel.
    pub fn user_channel(user_id: &str) -> String {
        format!("user:channel:{user_id}")
    }

    /// Cached participant list for a chat (short TTL).
    pub fn participants(chat_id: &str) -> String {
        format!("chat:participants:{chat_id}")
    }

    /// Online marker, TTL-bound.
    pub fn presence(user_id: &str) -> String {
        format!("presence:{user_id}")
    }

    /// RFC 3339 timestamp of the last offline transition.
    pub fn last_seen(user_id: &str) -> String {
        format!("last_seen:{user_id}")
    }

    /// Short-TTL typing marker.
    pub fn typing(chat_id: &str, user_id: &str) -> String {
        format!("typing:{chat_id}:{user_id}")
    }

    /// Fixed-window rate-limit counter.
    pub fn rate_limit(user_id: &str, window: i64) -> String {
        format!("ratelimit:{user_id}:{window}")
    }
}
