//! Event names on the socket wire.

/// Client → server events.
pub mod inbound {
    pub const MESSAGE_SEND: &str = "message.send";
    pub const MESSAGE_DELIVERED: &str = "message.delivered";
    pub const MESSAGE_READ: &str = "message.read";
    pub const MESSAGE_DELETE: &str = "message.delete";
    pub const TYPING_START: &str = "typing.start";
    pub const TYPING_STOP: &str = "typing.stop";
    pub const PRESENCE_SUBSCRIBE: &str = "presence.subscribe";
    pub const CALL_OFFER: &str = "call.offer";
    pub const CALL_ANSWER: &str = "call.answer";
    pub const CALL_ICE_CANDIDATE: &str = "call.ice-candidate";
    pub const CALL_END: &str = "call.end";
    pub const PING: &str = "ping";
}

/// Server → client events (closed set).
pub mod outbound {
    pub const MESSAGE_NEW: &str = "message.new";
    pub const MESSAGE_SENT: &str = "message.sent";
    pub const MESSAGE_STATUS: &str = "message.status";
    pub const MESSAGE_DELETED: &str = "message.deleted";
    pub const MESSAGE_REACTION: &str = "message.reaction";
    pub const TYPING: &str = "typing";
    pub const PRESENCE: &str = "presence";
    pub const ERROR: &str = "error";
    pub const PONG: &str = "pong";
    pub const CHAT_CREATED: &str = "chat.created";
    pub const CHAT_UPDATED: &str = "chat.updated";
    pub const GROUP_MEMBER_ADDED: &str = "group.member.added";
    pub const GROUP_MEMBER_REMOVED: &str = "group.member.removed";
    pub const CALL_OFFER: &str = "call.offer";
    pub const CALL_ANSWER: &str = "call.answer";
    pub const CALL_ICE_CANDIDATE: &str = "call.ice-candidate";
    pub const CALL_END: &str = "call.end";
}
