//! Chat domain: chats, participants, group metadata, membership rules.
//!
//! The store is a trait seam with a SQLite implementation; the service
//! enforces membership/role rules and emits chat lifecycle events on the
//! durable bus so gateway instances can route them to participants.

pub mod events;
pub mod model;
pub mod service;
pub mod store;

pub use model::{
    Chat, ChatListItem, ChatPermission, ChatType, CreateGroupRequest, GroupInfo, Participant,
    Role, UpdateGroupRequest,
};
pub use service::{ChatService, LocalChatService};
pub use store::{ChatStore, SqliteChatStore};
