//! Message domain: the persistent message store, the message service
//! collaborator contract, durable-bus event publication, and the
//! disappearing-messages sweeper.

pub mod model;
pub mod publisher;
pub mod service;
pub mod store;
pub mod sweeper;

pub use model::{
    ForwardedFrom, ListMessagesQuery, Message, Reaction, Receipt, RecipientStatus, ReplyPreview,
    SendMessageRequest,
};
pub use publisher::EventPublisher;
pub use service::{LocalMessageService, MessageService};
pub use store::{MessageStore, SqliteMessageStore, StatusUpdate};
pub use sweeper::DisappearingSweeper;
