use std::sync::Arc;

use {bytes::Bytes, tracing::error};

use parley_bus::{DurableBus, subjects::subject};

use crate::model::Message;

/// Publishes message lifecycle events on the durable bus.
///
/// Publish failures are logged and swallowed: the row is already persisted
/// and the next history fetch reconciles, so a bus hiccup must not fail the
/// client call.
pub struct EventPublisher {
    bus: Arc<dyn DurableBus>,
}

impl EventPublisher {
    pub fn new(bus: Arc<dyn DurableBus>) -> Self {
        Self { bus }
    }

    pub async fn new_message(&self, msg: &Message) {
        self.publish(subject::MSG_NEW, serde_json::json!({
            "message_id": msg.message_id,
            "chat_id": msg.chat_id,
            "sender_id": msg.sender_id,
            "type": msg.kind,
            "payload": msg.payload,
            "created_at": msg.created_at,
        }))
        .await;
    }

    pub async fn status_updated(
        &self,
        message_id: &str,
        chat_id: &str,
        user_id: &str,
        sender_id: &str,
        status: &str,
    ) {
        self.publish(subject::MSG_STATUS_UPDATED, serde_json::json!({
            "message_id": message_id,
            "chat_id": chat_id,
            "user_id": user_id,
            "sender_id": sender_id,
            "status": status,
        }))
        .await;
    }

    pub async fn deleted(&self, message_id: &str, chat_id: &str, user_id: &str, for_everyone: bool) {
        self.publish(subject::MSG_DELETED, serde_json::json!({
            "message_id": message_id,
            "chat_id": chat_id,
            "user_id": user_id,
            "for_everyone": for_everyone,
        }))
        .await;
    }

    pub async fn reaction(
        &self,
        message_id: &str,
        chat_id: &str,
        user_id: &str,
        emoji: &str,
        removed: bool,
    ) {
        self.publish(subject::MSG_REACTION, serde_json::json!({
            "message_id": message_id,
            "chat_id": chat_id,
            "user_id": user_id,
            "emoji": emoji,
            "removed": removed,
        }))
        .await;
    }

    async fn publish(&self, subject: &str, payload: serde_json::Value) {
        let bytes = match serde_json::to_vec(&payload) {
            Ok(b) => Bytes::from(b),
            Err(e) => {
                error!(subject, error = %e, "failed to serialize message event");
                return;
            },
        };
        if let Err(e) = self.bus.publish(subject, bytes).await {
            error!(subject, error = %e, "failed to publish message event");
        }
    }
}
