use std::sync::Arc;

use {bytes::Bytes, tracing::error};

use parley_bus::{DurableBus, subjects::subject};

/// Publishes chat lifecycle events on the durable bus.
///
/// Every payload carries the full `participants` list so gateway consumers
/// can route without an extra lookup, and membership events double as the
/// participant-cache invalidation signal.
pub struct ChatEventPublisher {
    bus: Arc<dyn DurableBus>,
}

impl ChatEventPublisher {
    pub fn new(bus: Arc<dyn DurableBus>) -> Self {
        Self { bus }
    }

    pub async fn chat_created(&self, chat_id: &str, chat_type: &str, participants: &[String]) {
        self.publish(subject::CHAT_CREATED, serde_json::json!({
            "chat_id": chat_id,
            "chat_type": chat_type,
            "participants": participants,
        }))
        .await;
    }

    pub async fn chat_updated(&self, chat_id: &str, participants: &[String]) {
        self.publish(subject::CHAT_UPDATED, serde_json::json!({
            "chat_id": chat_id,
            "participants": participants,
        }))
        .await;
    }

    pub async fn member_added(
        &self,
        chat_id: &str,
        user_id: &str,
        added_by: &str,
        participants: &[String],
    ) {
        self.publish(subject::GROUP_MEMBER_ADDED, serde_json::json!({
            "chat_id": chat_id,
            "user_id": user_id,
            "added_by": added_by,
            "participants": participants,
        }))
        .await;
    }

    pub async fn member_removed(
        &self,
        chat_id: &str,
        user_id: &str,
        removed_by: &str,
        participants: &[String],
    ) {
        self.publish(subject::GROUP_MEMBER_REMOVED, serde_json::json!({
            "chat_id": chat_id,
            "user_id": user_id,
            "removed_by": removed_by,
            "participants": participants,
        }))
        .await;
    }

    async fn publish(&self, subject: &str, payload: serde_json::Value) {
        let bytes = match serde_json::to_vec(&payload) {
            Ok(b) => Bytes::from(b),
            Err(e) => {
                error!(subject, error = %e, "failed to serialize chat event");
                return;
            },
        };
        if let Err(e) = self.bus.publish(subject, bytes).await {
            error!(subject, error = %e, "failed to publish chat event");
        }
    }
}
