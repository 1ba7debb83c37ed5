use std::{sync::Arc, time::Duration};

use {chrono::Utc, tracing::debug};

use parley_bus::{BusError, KeyValueStore, subjects::key};

/// Presence and typing markers over the ephemeral key/value seam.
///
/// Works against any [`KeyValueStore`] backend, so the fleet-wide presence
/// view is whatever store the gateways share.
#[derive(Clone)]
pub struct PresenceStore {
    kv: Arc<dyn KeyValueStore>,
    ttl: Duration,
    typing_ttl: Duration,
}

impl PresenceStore {
    pub fn new(kv: Arc<dyn KeyValueStore>, ttl: Duration, typing_ttl: Duration) -> Self {
        Self {
            kv,
            ttl,
            typing_ttl,
        }
    }

    /// Mark (or refresh) the online key.
    pub async fn mark_online(&self, user_id: &str) -> Result<(), BusError> {
        self.kv
            .set_ex(&key::presence(user_id), "online", self.ttl)
            .await
    }

    /// Delete the online key and record `last_seen`. Called when the last
    /// local connection for the user closes; other instances' keys simply
    /// expire.
    pub async fn mark_offline(&self, user_id: &str) -> Result<(), BusError> {
        self.kv.del(&key::presence(user_id)).await?;
        self.kv
            .set(&key::last_seen(user_id), &Utc::now().to_rfc3339())
            .await?;
        debug!(user_id, "presence cleared, last_seen written");
        Ok(())
    }

    /// Fleet-wide online check.
    pub async fn is_online(&self, user_id: &str) -> Result<bool, BusError> {
        self.kv.exists(&key::presence(user_id)).await
    }

    pub async fn last_seen(&self, user_id: &str) -> Result<Option<String>, BusError> {
        self.kv.get(&key::last_seen(user_id)).await
    }

    pub async fn typing_started(&self, chat_id: &str, user_id: &str) -> Result<(), BusError> {
        self.kv
            .set_ex(&key::typing(chat_id, user_id), "1", self.typing_ttl)
            .await
    }

    pub async fn typing_stopped(&self, chat_id: &str, user_id: &str) -> Result<(), BusError> {
        self.kv.del(&key::typing(chat_id, user_id)).await
    }

    pub async fn is_typing(&self, chat_id: &str, user_id: &str) -> Result<bool, BusError> {
        self.kv.exists(&key::typing(chat_id, user_id)).await
    }
}
