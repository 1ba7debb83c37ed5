use std::time::Duration;

use {async_trait::async_trait, bytes::Bytes, tokio::sync::mpsc};

use crate::error::BusResult;

/// Low-latency fire-and-forget pub/sub keyed by channel name.
///
/// Carries raw outbound envelope bytes on `user:channel:{user_id}`. No
/// durability: a message published while nobody subscribes is gone, which
/// is fine; authoritative state lives on the durable bus and in the store.
#[async_trait]
pub trait EphemeralBus: Send + Sync {
    async fn publish(&self, channel: &str, payload: Bytes) -> BusResult<()>;

    /// Subscribe to a channel. Dropping the returned subscription tears the
    /// underlying subscription down.
    async fn subscribe(&self, channel: &str) -> BusResult<EphemeralSubscription>;
}

/// Receiving half of an ephemeral subscription.
pub struct EphemeralSubscription {
    rx: mpsc::Receiver<Bytes>,
}

impl EphemeralSubscription {
    pub fn new(rx: mpsc::Receiver<Bytes>) -> Self {
        Self { rx }
    }

    pub async fn next(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }
}

/// TTL'd key/value seam: presence and typing markers, participant caches,
/// rate-limit counters.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> BusResult<Option<String>>;

    /// Set without expiry (`last_seen` keys).
    async fn set(&self, key: &str, value: &str) -> BusResult<()>;

    /// Set with a TTL; the key self-clears when not refreshed.
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> BusResult<()>;

    async fn del(&self, key: &str) -> BusResult<()>;

    async fn exists(&self, key: &str) -> BusResult<bool>;

    /// Atomically increment a counter, setting `ttl` when the key is
    /// created. Returns the post-increment value. Used for fixed-window
    /// rate limiting.
    async fn incr_ex(&self, key: &str, ttl: Duration) -> BusResult<i64>;
}
