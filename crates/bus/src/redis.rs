use std::time::Duration;

use {
    async_trait::async_trait,
    bytes::Bytes,
    redis::{AsyncCommands, aio::ConnectionManager},
    tokio::sync::mpsc,
    tokio_stream::StreamExt,
    tracing::{debug, info, warn},
};

use crate::{
    ephemeral::{EphemeralBus, EphemeralSubscription, KeyValueStore},
    error::{BusError, BusResult},
};

/// Ephemeral pub/sub backed by Redis.
///
/// Commands go through a shared [`ConnectionManager`]; each subscription
/// holds its own pub/sub connection, torn down when the subscriber drops.
pub struct RedisBus {
    client: redis::Client,
    conn: ConnectionManager,
}

impl RedisBus {
    pub async fn connect(url: &str) -> BusResult<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| BusError::Connection(format!("redis open {url}: {e}")))?;
        let conn = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| BusError::Connection(format!("redis connect {url}: {e}")))?;
        info!(url, "connected to redis");
        Ok(Self { client, conn })
    }

    /// A key/value handle sharing this bus's connection.
    pub fn kv(&self) -> RedisKv {
        RedisKv {
            conn: self.conn.clone(),
        }
    }
}

#[async_trait]
impl EphemeralBus for RedisBus {
    async fn publish(&self, channel: &str, payload: Bytes) -> BusResult<()> {
        let mut conn = self.conn.clone();
        conn.publish::<_, _, ()>(channel, payload.to_vec())
            .await
            .map_err(|e| BusError::Publish(format!("{channel}: {e}")))
    }

    async fn subscribe(&self, channel: &str) -> BusResult<EphemeralSubscription> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| BusError::Subscribe(format!("{channel}: {e}")))?;
        pubsub
            .subscribe(channel)
            .await
            .map_err(|e| BusError::Subscribe(format!("{channel}: {e}")))?;

        let (tx, rx) = mpsc::channel(64);
        let channel_name = channel.to_string();
        tokio::spawn(async move {
            let mut stream = pubsub.into_on_message();
            while let Some(msg) = stream.next().await {
                let payload: Vec<u8> = match msg.get_payload() {
                    Ok(p) => p,
                    Err(e) => {
                        warn!(channel = %channel_name, error = %e, "bad pubsub payload");
                        continue;
                    },
                };
                if tx.send(Bytes::from(payload)).await.is_err() {
                    // Subscriber dropped; ending the task drops the pub/sub
                    // connection and with it the server-side subscription.
                    break;
                }
            }
            debug!(channel = %channel_name, "redis subscriber stopped");
        });

        Ok(EphemeralSubscription::new(rx))
    }
}

/// TTL'd key/value store on Redis.
#[derive(Clone)]
pub struct RedisKv {
    conn: ConnectionManager,
}

#[async_trait]
impl KeyValueStore for RedisKv {
    async fn get(&self, key: &str) -> BusResult<Option<String>> {
        let mut conn = self.conn.clone();
        conn.get(key)
            .await
            .map_err(|e| BusError::Store(format!("GET {key}: {e}")))
    }

    async fn set(&self, key: &str, value: &str) -> BusResult<()> {
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(key, value)
            .await
            .map_err(|e| BusError::Store(format!("SET {key}: {e}")))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> BusResult<()> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(key, value, ttl.as_secs())
            .await
            .map_err(|e| BusError::Store(format!("SETEX {key}: {e}")))
    }

    async fn del(&self, key: &str) -> BusResult<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key)
            .await
            .map_err(|e| BusError::Store(format!("DEL {key}: {e}")))
    }

    async fn exists(&self, key: &str) -> BusResult<bool> {
        let mut conn = self.conn.clone();
        conn.exists(key)
            .await
            .map_err(|e| BusError::Store(format!("EXISTS {key}: {e}")))
    }

    async fn incr_ex(&self, key: &str, ttl: Duration) -> BusResult<i64> {
        let mut conn = self.conn.clone();
        let count: i64 = conn
            .incr(key, 1)
            .await
            .map_err(|e| BusError::Store(format!("INCR {key}: {e}")))?;
        if count == 1 {
            conn.expire::<_, ()>(key, ttl.as_secs() as i64)
                .await
                .map_err(|e| BusError::Store(format!("EXPIRE {key}: {e}")))?;
        }
        Ok(count)
    }
}
