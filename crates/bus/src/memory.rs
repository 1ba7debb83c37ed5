//! In-memory bus and key/value backends for tests and single-node runs.
//!
//! `MemoryDurableBus` keeps a per-subject log and per-durable-consumer
//! queues, so named consumers resume across re-subscribes within the
//! process and nacked deliveries are redelivered, enough to exercise the
//! at-least-once contract without a broker.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use {
    async_trait::async_trait,
    bytes::Bytes,
    dashmap::DashMap,
    tokio::sync::{Notify, broadcast, mpsc},
};

use crate::{
    durable::{Acker, DurableBus, DurableDelivery, DurableSubscription},
    ephemeral::{EphemeralBus, EphemeralSubscription, KeyValueStore},
    error::BusResult,
};

// ── Durable ──────────────────────────────────────────────────────────────────

struct ConsumerState {
    subject: String,
    durable_name: String,
    queue: Mutex<VecDeque<Bytes>>,
    notify: Notify,
}

#[derive(Default)]
pub struct MemoryDurableBus {
    log: DashMap<String, Vec<Bytes>>,
    consumers: Mutex<Vec<Arc<ConsumerState>>>,
}

impl MemoryDurableBus {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DurableBus for MemoryDurableBus {
    async fn publish(&self, subject: &str, payload: Bytes) -> BusResult<()> {
        self.log
            .entry(subject.to_string())
            .or_default()
            .push(payload.clone());

        let consumers = self.consumers.lock().unwrap_or_else(|p| p.into_inner());
        for c in consumers.iter().filter(|c| c.subject == subject) {
            c.queue
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .push_back(payload.clone());
            c.notify.notify_one();
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        subject: &str,
        durable_name: &str,
    ) -> BusResult<DurableSubscription> {
        let state = {
            let mut consumers = self.consumers.lock().unwrap_or_else(|p| p.into_inner());
            match consumers
                .iter()
                .find(|c| c.subject == subject && c.durable_name == durable_name)
            {
                // Resuming a known durable consumer: its queue still holds
                // whatever was not consumed.
                Some(existing) => Arc::clone(existing),
                None => {
                    // New durable consumer starts from the beginning of the
                    // subject log.
                    let backlog: VecDeque<Bytes> = self
                        .log
                        .get(subject)
                        .map(|l| l.iter().cloned().collect())
                        .unwrap_or_default();
                    let state = Arc::new(ConsumerState {
                        subject: subject.to_string(),
                        durable_name: durable_name.to_string(),
                        queue: Mutex::new(backlog),
                        notify: Notify::new(),
                    });
                    consumers.push(Arc::clone(&state));
                    state
                },
            }
        };

        let stream = futures::stream::unfold(state, |state| async move {
            loop {
                let popped = state
                    .queue
                    .lock()
                    .unwrap_or_else(|p| p.into_inner())
                    .pop_front();
                if let Some(payload) = popped {
                    let delivery = DurableDelivery::new(
                        state.subject.clone(),
                        payload.clone(),
                        Box::new(MemoryAcker {
                            state: Arc::clone(&state),
                            payload,
                        }),
                    );
                    return Some((delivery, state));
                }
                state.notify.notified().await;
            }
        });

        Ok(DurableSubscription::new(Box::pin(stream)))
    }
}

struct MemoryAcker {
    state: Arc<ConsumerState>,
    payload: Bytes,
}

#[async_trait]
impl Acker for MemoryAcker {
    async fn ack(&self) -> BusResult<()> {
        Ok(())
    }

    async fn nack(&self) -> BusResult<()> {
        self.state
            .queue
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push_front(self.payload.clone());
        self.state.notify.notify_one();
        Ok(())
    }
}

// ── Ephemeral ────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryEphemeralBus {
    channels: DashMap<String, broadcast::Sender<Bytes>>,
}

impl MemoryEphemeralBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<Bytes> {
        self.channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(256).0)
            .clone()
    }
}

#[async_trait]
impl EphemeralBus for MemoryEphemeralBus {
    async fn publish(&self, channel: &str, payload: Bytes) -> BusResult<()> {
        // No subscriber is not an error: fire-and-forget.
        let _ = self.sender(channel).send(payload);
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> BusResult<EphemeralSubscription> {
        let mut brx = self.sender(channel).subscribe();
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            loop {
                match brx.recv().await {
                    Ok(payload) => {
                        if tx.send(payload).await.is_err() {
                            break;
                        }
                    },
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Ok(EphemeralSubscription::new(rx))
    }
}

// ── Key/value ────────────────────────────────────────────────────────────────

struct KvEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl KvEntry {
    fn live(&self) -> bool {
        self.expires_at.is_none_or(|t| Instant::now() < t)
    }
}

#[derive(Default)]
pub struct MemoryKv {
    entries: DashMap<String, KvEntry>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryKv {
    async fn get(&self, key: &str) -> BusResult<Option<String>> {
        match self.entries.get(key) {
            Some(e) if e.live() => Ok(Some(e.value.clone())),
            Some(_) => {
                drop(self.entries.remove(key));
                Ok(None)
            },
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str) -> BusResult<()> {
        self.entries.insert(key.to_string(), KvEntry {
            value: value.to_string(),
            expires_at: None,
        });
        Ok(())
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> BusResult<()> {
        self.entries.insert(key.to_string(), KvEntry {
            value: value.to_string(),
            expires_at: Some(Instant::now() + ttl),
        });
        Ok(())
    }

    async fn del(&self, key: &str) -> BusResult<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> BusResult<bool> {
        Ok(self.get(key).await?.is_some())
    }

    async fn incr_ex(&self, key: &str, ttl: Duration) -> BusResult<i64> {
        let mut entry = self.entries.entry(key.to_string()).or_insert_with(|| KvEntry {
            value: "0".to_string(),
            expires_at: Some(Instant::now() + ttl),
        });
        if !entry.live() {
            entry.value = "0".to_string();
            entry.expires_at = Some(Instant::now() + ttl);
        }
        let next = entry.value.parse::<i64>().unwrap_or(0) + 1;
        entry.value = next.to_string();
        Ok(next)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn durable_delivers_in_publish_order() {
        let bus = MemoryDurableBus::new();
        let mut sub = bus.subscribe("msg.new", "t-order").await.unwrap();
        bus.publish("msg.new", Bytes::from_static(b"a")).await.unwrap();
        bus.publish("msg.new", Bytes::from_static(b"b")).await.unwrap();

        let first = sub.next().await.unwrap();
        assert_eq!(&first.payload[..], b"a");
        first.ack().await.unwrap();
        let second = sub.next().await.unwrap();
        assert_eq!(&second.payload[..], b"b");
    }

    #[tokio::test]
    async fn new_durable_consumer_sees_backlog() {
        let bus = MemoryDurableBus::new();
        bus.publish("msg.new", Bytes::from_static(b"early"))
            .await
            .unwrap();
        let mut sub = bus.subscribe("msg.new", "t-backlog").await.unwrap();
        let d = sub.next().await.unwrap();
        assert_eq!(&d.payload[..], b"early");
    }

    #[tokio::test]
    async fn nack_redelivers() {
        let bus = MemoryDurableBus::new();
        let mut sub = bus.subscribe("msg.new", "t-nack").await.unwrap();
        bus.publish("msg.new", Bytes::from_static(b"x")).await.unwrap();

        let d = sub.next().await.unwrap();
        d.nack().await.unwrap();
        drop(d);
        let again = sub.next().await.unwrap();
        assert_eq!(&again.payload[..], b"x");
    }

    #[tokio::test]
    async fn subjects_are_isolated() {
        let bus = MemoryDurableBus::new();
        let mut sub = bus.subscribe("msg.deleted", "t-iso").await.unwrap();
        bus.publish("msg.new", Bytes::from_static(b"other"))
            .await
            .unwrap();
        bus.publish("msg.deleted", Bytes::from_static(b"mine"))
            .await
            .unwrap();
        let d = sub.next().await.unwrap();
        assert_eq!(&d.payload[..], b"mine");
    }

    #[tokio::test]
    async fn ephemeral_routes_to_subscriber() {
        let bus = MemoryEphemeralBus::new();
        let mut sub = bus.subscribe("user:channel:u1").await.unwrap();
        bus.publish("user:channel:u1", Bytes::from_static(b"hello"))
            .await
            .unwrap();
        assert_eq!(&sub.next().await.unwrap()[..], b"hello");
    }

    #[tokio::test]
    async fn ephemeral_publish_without_subscriber_is_dropped() {
        let bus = MemoryEphemeralBus::new();
        bus.publish("user:channel:nobody", Bytes::from_static(b"gone"))
            .await
            .unwrap();
        let mut sub = bus.subscribe("user:channel:nobody").await.unwrap();
        bus.publish("user:channel:nobody", Bytes::from_static(b"seen"))
            .await
            .unwrap();
        assert_eq!(&sub.next().await.unwrap()[..], b"seen");
    }

    #[tokio::test]
    async fn kv_ttl_expires() {
        let kv = MemoryKv::new();
        kv.set_ex("presence:u1", "online", Duration::from_millis(20))
            .await
            .unwrap();
        assert!(kv.exists("presence:u1").await.unwrap());
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(!kv.exists("presence:u1").await.unwrap());
    }

    #[tokio::test]
    async fn incr_counts_within_window() {
        let kv = MemoryKv::new();
        assert_eq!(kv.incr_ex("rl:u1", Duration::from_secs(60)).await.unwrap(), 1);
        assert_eq!(kv.incr_ex("rl:u1", Duration::from_secs(60)).await.unwrap(), 2);
    }
}
