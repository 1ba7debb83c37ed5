use {async_trait::async_trait, bytes::Bytes, futures::stream::BoxStream, tokio_stream::StreamExt};

use crate::error::BusResult;

/// At-least-once pub/sub with persistent streams.
///
/// Subscriptions are named durable consumers: a restart resumes from the
/// last acknowledged position. Acknowledgement is manual: a handler either
/// fully succeeds and acks, or nacks for redelivery. Handlers must be
/// idempotent because redelivery can occur.
#[async_trait]
pub trait DurableBus: Send + Sync {
    /// Publish a payload and wait for the stream to confirm persistence.
    async fn publish(&self, subject: &str, payload: Bytes) -> BusResult<()>;

    /// Open (or resume) the durable consumer `durable_name` on `subject`.
    async fn subscribe(&self, subject: &str, durable_name: &str)
    -> BusResult<DurableSubscription>;
}

/// Manual acknowledgement handle for a single delivery.
#[async_trait]
pub trait Acker: Send + Sync {
    async fn ack(&self) -> BusResult<()>;
    /// Negative-acknowledge: the delivery is redelivered later.
    async fn nack(&self) -> BusResult<()>;
}

/// One delivery from a durable subscription.
pub struct DurableDelivery {
    pub subject: String,
    pub payload: Bytes,
    acker: Box<dyn Acker>,
}

impl DurableDelivery {
    pub fn new(subject: String, payload: Bytes, acker: Box<dyn Acker>) -> Self {
        Self {
            subject,
            payload,
            acker,
        }
    }

    pub async fn ack(&self) -> BusResult<()> {
        self.acker.ack().await
    }

    pub async fn nack(&self) -> BusResult<()> {
        self.acker.nack().await
    }
}

/// A stream of deliveries for one durable consumer.
pub struct DurableSubscription {
    inner: BoxStream<'static, DurableDelivery>,
}

impl DurableSubscription {
    pub fn new(inner: BoxStream<'static, DurableDelivery>) -> Self {
        Self { inner }
    }

    /// Next delivery, or `None` when the subscription ends.
    pub async fn next(&mut self) -> Option<DurableDelivery> {
        self.inner.next().await
    }
}
