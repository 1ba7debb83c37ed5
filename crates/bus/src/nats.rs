use {
    async_nats::jetstream::{
        self, AckKind,
        consumer::{AckPolicy, pull::Config as PullConfig},
        stream::Config as StreamConfig,
    },
    async_trait::async_trait,
    bytes::Bytes,
    tokio_stream::StreamExt,
    tracing::{info, warn},
};

use crate::{
    durable::{Acker, DurableBus, DurableDelivery, DurableSubscription},
    error::{BusError, BusResult},
    subjects::stream,
};

/// Durable bus backed by NATS JetStream.
pub struct JetStreamBus {
    js: jetstream::Context,
}

impl JetStreamBus {
    /// Connect and make sure the `MESSAGES` and `CHATS` streams exist, so
    /// startup ordering between services does not matter.
    pub async fn connect(url: &str) -> BusResult<Self> {
        let client = async_nats::connect(url)
            .await
            .map_err(|e| BusError::Connection(format!("nats connect {url}: {e}")))?;
        let js = jetstream::new(client);
        let bus = Self { js };
        bus.ensure_streams().await?;
        info!(url, "connected to jetstream");
        Ok(bus)
    }

    async fn ensure_streams(&self) -> BusResult<()> {
        self.ensure_stream(stream::MESSAGES, stream::MESSAGES_SUBJECTS)
            .await?;
        self.ensure_stream(stream::CHATS, stream::CHATS_SUBJECTS)
            .await
    }

    async fn ensure_stream(&self, name: &str, subjects: &[&str]) -> BusResult<()> {
        if self.js.get_stream(name).await.is_ok() {
            return Ok(());
        }
        self.js
            .create_stream(StreamConfig {
                name: name.to_string(),
                subjects: subjects.iter().map(|s| s.to_string()).collect(),
                ..Default::default()
            })
            .await
            .map_err(|e| BusError::Connection(format!("create stream {name}: {e}")))?;
        info!(stream = name, "created jetstream stream");
        Ok(())
    }
}

#[async_trait]
impl DurableBus for JetStreamBus {
    async fn publish(&self, subject: &str, payload: Bytes) -> BusResult<()> {
        let ack = self
            .js
            .publish(subject.to_string(), payload)
            .await
            .map_err(|e| BusError::Publish(format!("{subject}: {e}")))?;
        ack.await
            .map_err(|e| BusError::Publish(format!("{subject} ack: {e}")))?;
        Ok(())
    }

    async fn subscribe(
        &self,
        subject: &str,
        durable_name: &str,
    ) -> BusResult<DurableSubscription> {
        let stream_name = stream::for_subject(subject);
        let js_stream = self
            .js
            .get_stream(stream_name)
            .await
            .map_err(|e| BusError::Subscribe(format!("get stream {stream_name}: {e}")))?;

        let consumer = js_stream
            .get_or_create_consumer(durable_name, PullConfig {
                durable_name: Some(durable_name.to_string()),
                ack_policy: AckPolicy::Explicit,
                filter_subject: subject.to_string(),
                ..Default::default()
            })
            .await
            .map_err(|e| BusError::Subscribe(format!("consumer {durable_name}: {e}")))?;

        let messages = consumer
            .messages()
            .await
            .map_err(|e| BusError::Subscribe(format!("messages {durable_name}: {e}")))?;

        let deliveries = messages.filter_map(|res| match res {
            Ok(msg) => {
                let subject = msg.subject.to_string();
                let payload = msg.payload.clone();
                Some(DurableDelivery::new(
                    subject,
                    payload,
                    Box::new(NatsAcker { msg }),
                ))
            },
            Err(e) => {
                warn!(error = %e, "jetstream delivery error");
                None
            },
        });

        info!(subject, durable = durable_name, "durable consumer ready");
        Ok(DurableSubscription::new(Box::pin(deliveries)))
    }
}

struct NatsAcker {
    msg: jetstream::Message,
}

#[async_trait]
impl Acker for NatsAcker {
    async fn ack(&self) -> BusResult<()> {
        self.msg
            .ack()
            .await
            .map_err(|e| BusError::Publish(format!("ack: {e}")))
    }

    async fn nack(&self) -> BusResult<()> {
        self.msg
            .ack_with(AckKind::Nak(None))
            .await
            .map_err(|e| BusError::Publish(format!("nack: {e}")))
    }
}
