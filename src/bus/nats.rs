//! JetStream-backed implementation of [`ConsumerAdmin`].

use async_nats::jetstream;
use async_nats::jetstream::consumer::pull;
use async_nats::jetstream::consumer::{AckPolicy, DeliverPolicy};
use async_nats::jetstream::stream::Stream;
use async_trait::async_trait;
use futures::StreamExt;
use tracing::{info, warn};

use super::{
    ConsumerAdmin, ConsumerSpec, ConsumerState, DeliverFrom, DeliveryError, InboundMessage,
    MessageStream,
};
use crate::backoff;
use crate::config::NatsConfig;
use crate::error::{Error, Result};

pub struct NatsBus {
    context: jetstream::Context,
    stream_name: String,
}

impl NatsBus {
    /// Connects with unbounded reconnects. The first connection is retried in
    /// the background, so this returns before the server is reachable.
    pub async fn connect(config: &NatsConfig) -> Result<Self> {
        info!(url = %config.url, stream = %config.stream, "Connecting to NATS");

        let client = async_nats::ConnectOptions::new()
            .retry_on_initial_connect()
            .max_reconnects(None::<usize>)
            .reconnect_delay_callback(backoff::delay_for_attempt)
            .event_callback(|event| async move {
                match event {
                    async_nats::Event::Connected => info!("NATS connected"),
                    async_nats::Event::Disconnected => warn!("NATS disconnected"),
                    other => info!("NATS event: {other}"),
                }
            })
            .connect(&config.url)
            .await
            .map_err(|e| Error::Bus(e.to_string()))?;

        Ok(Self {
            context: jetstream::new(client),
            stream_name: config.stream.clone(),
        })
    }

    async fn stream(&self) -> Result<Stream> {
        self.context
            .get_stream(&self.stream_name)
            .await
            .map_err(|e| Error::Bus(format!("stream '{}': {e}", self.stream_name)))
    }

    async fn consumer_exists(&self, stream: &Stream, durable_name: &str) -> Result<bool> {
        let mut names = std::pin::pin!(stream.consumer_names());
        while let Some(name) = names.next().await {
            if name.map_err(|e| Error::Bus(e.to_string()))? == durable_name {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn existing_consumer(
        &self,
        stream: &Stream,
        durable_name: &str,
    ) -> Result<Option<jetstream::consumer::Info>> {
        if !self.consumer_exists(stream, durable_name).await? {
            return Ok(None);
        }
        let consumer = stream
            .get_consumer::<pull::Config>(durable_name)
            .await
            .map_err(|e| Error::Bus(e.to_string()))?;
        Ok(Some(consumer.cached_info().clone()))
    }

    async fn deliver_policy(&self, stream: &Stream, spec: &ConsumerSpec) -> Result<DeliverPolicy> {
        if let (DeliverFrom::Existing, Some(name)) = (spec.deliver_from, &spec.durable_name) {
            // The bus rejects a deliver policy change on update.
            if let Some(info) = self.existing_consumer(stream, name).await? {
                return Ok(info.config.deliver_policy);
            }
        }

        let start = match spec.deliver_from {
            DeliverFrom::StartTime(at) => at,
            DeliverFrom::Existing => chrono::Utc::now(),
        };
        let start_time = time::OffsetDateTime::from_unix_timestamp(start.timestamp())
            .map_err(|e| Error::Bus(e.to_string()))?;
        Ok(DeliverPolicy::ByStartTime { start_time })
    }
}

#[async_trait]
impl ConsumerAdmin for NatsBus {
    async fn find_consumer(&self, durable_name: &str) -> Result<Option<ConsumerState>> {
        let stream = self.stream().await?;
        Ok(self
            .existing_consumer(&stream, durable_name)
            .await?
            .map(|info| ConsumerState {
                name: info.name,
                filter_subjects: info.config.filter_subjects,
            }))
    }

    async fn open(&self, spec: &ConsumerSpec) -> Result<MessageStream> {
        let stream = self.stream().await?;
        let deliver_policy = self.deliver_policy(&stream, spec).await?;

        let consumer = stream
            .create_consumer(pull::Config {
                durable_name: spec.durable_name.clone(),
                filter_subjects: spec.filter_subjects.clone(),
                deliver_policy,
                ack_policy: AckPolicy::Explicit,
                ack_wait: spec.ack_wait,
                inactive_threshold: spec.inactive_threshold,
                ..Default::default()
            })
            .await
            .map_err(|e| Error::Bus(e.to_string()))?;

        let messages = consumer
            .messages()
            .await
            .map_err(|e| Error::Bus(e.to_string()))?;

        Ok(messages
            .map(|item| match item {
                Ok(message) => Ok(Box::new(NatsMessage(message)) as Box<dyn InboundMessage>),
                Err(e) => match e.kind() {
                    pull::MessagesErrorKind::ConsumerDeleted => Err(DeliveryError::ConsumerDeleted),
                    _ => Err(DeliveryError::Transport(e.to_string())),
                },
            })
            .boxed())
    }
}

struct NatsMessage(jetstream::Message);

#[async_trait]
impl InboundMessage for NatsMessage {
    fn subject(&self) -> &str {
        self.0.subject.as_str()
    }

    fn payload(&self) -> &[u8] {
        &self.0.payload
    }

    async fn ack(&self) -> Result<()> {
        self.0.ack().await.map_err(|e| Error::Bus(e.to_string()))
    }
}
