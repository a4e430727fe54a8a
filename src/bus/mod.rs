//! Push channel: durable JetStream consumer lifecycle and event dispatch.

mod handler;
mod manager;
pub mod nats;
pub mod subject;

pub use handler::{AckMode, Dispatched, EventHandler, HandlerRegistry, dispatch};
pub use manager::{ConsumerManager, ConsumerSettings};
pub use nats::NatsBus;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;

use crate::error::Result;

/// Where a consumer starts delivering from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliverFrom {
    /// Replay everything published since the given instant.
    StartTime(DateTime<Utc>),
    /// Keep whatever position the bus already tracks for this durable.
    Existing,
}

/// The consumer configuration the manager asks the bus for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerSpec {
    /// None requests an ephemeral consumer.
    pub durable_name: Option<String>,
    pub filter_subjects: Vec<String>,
    pub deliver_from: DeliverFrom,
    pub ack_wait: Duration,
    pub inactive_threshold: Duration,
}

/// What the bus reports about an existing durable consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerState {
    pub name: String,
    pub filter_subjects: Vec<String>,
}

/// Failures surfaced by a delivery stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// The consumer was removed out-of-band; the subscription must be rebuilt.
    ConsumerDeleted,
    /// Anything else; the connection layer is expected to recover on its own.
    Transport(String),
}

/// A single delivered message.
#[async_trait]
pub trait InboundMessage: Send + Sync {
    fn subject(&self) -> &str;
    fn payload(&self) -> &[u8];
    async fn ack(&self) -> Result<()>;
}

pub type MessageStream =
    BoxStream<'static, std::result::Result<Box<dyn InboundMessage>, DeliveryError>>;

/// Administrative side of the bus.
#[async_trait]
pub trait ConsumerAdmin: Send + Sync {
    async fn find_consumer(&self, durable_name: &str) -> Result<Option<ConsumerState>>;
    /// Creates or updates the consumer described by `spec` and starts delivery.
    async fn open(&self, spec: &ConsumerSpec) -> Result<MessageStream>;
}
