//! Broker capability: connect, publish-async, describe-topic, close.
//!
//! [`KafkaProducer`] talks to a real cluster; [`StubBroker`] is an in-process
//! stand-in with scriptable failures.

pub mod connection;
pub mod kafka;
pub mod stub;

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::config::BrokerConfig;
use crate::Result;

pub use connection::ConnectionManager;
pub use kafka::{KafkaConnector, KafkaProducer};
pub use stub::{SentMessage, StubBroker, StubConnector};

/// Resolves once the broker has acknowledged or rejected a message.
pub type DeliveryReceipt = BoxFuture<'static, Result<()>>;

#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub key: String,
    pub payload: Vec<u8>,
    pub retries: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicDescription {
    pub name: String,
    pub partitions: usize,
}

/// Producer settings handed to a connector, taken from configuration.
#[derive(Debug, Clone)]
pub struct ProducerSettings {
    pub broker: BrokerConfig,
    pub schema_name: Option<String>,
}

/// A connected producer bound to one topic.
#[async_trait]
pub trait BrokerProducer: Send + Sync + 'static {
    fn topic(&self) -> &str;

    /// Hands a message to the client without waiting for delivery.
    ///
    /// The receipt completes on the client's own execution context.
    fn send(&self, message: OutboundMessage) -> DeliveryReceipt;

    async fn describe_topic(&self) -> Result<TopicDescription>;

    /// Flushes pending messages and releases the connection.
    async fn close(&self) -> Result<()>;
}

/// Creates producers; one call is one connection attempt.
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    async fn connect(&self, settings: &ProducerSettings) -> Result<Arc<dyn BrokerProducer>>;
}
