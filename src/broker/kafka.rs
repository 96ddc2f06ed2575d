use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use rdkafka::ClientConfig;
use tracing::{debug, info, warn};

use super::{
    BrokerConnector, BrokerProducer, DeliveryReceipt, OutboundMessage, ProducerSettings,
    TopicDescription,
};
use crate::config::BrokerConfig;
use crate::{Error, Result};

const FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

pub struct KafkaProducer {
    producer: FutureProducer,
    topic: String,
    schema_name: Option<String>,
    operation_timeout: Duration,
}

impl KafkaProducer {
    pub fn new(config: &BrokerConfig, schema_name: Option<String>) -> Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.url)
            .set("compression.type", &config.compression)
            .set("linger.ms", config.linger_ms.to_string())
            .set("batch.num.messages", config.batch_num_messages.to_string())
            .set("batch.size", config.batch_size.to_string())
            .set(
                "queue.buffering.max.messages",
                config.max_pending_messages.to_string(),
            )
            .set("message.timeout.ms", config.message_timeout_ms.to_string())
            .create()
            .map_err(Error::Kafka)?;

        Ok(Self {
            producer,
            topic: config.topic.clone(),
            schema_name,
            operation_timeout: config.operation_timeout(),
        })
    }

    fn headers(&self, message: &OutboundMessage) -> OwnedHeaders {
        let retries = message.retries.to_string();
        let headers = OwnedHeaders::new().insert(Header {
            key: "retry-count",
            value: Some(retries.as_str()),
        });

        match &self.schema_name {
            Some(name) => headers.insert(Header {
                key: "schema",
                value: Some(name.as_str()),
            }),
            None => headers,
        }
    }
}

#[async_trait]
impl BrokerProducer for KafkaProducer {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn send(&self, message: OutboundMessage) -> DeliveryReceipt {
        let producer = self.producer.clone();
        let topic = self.topic.clone();
        let headers = self.headers(&message);

        // Waits for room in the local queue instead of failing with QueueFull.
        async move {
            let record = FutureRecord::to(&topic)
                .key(message.key.as_str())
                .payload(message.payload.as_slice())
                .headers(headers);

            producer
                .send(record, Timeout::Never)
                .await
                .map(|_| ())
                .map_err(|(e, _)| Error::Kafka(e))
        }
        .boxed()
    }

    async fn describe_topic(&self) -> Result<TopicDescription> {
        let producer = self.producer.clone();
        let topic = self.topic.clone();
        let timeout = self.operation_timeout;

        // fetch_metadata blocks on the librdkafka client
        let description = tokio::task::spawn_blocking(move || {
            let metadata = producer
                .client()
                .fetch_metadata(Some(topic.as_str()), timeout)
                .map_err(Error::Kafka)?;

            let entry = metadata
                .topics()
                .iter()
                .find(|t| t.name() == topic)
                .ok_or_else(|| Error::Connection(format!("topic '{}' not found", topic)))?;

            if let Some(err) = entry.error() {
                return Err(Error::Connection(format!(
                    "topic '{}' unavailable: {:?}",
                    topic, err
                )));
            }

            debug!(topic = %topic, partitions = entry.partitions().len(), "Described topic");
            Ok(TopicDescription {
                name: topic,
                partitions: entry.partitions().len(),
            })
        })
        .await
        .map_err(|e| Error::Connection(format!("metadata task failed: {}", e)))??;

        Ok(description)
    }

    async fn close(&self) -> Result<()> {
        info!("Flushing Kafka producer for topic '{}'", self.topic);
        let producer = self.producer.clone();

        tokio::task::spawn_blocking(move || producer.flush(FLUSH_TIMEOUT))
            .await
            .map_err(|e| Error::Connection(format!("flush task failed: {}", e)))?
            .map_err(|e| {
                warn!("Flush did not complete: {}", e);
                Error::Kafka(e)
            })
    }
}

/// Connects to Kafka and checks the target topic is reachable.
pub struct KafkaConnector;

#[async_trait]
impl BrokerConnector for KafkaConnector {
    async fn connect(&self, settings: &ProducerSettings) -> Result<Arc<dyn BrokerProducer>> {
        let producer = KafkaProducer::new(&settings.broker, settings.schema_name.clone())?;

        // Creating the client does not open a connection; metadata does.
        let description = producer.describe_topic().await?;
        info!(
            topic = %description.name,
            partitions = description.partitions,
            "Connected to Kafka"
        );

        Ok(Arc::new(producer))
    }
}
