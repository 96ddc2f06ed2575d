use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use super::{BrokerConnector, BrokerProducer, ProducerSettings};
use crate::{Error, Result};

/// Establishes producers with bounded-attempt exponential backoff.
pub struct ConnectionManager<'a> {
    connector: &'a dyn BrokerConnector,
    max_attempts: u32,
    initial_backoff: Duration,
}

impl<'a> ConnectionManager<'a> {
    pub fn new(
        connector: &'a dyn BrokerConnector,
        max_attempts: u32,
        initial_backoff: Duration,
    ) -> Self {
        Self {
            connector,
            max_attempts,
            initial_backoff,
        }
    }

    /// Connects, sleeping `initial_backoff` after the first failure and
    /// doubling the wait after each further one.
    ///
    /// # Errors
    ///
    /// Returns `Error::Connection` once `max_attempts` attempts have failed.
    /// The caller treats this as fatal.
    pub async fn connect(&self, settings: &ProducerSettings) -> Result<Arc<dyn BrokerProducer>> {
        let mut backoff = self.initial_backoff;
        let mut last_error = None;

        for attempt in 1..=self.max_attempts {
            if let Some(err) = &last_error {
                warn!(
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    "Retrying broker connection after error: {}",
                    err
                );
                tokio::time::sleep(backoff).await;
                backoff = next_backoff(backoff);
            }

            match self.connector.connect(settings).await {
                Ok(producer) => {
                    info!(attempt, topic = %producer.topic(), "Broker connection established");
                    return Ok(producer);
                }
                Err(e) => last_error = Some(e),
            }
        }

        Err(Error::Connection(format!(
            "after {} attempts, last error: {}",
            self.max_attempts,
            last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no attempt made".to_string())
        )))
    }
}

/// Doubles `backoff`, saturating at `Duration::MAX`.
fn next_backoff(backoff: Duration) -> Duration {
    backoff.checked_mul(2).unwrap_or(Duration::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{StubBroker, StubConnector};
    use crate::config::BrokerConfig;

    fn settings() -> ProducerSettings {
        ProducerSettings {
            broker: BrokerConfig {
                url: "stub://local".to_string(),
                topic: "ingestion".to_string(),
                schema_path: "schema.json".into(),
                connect_attempts: 5,
                connect_backoff_ms: 100,
                compression: "none".to_string(),
                linger_ms: 0,
                batch_num_messages: 1,
                batch_size: 1024,
                max_pending_messages: 10,
                message_timeout_ms: 1_000,
                operation_timeout_ms: 1_000,
            },
            schema_name: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_first_attempt() {
        let connector = StubConnector::new(Arc::new(StubBroker::new("ingestion")), 0);
        let manager = ConnectionManager::new(&connector, 3, Duration::from_millis(100));

        let producer = manager.connect(&settings()).await.unwrap();
        assert_eq!(producer.topic(), "ingestion");
        assert_eq!(connector.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_doubles_between_attempts() {
        let failures = 3;
        let connector = StubConnector::new(Arc::new(StubBroker::new("ingestion")), failures);
        let manager = ConnectionManager::new(&connector, 5, Duration::from_millis(100));

        manager.connect(&settings()).await.unwrap();
        assert_eq!(connector.attempts(), failures + 1);

        let times = connector.attempt_times();
        let gaps: Vec<Duration> = times.windows(2).map(|w| w[1] - w[0]).collect();
        assert_eq!(gaps.len(), 3);
        assert!(gaps[0] >= Duration::from_millis(100));
        assert!(gaps[1] >= Duration::from_millis(200));
        assert!(gaps[2] >= Duration::from_millis(400));
        assert!(gaps[0] < Duration::from_millis(200));
        assert!(gaps[1] < Duration::from_millis(400));
        assert!(gaps[2] < Duration::from_millis(800));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_attempts_are_fatal() {
        let connector = StubConnector::new(Arc::new(StubBroker::new("ingestion")), 3);
        let manager = ConnectionManager::new(&connector, 3, Duration::from_millis(100));

        let result = manager.connect(&settings()).await;
        match result {
            Err(Error::Connection(msg)) => assert!(msg.contains("after 3 attempts")),
            other => panic!("expected connection error, got {:?}", other.map(|_| ())),
        }
        assert_eq!(connector.attempts(), 3);
    }

    #[test]
    fn test_backoff_saturates_instead_of_overflowing() {
        assert_eq!(next_backoff(Duration::from_secs(5)), Duration::from_secs(10));
        assert_eq!(next_backoff(Duration::MAX / 2 + Duration::from_secs(1)), Duration::MAX);
        assert_eq!(next_backoff(Duration::MAX), Duration::MAX);
    }
}
