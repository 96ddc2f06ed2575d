//! In-process broker used by tests and local runs without a cluster.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::Instant;

use super::{
    BrokerConnector, BrokerProducer, DeliveryReceipt, OutboundMessage, ProducerSettings,
    TopicDescription,
};
use crate::{Error, Result};

#[derive(Debug, Clone)]
pub struct SentMessage {
    pub key: String,
    pub payload: Vec<u8>,
    pub retries: u32,
    pub at: Instant,
    pub delivered: bool,
}

/// Records every send and fails the next `n` on request.
///
/// With [`StubBroker::hold_deliveries`] on, receipts stay pending until
/// [`StubBroker::release_held`] resolves them.
#[derive(Debug)]
pub struct StubBroker {
    topic: String,
    sent: Mutex<Vec<SentMessage>>,
    pending_failures: AtomicUsize,
    hold: AtomicBool,
    held: Mutex<Vec<oneshot::Sender<Result<()>>>>,
    reachable: AtomicBool,
    closed: AtomicBool,
    close_calls: AtomicUsize,
}

impl StubBroker {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            sent: Mutex::new(Vec::new()),
            pending_failures: AtomicUsize::new(0),
            hold: AtomicBool::new(false),
            held: Mutex::new(Vec::new()),
            reachable: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            close_calls: AtomicUsize::new(0),
        }
    }

    /// The next `count` sends are rejected.
    pub fn fail_next(&self, count: usize) {
        self.pending_failures.store(count, Ordering::SeqCst);
    }

    pub fn hold_deliveries(&self, hold: bool) {
        self.hold.store(hold, Ordering::SeqCst);
    }

    pub fn held_count(&self) -> usize {
        self.held.lock().len()
    }

    /// Resolves every held receipt as delivered or failed; returns how many.
    pub fn release_held(&self, delivered: bool) -> usize {
        let held: Vec<_> = self.held.lock().drain(..).collect();
        let count = held.len();
        for receipt in held {
            let outcome = if delivered {
                Ok(())
            } else {
                Err(Error::Publish("simulated late failure".to_string()))
            };
            // the receipt may already be dropped
            let _ = receipt.send(outcome);
        }
        count
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }

    pub fn delivered_count(&self) -> usize {
        self.sent.lock().iter().filter(|m| m.delivered).count()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    fn record(&self, message: OutboundMessage, delivered: bool) {
        self.sent.lock().push(SentMessage {
            key: message.key,
            payload: message.payload,
            retries: message.retries,
            at: Instant::now(),
            delivered,
        });
    }

    fn take_failure(&self) -> bool {
        self.pending_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl BrokerProducer for StubBroker {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn send(&self, message: OutboundMessage) -> DeliveryReceipt {
        if self.is_closed() {
            return futures::future::ready(Err(Error::Publish("producer closed".to_string())))
                .boxed();
        }

        if self.hold.load(Ordering::SeqCst) {
            let (tx, rx) = oneshot::channel();
            self.held.lock().push(tx);
            self.record(message, false);
            return rx
                .map(|outcome| {
                    outcome.unwrap_or_else(|_| Err(Error::Publish("receipt dropped".to_string())))
                })
                .boxed();
        }

        let delivered = !self.take_failure();
        self.record(message, delivered);

        let outcome = if delivered {
            Ok(())
        } else {
            Err(Error::Publish("simulated broker failure".to_string()))
        };
        futures::future::ready(outcome).boxed()
    }

    async fn describe_topic(&self) -> Result<TopicDescription> {
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(Error::Connection(format!(
                "topic '{}' unreachable",
                self.topic
            )));
        }
        Ok(TopicDescription {
            name: self.topic.clone(),
            partitions: 1,
        })
    }

    async fn close(&self) -> Result<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Hands out one shared [`StubBroker`] after failing the first `failures` attempts.
pub struct StubConnector {
    broker: Arc<StubBroker>,
    failures: usize,
    successes: Option<usize>,
    attempts: Mutex<Vec<Instant>>,
}

impl StubConnector {
    pub fn new(broker: Arc<StubBroker>, failures: usize) -> Self {
        Self {
            broker,
            failures,
            successes: None,
            attempts: Mutex::new(Vec::new()),
        }
    }

    /// Every attempt after the first `successes` successful ones fails.
    pub fn refusing_after(mut self, successes: usize) -> Self {
        self.successes = Some(successes);
        self
    }

    pub fn attempts(&self) -> usize {
        self.attempts.lock().len()
    }

    pub fn attempt_times(&self) -> Vec<Instant> {
        self.attempts.lock().clone()
    }
}

#[async_trait]
impl BrokerConnector for StubConnector {
    async fn connect(&self, _settings: &ProducerSettings) -> Result<Arc<dyn BrokerProducer>> {
        let attempt = {
            let mut attempts = self.attempts.lock();
            attempts.push(Instant::now());
            attempts.len()
        };

        let refused = self
            .successes
            .is_some_and(|successes| attempt > self.failures + successes);
        if attempt <= self.failures || refused {
            return Err(Error::Connection(format!(
                "simulated connection failure {}",
                attempt
            )));
        }
        Ok(self.broker.clone())
    }
}
