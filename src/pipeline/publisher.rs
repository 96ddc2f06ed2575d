use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::retry::{self, RetryPolicy, RetryQueue};
use crate::broker::{BrokerProducer, OutboundMessage};
use crate::config::PipelineConfig;
use crate::health::ErrorTracker;
use crate::metrics::IngestMetrics;
use crate::model::CanonicalDocument;
use crate::{Error, Result};

/// Outcome of one send, produced on the broker client's completion path.
struct Delivery {
    doc: CanonicalDocument,
    outcome: Result<()>,
}

/// Owns one producer plus its retry queue, retry workers and acknowledgment task.
pub struct Publisher {
    id: usize,
    producer: Arc<dyn BrokerProducer>,
    deliveries: mpsc::UnboundedSender<Delivery>,
    in_flight: Arc<AtomicUsize>,
    closed: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    metrics: Arc<IngestMetrics>,
    tracker: Arc<ErrorTracker>,
}

impl Publisher {
    /// Wraps a connected producer and spawns its background tasks.
    pub fn start(
        id: usize,
        producer: Arc<dyn BrokerProducer>,
        config: &PipelineConfig,
        metrics: Arc<IngestMetrics>,
        tracker: Arc<ErrorTracker>,
    ) -> Arc<Self> {
        let (delivery_tx, delivery_rx) = mpsc::unbounded_channel();
        let (retry_queue, retry_rx) = RetryQueue::bounded(config.retry_capacity);
        let in_flight = Arc::new(AtomicUsize::new(0));

        let publisher = Arc::new(Self {
            id,
            producer,
            deliveries: delivery_tx,
            in_flight: in_flight.clone(),
            closed: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
            metrics: metrics.clone(),
            tracker: tracker.clone(),
        });

        let policy = RetryPolicy {
            max_retries: config.max_retries,
            delay_unit: config.retry_delay(),
        };

        let mut tasks = vec![tokio::spawn(acknowledge(
            id,
            delivery_rx,
            retry_queue,
            in_flight,
            metrics.clone(),
            tracker.clone(),
        ))];
        tasks.extend(retry::spawn_workers(
            publisher.clone(),
            retry_rx,
            policy,
            config.retry_workers,
            metrics,
            tracker,
        ));
        *publisher.tasks.lock() = tasks;

        info!(
            publisher = id,
            topic = %publisher.producer.topic(),
            retry_workers = config.retry_workers,
            "Publisher started"
        );
        publisher
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Documents handed to the broker and not yet acknowledged.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Submits a document and returns without waiting for delivery.
    ///
    /// Documents published after [`Publisher::close`] are dropped.
    pub fn publish(&self, doc: CanonicalDocument) {
        if self.is_closed() {
            debug!(publisher = self.id, uuid = %doc.uuid(), "Publisher closed, dropping document");
            return;
        }

        let payload = match doc.to_payload() {
            Ok(payload) => payload,
            Err(e) => {
                self.metrics.records_rejected.inc();
                self.tracker.report("serialize document", &e);
                return;
            }
        };

        let receipt = self.producer.send(OutboundMessage {
            key: doc.uuid().to_string(),
            payload,
            retries: doc.retries(),
        });
        self.in_flight.fetch_add(1, Ordering::Relaxed);

        let deliveries = self.deliveries.clone();
        tokio::spawn(async move {
            let outcome = receipt.await;
            // fails only once the publisher is closed
            let _ = deliveries.send(Delivery { doc, outcome });
        });
    }

    /// Describes the target topic.
    ///
    /// # Errors
    ///
    /// `Error::Connection` when the publisher is closed or the topic is unreachable.
    pub async fn health_check(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Connection(format!("publisher {} is closed", self.id)));
        }

        match self.producer.describe_topic().await {
            Ok(_) => Ok(()),
            Err(Error::Connection(msg)) => Err(Error::Connection(msg)),
            Err(e) => Err(Error::Connection(e.to_string())),
        }
    }

    /// Flushes the producer and stops background tasks. Safe to call repeatedly.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        info!(publisher = self.id, in_flight = self.in_flight(), "Closing publisher");
        if let Err(e) = self.producer.close().await {
            warn!(publisher = self.id, "Producer close failed: {}", e);
        }

        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

async fn acknowledge(
    publisher_id: usize,
    mut deliveries: mpsc::UnboundedReceiver<Delivery>,
    retry_queue: RetryQueue,
    in_flight: Arc<AtomicUsize>,
    metrics: Arc<IngestMetrics>,
    tracker: Arc<ErrorTracker>,
) {
    while let Some(Delivery { doc, outcome }) = deliveries.recv().await {
        in_flight.fetch_sub(1, Ordering::Relaxed);

        match outcome {
            Ok(()) => {
                metrics.documents_ingested.inc();
                debug!(publisher = publisher_id, uuid = %doc.uuid(), "Document delivered");
            }
            Err(e) => {
                metrics.publish_errors.inc();
                tracker.report(
                    "publish",
                    &format!(
                        "document {} failed (retries {}): {}",
                        doc.uuid(),
                        doc.retries(),
                        e
                    ),
                );

                // waits while this publisher's retry queue is full
                if let Err(doc) = retry_queue.push(doc).await {
                    debug!(publisher = publisher_id, uuid = %doc.uuid(), "Retry queue closed, dropping document");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::StubBroker;
    use crate::model::RawRecord;
    use std::time::Duration;

    fn config(max_retries: u32) -> PipelineConfig {
        PipelineConfig {
            retry_workers: 1,
            max_retries,
            retry_delay_ms: 10,
            ..PipelineConfig::default()
        }
    }

    fn document(identifier: &str) -> CanonicalDocument {
        CanonicalDocument::from_record(RawRecord {
            identifier: identifier.to_string(),
            name: "n".to_string(),
            kind: "t".to_string(),
            tags: vec![],
        })
        .unwrap()
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..10_000 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_publish_counts_ingested() {
        let broker = Arc::new(StubBroker::new("ingestion"));
        let metrics = Arc::new(IngestMetrics::new().unwrap());
        let publisher = Publisher::start(
            0,
            broker.clone(),
            &config(3),
            metrics.clone(),
            Arc::new(ErrorTracker::new()),
        );

        for i in 0..10 {
            publisher.publish(document(&format!("a{}", i)));
        }

        wait_until(|| metrics.documents_ingested.get() == 10).await;
        assert_eq!(broker.sent_count(), 10);
        assert_eq!(metrics.publish_errors.get(), 0);
        assert!(broker.sent().iter().all(|m| m.retries == 0));
        wait_until(|| publisher.in_flight() == 0).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_publish_is_retried_until_success() {
        let failures = 4;
        let broker = Arc::new(StubBroker::new("ingestion"));
        broker.fail_next(failures);
        let metrics = Arc::new(IngestMetrics::new().unwrap());
        let tracker = Arc::new(ErrorTracker::new());
        let publisher = Publisher::start(0, broker.clone(), &config(10), metrics.clone(), tracker.clone());

        let doc = document("a1");
        let uuid = doc.uuid().to_string();
        publisher.publish(doc);

        wait_until(|| metrics.documents_ingested.get() == 1).await;

        let sent = broker.sent();
        assert_eq!(sent.len(), failures + 1);
        assert!(sent.iter().all(|m| m.key == uuid));
        let retries: Vec<u32> = sent.iter().map(|m| m.retries).collect();
        assert_eq!(retries, vec![0, 1, 2, 3, 4]);
        assert!(sent.last().unwrap().delivered);

        let gaps: Vec<Duration> = sent.windows(2).map(|w| w[1].at - w[0].at).collect();
        for (k, gap) in gaps.iter().enumerate() {
            assert!(*gap >= Duration::from_millis(10) * k as u32);
        }
        assert!(gaps.windows(2).all(|w| w[0] <= w[1]));

        assert_eq!(metrics.publish_errors.get(), failures as u64);
        assert_eq!(metrics.retry_exhausted.get(), 0);
        assert!(tracker.last_error().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_ceiling_drops_document() {
        let broker = Arc::new(StubBroker::new("ingestion"));
        broker.fail_next(usize::MAX);
        let metrics = Arc::new(IngestMetrics::new().unwrap());
        let publisher = Publisher::start(
            0,
            broker.clone(),
            &config(2),
            metrics.clone(),
            Arc::new(ErrorTracker::new()),
        );

        publisher.publish(document("a1"));

        wait_until(|| metrics.retry_exhausted.get() == 1).await;
        // resubmitted while retries <= 2, dropped when it comes back with 3
        let retries: Vec<u32> = broker.sent().iter().map(|m| m.retries).collect();
        assert_eq!(retries, vec![0, 1, 2, 3]);
        assert_eq!(metrics.publish_errors.get(), 4);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(broker.sent_count(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_is_idempotent_and_drops_late_publishes() {
        let broker = Arc::new(StubBroker::new("ingestion"));
        let metrics = Arc::new(IngestMetrics::new().unwrap());
        let publisher = Publisher::start(
            0,
            broker.clone(),
            &config(3),
            metrics.clone(),
            Arc::new(ErrorTracker::new()),
        );

        publisher.close().await;
        publisher.close().await;
        assert!(publisher.is_closed());
        assert_eq!(broker.close_calls(), 1);

        publisher.publish(document("late"));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(broker.sent_count(), 0);
        assert!(matches!(
            publisher.health_check().await,
            Err(Error::Connection(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_completion_after_close_is_ignored() {
        let broker = Arc::new(StubBroker::new("ingestion"));
        broker.hold_deliveries(true);
        let metrics = Arc::new(IngestMetrics::new().unwrap());
        let tracker = Arc::new(ErrorTracker::new());
        let publisher = Publisher::start(
            0,
            broker.clone(),
            &config(3),
            metrics.clone(),
            tracker.clone(),
        );

        publisher.publish(document("a1"));
        assert_eq!(broker.held_count(), 1);
        assert_eq!(publisher.in_flight(), 1);

        publisher.close().await;
        assert_eq!(broker.release_held(false), 1);
        tokio::time::sleep(Duration::from_millis(100)).await;

        // the failure reaches neither the counters nor the retry queue
        assert_eq!(broker.sent_count(), 1);
        assert_eq!(metrics.publish_errors.get(), 0);
        assert_eq!(metrics.retry_exhausted.get(), 0);
        assert_eq!(metrics.documents_ingested.get(), 0);
        assert!(tracker.last_error().is_none());
    }
}
