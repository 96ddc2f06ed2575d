//! Per-publisher retry queue and its drain workers.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error};

use super::Publisher;
use crate::health::ErrorTracker;
use crate::metrics::IngestMetrics;
use crate::model::CanonicalDocument;
use crate::Error;

pub type RetryReceiver = Arc<Mutex<mpsc::Receiver<CanonicalDocument>>>;

/// Sending half of a publisher's bounded retry queue.
#[derive(Clone)]
pub struct RetryQueue {
    tx: mpsc::Sender<CanonicalDocument>,
}

impl RetryQueue {
    pub fn bounded(capacity: usize) -> (Self, RetryReceiver) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, Arc::new(Mutex::new(rx)))
    }

    /// Queues a failed document, waiting while the queue is full.
    ///
    /// Hands the document back if the retry workers are gone.
    pub async fn push(&self, doc: CanonicalDocument) -> Result<(), CanonicalDocument> {
        self.tx.send(doc).await.map_err(|e| e.0)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retry count a document may carry and still be resubmitted
    pub max_retries: u32,
    /// Delay added per retry already made
    pub delay_unit: Duration,
}

impl RetryPolicy {
    /// Linear in the retries already made; the first resubmission is immediate.
    pub fn delay_for(&self, retries: u32) -> Duration {
        self.delay_unit * retries
    }

    /// A document is dead once its retry count exceeds the ceiling.
    pub fn is_exhausted(&self, retries: u32) -> bool {
        retries > self.max_retries
    }
}

pub(crate) fn spawn_workers(
    publisher: Arc<Publisher>,
    rx: RetryReceiver,
    policy: RetryPolicy,
    workers: usize,
    metrics: Arc<IngestMetrics>,
    tracker: Arc<ErrorTracker>,
) -> Vec<JoinHandle<()>> {
    (0..workers)
        .map(|worker_id| {
            tokio::spawn(run_worker(
                worker_id,
                publisher.clone(),
                rx.clone(),
                policy,
                metrics.clone(),
                tracker.clone(),
            ))
        })
        .collect()
}

async fn run_worker(
    worker_id: usize,
    publisher: Arc<Publisher>,
    rx: RetryReceiver,
    policy: RetryPolicy,
    metrics: Arc<IngestMetrics>,
    tracker: Arc<ErrorTracker>,
) {
    loop {
        let next = rx.lock().await.recv().await;
        let Some(mut doc) = next else {
            debug!(publisher = publisher.id(), worker_id, "Retry queue closed");
            break;
        };

        if policy.is_exhausted(doc.retries()) {
            metrics.retry_exhausted.inc();
            tracker.record();
            error!(
                severity = "fatal",
                publisher = publisher.id(),
                uuid = %doc.uuid(),
                retries = doc.retries(),
                "Dropping document: {}",
                Error::RetryExhausted {
                    retries: doc.retries()
                }
            );
            continue;
        }

        let delay = policy.delay_for(doc.retries());
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        doc.record_retry();
        debug!(
            publisher = publisher.id(),
            uuid = %doc.uuid(),
            retries = doc.retries(),
            "Retrying document"
        );
        publisher.publish(doc);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_is_linear_in_retries() {
        let policy = RetryPolicy {
            max_retries: 5,
            delay_unit: Duration::from_millis(2),
        };

        assert_eq!(policy.delay_for(0), Duration::ZERO);
        assert_eq!(policy.delay_for(1), Duration::from_millis(2));
        assert_eq!(policy.delay_for(4), Duration::from_millis(8));
    }

    #[test]
    fn test_ceiling() {
        let policy = RetryPolicy {
            max_retries: 3,
            delay_unit: Duration::from_millis(2),
        };

        assert!(!policy.is_exhausted(0));
        assert!(!policy.is_exhausted(3));
        assert!(policy.is_exhausted(4));
        assert!(policy.is_exhausted(10));
    }

    #[test]
    fn test_zero_ceiling_allows_one_retry() {
        let policy = RetryPolicy {
            max_retries: 0,
            delay_unit: Duration::from_millis(2),
        };
        assert!(!policy.is_exhausted(0));
        assert!(policy.is_exhausted(1));
    }
}
