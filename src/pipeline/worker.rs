use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

use super::{IntakeReceiver, Publisher};
use crate::health::ErrorTracker;
use crate::metrics::IngestMetrics;
use crate::model::CanonicalDocument;

/// Worker tasks feeding one publisher from the shared intake queue.
pub struct WorkerPool {
    publisher_id: usize,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn spawn(
        publisher: Arc<Publisher>,
        intake: IntakeReceiver,
        workers: usize,
        metrics: Arc<IngestMetrics>,
        tracker: Arc<ErrorTracker>,
    ) -> Self {
        let publisher_id = publisher.id();
        let handles = (0..workers)
            .map(|worker_id| {
                tokio::spawn(run_worker(
                    worker_id,
                    publisher.clone(),
                    intake.clone(),
                    metrics.clone(),
                    tracker.clone(),
                ))
            })
            .collect();

        debug!(publisher = publisher_id, workers, "Worker pool started");
        Self {
            publisher_id,
            handles,
        }
    }

    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Waits for workers to empty a closed intake queue, aborting them after `within`.
    ///
    /// Returns `true` if every worker finished on its own.
    pub async fn drain(&mut self, within: Duration) -> bool {
        let finished = tokio::time::timeout(within, async {
            for handle in self.handles.iter_mut() {
                let _ = handle.await;
            }
        })
        .await
        .is_ok();

        if !finished {
            debug!(publisher = self.publisher_id, "Worker pool did not drain in time");
            self.abort();
        }
        finished
    }

    pub fn abort(&self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

async fn run_worker(
    worker_id: usize,
    publisher: Arc<Publisher>,
    intake: IntakeReceiver,
    metrics: Arc<IngestMetrics>,
    tracker: Arc<ErrorTracker>,
) {
    loop {
        let next = intake.lock().await.recv().await;
        let Some(record) = next else {
            debug!(publisher = publisher.id(), worker_id, "Intake queue closed");
            break;
        };

        match CanonicalDocument::from_record(record) {
            Ok(doc) => publisher.publish(doc),
            Err(e) => {
                metrics.records_rejected.inc();
                tracker.report("transform record", &e);
            }
        }
    }
}
