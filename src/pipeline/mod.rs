//! The delivery pipeline.
//!
//! ```text
//! Dispatcher ─▶ intake queue ─▶ WorkerPool ─▶ Publisher ─▶ broker
//!                (shared)        (per publisher)  │   ▲
//!                                                  ▼   │
//!                                           RetryQueue (per publisher)
//! ```
//!
//! [`Gateway`] builds one intake queue, then one publisher and worker pool per
//! configured broker connection.

pub mod dispatcher;
pub mod publisher;
pub mod retry;
pub mod worker;

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{info, warn};

use crate::broker::{BrokerConnector, ConnectionManager, ProducerSettings};
use crate::config::Config;
use crate::health::{ErrorTracker, HealthChecker};
use crate::metrics::IngestMetrics;
use crate::Result;

pub use dispatcher::{intake_queue, Dispatcher, IntakeReceiver};
pub use publisher::Publisher;
pub use retry::{RetryPolicy, RetryQueue};
pub use worker::WorkerPool;

pub struct Gateway {
    dispatcher: Dispatcher,
    publishers: Vec<Arc<Publisher>>,
    pools: Vec<WorkerPool>,
    tracker: Arc<ErrorTracker>,
}

impl Gateway {
    /// Connects every publisher and starts its workers.
    ///
    /// # Errors
    ///
    /// Fails with `Error::Connection` if any publisher exhausts its connection
    /// attempts; publishers already started are closed first.
    pub async fn start(
        config: &Config,
        schema_name: Option<String>,
        connector: &dyn BrokerConnector,
        metrics: Arc<IngestMetrics>,
        tracker: Arc<ErrorTracker>,
    ) -> Result<Self> {
        let pipeline = &config.pipeline;
        let (dispatcher, intake) = intake_queue(pipeline.intake_capacity);
        let settings = ProducerSettings {
            broker: config.broker.clone(),
            schema_name,
        };
        let manager = ConnectionManager::new(
            connector,
            config.broker.connect_attempts,
            config.broker.connect_backoff(),
        );

        let mut publishers: Vec<Arc<Publisher>> = Vec::with_capacity(pipeline.publishers);
        let mut pools: Vec<WorkerPool> = Vec::with_capacity(pipeline.publishers);

        for id in 0..pipeline.publishers {
            info!(publisher = id, "Creating topic publisher");
            let producer = match manager.connect(&settings).await {
                Ok(producer) => producer,
                Err(e) => {
                    tracker.report("connect", &e);
                    dispatcher.close();
                    for pool in &pools {
                        pool.abort();
                    }
                    for publisher in &publishers {
                        publisher.close().await;
                    }
                    return Err(e);
                }
            };

            let publisher =
                Publisher::start(id, producer, pipeline, metrics.clone(), tracker.clone());
            pools.push(WorkerPool::spawn(
                publisher.clone(),
                intake.clone(),
                pipeline.workers_per_publisher,
                metrics.clone(),
                tracker.clone(),
            ));
            publishers.push(publisher);
        }

        info!(
            publishers = publishers.len(),
            workers_per_publisher = pipeline.workers_per_publisher,
            intake_capacity = pipeline.intake_capacity,
            "Pipeline started"
        );

        Ok(Self {
            dispatcher,
            publishers,
            pools,
            tracker,
        })
    }

    pub fn dispatcher(&self) -> Dispatcher {
        self.dispatcher.clone()
    }

    pub fn publishers(&self) -> &[Arc<Publisher>] {
        &self.publishers
    }

    pub fn health_checker(&self, app_name: impl Into<String>) -> HealthChecker {
        HealthChecker::new(app_name, self.publishers.clone(), self.tracker.clone())
    }

    /// Stops intake, gives workers `drain` to empty the queue, then closes every publisher.
    pub async fn shutdown(mut self, drain: Duration) {
        info!("Shutting down pipeline");
        self.dispatcher.close();

        let deadline = Instant::now() + drain;
        for pool in &mut self.pools {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if !pool.drain(remaining).await {
                warn!("Intake queue not drained before shutdown; remaining records are dropped");
            }
        }

        for publisher in &self.publishers {
            publisher.close().await;
        }
        info!("Pipeline stopped");
    }
}
