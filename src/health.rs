//! Liveness/readiness reporting and the shared last-error timestamp.

use std::fmt::Display;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::RwLock;
use tracing::error;

use crate::model::HealthReport;
use crate::pipeline::Publisher;
use crate::{Error, Result};

/// Records when any component last reported an error.
///
/// Shared through an `Arc` by every component that can fail; read by the
/// [`HealthChecker`].
#[derive(Debug, Default)]
pub struct ErrorTracker {
    last_error: RwLock<Option<DateTime<Utc>>>,
}

impl ErrorTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Logs the error and stamps the current time.
    pub fn report(&self, context: &str, err: &dyn Display) {
        error!(context, "{}", err);
        self.record();
    }

    pub fn record(&self) {
        *self.last_error.write() = Some(Utc::now());
    }

    pub fn last_error(&self) -> Option<DateTime<Utc>> {
        *self.last_error.read()
    }
}

pub struct HealthChecker {
    app_name: String,
    publishers: Vec<Arc<Publisher>>,
    tracker: Arc<ErrorTracker>,
}

impl HealthChecker {
    pub fn new(
        app_name: impl Into<String>,
        publishers: Vec<Arc<Publisher>>,
        tracker: Arc<ErrorTracker>,
    ) -> Self {
        Self {
            app_name: app_name.into(),
            publishers,
            tracker,
        }
    }

    /// Probes the first live publisher and builds a report.
    ///
    /// # Errors
    ///
    /// Returns `Error::Connection` when no publisher is live or the topic
    /// cannot be described. The failure is recorded in the tracker.
    pub async fn check(&self) -> Result<HealthReport> {
        let publisher = self
            .publishers
            .iter()
            .find(|p| !p.is_closed())
            .ok_or_else(|| Error::Connection("no live publisher".to_string()));

        let outcome = match publisher {
            Ok(publisher) => publisher.health_check().await,
            Err(e) => Err(e),
        };

        if let Err(e) = outcome {
            self.tracker.report("health check", &e);
            return Err(e);
        }

        Ok(HealthReport {
            app_name: self.app_name.clone(),
            status: "UP".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            worker_threads: tokio::runtime::Handle::current().metrics().num_workers(),
            publishers: self.publishers.len(),
            in_flight: self.publishers.iter().map(|p| p.in_flight()).sum(),
            last_error: self
                .tracker
                .last_error()
                .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true))
                .unwrap_or_default(),
        })
    }
}
