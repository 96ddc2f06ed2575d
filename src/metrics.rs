//! Prometheus counters for the delivery pipeline.

use prometheus::{Encoder, IntCounter, Registry, TextEncoder};

use crate::{Error, Result};

/// Counters exposed on the metrics port.
///
/// Each instance owns its registry so several gateways (or tests) can live
/// in one process without clashing on the global default registry.
pub struct IngestMetrics {
    registry: Registry,
    /// Failed delivery acknowledgments
    pub publish_errors: IntCounter,
    /// Documents dropped at the retry ceiling
    pub retry_exhausted: IntCounter,
    /// Documents acknowledged by the broker
    pub documents_ingested: IntCounter,
    /// Records rejected at the request boundary or by a worker
    pub records_rejected: IntCounter,
}

impl IngestMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let publish_errors = register(
            &registry,
            "ingest_gateway_publish_errors_total",
            "Failed broker deliveries",
        )?;
        let retry_exhausted = register(
            &registry,
            "ingest_gateway_retry_exhausted_total",
            "Documents dropped after exhausting retries",
        )?;
        let documents_ingested = register(
            &registry,
            "ingest_gateway_documents_ingested_total",
            "Documents acknowledged by the broker",
        )?;
        let records_rejected = register(
            &registry,
            "ingest_gateway_records_rejected_total",
            "Records rejected as malformed",
        )?;

        Ok(Self {
            registry,
            publish_errors,
            retry_exhausted,
            documents_ingested,
            records_rejected,
        })
    }

    /// Renders all counters in the Prometheus text format.
    pub fn render(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| Error::Metrics(format!("encode: {e}")))?;
        String::from_utf8(buffer).map_err(|e| Error::Metrics(format!("utf8: {e}")))
    }
}

fn register(registry: &Registry, name: &str, help: &str) -> Result<IntCounter> {
    let counter =
        IntCounter::new(name, help).map_err(|e| Error::Metrics(format!("{name}: {e}")))?;
    registry
        .register(Box::new(counter.clone()))
        .map_err(|e| Error::Metrics(format!("{name}: {e}")))?;
    Ok(counter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_includes_counters() {
        let metrics = IngestMetrics::new().unwrap();
        metrics.documents_ingested.inc_by(3);
        metrics.retry_exhausted.inc();

        let text = metrics.render().unwrap();
        assert!(text.contains("ingest_gateway_documents_ingested_total 3"));
        assert!(text.contains("ingest_gateway_retry_exhausted_total 1"));
        assert!(text.contains("ingest_gateway_publish_errors_total 0"));
    }

    #[test]
    fn test_instances_are_independent() {
        let first = IngestMetrics::new().unwrap();
        let second = IngestMetrics::new().unwrap();
        first.publish_errors.inc();

        assert_eq!(first.publish_errors.get(), 1);
        assert_eq!(second.publish_errors.get(), 0);
    }
}
