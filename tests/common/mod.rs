#![allow(dead_code)]

use ingest_gateway::config::{BrokerConfig, Config, PipelineConfig, ServerConfig};
use std::time::Duration;

/// Configuration pointing at the stub broker; timings are short for tests.
pub fn get_test_config() -> Config {
    let broker = BrokerConfig {
        url: "stub://local".to_string(),
        topic: format!("test_{}", std::process::id()),
        schema_path: "schema/ingestion.avsc".into(),
        connect_attempts: 3,
        connect_backoff_ms: 100,
        compression: "none".to_string(), // No compression for tests
        linger_ms: 0,                    // Immediate sending for tests
        batch_num_messages: 1,
        batch_size: 1024,
        max_pending_messages: 1_000,
        message_timeout_ms: 1_000,
        operation_timeout_ms: 1_000,
    };

    let pipeline = PipelineConfig {
        publishers: 2,
        workers_per_publisher: 2,
        intake_capacity: 16,
        retry_capacity: 16,
        retry_workers: 1,
        max_retries: 5,
        retry_delay_ms: 10,
    };

    let server = ServerConfig {
        app_name: "ingest-gateway-test".to_string(),
        ..ServerConfig::default()
    };

    Config {
        broker,
        pipeline,
        server,
    }
}

/// Polls `condition` every millisecond until it holds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..10_000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition not reached");
}

pub async fn read_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json")
}
