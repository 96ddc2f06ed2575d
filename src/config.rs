use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub broker: BrokerConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BrokerConfig {
    pub url: String,
    pub topic: String,
    pub schema_path: PathBuf,
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,
    #[serde(default = "default_connect_backoff_ms")]
    pub connect_backoff_ms: u64,
    #[serde(default = "default_compression")]
    pub compression: String,
    #[serde(default = "default_linger_ms")]
    pub linger_ms: u32,
    #[serde(default = "default_batch_num_messages")]
    pub batch_num_messages: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_pending_messages")]
    pub max_pending_messages: usize,
    #[serde(default = "default_message_timeout_ms")]
    pub message_timeout_ms: u64,
    #[serde(default = "default_operation_timeout_ms")]
    pub operation_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    #[serde(default = "default_publishers")]
    pub publishers: usize,
    #[serde(default = "default_workers_per_publisher")]
    pub workers_per_publisher: usize,
    #[serde(default = "default_capacity")]
    pub intake_capacity: usize,
    #[serde(default = "default_capacity")]
    pub retry_capacity: usize,
    #[serde(default = "default_retry_workers")]
    pub retry_workers: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
    #[serde(default = "default_app_name")]
    pub app_name: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            publishers: default_publishers(),
            workers_per_publisher: default_workers_per_publisher(),
            intake_capacity: default_capacity(),
            retry_capacity: default_capacity(),
            retry_workers: default_retry_workers(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            metrics_port: default_metrics_port(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
            app_name: default_app_name(),
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, config::ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                config::Environment::with_prefix("INGEST_GATEWAY")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        settings.try_deserialize()
    }

    /// Rejects settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), String> {
        if self.broker.url.trim().is_empty() {
            return Err("broker.url must not be empty".to_string());
        }
        if self.broker.topic.trim().is_empty() {
            return Err("broker.topic must not be empty".to_string());
        }
        if self.broker.connect_attempts == 0 {
            return Err("broker.connect_attempts must be at least 1".to_string());
        }
        // librdkafka refuses to create a producer otherwise; 0 disables the timeout
        if self.broker.message_timeout_ms != 0
            && self.broker.message_timeout_ms <= u64::from(self.broker.linger_ms)
        {
            return Err(format!(
                "broker.message_timeout_ms ({}) must be greater than broker.linger_ms ({})",
                self.broker.message_timeout_ms, self.broker.linger_ms
            ));
        }

        let pipeline = &self.pipeline;
        for (name, value) in [
            ("pipeline.publishers", pipeline.publishers),
            ("pipeline.workers_per_publisher", pipeline.workers_per_publisher),
            ("pipeline.intake_capacity", pipeline.intake_capacity),
            ("pipeline.retry_capacity", pipeline.retry_capacity),
            ("pipeline.retry_workers", pipeline.retry_workers),
        ] {
            if value == 0 {
                return Err(format!("{} must be at least 1", name));
            }
        }

        Ok(())
    }
}

impl BrokerConfig {
    pub fn connect_backoff(&self) -> Duration {
        Duration::from_millis(self.connect_backoff_ms)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}

impl PipelineConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

fn default_connect_attempts() -> u32 {
    5
}

fn default_connect_backoff_ms() -> u64 {
    5_000
}

fn default_compression() -> String {
    "lz4".to_string()
}

fn default_linger_ms() -> u32 {
    5_000
}

fn default_batch_num_messages() -> usize {
    5_000
}

fn default_batch_size() -> usize {
    1_048_576 // 1MB
}

fn default_max_pending_messages() -> usize {
    100_000
}

fn default_message_timeout_ms() -> u64 {
    90_000
}

fn default_operation_timeout_ms() -> u64 {
    10_000
}

fn default_publishers() -> usize {
    1
}

fn default_workers_per_publisher() -> usize {
    4
}

fn default_capacity() -> usize {
    1_000
}

fn default_retry_workers() -> usize {
    2
}

fn default_max_retries() -> u32 {
    5
}

fn default_retry_delay_ms() -> u64 {
    2
}

fn default_port() -> u16 {
    8000
}

fn default_metrics_port() -> u16 {
    8001
}

fn default_shutdown_grace_secs() -> u64 {
    5
}

fn default_app_name() -> String {
    "ingest-gateway".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(contents: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let file = write_config(
            r#"
            [broker]
            url = "localhost:9092"
            topic = "ingestion"
            schema_path = "schema/ingestion.avsc"
            "#,
        );

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.broker.connect_attempts, 5);
        assert_eq!(config.broker.compression, "lz4");
        assert_eq!(config.pipeline.publishers, 1);
        assert_eq!(config.pipeline.workers_per_publisher, 4);
        assert_eq!(config.pipeline.retry_delay(), Duration::from_millis(2));
        assert_eq!(config.server.port, 8000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_pipeline_overrides() {
        let file = write_config(
            r#"
            [broker]
            url = "localhost:9092"
            topic = "ingestion"
            schema_path = "schema.json"
            connect_backoff_ms = 250

            [pipeline]
            publishers = 3
            intake_capacity = 64
            max_retries = 7
            "#,
        );

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.pipeline.publishers, 3);
        assert_eq!(config.pipeline.intake_capacity, 64);
        assert_eq!(config.pipeline.retry_capacity, 1_000);
        assert_eq!(config.pipeline.max_retries, 7);
        assert_eq!(config.broker.connect_backoff(), Duration::from_millis(250));
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let file = write_config(
            r#"
            [broker]
            url = "localhost:9092"
            topic = "ingestion"
            schema_path = "schema.json"

            [pipeline]
            workers_per_publisher = 0
            "#,
        );

        let config = Config::from_file(file.path()).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.contains("workers_per_publisher"));
    }

    #[test]
    fn test_validate_rejects_message_timeout_within_linger() {
        let file = write_config(
            r#"
            [broker]
            url = "localhost:9092"
            topic = "ingestion"
            schema_path = "schema.json"
            linger_ms = 5000
            message_timeout_ms = 5000
            "#,
        );

        let mut config = Config::from_file(file.path()).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.contains("message_timeout_ms"));

        config.broker.message_timeout_ms = 5_001;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_broker_section_fails() {
        let file = write_config("[server]\nport = 9000\n");
        assert!(Config::from_file(file.path()).is_err());
    }
}
