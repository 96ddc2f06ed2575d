//! Error types and result handling for ingest-gateway.
//!
//! This module defines the main error type [`Error`] and a convenience
//! [`Result`] type alias used throughout the crate.
//!
//! # Example
//!
//! ```rust
//! use ingest_gateway::{Error, Result};
//!
//! fn connect_to_broker() -> Result<()> {
//!     // Simulating a connection error
//!     Err(Error::Connection("Failed to connect".to_string()))
//! }
//!
//! match connect_to_broker() {
//!     Ok(()) => println!("Connected"),
//!     Err(Error::Connection(msg)) => eprintln!("Connection error: {}", msg),
//!     Err(e) => eprintln!("Other error: {}", e),
//! }
//! ```

use thiserror::Error;

/// The main error type for ingest-gateway operations.
///
/// Validation errors stay at the request boundary, connection errors are
/// fatal at startup, and publish/retry errors are contained inside the
/// delivery pipeline where they only surface through logs and counters.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error, from the config file, environment or schema document.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Kafka client or producer error.
    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    /// JSON serialization error when encoding documents.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error, typically from reading the schema document or binding sockets.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The broker could not be reached, or connection attempts were exhausted.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A single record is malformed.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The broker reported a failed delivery.
    #[error("Publish error: {0}")]
    Publish(String),

    /// A document reached the retry ceiling and was dropped.
    #[error("Retries exhausted after {retries} attempts")]
    RetryExhausted {
        /// Retry count carried by the document when it was dropped
        retries: u32,
    },

    /// The intake queue no longer accepts records.
    #[error("Intake queue closed")]
    QueueClosed,

    /// Operation timeout.
    #[error("Timeout error: {message}")]
    Timeout {
        /// Description of what timed out
        message: String,
    },

    /// Metric registration or encoding failure.
    #[error("Metrics error: {0}")]
    Metrics(String),
}

/// A convenient Result type alias for ingest-gateway operations.
///
/// This is equivalent to `std::result::Result<T, ingest_gateway::Error>`.
pub type Result<T> = std::result::Result<T, Error>;
