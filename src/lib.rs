pub mod api;
pub mod config;
pub mod error;
pub mod health;
pub mod metrics;
pub mod model;
pub mod schema;

pub mod broker;
pub mod pipeline;

pub use config::Config;
pub use error::{Error, Result};
pub use pipeline::Gateway;
