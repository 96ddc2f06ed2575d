//! Loading of the serialization schema document referenced by the config.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, info};

use crate::{Error, Result};

/// A parsed schema document.
#[derive(Debug, Clone)]
pub struct SchemaDocument {
    pub path: PathBuf,
    pub name: Option<String>,
    pub raw: String,
}

impl SchemaDocument {
    /// Reads the schema, retrying with the absolute path when the relative one fails.
    ///
    /// An unreadable or non-JSON document is a configuration error; the
    /// gateway cannot start without it.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Reading schema document {:?}", path);

        let (raw, resolved) = match std::fs::read_to_string(path) {
            Ok(raw) => (raw, path.to_path_buf()),
            Err(first) => {
                let absolute = std::env::current_dir()
                    .map(|cwd| cwd.join(path))
                    .map_err(|_| {
                        Error::Config(format!("Error reading schema {:?}: {}", path, first))
                    })?;
                debug!("Retrying schema read with absolute path {:?}", absolute);
                let raw = std::fs::read_to_string(&absolute).map_err(|e| {
                    Error::Config(format!("Error reading schema {:?}: {}", absolute, e))
                })?;
                (raw, absolute)
            }
        };

        let parsed: Value = serde_json::from_str(&raw)
            .map_err(|e| Error::Config(format!("Invalid schema {:?}: {}", resolved, e)))?;

        let name = parsed
            .get("name")
            .and_then(Value::as_str)
            .map(str::to_string);

        info!(schema = ?name, "Schema document loaded");

        Ok(Self {
            path: resolved,
            name,
            raw,
        })
    }
}
