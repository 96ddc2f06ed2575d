//! Record and document types flowing through the gateway.
//!
//! A [`RawRecord`] is what callers submit. Workers turn it into a
//! [`CanonicalDocument`], which is the broker-ready JSON payload.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
}

/// A record as decoded from the request body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    pub identifier: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

impl RawRecord {
    pub fn validate(&self) -> Result<()> {
        if self.identifier.trim().is_empty() {
            return Err(Error::Validation("identifier must not be empty".to_string()));
        }
        if self.kind.trim().is_empty() {
            return Err(Error::Validation("type must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Tags grouped under a single key, in submission order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagGroup {
    pub array: Vec<Tag>,
}

/// The enriched document published to the broker.
///
/// `uuid` and `ingestion_time` are assigned once in [`CanonicalDocument::from_record`]
/// and have no setters. `retries` is only advanced by the retry path and is
/// never part of the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalDocument {
    uuid: String,
    identifier: String,
    name: String,
    #[serde(rename = "type")]
    kind: String,
    ingestion_time: i64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    tags: Option<TagGroup>,
    #[serde(skip)]
    retries: u32,
}

impl CanonicalDocument {
    pub fn from_record(record: RawRecord) -> Result<Self> {
        record.validate()?;

        let tags = if record.tags.is_empty() {
            None
        } else {
            Some(TagGroup { array: record.tags })
        };

        Ok(Self {
            uuid: Uuid::new_v4().to_string(),
            identifier: record.identifier,
            name: record.name,
            kind: record.kind,
            ingestion_time: Utc::now().timestamp_millis(),
            tags,
            retries: 0,
        })
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn ingestion_time(&self) -> i64 {
        self.ingestion_time
    }

    pub fn tags(&self) -> Option<&TagGroup> {
        self.tags.as_ref()
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub(crate) fn record_retry(&mut self) {
        self.retries += 1;
    }

    pub fn to_payload(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(Into::into)
    }
}

/// Batch acknowledgment returned to the caller once every valid element is enqueued.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestResponse {
    pub received: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rejected: Vec<RejectedRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectedRecord {
    pub index: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub app_name: String,
    pub status: String,
    pub version: String,
    pub worker_threads: usize,
    pub publishers: usize,
    pub in_flight: usize,
    pub last_error: String,
}
