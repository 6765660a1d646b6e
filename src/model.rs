//! Core data model.
//!
//! A work unit is one job request pulled off the queue: the subject it
//! arrived on, where to send the acknowledgment, and the JSON job body whose
//! `meta` mapping parameterizes the command.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Key of the metadata mapping inside a job body.
pub const META_KEY: &str = "meta";

/// Key under which the generated output sink path is stored in meta.
pub const OUTPUT_KEY: &str = "s3_output";

/// JSON object payload of a job.
pub type JobBody = Map<String, Value>;

// ---------------------------------------------------------------------------
// Work Unit
// ---------------------------------------------------------------------------

/// One parameterized job request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkUnit {
    /// Correlates log lines for this unit. Not part of the wire format.
    pub id: WorkId,

    /// Queue subject the message arrived on.
    pub subject: String,

    /// Reply address of the requester. `None` means no reply is expected.
    pub reply_to: Option<String>,

    /// Job payload. After validation `body["meta"]` holds only strings.
    pub body: JobBody,
}

impl WorkUnit {
    pub fn new(subject: impl Into<String>, reply_to: Option<String>, body: JobBody) -> Self {
        Self {
            id: WorkId::new(),
            subject: subject.into(),
            reply_to: reply_to.filter(|r| !r.is_empty()),
            body,
        }
    }

    /// Decode a raw queue payload. The body must be a JSON object.
    pub fn decode(
        subject: impl Into<String>,
        reply_to: Option<String>,
        payload: &[u8],
    ) -> Result<Self, serde_json::Error> {
        let body: JobBody = serde_json::from_slice(payload)?;
        Ok(Self::new(subject, reply_to, body))
    }

    /// The metadata mapping, if present and a mapping.
    pub fn meta(&self) -> Option<&Map<String, Value>> {
        self.body.get(META_KEY).and_then(Value::as_object)
    }

    /// A meta value as a string, if present and a string.
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.meta().and_then(|m| m.get(key)).and_then(Value::as_str)
    }
}

/// Newtype for work unit IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkId(pub Uuid);

impl WorkId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for WorkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Short display: first 8 chars of UUID
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

impl Default for WorkId {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Reply
// ---------------------------------------------------------------------------

/// Acknowledgment published to a requester's reply address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s3_output: Option<String>,
}

impl Reply {
    /// A successful acknowledgment, carrying the output path when known.
    pub fn success(s3_output: Option<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            success: true,
            error: None,
            s3_output,
        }
    }

    /// A failed acknowledgment with the error message.
    pub fn failure(error: impl std::fmt::Display) -> Self {
        Self {
            timestamp: Utc::now(),
            success: false,
            error: Some(error.to_string()),
            s3_output: None,
        }
    }
}
