//! The event envelope shared by the durable and live paths.
//!
//! On the wire an envelope is a JSON object:
//!
//! ```json
//! {"type": "pageview", "tenant_id": "w1", "payload": {"path": "/"}, "timestamp": "2024-05-01T12:00:00Z"}
//! ```
//!
//! Decoding is tolerant: unknown fields are ignored and a missing `payload`
//! becomes `null`. `type`, `tenant_id` and `timestamp` are required.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::DecodeError;
use crate::types::{TenantId, Timestamp};

/// A behavioral event scoped to one tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Event name, e.g. `"pageview"` or `"user.signup"`.
    #[serde(rename = "type")]
    pub event_type: String,

    /// Property the event belongs to.
    pub tenant_id: TenantId,

    /// Free-form event data.
    #[serde(default)]
    pub payload: serde_json::Value,

    /// When the event was created (UTC).
    pub timestamp: Timestamp,
}

impl Envelope {
    /// Create an envelope stamped with the current time and an empty object
    /// payload.
    pub fn new(event_type: impl Into<String>, tenant_id: impl Into<TenantId>) -> Self {
        Self {
            event_type: event_type.into(),
            tenant_id: tenant_id.into(),
            payload: serde_json::Value::Object(Default::default()),
            timestamp: Utc::now(),
        }
    }

    /// Set the JSON payload.
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// Override the creation time.
    pub fn with_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Decode an envelope from its JSON wire form.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let envelope: Envelope = serde_json::from_slice(bytes)?;
        if envelope.event_type.trim().is_empty() {
            return Err(DecodeError::EmptyField("type"));
        }
        if envelope.tenant_id.trim().is_empty() {
            return Err(DecodeError::EmptyField("tenant_id"));
        }
        Ok(envelope)
    }

    /// Look up a payload value by dot-separated path (`"user.plan"`).
    ///
    /// Array elements are addressed by index (`"items.0.sku"`).
    pub fn payload_field(&self, path: &str) -> Option<&serde_json::Value> {
        path.split('.')
            .filter(|segment| !segment.is_empty())
            .try_fold(&self.payload, |value, segment| match value {
                serde_json::Value::Object(map) => map.get(segment),
                serde_json::Value::Array(items) => {
                    segment.parse::<usize>().ok().and_then(|i| items.get(i))
                }
                _ => None,
            })
    }
}
