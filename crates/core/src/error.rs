use std::time::Duration;

/// Failure to hand a record to the durable transport.
///
/// Surfaced synchronously to the publisher; never retried inside the
/// pipeline.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Unknown topic: {0}")]
    UnknownTopic(String),

    #[error("Payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Producer buffer is full ({capacity} pending writes)")]
    BufferFull { capacity: usize },

    #[error("Transport is closed")]
    Closed,

    #[error("Transport rejected the write: {0}")]
    Rejected(String),

    #[error("Write was not acknowledged within {0:?}")]
    Timeout(Duration),
}

/// A consumed record could not be decoded into an envelope.
///
/// Logged and skipped by the consumer; never terminates the receive loop.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Malformed envelope: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Envelope field `{0}` is empty")]
    EmptyField(&'static str),
}

/// A graceful shutdown exceeded its budget. Resources are released anyway.
#[derive(Debug, thiserror::Error)]
#[error("{component} did not drain within {timeout:?}")]
pub struct DrainTimeoutError {
    pub component: &'static str,
    pub timeout: Duration,
}

/// Invalid configuration detected at startup. The only fatal error class.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {reason}")]
    InvalidVar { var: &'static str, reason: String },

    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid trigger rules: {0}")]
    Rules(String),
}
