//! Shared domain types for the SitePulse event pipeline.
//!
//! - [`Envelope`]: the wire-level unit carried by both the durable and the
//!   live path.
//! - [`error`]: the error taxonomy shared by producer, consumer and hub.
//! - [`topics`]: well-known durable topic and consumer group names.

pub mod envelope;
pub mod error;
pub mod topics;
pub mod types;

pub use envelope::Envelope;
