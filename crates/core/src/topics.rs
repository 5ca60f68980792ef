//! Well-known durable topic and consumer group names.
//!
//! Topics are fixed when the transport is constructed. The consumer group
//! name is the durable cursor for trigger processing: renaming it restarts
//! consumption from the configured start offset.

/// Behavioral events emitted by instrumented properties (signups, page
/// views, custom events).
pub const TOPIC_USER_EVENTS: &str = "user_events";

/// Default consumer group for trigger/automation processing.
pub const GROUP_TRIGGERS: &str = "sitepulse-triggers";
