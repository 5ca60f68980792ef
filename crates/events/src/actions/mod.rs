//! Side effects triggered by consumed envelopes.
//!
//! An [`Action`] is selected by envelope type through the
//! [`ActionRegistry`]. Actions must tolerate duplicate delivery: the
//! consumer is at-least-once and does not deduplicate.

pub mod conditional;
pub mod email;
pub mod webhook;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use sitepulse_core::Envelope;

pub use conditional::{Condition, ConditionalAction};
pub use email::{EmailAction, EmailConfig};
pub use webhook::{WebhookAction, WebhookConfig};

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// A side effect failed. Logged by the consumer; the offset is committed
/// anyway and the action is not retried.
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    /// The envelope lacks data the action needs (e.g. a recipient).
    #[error("Invalid action input: {0}")]
    InvalidInput(String),

    /// SMTP transport-level failure (authentication, connection, etc.).
    #[error("SMTP transport error: {0}")]
    Email(#[from] lettre::transport::smtp::Error),

    /// A sender or recipient address could not be parsed.
    #[error("Email address parse error: {0}")]
    Address(#[from] lettre::address::AddressError),

    /// The MIME message could not be assembled.
    #[error("Email build error: {0}")]
    Build(String),

    /// The underlying HTTP request failed (network, DNS, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The remote server returned a non-2xx status code.
    #[error("Webhook returned HTTP {0}")]
    HttpStatus(u16),
}

// ---------------------------------------------------------------------------
// Action
// ---------------------------------------------------------------------------

/// Result of a successful [`Action::execute`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    /// The side effect was performed.
    Completed,
    /// The action decided the envelope does not apply to it.
    Skipped,
}

/// A side effect invoked for a consumed envelope.
#[async_trait]
pub trait Action: Send + Sync {
    /// Short label used in logs, e.g. `"email"`.
    fn name(&self) -> &str;

    async fn execute(&self, envelope: &Envelope) -> Result<ActionOutcome, ActionError>;
}

// ---------------------------------------------------------------------------
// ActionRegistry
// ---------------------------------------------------------------------------

/// Immutable mapping from envelope type to the actions it triggers.
///
/// Built once at startup and shared read-only, so several consumer
/// instances in one process hold no mutable state in common.
#[derive(Default, Clone)]
pub struct ActionRegistry {
    by_type: HashMap<String, Vec<Arc<dyn Action>>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `action` for `event_type`. Actions run in registration order.
    pub fn with_action(mut self, event_type: impl Into<String>, action: Arc<dyn Action>) -> Self {
        self.by_type.entry(event_type.into()).or_default().push(action);
        self
    }

    /// Actions registered for `event_type` (empty if none).
    pub fn actions_for(&self, event_type: &str) -> &[Arc<dyn Action>] {
        self.by_type.get(event_type).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Number of event types with at least one action.
    pub fn event_type_count(&self) -> usize {
        self.by_type.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty()
    }
}

impl std::fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut map = f.debug_map();
        for (event_type, actions) in &self.by_type {
            let names: Vec<&str> = actions.iter().map(|a| a.name()).collect();
            map.entry(event_type, &names);
        }
        map.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop(&'static str);

    #[async_trait]
    impl Action for Noop {
        fn name(&self) -> &str {
            self.0
        }

        async fn execute(&self, _envelope: &Envelope) -> Result<ActionOutcome, ActionError> {
            Ok(ActionOutcome::Completed)
        }
    }

    #[test]
    fn registry_keeps_registration_order() {
        let registry = ActionRegistry::new()
            .with_action("user.signup", Arc::new(Noop("first")))
            .with_action("user.signup", Arc::new(Noop("second")))
            .with_action("pageview", Arc::new(Noop("third")));

        let names: Vec<&str> = registry
            .actions_for("user.signup")
            .iter()
            .map(|a| a.name())
            .collect();
        assert_eq!(names, ["first", "second"]);
        assert_eq!(registry.event_type_count(), 2);
    }

    #[test]
    fn unknown_type_has_no_actions() {
        let registry = ActionRegistry::new();
        assert!(registry.actions_for("anything").is_empty());
        assert!(registry.is_empty());
    }

    #[test]
    fn action_error_display_http_status() {
        let err = ActionError::HttpStatus(502);
        assert_eq!(err.to_string(), "Webhook returned HTTP 502");
    }
}
