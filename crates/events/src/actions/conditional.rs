//! Condition-gated action.
//!
//! [`ConditionalAction`] evaluates a [`Condition`] against the envelope
//! payload and only runs the wrapped action when it holds.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use sitepulse_core::Envelope;

use super::{Action, ActionError, ActionOutcome};

/// Predicate over a payload field addressed by dot-separated path.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Condition {
    /// Field is present and equal to `value`.
    Equals {
        field: String,
        value: serde_json::Value,
    },
    /// Field is absent or differs from `value`.
    NotEquals {
        field: String,
        value: serde_json::Value,
    },
    /// Field is present and not `null`.
    Exists { field: String },
}

impl Condition {
    pub fn matches(&self, envelope: &Envelope) -> bool {
        match self {
            Condition::Equals { field, value } => envelope.payload_field(field) == Some(value),
            Condition::NotEquals { field, value } => envelope.payload_field(field) != Some(value),
            Condition::Exists { field } => envelope
                .payload_field(field)
                .is_some_and(|v| !v.is_null()),
        }
    }
}

/// Runs `inner` only for envelopes matching `condition`.
pub struct ConditionalAction {
    condition: Condition,
    inner: Arc<dyn Action>,
    name: String,
}

impl ConditionalAction {
    pub fn new(condition: Condition, inner: Arc<dyn Action>) -> Self {
        let name = format!("conditional:{}", inner.name());
        Self {
            condition,
            inner,
            name,
        }
    }
}

#[async_trait]
impl Action for ConditionalAction {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, envelope: &Envelope) -> Result<ActionOutcome, ActionError> {
        if !self.condition.matches(envelope) {
            tracing::debug!(
                action = %self.name,
                event_type = %envelope.event_type,
                condition = ?self.condition,
                "Condition not met, skipping action"
            );
            return Ok(ActionOutcome::Skipped);
        }
        self.inner.execute(envelope).await
    }
}
