//! Trigger rules loaded from a JSON document.
//!
//! The rule file is the deployment's action store: it maps envelope types
//! to actions. It is read once at startup; a malformed file is a fatal
//! configuration error.
//!
//! ```json
//! {
//!   "rules": [
//!     {
//!       "event_type": "user.signup",
//!       "action": { "kind": "email", "recipient_field": "email", "subject": "Welcome!" },
//!       "condition": { "op": "exists", "field": "email" }
//!     },
//!     {
//!       "event_type": "goal.reached",
//!       "action": { "kind": "webhook", "url": "https://hooks.example.com/goals" }
//!     }
//!   ]
//! }
//! ```

use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use sitepulse_core::error::ConfigError;

use crate::actions::{
    Action, ActionRegistry, Condition, ConditionalAction, EmailAction, EmailConfig,
    WebhookAction, WebhookConfig,
};

/// Parsed rule document.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuleSet {
    #[serde(default)]
    pub rules: Vec<TriggerRule>,
}

/// One `event_type -> action` mapping, optionally gated by a condition.
#[derive(Debug, Clone, Deserialize)]
pub struct TriggerRule {
    pub event_type: String,
    pub action: ActionSpec,
    #[serde(default)]
    pub condition: Option<Condition>,
}

/// Declarative form of an action.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionSpec {
    Email {
        recipient_field: String,
        subject: String,
    },
    Webhook {
        url: String,
    },
}

/// Process-wide dependencies needed to instantiate actions.
#[derive(Debug, Clone, Default)]
pub struct ActionContext {
    /// `None` when SMTP is not configured; email rules are then rejected.
    pub email: Option<EmailConfig>,
    pub webhook: WebhookConfig,
}

impl RuleSet {
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(raw).map_err(|e| ConfigError::Rules(e.to_string()))
    }

    /// Read and parse a rule file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&raw)
    }

    /// Instantiate every rule's action and index them by event type.
    pub fn build_registry(&self, ctx: &ActionContext) -> Result<ActionRegistry, ConfigError> {
        let http = if self.needs_http() {
            Some(
                ctx.webhook
                    .http_client()
                    .map_err(|e| ConfigError::Rules(e.to_string()))?,
            )
        } else {
            None
        };

        let mut registry = ActionRegistry::new();
        for (index, rule) in self.rules.iter().enumerate() {
            if rule.event_type.trim().is_empty() {
                return Err(ConfigError::Rules(format!("rule {index}: empty event_type")));
            }

            let action: Arc<dyn Action> = match &rule.action {
                ActionSpec::Email {
                    recipient_field,
                    subject,
                } => {
                    let email = ctx.email.as_ref().ok_or_else(|| {
                        ConfigError::Rules(format!(
                            "rule {index}: email action requires SMTP configuration"
                        ))
                    })?;
                    let action = EmailAction::new(email, recipient_field.as_str(), subject.as_str())
                        .map_err(|e| ConfigError::Rules(format!("rule {index}: {e}")))?;
                    Arc::new(action)
                }
                ActionSpec::Webhook { url } => {
                    let url = reqwest::Url::parse(url).map_err(|e| {
                        ConfigError::Rules(format!("rule {index}: invalid webhook url `{url}`: {e}"))
                    })?;
                    let client = http.clone().ok_or_else(|| {
                        ConfigError::Rules(format!("rule {index}: webhook client unavailable"))
                    })?;
                    Arc::new(WebhookAction::new(client, url, &ctx.webhook))
                }
            };

            let action: Arc<dyn Action> = match &rule.condition {
                Some(condition) => Arc::new(ConditionalAction::new(condition.clone(), action)),
                None => action,
            };

            tracing::debug!(
                event_type = %rule.event_type,
                action = action.name(),
                "Registered trigger rule"
            );
            registry = registry.with_action(rule.event_type.clone(), action);
        }

        Ok(registry)
    }

    fn needs_http(&self) -> bool {
        self.rules
            .iter()
            .any(|r| matches!(r.action, ActionSpec::Webhook { .. }))
    }
}
