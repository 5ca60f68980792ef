//! Email action via SMTP.
//!
//! [`EmailAction`] wraps the `lettre` async SMTP transport and sends a
//! plain-text message for each envelope. The recipient is read from a
//! payload field, so one rule serves every tenant.

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use sitepulse_core::Envelope;

use super::{Action, ActionError, ActionOutcome};

// ---------------------------------------------------------------------------
// EmailConfig
// ---------------------------------------------------------------------------

/// Default SMTP port (STARTTLS).
pub const DEFAULT_SMTP_PORT: u16 = 587;

/// Default sender address.
pub const DEFAULT_FROM_ADDRESS: &str = "noreply@sitepulse.local";

/// SMTP connection settings.
#[derive(Debug, Clone)]
pub struct EmailConfig {
    /// SMTP server hostname.
    pub smtp_host: String,
    /// SMTP server port (defaults to 587).
    pub smtp_port: u16,
    /// RFC 5322 "From" address.
    pub from_address: String,
    /// Optional SMTP username.
    pub smtp_user: Option<String>,
    /// Optional SMTP password.
    pub smtp_password: Option<String>,
    /// Upgrade the connection with STARTTLS. Disable only for local relays.
    pub starttls: bool,
}

impl EmailConfig {
    pub fn new(smtp_host: impl Into<String>) -> Self {
        Self {
            smtp_host: smtp_host.into(),
            smtp_port: DEFAULT_SMTP_PORT,
            from_address: DEFAULT_FROM_ADDRESS.to_string(),
            smtp_user: None,
            smtp_password: None,
            starttls: true,
        }
    }
}

// ---------------------------------------------------------------------------
// EmailAction
// ---------------------------------------------------------------------------

/// Sends one email per envelope to the address found in `recipient_field`.
#[derive(Debug)]
pub struct EmailAction {
    from_address: String,
    recipient_field: String,
    subject: String,
    mailer: AsyncSmtpTransport<Tokio1Executor>,
}

impl EmailAction {
    /// Build the SMTP transport. Fails if the relay settings are invalid;
    /// no connection is opened until the first send.
    pub fn new(
        config: &EmailConfig,
        recipient_field: impl Into<String>,
        subject: impl Into<String>,
    ) -> Result<Self, ActionError> {
        // Validate the sender once so every send does not fail the same way.
        let _: Mailbox = config.from_address.parse()?;

        let builder = if config.starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.smtp_host)
        };
        let mut builder = builder.port(config.smtp_port);

        if let (Some(user), Some(pass)) = (&config.smtp_user, &config.smtp_password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        Ok(Self {
            from_address: config.from_address.clone(),
            recipient_field: recipient_field.into(),
            subject: subject.into(),
            mailer: builder.build(),
        })
    }

    fn recipient<'a>(&self, envelope: &'a Envelope) -> Result<&'a str, ActionError> {
        envelope
            .payload_field(&self.recipient_field)
            .and_then(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| {
                ActionError::InvalidInput(format!(
                    "payload field `{}` with a recipient address is missing",
                    self.recipient_field
                ))
            })
    }

    fn build_message(&self, to: &str, envelope: &Envelope) -> Result<Message, ActionError> {
        let body = format!(
            "Event: {}\nSite: {}\nTime: {}\nDetails: {}",
            envelope.event_type,
            envelope.tenant_id,
            envelope.timestamp,
            serde_json::to_string_pretty(&envelope.payload).unwrap_or_default()
        );

        Message::builder()
            .from(self.from_address.parse()?)
            .to(to.parse()?)
            .subject(self.subject.as_str())
            .header(ContentType::TEXT_PLAIN)
            .body(body)
            .map_err(|e| ActionError::Build(e.to_string()))
    }
}

#[async_trait]
impl Action for EmailAction {
    fn name(&self) -> &str {
        "email"
    }

    async fn execute(&self, envelope: &Envelope) -> Result<ActionOutcome, ActionError> {
        let to = self.recipient(envelope)?;
        let message = self.build_message(to, envelope)?;

        self.mailer.send(message).await?;

        tracing::info!(
            to,
            tenant_id = %envelope.tenant_id,
            event_type = %envelope.event_type,
            "Trigger email sent"
        );
        Ok(ActionOutcome::Completed)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    fn action() -> EmailAction {
        let mut config = EmailConfig::new("localhost");
        config.starttls = false;
        config.smtp_port = 2525;
        EmailAction::new(&config, "email", "Welcome to SitePulse").unwrap()
    }

    #[tokio::test]
    async fn invalid_from_address_is_rejected_at_construction() {
        let mut config = EmailConfig::new("localhost");
        config.from_address = "not-an-email".to_string();

        let result = EmailAction::new(&config, "email", "subject");
        assert_matches!(result, Err(ActionError::Address(_)));
    }

    #[tokio::test]
    async fn missing_recipient_fails_before_sending() {
        let envelope = Envelope::new("user.signup", "w1").with_payload(json!({"name": "Ada"}));

        let result = action().execute(&envelope).await;
        assert_matches!(result, Err(ActionError::InvalidInput(msg)) if msg.contains("`email`"));
    }

    #[tokio::test]
    async fn malformed_recipient_is_an_address_error() {
        let envelope =
            Envelope::new("user.signup", "w1").with_payload(json!({"email": "nobody"}));

        let result = action().execute(&envelope).await;
        assert_matches!(result, Err(ActionError::Address(_)));
    }

    #[tokio::test]
    async fn message_includes_subject_and_tenant() {
        let envelope =
            Envelope::new("user.signup", "w1").with_payload(json!({"email": "a@b.com"}));
        let action = action();

        let message = action.build_message("a@b.com", &envelope).unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();

        assert!(raw.contains("Subject: Welcome to SitePulse"));
        assert!(raw.contains("Site: w1"));
        assert!(raw.contains("To: a@b.com"));
    }
}
