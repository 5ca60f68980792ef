//! Webhook action with exponential-backoff retry.
//!
//! [`WebhookAction`] POSTs the envelope, in its wire JSON form, to an
//! external URL. Failed attempts are retried according to
//! [`WebhookConfig::retry_delays`] before the action reports failure.

use std::time::Duration;

use async_trait::async_trait;
use sitepulse_core::Envelope;

use super::{Action, ActionError, ActionOutcome};

/// Retry delays (exponential backoff: 1s, 2s, 4s).
const DEFAULT_RETRY_DELAYS: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(4),
];

/// HTTP request timeout for a single delivery attempt.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Settings shared by every webhook action of a process.
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub request_timeout: Duration,
    /// Delay before each retry; the number of entries is the retry count.
    pub retry_delays: Vec<Duration>,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            retry_delays: DEFAULT_RETRY_DELAYS.to_vec(),
        }
    }
}

impl WebhookConfig {
    /// Build the HTTP client all webhook actions share.
    pub fn http_client(&self) -> Result<reqwest::Client, ActionError> {
        Ok(reqwest::Client::builder()
            .timeout(self.request_timeout)
            .build()?)
    }
}

/// Delivers envelopes to one webhook endpoint.
pub struct WebhookAction {
    client: reqwest::Client,
    url: reqwest::Url,
    retry_delays: Vec<Duration>,
}

impl WebhookAction {
    pub fn new(client: reqwest::Client, url: reqwest::Url, config: &WebhookConfig) -> Self {
        Self {
            client,
            url,
            retry_delays: config.retry_delays.clone(),
        }
    }

    /// Execute a single POST request and check the response status.
    async fn try_send(&self, envelope: &Envelope) -> Result<(), ActionError> {
        let response = self
            .client
            .post(self.url.clone())
            .json(envelope)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ActionError::HttpStatus(response.status().as_u16()));
        }
        Ok(())
    }
}

#[async_trait]
impl Action for WebhookAction {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn execute(&self, envelope: &Envelope) -> Result<ActionOutcome, ActionError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let err = match self.try_send(envelope).await {
                Ok(()) => return Ok(ActionOutcome::Completed),
                Err(e) => e,
            };

            let Some(delay) = self.retry_delays.get(attempt - 1) else {
                tracing::error!(
                    url = %self.url,
                    attempts = attempt,
                    error = %err,
                    "Webhook delivery failed after all retries"
                );
                return Err(err);
            };

            tracing::warn!(
                attempt,
                url = %self.url,
                error = %err,
                "Webhook delivery attempt failed, retrying"
            );
            tokio::time::sleep(*delay).await;
        }
    }
}
