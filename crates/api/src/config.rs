use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use sitepulse_core::error::ConfigError;
use sitepulse_core::topics::{GROUP_TRIGGERS, TOPIC_USER_EVENTS};
use sitepulse_events::actions::{EmailConfig, WebhookConfig};
use sitepulse_events::StartOffset;

use crate::ws::HubConfig;

/// Settings of the durable path: topic, partitions, consumer group and
/// producer buffer.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub topic: String,
    pub partitions: u32,
    pub consumer_group: String,
    pub start_offset: StartOffset,
    pub producer_buffer: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            topic: TOPIC_USER_EVENTS.to_string(),
            partitions: 8,
            consumer_group: GROUP_TRIGGERS.to_string(),
            start_offset: StartOffset::Earliest,
            producer_buffer: 4096,
        }
    }
}

/// Server configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// Drain budget for the producer and the trigger consumer (default: `10`).
    pub shutdown_timeout_secs: u64,
    pub heartbeat_interval_secs: u64,
    pub pipeline: PipelineConfig,
    pub hub: HubConfig,
    /// JSON trigger rule file; no rules when unset.
    pub rules_path: Option<PathBuf>,
    /// `None` unless `SMTP_HOST` is set.
    pub email: Option<EmailConfig>,
    pub webhook: WebhookConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3000,
            cors_origins: vec!["http://localhost:5173".into()],
            request_timeout_secs: 30,
            shutdown_timeout_secs: 10,
            heartbeat_interval_secs: 30,
            pipeline: PipelineConfig::default(),
            hub: HubConfig::default(),
            rules_path: None,
            email: None,
            webhook: WebhookConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                   | Default                    |
    /// |---------------------------|----------------------------|
    /// | `HOST`                    | `0.0.0.0`                  |
    /// | `PORT`                    | `3000`                     |
    /// | `CORS_ORIGINS`            | `http://localhost:5173`    |
    /// | `REQUEST_TIMEOUT_SECS`    | `30`                       |
    /// | `SHUTDOWN_TIMEOUT_SECS`   | `10`                       |
    /// | `HEARTBEAT_INTERVAL_SECS` | `30`                       |
    /// | `EVENTS_TOPIC`            | `user_events`              |
    /// | `EVENTS_PARTITIONS`       | `8`                        |
    /// | `CONSUMER_GROUP`          | `sitepulse-triggers`       |
    /// | `CONSUMER_START_OFFSET`   | `earliest`                 |
    /// | `PRODUCER_BUFFER`         | `4096`                     |
    /// | `HUB_INTAKE_CAPACITY`     | `1024`                     |
    /// | `CLIENT_QUEUE_CAPACITY`   | `64`                       |
    /// | `TRIGGER_RULES_PATH`      | unset                      |
    /// | `SMTP_HOST`               | unset (email disabled)     |
    /// | `SMTP_PORT`               | `587`                      |
    /// | `SMTP_FROM`               | `noreply@sitepulse.local`  |
    /// | `SMTP_USER` / `SMTP_PASSWORD` | unset                  |
    /// | `WEBHOOK_TIMEOUT_SECS`    | `10`                       |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup<F>(get: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |var: &str| get(var).filter(|v| !v.trim().is_empty());

        let cors_origins = match get("CORS_ORIGINS") {
            Some(raw) => raw
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            None => defaults.cors_origins,
        };

        let pipeline = PipelineConfig {
            topic: get("EVENTS_TOPIC").unwrap_or(defaults.pipeline.topic),
            partitions: positive(&get, "EVENTS_PARTITIONS", defaults.pipeline.partitions)?,
            consumer_group: get("CONSUMER_GROUP").unwrap_or(defaults.pipeline.consumer_group),
            start_offset: parse(&get, "CONSUMER_START_OFFSET", defaults.pipeline.start_offset)?,
            producer_buffer: positive(&get, "PRODUCER_BUFFER", defaults.pipeline.producer_buffer)?,
        };

        let hub = HubConfig {
            intake_capacity: positive(&get, "HUB_INTAKE_CAPACITY", defaults.hub.intake_capacity)?,
            client_queue_capacity: positive(
                &get,
                "CLIENT_QUEUE_CAPACITY",
                defaults.hub.client_queue_capacity,
            )?,
        };

        let email = match get("SMTP_HOST") {
            Some(host) => {
                let mut email = EmailConfig::new(host);
                email.smtp_port = parse(&get, "SMTP_PORT", email.smtp_port)?;
                if let Some(from) = get("SMTP_FROM") {
                    email.from_address = from;
                }
                email.smtp_user = get("SMTP_USER");
                email.smtp_password = get("SMTP_PASSWORD");
                Some(email)
            }
            None => None,
        };

        let webhook_timeout = positive(
            &get,
            "WEBHOOK_TIMEOUT_SECS",
            defaults.webhook.request_timeout.as_secs(),
        )?;
        let webhook = WebhookConfig {
            request_timeout: Duration::from_secs(webhook_timeout),
            ..defaults.webhook
        };

        Ok(Self {
            host: get("HOST").unwrap_or(defaults.host),
            port: parse(&get, "PORT", defaults.port)?,
            cors_origins,
            request_timeout_secs: positive(
                &get,
                "REQUEST_TIMEOUT_SECS",
                defaults.request_timeout_secs,
            )?,
            shutdown_timeout_secs: parse(
                &get,
                "SHUTDOWN_TIMEOUT_SECS",
                defaults.shutdown_timeout_secs,
            )?,
            heartbeat_interval_secs: positive(
                &get,
                "HEARTBEAT_INTERVAL_SECS",
                defaults.heartbeat_interval_secs,
            )?,
            pipeline,
            hub,
            rules_path: get("TRIGGER_RULES_PATH").map(PathBuf::from),
            email,
            webhook,
        })
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }
}

/// Parse `var` if set, else return `default`.
fn parse<T, G>(get: &G, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
    G: Fn(&str) -> Option<String>,
{
    match get(var) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidVar {
            var,
            reason: format!("`{raw}`: {e}"),
        }),
        None => Ok(default),
    }
}

/// Like [`parse`], rejecting zero.
fn positive<T, G>(get: &G, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr + PartialEq + Default,
    T::Err: Display,
    G: Fn(&str) -> Option<String>,
{
    let value = parse(get, var, default)?;
    if value == T::default() {
        return Err(ConfigError::InvalidVar {
            var,
            reason: "must be greater than zero".into(),
        });
    }
    Ok(value)
}
