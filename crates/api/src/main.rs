use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use sitepulse_core::error::ConfigError;
use sitepulse_events::{
    ActionContext, ConsumerConfig, EventLog, EventProducer, MemoryLog, ProducerConfig, RuleSet,
    TriggerConsumer,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sitepulse_api::config::ServerConfig;
use sitepulse_api::router::build_app_router;
use sitepulse_api::state::AppState;
use sitepulse_api::ws::{self, LiveHub};

/// Extra time granted to background tasks on top of their own drain budget.
const JOIN_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Server I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    init_tracing();

    if let Err(e) = run().await {
        tracing::error!(error = %e, "Fatal startup error");
        std::process::exit(1);
    }
}

/// Install the tracing subscriber. `LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "sitepulse_api=debug,sitepulse_events=debug,tower_http=debug".into()
            }),
        )
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(|| tracing_subscriber::fmt::layer()))
        .init();
}

async fn run() -> Result<(), StartupError> {
    // --- Configuration ---
    let config = ServerConfig::from_env()?;
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    let cancel = CancellationToken::new();

    // --- Durable transport ---
    let log: Arc<dyn EventLog> = Arc::new(MemoryLog::new(
        [config.pipeline.topic.clone()],
        config.pipeline.partitions,
    ));
    tracing::info!(
        topic = %config.pipeline.topic,
        partitions = config.pipeline.partitions,
        "Event log ready"
    );

    // --- Producer ---
    let producer = Arc::new(EventProducer::new(
        Arc::clone(&log),
        ProducerConfig {
            buffer_capacity: config.pipeline.producer_buffer,
            drain_timeout: config.shutdown_timeout(),
            ..ProducerConfig::default()
        },
    ));

    // --- Trigger consumer ---
    let rules = match &config.rules_path {
        Some(path) => RuleSet::load(path)?,
        None => {
            tracing::warn!("TRIGGER_RULES_PATH not set, no trigger actions configured");
            RuleSet::default()
        }
    };
    let actions = rules.build_registry(&ActionContext {
        email: config.email.clone(),
        webhook: config.webhook.clone(),
    })?;
    tracing::info!(event_types = actions.event_type_count(), "Trigger rules loaded");

    let consumer = TriggerConsumer::new(
        Arc::clone(&log),
        ConsumerConfig {
            topic: config.pipeline.topic.clone(),
            group_id: config.pipeline.consumer_group.clone(),
            start_offset: config.pipeline.start_offset,
            shutdown_timeout: config.shutdown_timeout(),
        },
        Arc::new(actions),
    );
    let consumer_handle = tokio::spawn(consumer.run(cancel.child_token()));

    // --- Live hub + heartbeat ---
    let (hub, hub_handle) = LiveHub::start(config.hub.clone(), cancel.child_token());
    let heartbeat_handle =
        ws::start_heartbeat(hub.clone(), config.heartbeat_interval(), cancel.child_token());

    // --- App state / router ---
    let state = AppState {
        config: Arc::new(config.clone()),
        producer: Arc::clone(&producer),
        hub,
    };
    let app = build_app_router(state, &config)?;

    // --- Start server ---
    let host: IpAddr = config.host.parse().map_err(|e| ConfigError::InvalidVar {
        var: "HOST",
        reason: format!("`{}`: {e}", config.host),
    })?;
    let addr = SocketAddr::new(host, config.port);
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    let shutdown = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            // Stops the hub (closing live sockets), consumer and heartbeat
            // while the server drains in-flight requests.
            shutdown.cancel();
        })
        .await?;

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");
    cancel.cancel();

    if let Err(e) = producer.close().await {
        tracing::error!(error = %e, "Producer closed with pending writes discarded");
    }

    let budget = config.shutdown_timeout() + JOIN_GRACE;
    match tokio::time::timeout(budget, consumer_handle).await {
        Ok(Ok(Ok(report))) => tracing::info!(?report, "Trigger consumer stopped"),
        Ok(Ok(Err(e))) => tracing::error!(error = %e, "Trigger consumer failed"),
        Ok(Err(e)) => tracing::error!(error = %e, "Trigger consumer task panicked"),
        Err(_) => tracing::error!("Trigger consumer did not stop in time"),
    }

    let _ = tokio::time::timeout(JOIN_GRACE, hub_handle).await;
    let _ = tokio::time::timeout(JOIN_GRACE, heartbeat_handle).await;
    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix). If a handler cannot
/// be installed, that signal source is ignored and the other still works.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
