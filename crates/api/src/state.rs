use std::sync::Arc;

use sitepulse_events::EventProducer;

use crate::config::ServerConfig;
use crate::ws::LiveHub;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable (inner data is behind `Arc` or is already a handle).
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    /// Publisher for the durable path.
    pub producer: Arc<EventProducer>,
    /// Live fan-out hub (dashboard clients).
    pub hub: LiveHub,
}
