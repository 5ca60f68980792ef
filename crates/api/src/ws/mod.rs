//! Live push channel.
//!
//! Provides the tenant-keyed fan-out hub, heartbeat pings, and the HTTP
//! upgrade handler used by Axum routes.

mod client;
mod handler;
mod heartbeat;
pub mod hub;
mod registry;

pub use client::{Client, ClientId};
pub use handler::live_ws_handler;
pub use heartbeat::start_heartbeat;
pub use hub::{HubConfig, HubError, LiveHub};
pub use registry::HubSnapshot;
