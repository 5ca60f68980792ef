//! Multi-tenant live fan-out.
//!
//! [`LiveHub`] is a handle to a single control task that owns the tenant
//! registry. Registration, removal, broadcast and heartbeat pings are sent
//! to it as commands over one bounded intake channel and applied in arrival
//! order, so the registry never needs a lock.
//!
//! Delivery to clients is best-effort: a full client queue drops the frame
//! for that client only and the control task never waits on a client.

use axum::extract::ws::Message;
use sitepulse_core::types::TenantId;
use sitepulse_core::Envelope;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::client::{Client, ClientId};
use super::registry::{HubSnapshot, Registry};

const DEFAULT_INTAKE_CAPACITY: usize = 1024;
const DEFAULT_CLIENT_QUEUE_CAPACITY: usize = 64;

/// Capacity settings for the hub.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Pending commands before callers of the hub wait.
    pub intake_capacity: usize,
    /// Outbound frames buffered per client before drops begin.
    pub client_queue_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            intake_capacity: DEFAULT_INTAKE_CAPACITY,
            client_queue_capacity: DEFAULT_CLIENT_QUEUE_CAPACITY,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    /// The control task has stopped (shutdown or all handles dropped).
    #[error("Live hub is not running")]
    Closed,
}

enum Command {
    Register(Client),
    Unregister(ClientId),
    Broadcast(Envelope),
    Ping,
    ClientCount(TenantId, oneshot::Sender<usize>),
    Snapshot(oneshot::Sender<HubSnapshot>),
}

/// Cloneable handle to the hub control task.
#[derive(Debug, Clone)]
pub struct LiveHub {
    intake: mpsc::Sender<Command>,
    client_queue_capacity: usize,
}

impl LiveHub {
    /// Spawn the control task. It runs until `cancel` fires or every handle
    /// is dropped; on exit each client is offered a Close frame and its
    /// queue is closed.
    pub fn start(config: HubConfig, cancel: CancellationToken) -> (Self, JoinHandle<()>) {
        let (intake, rx) = mpsc::channel(config.intake_capacity.max(1));
        let handle = tokio::spawn(run(rx, cancel));
        let hub = Self {
            intake,
            client_queue_capacity: config.client_queue_capacity,
        };
        (hub, handle)
    }

    /// Build a client for `tenant_id` sized to this hub's queue capacity.
    pub fn new_client(&self, tenant_id: impl Into<TenantId>) -> (Client, mpsc::Receiver<Message>) {
        Client::new(tenant_id, self.client_queue_capacity)
    }

    /// Add a client to its tenant's set. A second registration of the same
    /// client id leaves the first in place and closes the newcomer's queue.
    pub async fn register(&self, client: Client) -> Result<(), HubError> {
        self.send(Command::Register(client)).await
    }

    /// Remove a client, closing its queue. Unknown ids are ignored.
    pub async fn unregister(&self, client_id: impl Into<ClientId>) -> Result<(), HubError> {
        self.send(Command::Unregister(client_id.into())).await
    }

    /// Fan `envelope` out to the clients of `envelope.tenant_id`.
    pub async fn broadcast(&self, envelope: Envelope) -> Result<(), HubError> {
        self.send(Command::Broadcast(envelope)).await
    }

    /// Enqueue a Ping frame to every client.
    pub async fn ping_all(&self) -> Result<(), HubError> {
        self.send(Command::Ping).await
    }

    pub async fn client_count(&self, tenant_id: impl Into<TenantId>) -> Result<usize, HubError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::ClientCount(tenant_id.into(), tx)).await?;
        rx.await.map_err(|_| HubError::Closed)
    }

    pub async fn snapshot(&self) -> Result<HubSnapshot, HubError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Snapshot(tx)).await?;
        rx.await.map_err(|_| HubError::Closed)
    }

    async fn send(&self, command: Command) -> Result<(), HubError> {
        self.intake.send(command).await.map_err(|_| HubError::Closed)
    }
}

// ---------------------------------------------------------------------------
// Control task
// ---------------------------------------------------------------------------

async fn run(mut intake: mpsc::Receiver<Command>, cancel: CancellationToken) {
    let mut registry = Registry::default();
    tracing::info!("Live hub started");

    loop {
        let command = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            command = intake.recv() => match command {
                Some(command) => command,
                None => break,
            },
        };
        apply(&mut registry, command);
    }

    // Later commands fail with `HubError::Closed`; buffered ones are dropped
    // with the receiver.
    intake.close();
    let closed = registry.close_all();
    let snapshot = registry.snapshot();
    tracing::info!(
        closed,
        delivered = snapshot.delivered,
        dropped = snapshot.dropped,
        "Live hub stopped"
    );
}

fn apply(registry: &mut Registry, command: Command) {
    match command {
        Command::Register(client) => {
            let client_id = client.id().to_string();
            let tenant_id = client.tenant_id().to_string();
            if registry.register(client) {
                tracing::debug!(%client_id, %tenant_id, "Live client registered");
            } else {
                tracing::debug!(%client_id, %tenant_id, "Live client already registered");
            }
        }
        Command::Unregister(client_id) => {
            if let Some(client) = registry.unregister(&client_id) {
                let connected_secs = (chrono::Utc::now() - client.connected_at()).num_seconds();
                tracing::debug!(
                    %client_id,
                    tenant_id = %client.tenant_id(),
                    connected_secs,
                    "Live client unregistered"
                );
            }
        }
        Command::Broadcast(envelope) => match registry.broadcast(&envelope) {
            Ok(dispatch) if dispatch.dropped > 0 => {
                tracing::debug!(
                    tenant_id = %envelope.tenant_id,
                    event_type = %envelope.event_type,
                    delivered = dispatch.delivered,
                    dropped = dispatch.dropped,
                    "Live broadcast dropped frames for saturated clients"
                );
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(
                    error = %e,
                    tenant_id = %envelope.tenant_id,
                    "Failed to serialize envelope for live broadcast"
                );
            }
        },
        Command::Ping => {
            let dispatch = registry.ping_all();
            tracing::trace!(
                delivered = dispatch.delivered,
                dropped = dispatch.dropped,
                "Live hub ping"
            );
        }
        Command::ClientCount(tenant_id, reply) => {
            let _ = reply.send(registry.client_count(&tenant_id));
        }
        Command::Snapshot(reply) => {
            let _ = reply.send(registry.snapshot());
        }
    }
}
