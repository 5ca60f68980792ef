use axum::extract::ws::Message;
use sitepulse_core::types::{TenantId, Timestamp};
use tokio::sync::mpsc;

/// Identifier of one live connection.
pub type ClientId = String;

/// One live subscriber: a tenant binding plus the producing half of a
/// bounded outbound queue.
///
/// The sender is never handed out and `Client` is not `Clone`, so whoever
/// owns the `Client` owns the queue. Dropping it closes the queue, which can
/// therefore happen only once.
#[derive(Debug)]
pub struct Client {
    id: ClientId,
    tenant_id: TenantId,
    sender: mpsc::Sender<Message>,
    connected_at: Timestamp,
}

impl Client {
    /// Create a client with a fresh id. The returned receiver is the
    /// connection writer's end of the queue.
    pub fn new(
        tenant_id: impl Into<TenantId>,
        queue_capacity: usize,
    ) -> (Self, mpsc::Receiver<Message>) {
        Self::with_id(uuid::Uuid::new_v4().to_string(), tenant_id, queue_capacity)
    }

    pub fn with_id(
        id: impl Into<ClientId>,
        tenant_id: impl Into<TenantId>,
        queue_capacity: usize,
    ) -> (Self, mpsc::Receiver<Message>) {
        let (sender, rx) = mpsc::channel(queue_capacity.max(1));
        let client = Self {
            id: id.into(),
            tenant_id: tenant_id.into(),
            sender,
            connected_at: chrono::Utc::now(),
        };
        (client, rx)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn connected_at(&self) -> Timestamp {
        self.connected_at
    }

    /// Non-blocking enqueue. `false` when the queue is full or the writer
    /// has gone away; the frame is dropped for this client only.
    pub(crate) fn offer(&self, message: Message) -> bool {
        self.sender.try_send(message).is_ok()
    }
}
