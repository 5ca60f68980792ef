use std::collections::HashMap;

use axum::body::Bytes;
use axum::extract::ws::{Message, Utf8Bytes};
use serde::Serialize;
use sitepulse_core::types::TenantId;
use sitepulse_core::Envelope;

use super::client::{Client, ClientId};

/// Point-in-time view of the hub.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HubSnapshot {
    /// Tenants with at least one live client.
    pub tenants: usize,
    pub clients: usize,
    /// Frames enqueued since start.
    pub delivered: u64,
    /// Frames dropped on a full or closed queue since start.
    pub dropped: u64,
}

/// Result of one fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Dispatch {
    pub delivered: usize,
    pub dropped: usize,
}

/// Tenant -> clients map owned by the hub's control task.
///
/// A tenant key exists only while its client set is non-empty. Every
/// mutation goes through `&mut self`, so there is a single writer.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    tenants: HashMap<TenantId, HashMap<ClientId, Client>>,
    /// client id -> tenant, for unregister by id.
    index: HashMap<ClientId, TenantId>,
    delivered: u64,
    dropped: u64,
}

impl Registry {
    /// Add `client` to its tenant's set. Returns `false` if a client with the
    /// same id is already registered; the duplicate is dropped, closing its
    /// queue, and the original registration stays untouched.
    pub fn register(&mut self, client: Client) -> bool {
        if self.index.contains_key(client.id()) {
            return false;
        }
        let tenant = client.tenant_id().to_string();
        self.index.insert(client.id().to_string(), tenant.clone());
        self.tenants
            .entry(tenant)
            .or_default()
            .insert(client.id().to_string(), client);
        true
    }

    /// Remove a client and hand it back so the caller decides when its
    /// queue closes. Drops the tenant entry with its last client.
    pub fn unregister(&mut self, client_id: &str) -> Option<Client> {
        let tenant = self.index.remove(client_id)?;
        let clients = self.tenants.get_mut(&tenant)?;
        let client = clients.remove(client_id);
        if clients.is_empty() {
            self.tenants.remove(&tenant);
        }
        client
    }

    /// Enqueue `envelope` as a text frame on every client of its tenant.
    pub fn broadcast(&mut self, envelope: &Envelope) -> Result<Dispatch, serde_json::Error> {
        let Some(clients) = self.tenants.get(&envelope.tenant_id) else {
            return Ok(Dispatch::default());
        };

        let text = Utf8Bytes::from(serde_json::to_string(envelope)?);
        let mut dispatch = Dispatch::default();
        for client in clients.values() {
            if client.offer(Message::Text(text.clone())) {
                dispatch.delivered += 1;
            } else {
                dispatch.dropped += 1;
            }
        }
        self.record(dispatch);
        Ok(dispatch)
    }

    /// Enqueue a Ping frame on every client.
    pub fn ping_all(&mut self) -> Dispatch {
        let mut dispatch = Dispatch::default();
        for client in self.tenants.values().flat_map(HashMap::values) {
            if client.offer(Message::Ping(Bytes::new())) {
                dispatch.delivered += 1;
            } else {
                dispatch.dropped += 1;
            }
        }
        self.record(dispatch);
        dispatch
    }

    /// Offer a Close frame to every client, then drop them all, closing
    /// their queues. Returns how many clients were removed.
    pub fn close_all(&mut self) -> usize {
        let count = self.index.len();
        for client in self.tenants.values().flat_map(HashMap::values) {
            client.offer(Message::Close(None));
        }
        self.tenants.clear();
        self.index.clear();
        count
    }

    pub fn client_count(&self, tenant_id: &str) -> usize {
        self.tenants.get(tenant_id).map_or(0, HashMap::len)
    }

    pub fn snapshot(&self) -> HubSnapshot {
        HubSnapshot {
            tenants: self.tenants.len(),
            clients: self.index.len(),
            delivered: self.delivered,
            dropped: self.dropped,
        }
    }

    fn record(&mut self, dispatch: Dispatch) {
        self.delivered += dispatch.delivered as u64;
        self.dropped += dispatch.dropped as u64;
    }
}
