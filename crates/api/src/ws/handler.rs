use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};

use crate::error::{AppError, AppResult};
use crate::state::AppState;
use crate::ws::hub::LiveHub;

/// GET /ws/live/{tenant_id} -- upgrade to a live feed for one tenant.
///
/// Server-to-client text frames carry envelope JSON. Client frames other
/// than Close are ignored.
pub async fn live_ws_handler(
    ws: WebSocketUpgrade,
    Path(tenant_id): Path<String>,
    State(state): State<AppState>,
) -> AppResult<impl IntoResponse> {
    if tenant_id.trim().is_empty() {
        return Err(AppError::BadRequest("tenant_id must not be empty".into()));
    }
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, tenant_id, state.hub)))
}

/// Manage a single live connection after upgrade.
///
///   1. Registers a client for the tenant with the hub.
///   2. Spawns a writer task that drains the client queue into the sink.
///   3. Reads inbound frames on the current task until Close or error.
///   4. Unregisters, which closes the queue and ends the writer.
async fn handle_socket(socket: WebSocket, tenant_id: String, hub: LiveHub) {
    let (client, mut rx) = hub.new_client(tenant_id.as_str());
    let client_id = client.id().to_string();

    if let Err(e) = hub.register(client).await {
        tracing::warn!(%client_id, %tenant_id, error = %e, "Rejecting live connection");
        return;
    }
    tracing::info!(%client_id, %tenant_id, "Live client connected");

    let (mut sink, mut stream) = socket.split();

    // Writer: forward queued frames until the queue closes or the peer goes.
    let writer_client_id = client_id.clone();
    let mut writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if sink.send(msg).await.is_err() {
                tracing::debug!(client_id = %writer_client_id, "Live sink closed");
                break;
            }
            if closing {
                break;
            }
        }
    });

    // Reader: only teardown matters; stop early if the writer is gone.
    loop {
        tokio::select! {
            _ = &mut writer => break,
            frame = stream.next() => match frame {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(Message::Pong(_))) => {
                    tracing::trace!(%client_id, "Pong received");
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(%client_id, error = %e, "Live receive error");
                    break;
                }
            },
        }
    }

    if let Err(e) = hub.unregister(client_id.as_str()).await {
        tracing::debug!(%client_id, error = %e, "Hub already stopped during disconnect");
    }
    writer.abort();
    tracing::info!(%client_id, %tenant_id, "Live client disconnected");
}
