//! WebSocket upgrade handling, per-connection socket loops, and frame
//! routing between terminals of one tenant.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use switchboard_proto::{RoutingEnvelope, HOST_TERMINAL_ID};

use crate::auth::{self, AuthQuery};
use crate::host;
use crate::registry::{ConnectionHandle, Hub, Tenant};

/// WebSocket upgrade handler. Authentication happens before the upgrade
/// is finalized; a rejected connection gets a bare 401 and no registry
/// state is touched.
pub async fn ws_handler(
    State(hub): State<Arc<Hub>>,
    Query(params): Query<AuthQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let auth = match auth::authenticate(&params) {
        Ok(auth) => auth,
        Err(err) => {
            warn!(error = %err, "rejecting websocket upgrade");
            return StatusCode::UNAUTHORIZED.into_response();
        }
    };

    let tenant = hub.tenant(&auth.public_key);
    tenant.record_signature(&auth.signature);

    ws.on_upgrade(move |socket| handle_socket(socket, hub, tenant, auth.terminal_id))
        .into_response()
}

/// Drive one accepted connection: register it (superseding any previous
/// socket for the terminal id), pump inbound frames into the router, and
/// clean up on close. Forced closes and socket errors take the same
/// cleanup path as a graceful close.
async fn handle_socket(socket: WebSocket, hub: Arc<Hub>, tenant: Arc<Tenant>, terminal_id: String) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let cancel = CancellationToken::new();
    let handle = ConnectionHandle::new(tx, cancel.clone());
    let conn_id = handle.conn_id;

    // Writer task: drains the outbound queue into the socket so a slow
    // peer never blocks whoever is forwarding to it.
    let writer_terminal = terminal_id.clone();
    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let is_close = matches!(msg, Message::Close(_));
            if sender.send(msg).await.is_err() {
                break;
            }
            if is_close {
                break;
            }
        }
        debug!(terminal = %writer_terminal, "outbound writer finished");
    });

    tenant.register(&terminal_id, handle);
    info!(
        terminal = %terminal_id,
        public_key = %tenant.public_key,
        "terminal connected"
    );

    loop {
        let msg = tokio::select! {
            _ = cancel.cancelled() => break,
            msg = receiver.next() => match msg {
                Some(Ok(msg)) => msg,
                Some(Err(err)) => {
                    debug!(terminal = %terminal_id, error = %err, "websocket error, closing");
                    break;
                }
                None => break,
            },
        };

        match msg {
            Message::Text(text) => route_frame(&hub, &tenant, &terminal_id, &text),
            Message::Binary(data) => match String::from_utf8(data) {
                Ok(text) => route_frame(&hub, &tenant, &terminal_id, &text),
                Err(_) => warn!(terminal = %terminal_id, "dropping non-utf8 binary frame"),
            },
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    if tenant.unregister(&terminal_id, conn_id) {
        tenant.publish_snapshot();
    }
    info!(terminal = %terminal_id, "terminal disconnected");
}

/// Forward one inbound frame. Only the routing envelope is interpreted;
/// payload bytes pass through untouched. Frames for the reserved host id
/// are dispatched to the host services; everything else is best-effort
/// delivery within the sender's tenant.
fn route_frame(hub: &Arc<Hub>, tenant: &Arc<Tenant>, source_terminal_id: &str, text: &str) {
    let envelope: RoutingEnvelope = match serde_json::from_str(text) {
        Ok(envelope) => envelope,
        Err(err) => {
            warn!(
                terminal = source_terminal_id,
                error = %err,
                "dropping frame without routing envelope"
            );
            return;
        }
    };

    if envelope.target_terminal_id == HOST_TERMINAL_ID {
        host::dispatch(hub, tenant, source_terminal_id, text);
    } else {
        tenant.route_text(&envelope.target_terminal_id, text.to_string());
    }
}
