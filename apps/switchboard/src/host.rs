//! The per-tenant host terminal: discovery and administration services
//! reachable through the ordinary routing path under the reserved id.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use switchboard_proto::{
    generate_request_id, HostBoundFrame, ServiceRequest, ServiceResponse, TerminalInfo,
    HOST_TERMINAL_ID, METHOD_LIST_HOST, METHOD_LIST_TERMINALS, METHOD_PING, METHOD_TERMINATE,
    METHOD_UPDATE_TERMINAL_INFO,
};

use crate::registry::{Hub, Tenant};

/// Handle one frame addressed to the host terminal. Service requests are
/// answered over the calling socket; frames without a method are matched
/// against outstanding host-issued requests.
pub fn dispatch(hub: &Arc<Hub>, tenant: &Arc<Tenant>, source_terminal_id: &str, text: &str) {
    let frame: HostBoundFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(err) => {
            warn!(
                terminal = source_terminal_id,
                error = %err,
                "dropping malformed host-bound frame"
            );
            return;
        }
    };

    let Some(method) = frame.method else {
        if !tenant.complete_pending(&frame.id, frame.payload) {
            debug!(
                terminal = source_terminal_id,
                id = %frame.id,
                "ignoring reply with no pending request"
            );
        }
        return;
    };

    let result = match method.as_str() {
        METHOD_LIST_TERMINALS => Ok(json!({ "terminals": tenant.snapshot() })),
        METHOD_UPDATE_TERMINAL_INFO => update_terminal_info(tenant, source_terminal_id, frame.payload),
        METHOD_TERMINATE => Err("not permitted".to_string()),
        METHOD_LIST_HOST => list_host(hub, tenant),
        other => Err(format!("unknown method: {other}")),
    };

    let response = match result {
        Ok(payload) => ServiceResponse {
            target_terminal_id: source_terminal_id.to_string(),
            source_terminal_id: HOST_TERMINAL_ID.to_string(),
            id: frame.id,
            payload: Some(payload),
            error: None,
        },
        Err(error) => ServiceResponse {
            target_terminal_id: source_terminal_id.to_string(),
            source_terminal_id: HOST_TERMINAL_ID.to_string(),
            id: frame.id,
            payload: None,
            error: Some(error),
        },
    };
    if let Ok(text) = serde_json::to_string(&response) {
        tenant.send_to_connection(source_terminal_id, text);
    }
}

fn update_terminal_info(
    tenant: &Tenant,
    source_terminal_id: &str,
    payload: Value,
) -> Result<Value, String> {
    let info: TerminalInfo =
        serde_json::from_value(payload).map_err(|err| format!("invalid terminal info: {err}"))?;
    if info.terminal_id != source_terminal_id {
        return Err("terminal info may only be updated by its own terminal".to_string());
    }
    tenant.update_info(info);
    tenant.publish_snapshot();
    Ok(json!({ "ok": true }))
}

fn list_host(hub: &Hub, tenant: &Tenant) -> Result<Value, String> {
    match &hub.config.admin_public_key {
        Some(admin) if *admin == tenant.public_key => Ok(json!({ "hosts": hub.credentials() })),
        _ => Err("not permitted".to_string()),
    }
}

#[derive(Debug, Error)]
pub enum RequestError {
    #[error("target not routable")]
    Unroutable,
    #[error("timed out waiting for a reply")]
    TimedOut,
    #[error("reply channel closed")]
    ChannelClosed,
}

/// Issue a request from the host terminal to a peer through the routing
/// path and await the first reply.
pub async fn request(
    tenant: &Tenant,
    target_terminal_id: &str,
    method: &str,
    payload: Value,
    timeout: Duration,
) -> Result<Value, RequestError> {
    let id = generate_request_id();
    let (reply_tx, reply_rx) = oneshot::channel();
    tenant.register_pending(id.clone(), reply_tx);

    let frame = ServiceRequest {
        target_terminal_id: target_terminal_id.to_string(),
        source_terminal_id: HOST_TERMINAL_ID.to_string(),
        id: id.clone(),
        method: method.to_string(),
        payload,
    };
    let sent = match serde_json::to_string(&frame) {
        Ok(text) => tenant.route_text(target_terminal_id, text),
        Err(_) => false,
    };
    if !sent {
        tenant.drop_pending(&id);
        return Err(RequestError::Unroutable);
    }

    match tokio::time::timeout(timeout, reply_rx).await {
        Ok(Ok(payload)) => Ok(payload),
        Ok(Err(_)) => {
            tenant.drop_pending(&id);
            Err(RequestError::ChannelClosed)
        }
        Err(_) => {
            tenant.drop_pending(&id);
            Err(RequestError::TimedOut)
        }
    }
}

/// One liveness probe: true when the terminal answered within the timeout.
pub async fn probe(tenant: &Tenant, terminal_id: &str, timeout: Duration) -> bool {
    request(tenant, terminal_id, METHOD_PING, json!({}), timeout)
        .await
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::registry::ConnectionHandle;
    use axum::extract::ws::Message;
    use switchboard_proto::sign_challenge;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    fn connect(tenant: &Tenant, terminal_id: &str) -> mpsc::UnboundedReceiver<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        tenant.register(terminal_id, ConnectionHandle::new(tx, CancellationToken::new()));
        rx
    }

    fn recv_json(rx: &mut mpsc::UnboundedReceiver<Message>) -> Value {
        loop {
            match rx.try_recv().expect("expected a frame") {
                Message::Text(text) => return serde_json::from_str(&text).unwrap(),
                _ => continue,
            }
        }
    }

    fn call(hub: &Arc<Hub>, tenant: &Arc<Tenant>, from: &str, method: &str, payload: Value) {
        let frame = json!({
            "target_terminal_id": HOST_TERMINAL_ID,
            "id": "req-1",
            "method": method,
            "payload": payload,
        });
        dispatch(hub, tenant, from, &frame.to_string());
    }

    #[tokio::test]
    async fn update_info_then_list_terminals() {
        let hub = Hub::new(Config::default());
        let tenant = hub.tenant("pk");
        let mut rx = connect(&tenant, "t1");

        call(&hub, &tenant, "t1", METHOD_UPDATE_TERMINAL_INFO, json!({
            "terminal_id": "t1",
            "name": "Alpha",
        }));
        // Snapshot publication precedes the service response.
        let event = recv_json(&mut rx);
        assert_eq!(event["channel"], "terminal-info");
        let response = recv_json(&mut rx);
        assert_eq!(response["payload"]["ok"], json!(true));

        call(&hub, &tenant, "t1", METHOD_LIST_TERMINALS, json!({}));
        let response = recv_json(&mut rx);
        let terminals = response["payload"]["terminals"].as_array().unwrap();
        assert_eq!(terminals.len(), 1);
        assert_eq!(terminals[0]["terminal_id"], "t1");
        assert_eq!(terminals[0]["name"], "Alpha");
    }

    #[tokio::test]
    async fn update_info_rejected_for_other_terminal() {
        let hub = Hub::new(Config::default());
        let tenant = hub.tenant("pk");
        let mut rx = connect(&tenant, "t1");

        call(&hub, &tenant, "t1", METHOD_UPDATE_TERMINAL_INFO, json!({
            "terminal_id": "t2",
            "name": "Masquerade",
        }));
        let response = recv_json(&mut rx);
        assert!(response["error"].as_str().unwrap().contains("own terminal"));
        assert!(tenant.snapshot().is_empty());
    }

    #[tokio::test]
    async fn terminate_is_not_permitted() {
        let hub = Hub::new(Config::default());
        let tenant = hub.tenant("pk");
        let mut rx = connect(&tenant, "t1");

        call(&hub, &tenant, "t1", METHOD_TERMINATE, json!({}));
        let response = recv_json(&mut rx);
        assert_eq!(response["error"], "not permitted");
    }

    #[tokio::test]
    async fn unknown_method_is_answered_with_error() {
        let hub = Hub::new(Config::default());
        let tenant = hub.tenant("pk");
        let mut rx = connect(&tenant, "t1");

        call(&hub, &tenant, "t1", "Reboot", json!({}));
        let response = recv_json(&mut rx);
        assert!(response["error"].as_str().unwrap().contains("unknown method"));
    }

    #[tokio::test]
    async fn list_host_is_admin_only() {
        let (admin_key, admin_sig) = sign_challenge(&rand::random());
        let hub = Hub::new(Config {
            admin_public_key: Some(admin_key.clone()),
            ..Config::default()
        });

        let plain = hub.tenant("pk-plain");
        plain.record_signature("sig-plain");
        let mut plain_rx = connect(&plain, "t1");
        call(&hub, &plain, "t1", METHOD_LIST_HOST, json!({}));
        let response = recv_json(&mut plain_rx);
        assert_eq!(response["error"], "not permitted");

        let admin = hub.tenant(&admin_key);
        admin.record_signature(&admin_sig);
        let mut admin_rx = connect(&admin, "console");
        call(&hub, &admin, "console", METHOD_LIST_HOST, json!({}));
        let response = recv_json(&mut admin_rx);
        let hosts = response["payload"]["hosts"].as_array().unwrap();
        assert_eq!(hosts.len(), 2);
        assert!(hosts
            .iter()
            .any(|h| h["public_key"] == json!(admin_key) && h["signature"] == json!(admin_sig)));
    }

    #[tokio::test]
    async fn probe_completes_on_reply() {
        let hub = Hub::new(Config::default());
        let tenant = hub.tenant("pk");
        let mut rx = connect(&tenant, "t1");
        tenant.update_info(TerminalInfo {
            terminal_id: "t1".to_string(),
            name: String::new(),
            connected_at: 0,
            extra: serde_json::Map::new(),
        });

        let probe_tenant = tenant.clone();
        let probe_task = tokio::spawn(async move {
            probe(&probe_tenant, "t1", Duration::from_secs(5)).await
        });

        // Wait for the ping to land, then answer it like a terminal would.
        let ping = loop {
            match rx.recv().await.expect("ping frame") {
                Message::Text(text) => break serde_json::from_str::<Value>(&text).unwrap(),
                _ => continue,
            }
        };
        assert_eq!(ping["method"], json!(METHOD_PING));
        let reply = json!({
            "target_terminal_id": HOST_TERMINAL_ID,
            "id": ping["id"],
            "payload": {},
        });
        dispatch(&hub, &tenant, "t1", &reply.to_string());

        assert!(probe_task.await.unwrap());
    }

    #[tokio::test]
    async fn probe_fails_for_unroutable_target() {
        let hub = Hub::new(Config::default());
        let tenant = hub.tenant("pk");
        assert!(!probe(&tenant, "ghost", Duration::from_millis(50)).await);
    }
}
