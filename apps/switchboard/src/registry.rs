//! Process-scoped registry state: tenants partitioned by public key, each
//! owning a connection map, a terminal metadata map, and the bookkeeping
//! for host-issued requests.

use std::sync::{Arc, RwLock};

use axum::extract::ws::Message;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use switchboard_proto::{ChannelEvent, TenantCredentials, TerminalInfo, HOST_TERMINAL_ID, TERMINAL_INFO_CHANNEL};

use crate::config::Config;
use crate::liveness;

/// Outbound half of one registered socket. The connection id ties a
/// registry entry to the task that created it, so a superseded socket's
/// cleanup cannot remove its replacement.
#[derive(Clone)]
pub struct ConnectionHandle {
    pub conn_id: Uuid,
    tx: mpsc::UnboundedSender<Message>,
    cancel: CancellationToken,
}

impl ConnectionHandle {
    pub fn new(tx: mpsc::UnboundedSender<Message>, cancel: CancellationToken) -> Self {
        Self {
            conn_id: Uuid::new_v4(),
            tx,
            cancel,
        }
    }

    /// Ask the peer to go away, then tear the connection's tasks down.
    pub fn close(&self) {
        let _ = self.tx.send(Message::Close(None));
        self.cancel.cancel();
    }

    pub fn send_text(&self, text: String) -> bool {
        self.tx.send(Message::Text(text)).is_ok()
    }
}

/// All live state for one public key. Created lazily on the first
/// authenticated connection and kept for the process lifetime.
pub struct Tenant {
    pub public_key: String,
    signature_of_record: RwLock<String>,
    connections: DashMap<String, ConnectionHandle>,
    terminals: DashMap<String, TerminalInfo>,
    /// Outstanding host-issued requests awaiting a reply frame.
    pending: DashMap<String, oneshot::Sender<Value>>,
}

impl Tenant {
    fn new(public_key: String) -> Self {
        Self {
            public_key,
            signature_of_record: RwLock::new(String::new()),
            connections: DashMap::new(),
            terminals: DashMap::new(),
            pending: DashMap::new(),
        }
    }

    /// Store a freshly accepted socket. An existing socket under the same
    /// terminal id is closed before the new one is stored, so at no point
    /// do two live sockets own the id.
    pub fn register(&self, terminal_id: &str, handle: ConnectionHandle) {
        match self.connections.entry(terminal_id.to_string()) {
            Entry::Occupied(mut entry) => {
                info!(
                    terminal = terminal_id,
                    public_key = %self.public_key,
                    "superseding existing connection"
                );
                entry.get().close();
                entry.insert(handle);
            }
            Entry::Vacant(entry) => {
                entry.insert(handle);
            }
        }
    }

    /// Remove the socket and metadata entries together. Only the
    /// connection that still owns the registration may remove it;
    /// idempotent. Returns true when a metadata entry was dropped.
    pub fn unregister(&self, terminal_id: &str, conn_id: Uuid) -> bool {
        let owned = self
            .connections
            .remove_if(terminal_id, |_, handle| handle.conn_id == conn_id)
            .is_some();
        owned && self.terminals.remove(terminal_id).is_some()
    }

    /// Phantom elimination: drop the metadata entry and force-close
    /// whatever socket is still registered under the id.
    pub fn evict(&self, terminal_id: &str) {
        self.terminals.remove(terminal_id);
        if let Some((_, handle)) = self.connections.remove(terminal_id) {
            handle.close();
        }
    }

    /// Upsert a terminal's self-reported metadata. `connected_at` is
    /// stamped on first insert and preserved across updates.
    pub fn update_info(&self, mut info: TerminalInfo) {
        if info.connected_at == 0 {
            info.connected_at = self
                .terminals
                .get(&info.terminal_id)
                .map(|existing| existing.connected_at)
                .unwrap_or_else(|| Utc::now().timestamp());
        }
        self.terminals.insert(info.terminal_id.clone(), info);
    }

    /// Current list of all live terminal metadata, in stable order.
    pub fn snapshot(&self) -> Vec<TerminalInfo> {
        let mut list: Vec<TerminalInfo> = self
            .terminals
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        list.sort_by(|a, b| a.terminal_id.cmp(&b.terminal_id));
        list
    }

    pub fn terminal_ids(&self) -> Vec<String> {
        self.terminals
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Fan the current snapshot out on the tenant's terminal-info stream.
    pub fn publish_snapshot(&self) {
        let payload = json!({ "terminals": self.snapshot() });
        let published_at = Utc::now().timestamp();
        for conn in self.connections.iter() {
            let event = ChannelEvent {
                target_terminal_id: conn.key().clone(),
                source_terminal_id: HOST_TERMINAL_ID.to_string(),
                channel: TERMINAL_INFO_CHANNEL.to_string(),
                payload: payload.clone(),
                published_at,
            };
            if let Ok(text) = serde_json::to_string(&event) {
                let _ = conn.value().send_text(text);
            }
        }
    }

    /// Best-effort delivery of one raw frame to a terminal of this tenant.
    /// Unknown targets and dead sockets drop silently; senders recover via
    /// their own timeouts.
    pub fn route_text(&self, target: &str, text: String) -> bool {
        if !self.terminals.contains_key(target) {
            debug!(terminal = target, "dropping frame for unknown terminal");
            return false;
        }
        match self.connections.get(target) {
            Some(conn) => conn.send_text(text),
            None => {
                debug!(terminal = target, "dropping frame for terminal without live socket");
                false
            }
        }
    }

    /// Deliver a frame straight to a terminal's socket, bypassing the
    /// metadata gate. Host replies use this so a terminal can talk to the
    /// host before announcing itself.
    pub fn send_to_connection(&self, terminal_id: &str, text: String) -> bool {
        match self.connections.get(terminal_id) {
            Some(conn) => conn.send_text(text),
            None => false,
        }
    }

    pub fn record_signature(&self, signature: &str) {
        if let Ok(mut slot) = self.signature_of_record.write() {
            *slot = signature.to_string();
        }
    }

    pub fn signature_of_record(&self) -> String {
        self.signature_of_record
            .read()
            .map(|slot| slot.clone())
            .unwrap_or_default()
    }

    pub fn register_pending(&self, id: String, reply: oneshot::Sender<Value>) {
        self.pending.insert(id, reply);
    }

    /// Complete a host-issued request with the reply payload. Returns
    /// false when no request with that id is outstanding.
    pub fn complete_pending(&self, id: &str, payload: Value) -> bool {
        match self.pending.remove(id) {
            Some((_, reply)) => {
                let _ = reply.send(payload);
                true
            }
            None => false,
        }
    }

    pub fn drop_pending(&self, id: &str) {
        self.pending.remove(id);
    }
}

/// Process-scoped hub state, constructed once at startup and injected into
/// the router, the host services, and the liveness monitors.
pub struct Hub {
    pub config: Config,
    tenants: DashMap<String, Arc<Tenant>>,
}

impl Hub {
    pub fn new(config: Config) -> Arc<Self> {
        Arc::new(Self {
            config,
            tenants: DashMap::new(),
        })
    }

    /// Get-or-create the tenant for a public key. The first connection for
    /// a key stands up the registry and starts the liveness monitor; the
    /// entry lock makes concurrent first connections converge on a single
    /// instance.
    pub fn tenant(self: &Arc<Self>, public_key: &str) -> Arc<Tenant> {
        match self.tenants.entry(public_key.to_string()) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => {
                let tenant = Arc::new(Tenant::new(public_key.to_string()));
                entry.insert(tenant.clone());
                info!(public_key, "tenant bootstrapped");
                tokio::spawn(liveness::run(self.config.clone(), tenant.clone()));
                tenant
            }
        }
    }

    pub fn get_tenant(&self, public_key: &str) -> Option<Arc<Tenant>> {
        self.tenants.get(public_key).map(|entry| entry.value().clone())
    }

    /// Every tenant's public key and signature-of-record, in stable order.
    pub fn credentials(&self) -> Vec<TenantCredentials> {
        let mut list: Vec<TenantCredentials> = self
            .tenants
            .iter()
            .map(|entry| TenantCredentials {
                public_key: entry.key().clone(),
                signature: entry.value().signature_of_record(),
            })
            .collect();
        list.sort_by(|a, b| a.public_key.cmp(&b.public_key));
        list
    }

    /// Close every open socket across all tenants. Shutdown runs this
    /// before the listener goes away so clients observe a close event.
    pub fn close_all(&self) {
        for tenant in self.tenants.iter() {
            for conn in tenant.value().connections.iter() {
                conn.value().close();
            }
        }
    }
}
