//! Wire-level types shared by the switchboard hub, its debug client, and
//! terminal-side protocol runtimes.
//!
//! A frame is one JSON text message. The hub interprets only the routing
//! envelope (`target_terminal_id`); everything else passes through opaque. Frames
//! addressed to the reserved host terminal follow the request/response
//! shapes defined here.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

/// Reserved terminal id of the per-tenant host terminal.
pub const HOST_TERMINAL_ID: &str = "host";

/// Fixed challenge every terminal signs to authenticate a connection.
pub const AUTH_CHALLENGE: &[u8] = b"switchboard-auth-v1";

/// Channel the registry snapshot stream is published on.
pub const TERMINAL_INFO_CHANNEL: &str = "terminal-info";

pub const METHOD_LIST_TERMINALS: &str = "ListTerminals";
pub const METHOD_UPDATE_TERMINAL_INFO: &str = "UpdateTerminalInfo";
pub const METHOD_TERMINATE: &str = "Terminate";
pub const METHOD_LIST_HOST: &str = "ListHost";
pub const METHOD_PING: &str = "Ping";

/// The only part of a frame the hub reads when routing.
#[derive(Debug, Clone, Deserialize)]
pub struct RoutingEnvelope {
    pub target_terminal_id: String,
}

/// A frame addressed to the host terminal: a service request when `method`
/// is set, otherwise a reply to a host-issued request with the same `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostBoundFrame {
    pub target_terminal_id: String,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default)]
    pub payload: Value,
}

/// Request issued by the host terminal to a peer (liveness probes).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceRequest {
    pub target_terminal_id: String,
    pub source_terminal_id: String,
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub payload: Value,
}

/// Reply from the host terminal to a service request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceResponse {
    pub target_terminal_id: String,
    pub source_terminal_id: String,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One publication on a tenant's named stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelEvent {
    pub target_terminal_id: String,
    pub source_terminal_id: String,
    pub channel: String,
    pub payload: Value,
    pub published_at: i64,
}

/// Metadata a terminal reports about itself. `connected_at` is stamped by
/// the hub when the entry is first created; extra fields are carried
/// verbatim.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TerminalInfo {
    pub terminal_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub connected_at: i64,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// A tenant's public key and signature-of-record, as listed by `ListHost`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TenantCredentials {
    pub public_key: String,
    pub signature: String,
}

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("invalid base64: {0}")]
    Encoding(#[from] base64::DecodeError),
    #[error("invalid key or signature length")]
    Length,
    #[error("invalid public key")]
    InvalidPublicKey,
    #[error("signature does not match challenge")]
    InvalidSignature,
}

/// Sign the fixed challenge with a 32-byte seed, returning the URL-safe
/// base64 `(public_key, signature)` pair presented at connect time.
pub fn sign_challenge(seed: &[u8; 32]) -> (String, String) {
    let signing_key = SigningKey::from_bytes(seed);
    let signature = signing_key.sign(AUTH_CHALLENGE);
    (
        URL_SAFE_NO_PAD.encode(signing_key.verifying_key().as_bytes()),
        URL_SAFE_NO_PAD.encode(signature.to_bytes()),
    )
}

/// Verify a base64 `(public_key, signature)` pair over the fixed challenge.
pub fn verify_challenge(public_key: &str, signature: &str) -> Result<(), KeyError> {
    let key_bytes: [u8; 32] = URL_SAFE_NO_PAD
        .decode(public_key)?
        .try_into()
        .map_err(|_| KeyError::Length)?;
    let sig_bytes: [u8; 64] = URL_SAFE_NO_PAD
        .decode(signature)?
        .try_into()
        .map_err(|_| KeyError::Length)?;
    let verifying_key =
        VerifyingKey::from_bytes(&key_bytes).map_err(|_| KeyError::InvalidPublicKey)?;
    verifying_key
        .verify(
            AUTH_CHALLENGE,
            &ed25519_dalek::Signature::from_bytes(&sig_bytes),
        )
        .map_err(|_| KeyError::InvalidSignature)
}

/// Generate a unique request id.
pub fn generate_request_id() -> String {
    Uuid::new_v4().to_string()
}

/// Build the upgrade URL for a hub base URL and connection credentials.
pub fn connect_url(base_ws: &str, public_key: &str, terminal_id: &str, signature: &str) -> String {
    format!(
        "{}/ws?public_key={}&terminal_id={}&signature={}",
        base_ws.trim_end_matches('/'),
        public_key,
        terminal_id,
        signature
    )
}
