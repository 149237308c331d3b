//! Connection authentication. Every upgrade request must prove possession
//! of its tenant key by signing the fixed challenge; nothing is registered
//! for a connection that fails here.

use serde::Deserialize;
use thiserror::Error;

use switchboard_proto::{verify_challenge, KeyError, HOST_TERMINAL_ID};

/// Query parameters presented with the upgrade request.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthQuery {
    #[serde(default)]
    pub public_key: Option<String>,
    #[serde(default)]
    pub terminal_id: Option<String>,
    #[serde(default)]
    pub signature: Option<String>,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing required parameter: {0}")]
    MissingParameter(&'static str),
    #[error("terminal id {0:?} is reserved")]
    ReservedTerminalId(String),
    #[error("signature verification failed: {0}")]
    BadSignature(#[from] KeyError),
}

/// Identity established by a successful authentication.
#[derive(Debug, Clone)]
pub struct AuthenticatedTerminal {
    pub public_key: String,
    pub terminal_id: String,
    pub signature: String,
}

pub fn authenticate(query: &AuthQuery) -> Result<AuthenticatedTerminal, AuthError> {
    let public_key = require(&query.public_key, "public_key")?;
    let terminal_id = require(&query.terminal_id, "terminal_id")?;
    let signature = require(&query.signature, "signature")?;

    if terminal_id == HOST_TERMINAL_ID {
        return Err(AuthError::ReservedTerminalId(terminal_id.to_string()));
    }
    verify_challenge(public_key, signature)?;

    Ok(AuthenticatedTerminal {
        public_key: public_key.to_string(),
        terminal_id: terminal_id.to_string(),
        signature: signature.to_string(),
    })
}

fn require<'a>(value: &'a Option<String>, name: &'static str) -> Result<&'a str, AuthError> {
    value
        .as_deref()
        .filter(|v| !v.is_empty())
        .ok_or(AuthError::MissingParameter(name))
}
