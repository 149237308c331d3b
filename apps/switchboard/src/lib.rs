//! Switchboard: a multi-tenant message-routing hub. Terminals authenticate
//! with a signature over a fixed challenge, register under their public
//! key, and exchange opaque frames routed by terminal id. A per-tenant
//! host terminal provides discovery and administration services, and a
//! liveness monitor evicts registry entries whose sockets have gone dark.

pub mod auth;
pub mod cli;
pub mod config;
pub mod host;
pub mod liveness;
pub mod registry;
pub mod websocket;

use std::sync::Arc;

use axum::{routing::get, Json, Router};
use serde_json::json;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::registry::Hub;
use crate::websocket::ws_handler;

/// Build the hub's HTTP surface. Shared by the binary and the tests.
pub fn router(hub: Arc<Hub>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ws", get(ws_handler))
        .with_state(hub)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn health_check() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}
