//! `GET /health` — liveness plus a capability count.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use gateway_core::GatewayContext;
use serde_json::{Value, json};

pub async fn health(State(context): State<Arc<GatewayContext>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "capabilityCount": context.registry.len() + context.active_discovered.len(),
    }))
}
