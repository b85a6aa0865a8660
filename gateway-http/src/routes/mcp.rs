//! `GET /mcp` — the same catalog as `GET /capabilities`, rendered as
//! MCP-style agent-tool descriptors.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use gateway_core::GatewayContext;
use serde_json::Value;

pub async fn mcp(State(context): State<Arc<GatewayContext>>) -> Json<Value> {
    let catalog = context.all_matchable_capabilities();
    Json(gateway_mcp::render_catalog(&catalog))
}
