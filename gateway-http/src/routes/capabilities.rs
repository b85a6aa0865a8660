//! `GET /capabilities` — registry dump with schemas, costs, and an optional
//! per-capability reliability overlay.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use gateway_core::GatewayContext;
use gateway_core::money::format_dollars;
use serde_json::{Value, json};

pub async fn capabilities(State(context): State<Arc<GatewayContext>>) -> Json<Value> {
    let entries = context
        .all_matchable_capabilities()
        .into_iter()
        .map(|capability| {
            let reliability = context.reliability.breaker_for(&capability.id).snapshot();
            json!({
                "id": capability.id,
                "name": capability.name,
                "description": capability.description,
                "cost": format_dollars(capability.cost),
                "keywords": capability.keywords,
                "method": capability.method,
                "inputSchema": capability.input_schema,
                "outputType": capability.output_type,
                "source": capability.source,
                "provider": capability.provider,
                "revenueSplit": capability.revenue_split,
                "reliability": {
                    "totalCalls": reliability.total_calls,
                    "totalFailures": reliability.total_failures,
                },
            })
        })
        .collect::<Vec<_>>();

    Json(json!({ "capabilities": entries }))
}
