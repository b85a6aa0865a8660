//! `GET /status` — per-capability circuit state and reliability counters.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use gateway_core::GatewayContext;
use gateway_core::reliability::CircuitState;
use serde_json::{Value, json};

fn state_name(state: CircuitState) -> &'static str {
    match state {
        CircuitState::Closed => "closed",
        CircuitState::Open => "open",
        CircuitState::HalfOpen => "half-open",
    }
}

pub async fn status(State(context): State<Arc<GatewayContext>>) -> Json<Value> {
    let capabilities = context
        .reliability
        .snapshot_all()
        .into_iter()
        .map(|(capability_id, snapshot)| {
            json!({
                "capabilityId": capability_id,
                "state": state_name(snapshot.state),
                "totalCalls": snapshot.total_calls,
                "totalSuccesses": snapshot.total_successes,
                "totalFailures": snapshot.total_failures,
                "cumulativeLatencyMs": snapshot.cumulative_latency_ms,
            })
        })
        .collect::<Vec<_>>();

    Json(json!({
        "capabilities": capabilities,
        "activeDiscovered": context.active_discovered.len(),
    }))
}
