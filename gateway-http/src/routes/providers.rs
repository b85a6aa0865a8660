//! `GET /providers` — partner and discovered capabilities grouped by
//! provider.

use std::collections::HashMap;
use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use gateway_core::GatewayContext;
use gateway_core::money::format_dollars;
use serde_json::{Value, json};

pub async fn providers(State(context): State<Arc<GatewayContext>>) -> Json<Value> {
    let mut grouped: HashMap<String, Vec<Value>> = HashMap::new();

    for capability in context.all_matchable_capabilities() {
        let Some(provider) = &capability.provider else { continue };
        grouped.entry(provider.name.clone()).or_default().push(json!({
            "id": capability.id,
            "name": capability.name,
            "cost": format_dollars(capability.cost),
            "source": capability.source,
            "revenueSplit": capability.revenue_split,
        }));
    }

    let providers = grouped
        .into_iter()
        .map(|(name, capabilities)| json!({ "name": name, "capabilities": capabilities }))
        .collect::<Vec<_>>();

    Json(json!({ "providers": providers }))
}
