//! `GET /discover?q=…` — marketplace search passthrough plus any
//! naturally-matching native/partner capabilities. Read-only: matches are
//! not activated, unlike the dispatcher's auto-activation path.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Query, State};
use gateway_core::GatewayContext;
use gateway_core::discovery;
use gateway_core::money::format_dollars;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::warn;

use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct DiscoverQuery {
    q: String,
}

pub async fn discover(
    State(context): State<Arc<GatewayContext>>,
    Query(query): Query<DiscoverQuery>,
) -> Result<Json<Value>, ApiError> {
    let native_matches = gateway_core::dispatcher::score_task(&query.q, context.registry.list())
        .into_iter()
        .map(|capability| {
            json!({
                "id": capability.id,
                "name": capability.name,
                "cost": format_dollars(capability.cost),
                "source": capability.source,
            })
        })
        .collect::<Vec<_>>();

    let marketplace_matches = match context.discovery.cached(&query.q) {
        Some(cached) => cached,
        None => {
            let listings = match context.marketplace.search(query.q.clone()).await {
                Ok(listings) => listings,
                Err(e) => {
                    warn!(error = %e, "marketplace search unavailable for /discover");
                    Vec::new()
                }
            };
            let normalized = discovery::DiscoveryEngine::filter_and_normalize(&listings);
            context.discovery.store(&query.q, normalized.clone());
            normalized
        }
    };

    let marketplace_matches = marketplace_matches
        .into_iter()
        .map(|capability| {
            json!({
                "id": capability.id,
                "name": capability.name,
                "cost": format_dollars(capability.cost),
                "source": capability.source,
            })
        })
        .collect::<Vec<_>>();

    Ok(Json(json!({
        "nativeMatches": native_matches,
        "marketplaceMatches": marketplace_matches,
    })))
}
