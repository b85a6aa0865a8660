//! `POST /do` — single-capability dispatch.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Instant;

use axum::Json;
use axum::extract::{ConnectInfo, State};
use axum::http::HeaderMap;
use gateway_core::GatewayContext;
use gateway_core::dispatcher::{self, MatchKind};
use gateway_core::ledger::{UsageRecord, resolve_caller};
use gateway_core::money::format_dollars;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::backend_caller::call_with_reliability;
use crate::error::ApiError;
use crate::paygate::{self, WALLET_HEADER};
use crate::routes::dispatch_support::{parse_budget, resolve_capability, resolve_params};
use crate::state::AppState;

/// Request body for `POST /do`.
#[derive(Debug, Deserialize)]
pub struct DoRequest {
    /// Free-form description of the desired operation.
    pub task: Option<String>,
    /// An explicit capability ID; wins over `task` when both are present.
    pub capability: Option<String>,
    /// Literal parameters; when absent, extracted from `task`.
    #[serde(default)]
    pub params: Option<HashMap<String, Value>>,
    /// Caller-supplied cost ceiling, e.g. `"$0.05"`.
    pub budget: Option<String>,
}

pub async fn do_single(
    State(app): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<DoRequest>,
) -> Result<Json<Value>, ApiError> {
    let context = &app.context;

    if body.task.is_none() && body.capability.is_none() {
        return Err(ApiError::Domain(gateway_core::Error::MissingTask));
    }

    let (capability, match_kind) =
        resolve_capability(context, body.task.as_deref(), body.capability.as_deref()).await?;

    let budget = parse_budget(body.budget.as_deref());
    dispatcher::check_budget(capability.cost, budget).map_err(ApiError::Domain)?;

    let peer_ip = client_ip_from_headers(&headers, peer.ip());
    let payment = paygate::enforce_payment(context, &app.payment, &headers, peer_ip, capability.cost).await?;

    let params = resolve_params(body.task.as_deref(), body.params.clone(), &capability);

    let wallet_header = headers.get(WALLET_HEADER).and_then(|v| v.to_str().ok());
    let caller = resolve_caller(wallet_header, Some(&payment.proof).filter(|p| !p.is_empty()));

    let started = Instant::now();

    let params = match params {
        Ok(params) => params,
        Err(e) => {
            append_usage(context, &caller, &capability.id, capability.cost, false, started);
            return Err(e);
        }
    };

    let breaker = context.reliability.breaker_for(&capability.id);
    let dispatch =
        call_with_reliability(&app.http_client, &breaker, &capability, &params, &app.bypass_credential).await;

    let success = dispatch.result.is_ok();
    append_usage(context, &caller, &capability.id, capability.cost, success, started);

    if success {
        paygate::spawn_settlement(context.clone(), payment.clone());
    }

    let backend_result = dispatch.result?;

    let multi_step_hint = body.task.as_deref().is_some_and(dispatcher::looks_like_a_chain);

    let mut response = json!({
        "success": true,
        "capability": {
            "id": capability.id,
            "name": capability.name,
            "cost": format_dollars(capability.cost),
            "source": capability.source,
        },
        "params": params,
        "result": backend_result.payload,
        "meta": {
            "contentType": backend_result.content_type,
            "durationMs": dispatch.duration.as_millis() as u64,
            "gateway": "agent-capability-gateway",
            "version": env!("CARGO_PKG_VERSION"),
            "retries": dispatch.retries,
            "quality": {
                "backendStatus": outcome_status(dispatch.outcome),
                "backendResponseMs": dispatch.duration.as_millis() as u64,
                "gatewayOverheadMs": 0,
            },
        },
    });

    if capability.is_discovered() {
        response["pricing"] = json!({
            "providerCost": capability.revenue_split.map(|split| format_dollars(provider_cost(capability.cost, split.provider_fraction))),
            "gatewayCost": format_dollars(capability.cost),
        });
    }

    if multi_step_hint && match_kind != MatchKind::Explicit {
        response["multiStepHint"] = json!("this task may be better served by POST /do/chain");
    }

    Ok(Json(response))
}

/// Recovers the provider's share of a discovered capability's gateway cost
/// from its revenue-split fraction (`fraction == provider_cost/gateway_cost`,
/// set when the listing was normalized).
fn provider_cost(gateway_cost: gateway_core::money::MicroUsd, provider_fraction: f64) -> gateway_core::money::MicroUsd {
    #[allow(clippy::cast_precision_loss)]
    let micros = gateway_cost.as_micros() as f64 * provider_fraction;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    gateway_core::money::MicroUsd::from_micros(micros.round() as u64)
}

fn outcome_status(outcome: gateway_core::reliability::Outcome) -> u16 {
    match outcome {
        gateway_core::reliability::Outcome::Success => 200,
        gateway_core::reliability::Outcome::TransportError => 0,
        gateway_core::reliability::Outcome::HttpStatus(status) => status,
    }
}

fn append_usage(
    context: &GatewayContext,
    caller: &str,
    capability_id: &str,
    cost: gateway_core::money::MicroUsd,
    success: bool,
    started: Instant,
) {
    let record = UsageRecord {
        caller: caller.to_owned(),
        capability_id: capability_id.to_owned(),
        cost,
        success,
        latency_ms: started.elapsed().as_millis() as u64,
        timestamp: unix_now(),
    };
    if let Err(e) = context.ledger.append(&record) {
        tracing::warn!(error = %e, "failed to append usage record");
    }
}

fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn client_ip_from_headers(headers: &HeaderMap, peer: std::net::IpAddr) -> std::net::IpAddr {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|raw| raw.split(',').next())
        .and_then(|first| first.trim().parse().ok())
        .unwrap_or(peer)
}
