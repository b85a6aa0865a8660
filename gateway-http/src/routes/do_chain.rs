//! `POST /do/chain` — multi-step orchestration with output piping between
//! steps.

use std::net::SocketAddr;
use std::time::Instant;

use axum::Json;
use axum::extract::{ConnectInfo, State};
use axum::http::HeaderMap;
use gateway_core::ledger::{UsageRecord, resolve_caller};
use gateway_core::money::{MicroUsd, format_dollars};
use gateway_core::orchestrator::{self, ChainPlan, StepResult, STEP_TIMEOUT, TOTAL_CHAIN_TIMEOUT};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::warn;

use crate::backend_caller::call_with_reliability;
use crate::error::ApiError;
use crate::paygate::{self, WALLET_HEADER};
use crate::routes::dispatch_support::parse_budget;
use crate::state::AppState;

/// Request body for `POST /do/chain`.
#[derive(Debug, Deserialize)]
pub struct ChainRequest {
    /// The task the planner should decompose into steps.
    pub task: String,
    /// Caller-supplied cost ceiling for the whole chain.
    pub budget: Option<String>,
    /// When set, plan only — skip payment and execution entirely.
    #[serde(default)]
    pub dry_run: bool,
}

pub async fn do_chain(
    State(app): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<ChainRequest>,
) -> Result<Json<Value>, ApiError> {
    let context = &app.context;

    let catalog = context.all_matchable_capabilities();
    let plan: ChainPlan = context
        .planner
        .plan(body.task.clone(), catalog)
        .await
        .map_err(|e| ApiError::Domain(gateway_core::Error::OrchestrationFailed(e.to_string())))?;

    let budget = parse_budget(body.budget.as_deref());
    let total_cost = orchestrator::validate_plan(&plan, &context.registry, budget).map_err(ApiError::Domain)?;

    if body.dry_run {
        return Ok(Json(json!({
            "dryRun": true,
            "plan": plan,
            "totalCost": format_dollars(total_cost),
        })));
    }

    let peer_ip = client_ip_from_headers(&headers, peer.ip());
    let payment = paygate::enforce_payment(context, &app.payment, &headers, peer_ip, total_cost).await?;

    let wallet_header = headers.get(WALLET_HEADER).and_then(|v| v.to_str().ok());
    let caller = resolve_caller(wallet_header, Some(&payment.proof).filter(|p| !p.is_empty()));

    let chain_started = Instant::now();
    let mut step_results: Vec<StepResult> = Vec::new();

    let execution = tokio::time::timeout(TOTAL_CHAIN_TIMEOUT, async {
        for (index, step) in plan.steps.iter().enumerate() {
            let Some(capability) = context.find_capability(&step.capability_id) else {
                return Err(gateway_core::Error::StepFailed {
                    index,
                    capability_id: step.capability_id.clone(),
                    message: "capability no longer registered".to_owned(),
                });
            };

            let params = orchestrator::build_step_params(&capability.input_schema, step, &step_results);

            let breaker = context.reliability.breaker_for(&capability.id);
            let step_call = call_with_reliability(
                &app.http_client,
                &breaker,
                &capability,
                &params,
                &app.bypass_credential,
            );

            let dispatch = match tokio::time::timeout(STEP_TIMEOUT, step_call).await {
                Ok(dispatch) => dispatch,
                Err(_) => {
                    append_usage(context, &caller, &capability.id, capability.cost, false, chain_started);
                    return Err(gateway_core::Error::StepTimeout { index });
                }
            };

            let success = dispatch.result.is_ok();
            append_usage(context, &caller, &capability.id, capability.cost, success, chain_started);

            match dispatch.result {
                Ok(result) => {
                    step_results.push(StepResult {
                        index,
                        capability_id: capability.id.clone(),
                        result: result.payload,
                        cost: capability.cost,
                        retries: dispatch.retries,
                    });
                }
                Err(e) => {
                    return Err(gateway_core::Error::StepFailed {
                        index,
                        capability_id: capability.id.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }
        Ok(())
    })
    .await;

    if payment_settles(&execution) {
        paygate::spawn_settlement(context.clone(), payment.clone());
    }

    match execution {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            return Err(ApiError::ChainFailed { error: e, partial_results: step_results });
        }
        Err(_) => {
            return Err(ApiError::ChainFailed {
                error: gateway_core::Error::TotalTimeout,
                partial_results: step_results,
            });
        }
    }

    let final_result = step_results.last().map(|r| r.result.clone()).unwrap_or(Value::Null);
    let cost_breakdown: Vec<Value> = step_results
        .iter()
        .map(|r| json!({ "capabilityId": r.capability_id, "cost": format_dollars(r.cost) }))
        .collect();

    Ok(Json(json!({
        "success": true,
        "finalResult": final_result,
        "allSteps": step_results,
        "costBreakdown": cost_breakdown,
        "totalCost": format_dollars(total_cost),
        "durationMs": chain_started.elapsed().as_millis() as u64,
    })))
}

/// Whether the chain's payment should settle even though this particular
/// execution outcome may be a failure: backend failures after a verified
/// payment still bill, unless a step never reached the backend at all
/// because its circuit was open.
fn payment_settles(execution: &Result<Result<(), gateway_core::Error>, tokio::time::error::Elapsed>) -> bool {
    !matches!(execution, Ok(Err(gateway_core::Error::CircuitOpen(_))))
}

fn append_usage(
    context: &gateway_core::GatewayContext,
    caller: &str,
    capability_id: &str,
    cost: MicroUsd,
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
        warn!(error = %e, "failed to append usage record");
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
