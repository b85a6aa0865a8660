//! Shared request-resolution helpers for `POST /do` and `POST /do/chain`.

use std::collections::HashMap;

use gateway_core::GatewayContext;
use gateway_core::capability::Capability;
use gateway_core::dispatcher::{self, MatchKind};
use gateway_core::money::MicroUsd;
use serde_json::Value;
use tracing::warn;

use crate::error::ApiError;

/// Resolves a capability either by explicit ID or by natural-language
/// matching, falling back to the discovery engine when nothing registered
/// matches.
///
/// # Errors
///
/// Returns [`ApiError::Domain`] wrapping [`gateway_core::Error::UnknownCapability`]
/// for an unresolvable explicit ID, or [`gateway_core::Error::NoMatchingCapability`]
/// when neither natural-language matching nor discovery yields a candidate.
pub async fn resolve_capability(
    context: &GatewayContext,
    task: Option<&str>,
    explicit_capability: Option<&str>,
) -> Result<(Capability, MatchKind), ApiError> {
    if let Some(id) = explicit_capability {
        return context
            .find_capability(id)
            .map(|capability| (capability, MatchKind::Explicit))
            .ok_or_else(|| ApiError::Domain(gateway_core::Error::UnknownCapability(id.to_owned())));
    }

    let task = task.ok_or(ApiError::Domain(gateway_core::Error::MissingTask))?;

    let matchable = context.all_matchable_capabilities();
    if let Some(capability) = dispatcher::score_task(task, &matchable) {
        return Ok((capability.clone(), MatchKind::NaturalLanguage));
    }

    discover_and_activate(context, task).await
}

/// Runs the discovery path: derives a search term, consults the cache,
/// otherwise queries the marketplace, normalizes and filters the results,
/// and activates the top candidate.
async fn discover_and_activate(
    context: &GatewayContext,
    task: &str,
) -> Result<(Capability, MatchKind), ApiError> {
    let Some(search_term) = gateway_core::discovery::derive_search_term(task) else {
        return Err(ApiError::Domain(gateway_core::Error::NoMatchingCapability));
    };

    let candidates = match context.discovery.cached(&search_term) {
        Some(cached) => cached,
        None => {
            let listings = context.marketplace.search(search_term.clone()).await.map_err(|e| {
                warn!(error = %e, "marketplace search failed during dispatch");
                ApiError::Domain(gateway_core::Error::NoMatchingCapability)
            })?;
            let normalized = gateway_core::discovery::DiscoveryEngine::filter_and_normalize(&listings);
            context.discovery.store(&search_term, normalized.clone());
            normalized
        }
    };

    let top = candidates.into_iter().next().ok_or(ApiError::Domain(gateway_core::Error::NoMatchingCapability))?;
    context.activate_discovered(top.clone());
    Ok((top, MatchKind::Discovered))
}

/// Builds the effective call parameters for a single-step dispatch:
/// explicit `params` win outright; otherwise free-text extraction runs,
/// then schema defaults fill gaps and required fields are validated.
///
/// # Errors
///
/// Returns [`ApiError::Domain`] wrapping [`gateway_core::Error::MissingParams`]
/// when a required field is still absent after extraction and defaulting.
pub fn resolve_params(
    task: Option<&str>,
    explicit_params: Option<HashMap<String, Value>>,
    capability: &Capability,
) -> Result<HashMap<String, Value>, ApiError> {
    let base = match explicit_params {
        Some(params) => params,
        None => task.map(|t| dispatcher::extract_params(t, &capability.input_schema)).unwrap_or_default(),
    };
    dispatcher::apply_defaults_and_validate(&capability.input_schema, base).map_err(ApiError::Domain)
}

/// Parses a caller-supplied budget string, rounding toward zero so a
/// near-miss is never accepted by rounding error. An absent or
/// unparseable budget is treated as "no ceiling" rather than an error —
/// there is no dedicated error code for a malformed budget string.
#[must_use]
pub fn parse_budget(budget: Option<&str>) -> Option<MicroUsd> {
    budget.and_then(|b| match MicroUsd::parse_round_toward_zero(b) {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            warn!(error = %e, budget = b, "ignoring unparseable budget string");
            None
        }
    })
}
