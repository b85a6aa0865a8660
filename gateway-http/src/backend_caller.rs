//! Uniform invocation of a chosen backend capability.
//!
//! `GET` capabilities are called with URL-encoded query parameters, `POST`
//! capabilities with a JSON body; the gateway attaches its bypass
//! credential for native/partner backends only; responses are classified
//! by declared content type into JSON, image/PDF (base64), or text.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use base64::prelude::*;
use gateway_core::capability::{BackendMethod, Capability, ContentClass};
use gateway_core::discovery::check_ssrf;
use gateway_core::reliability::{CircuitBreaker, Outcome, PER_ATTEMPT_TIMEOUT, RETRY_DELAYS};
use serde_json::{Value, json};
use tracing::warn;

use crate::error::ApiError;

const BYPASS_HEADER_NAME: &str = "x-bypass-credential";

/// The outcome of a reliability-wrapped backend dispatch: the normalized
/// result (or error) plus how many retries the attempt took.
pub struct ReliableDispatch {
    /// The final attempt's result.
    pub result: Result<BackendResult, ApiError>,
    /// Attempts beyond the first that were made.
    pub retries: u32,
    /// Total wall-clock time across every attempt.
    pub duration: Duration,
    /// The final attempt's raw outcome, for status reporting.
    pub outcome: Outcome,
}

/// Calls `capability`'s backend through its per-capability circuit breaker,
/// retrying per the fixed `[0, 500ms, 1500ms, 4500ms]` schedule on a
/// transport error or a `>=500` status. Each attempt is bounded by
/// [`PER_ATTEMPT_TIMEOUT`]; an open circuit short-circuits without reaching
/// the backend at all.
pub async fn call_with_reliability(
    client: &reqwest::Client,
    breaker: &CircuitBreaker,
    capability: &Capability,
    params: &HashMap<String, Value>,
    bypass_credential: &str,
) -> ReliableDispatch {
    let started = Instant::now();

    if breaker.admit(&capability.id).is_err() {
        return ReliableDispatch {
            result: Err(ApiError::Domain(gateway_core::Error::CircuitOpen(capability.id.clone()))),
            retries: 0,
            duration: started.elapsed(),
            outcome: Outcome::HttpStatus(503),
        };
    }

    let mut last_outcome = Outcome::TransportError;
    let mut last_result =
        Err(ApiError::BackendUnavailable { message: "no attempt made".to_owned(), timed_out: false });
    let mut attempts = 0u32;

    for delay in RETRY_DELAYS {
        if delay > Duration::ZERO {
            tokio::time::sleep(delay).await;
        }
        attempts += 1;

        let call = call_backend(client, capability, params, bypass_credential);
        let (result, outcome, _attempt_duration) = match tokio::time::timeout(PER_ATTEMPT_TIMEOUT, call).await {
            Ok(outcome) => outcome,
            Err(_) => (
                Err(ApiError::BackendUnavailable {
                    message: "backend attempt timed out".to_owned(),
                    timed_out: true,
                }),
                Outcome::TransportError,
                PER_ATTEMPT_TIMEOUT,
            ),
        };

        last_outcome = outcome;
        last_result = result;

        if !outcome.is_retryable() || last_result.is_ok() {
            break;
        }
        warn!(capability_id = %capability.id, attempt = attempts, "retrying backend call");
    }

    breaker.record(&capability.id, last_outcome, started.elapsed());

    ReliableDispatch {
        result: last_result,
        retries: attempts.saturating_sub(1),
        duration: started.elapsed(),
        outcome: last_outcome,
    }
}

/// The normalized result of one backend call, ready to surface to a
/// caller or feed into the next chain step.
#[derive(Debug, Clone)]
pub struct BackendResult {
    /// The normalized payload: parsed JSON, or `{data, contentType, sizeBytes}`
    /// for image/PDF, or `{text}` for everything else.
    pub payload: Value,
    /// The declared content class, echoed in response metadata.
    pub content_type: ContentClass,
}

/// Calls a capability's backend with `params`, normalizing the response.
///
/// Discovered capabilities are checked against the SSRF guard immediately
/// before the call; native/partner backends are not, since their
/// endpoints are operator-controlled at registry load time.
///
/// # Errors
///
/// Returns [`ApiError::BlockedEndpoint`]-mapped [`gateway_core::Error`] for
/// an SSRF-blocked discovered endpoint (via the domain error path), or an
/// [`ApiError`] backend variant for a non-2xx/transport outcome.
pub async fn call_backend(
    client: &reqwest::Client,
    capability: &Capability,
    params: &HashMap<String, Value>,
    bypass_credential: &str,
) -> (Result<BackendResult, ApiError>, Outcome, Duration) {
    let started = Instant::now();

    if capability.is_discovered() {
        if let Err(_rejection) = check_ssrf(&capability.endpoint) {
            return (
                Err(ApiError::Domain(gateway_core::Error::BlockedEndpoint(capability.endpoint.clone()))),
                Outcome::HttpStatus(400),
                started.elapsed(),
            );
        }
    }

    let mut request = match capability.method {
        BackendMethod::Get => {
            let query: Vec<(String, String)> = params
                .iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k.clone(), value_to_query_string(v)))
                .collect();
            client.get(&capability.endpoint).query(&query)
        }
        BackendMethod::Post => client.post(&capability.endpoint).json(&json!(params)),
    };

    if capability.uses_bypass_credential() {
        request = request.header(BYPASS_HEADER_NAME, bypass_credential);
    }

    let response = match request.send().await {
        Ok(response) => response,
        Err(e) => {
            return (
                Err(ApiError::BackendUnavailable { message: e.to_string(), timed_out: false }),
                Outcome::TransportError,
                started.elapsed(),
            );
        }
    };

    let status = response.status();
    let elapsed = started.elapsed();

    if status.as_u16() == 402 {
        return (Err(ApiError::BackendPaymentRequired), Outcome::HttpStatus(402), elapsed);
    }

    if !status.is_success() {
        let message = format!("backend returned {status}");
        return (Err(ApiError::BackendError(message)), Outcome::HttpStatus(status.as_u16()), elapsed);
    }

    let result = match capability.output_type {
        ContentClass::Json => response
            .json::<Value>()
            .await
            .map(|payload| BackendResult { payload, content_type: ContentClass::Json })
            .map_err(|e| ApiError::BackendError(e.to_string())),
        ContentClass::Image | ContentClass::Pdf => response
            .bytes()
            .await
            .map(|bytes| BackendResult {
                payload: json!({
                    "data": BASE64_STANDARD.encode(&bytes),
                    "sizeBytes": bytes.len(),
                }),
                content_type: capability.output_type,
            })
            .map_err(|e| ApiError::BackendError(e.to_string())),
        ContentClass::Text => response
            .text()
            .await
            .map(|text| BackendResult { payload: json!({ "text": text }), content_type: ContentClass::Text })
            .map_err(|e| ApiError::BackendError(e.to_string())),
    };

    let outcome = Outcome::HttpStatus(status.as_u16());
    (result, outcome, elapsed)
}

fn value_to_query_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
