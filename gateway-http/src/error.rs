//! HTTP-facing error type.
//!
//! Wraps [`gateway_core::Error`] plus the transport-level failure modes
//! (payment/facilitator/backend/rate-limit), mapping each to its HTTP
//! status code and a machine-readable `code`.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use gateway_core::orchestrator::StepResult;
use serde_json::json;

/// Every error surface the gateway's HTTP layer can return.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Domain-layer error (dispatcher, orchestrator, reliability).
    #[error(transparent)]
    Domain(#[from] gateway_core::Error),
    /// A chain step failed or timed out partway through `POST /do/chain`,
    /// carrying whatever steps completed before the failure so the response
    /// body can still report `partialResults`.
    #[error("chain execution failed: {error}")]
    ChainFailed {
        /// The step-level or total-timeout error that ended the chain.
        #[source]
        error: gateway_core::Error,
        /// Steps that completed successfully before `error` occurred.
        partial_results: Vec<StepResult>,
    },
    /// No payment proof was present on a payment-gated request.
    #[error("payment required")]
    PaymentRequired {
        /// What the caller must pay, formatted for the 402 body.
        quote: gateway_core::facilitator::PriceQuote,
        /// Facilitator base URL shown to the caller.
        facilitator_url: String,
    },
    /// The supplied payment proof was rejected by the facilitator.
    #[error("invalid payment: {0}")]
    InvalidPayment(String),
    /// The same payment proof was already used within the replay window.
    #[error("payment already used")]
    PaymentReplay,
    /// The facilitator could not be reached.
    #[error("verification service unavailable")]
    VerificationUnavailable,
    /// The backend returned a non-2xx, non-402 status.
    #[error("backend error: {0}")]
    BackendError(String),
    /// The backend returned 402, indicating the bypass credential was not
    /// honored — a misconfiguration, not a retryable condition.
    #[error("backend payment required (bypass not honored)")]
    BackendPaymentRequired,
    /// The backend could not be reached or timed out.
    #[error("backend unavailable: {message}")]
    BackendUnavailable {
        /// Transport error message or timeout description.
        message: String,
        /// `true` when the attempt timed out; `false` for a transport-level
        /// failure (connection refused, DNS failure, TLS error) that never
        /// got far enough to time out.
        timed_out: bool,
    },
    /// The caller exceeded the per-IP rate limit.
    #[error("rate limited")]
    RateLimited,
    /// A usage query arrived with no `x-wallet-address` header to scope it.
    #[error("x-wallet-address header is required")]
    WalletRequired,
    /// An internal storage or infrastructure failure unrelated to the
    /// caller's request.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// The machine-readable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Domain(e) | Self::ChainFailed { error: e, .. } => e.code(),
            Self::PaymentRequired { .. } => "payment_required",
            Self::InvalidPayment(_) => "invalid_payment",
            Self::PaymentReplay => "payment_replay",
            Self::VerificationUnavailable => "verification_unavailable",
            Self::BackendError(_) => "backend_error",
            Self::BackendPaymentRequired => "backend_payment_required",
            Self::BackendUnavailable { .. } => "backend_unavailable",
            Self::RateLimited => "rate_limited",
            Self::WalletRequired => "wallet_required",
            Self::Internal(_) => "internal_error",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::Domain(domain) | Self::ChainFailed { error: domain, .. } => domain_status(domain),
            Self::PaymentRequired { .. } | Self::InvalidPayment(_) | Self::PaymentReplay => {
                StatusCode::PAYMENT_REQUIRED
            }
            Self::VerificationUnavailable => StatusCode::INTERNAL_SERVER_ERROR,
            Self::BackendError(_) => StatusCode::BAD_GATEWAY,
            Self::BackendPaymentRequired => StatusCode::BAD_GATEWAY,
            Self::BackendUnavailable { timed_out, .. } => {
                if *timed_out {
                    StatusCode::GATEWAY_TIMEOUT
                } else {
                    StatusCode::BAD_GATEWAY
                }
            }
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::WalletRequired => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Maps a domain error to its HTTP status code, shared between a bare
/// [`ApiError::Domain`] and a chain-execution failure carrying partial
/// results.
fn domain_status(domain: &gateway_core::Error) -> StatusCode {
    match domain {
        gateway_core::Error::MissingTask
        | gateway_core::Error::MissingParams { .. }
        | gateway_core::Error::UnknownCapability(_)
        | gateway_core::Error::NoMatchingCapability
        | gateway_core::Error::OverBudget { .. }
        | gateway_core::Error::BlockedEndpoint(_)
        | gateway_core::Error::OrchestrationFailed(_) => StatusCode::BAD_REQUEST,
        gateway_core::Error::CircuitOpen(_) => StatusCode::SERVICE_UNAVAILABLE,
        gateway_core::Error::StepFailed { .. } => StatusCode::BAD_REQUEST,
        gateway_core::Error::StepTimeout { .. } | gateway_core::Error::TotalTimeout => StatusCode::GATEWAY_TIMEOUT,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();

        if let Self::ChainFailed { error, partial_results } = &self {
            let (failed_index, failed_capability) = match error {
                gateway_core::Error::StepFailed { index, capability_id, .. } => {
                    (Some(*index), Some(capability_id.clone()))
                }
                gateway_core::Error::StepTimeout { index } => (Some(*index), None),
                _ => (None, None),
            };
            let body = json!({
                "success": false,
                "error": { "code": code, "message": error.to_string() },
                "failedStepIndex": failed_index,
                "failedCapabilityId": failed_capability,
                "partialResults": partial_results,
            });
            return (status, Json(body)).into_response();
        }

        if let Self::PaymentRequired { quote, facilitator_url } = &self {
            let body = json!({
                "x402Version": 2,
                "accepts": [{
                    "scheme": "exact",
                    "network": quote.network,
                    "amount": quote.amount_micros,
                    "asset": quote.asset,
                    "resource": null,
                    "description": "payment required to invoke this capability",
                    "payTo": quote.pay_to,
                    "maxTimeoutSeconds": 60,
                    "extra": { "name": "gateway", "version": env!("CARGO_PKG_VERSION") },
                }],
                "facilitatorUrl": facilitator_url,
                "error": null,
            });
            return (status, Json(body)).into_response();
        }

        let body = json!({
            "success": false,
            "error": { "code": code, "message": self.to_string() },
        });
        (status, Json(body)).into_response()
    }
}
