//! Shared axum application state.
//!
//! Bundles the domain-level [`GatewayContext`] together with the
//! transport-level payment gate configuration and the backend-bypass
//! credential, so route handlers can pull out exactly the piece they need
//! via [`axum::extract::FromRef`].

use std::sync::Arc;

use gateway_core::GatewayContext;

use crate::paygate::PaymentGateConfig;

/// Everything an axum handler needs, cloned cheaply per request (every
/// field is an `Arc` or a small value type).
#[derive(Clone)]
pub struct AppState {
    /// The domain-level gateway context (registry, ledger, replay set, ...).
    pub context: Arc<GatewayContext>,
    /// Static payment gate configuration.
    pub payment: Arc<PaymentGateConfig>,
    /// Credential attached when calling native/partner backends so their
    /// own payment gate does not double-charge.
    pub bypass_credential: Arc<String>,
    /// A `reqwest::Client` shared across every backend call.
    pub http_client: reqwest::Client,
}

impl axum::extract::FromRef<AppState> for Arc<GatewayContext> {
    fn from_ref(state: &AppState) -> Self {
        state.context.clone()
    }
}

impl axum::extract::FromRef<AppState> for Arc<PaymentGateConfig> {
    fn from_ref(state: &AppState) -> Self {
        state.payment.clone()
    }
}
