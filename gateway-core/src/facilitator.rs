//! The [`Facilitator`] trait: the gateway's boundary with the external
//! payment-verification service.
//!
//! The gateway never custodies funds or settles on-chain itself; it defers
//! every verify/settle decision to an external facilitator reached through
//! this trait. The trait is dyn-compatible so a single `Arc<dyn
//! Facilitator>` can be shared across the payment gate and the settlement
//! background task.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::money::MicroUsd;

/// Boxed future type alias for dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A quoted cost and destination, as attached to a 402 response's
/// `accepts[]` entry or sent to the facilitator for verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceQuote {
    /// Quoted amount, in micro-dollars.
    pub amount_micros: u64,
    /// Same amount, as a decimal string, for human-facing surfaces.
    pub amount_decimal: String,
    /// Settlement asset symbol, e.g. `"USDC"`.
    pub asset: String,
    /// Address payment settles to.
    pub pay_to: String,
    /// Network identifier the facilitator should settle on.
    pub network: String,
}

impl PriceQuote {
    /// Builds a quote for `cost` payable to `pay_to` on `network`.
    #[must_use]
    pub fn new(cost: MicroUsd, asset: &str, pay_to: &str, network: &str) -> Self {
        Self {
            amount_micros: cost.as_micros(),
            amount_decimal: crate::money::format_dollars(cost),
            asset: asset.to_owned(),
            pay_to: pay_to.to_owned(),
            network: network.to_owned(),
        }
    }
}

/// A request to verify an opaque payment proof against a quoted cost.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    /// The caller-supplied payment proof, opaque to the gateway.
    pub payment_proof: String,
    /// What the gateway quoted the caller for this call.
    pub quote: PriceQuote,
}

/// The facilitator's answer to a [`VerifyRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    /// Whether the proof is valid for the quoted amount.
    pub is_valid: bool,
    /// Present when `is_valid` is `false`; a short, non-sensitive reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invalid_reason: Option<String>,
}

/// A request to settle a previously verified payment proof.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettleRequest {
    /// The same proof that was previously verified.
    pub payment_proof: String,
    /// The quote it was verified against.
    pub quote: PriceQuote,
}

/// The facilitator's answer to a [`SettleRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettleResponse {
    /// Whether settlement succeeded.
    pub success: bool,
    /// Settlement transaction or reference identifier, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_reference: Option<String>,
}

/// Errors verifying or settling a payment through the facilitator.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum FacilitatorError {
    /// The facilitator was unreachable, timed out, or returned a transport
    /// error (DNS failure, connection refused, etc.).
    #[error("facilitator unreachable: {0}")]
    Transport(String),
    /// The facilitator responded but rejected the proof as invalid.
    #[error("payment proof rejected: {0}")]
    Invalid(String),
    /// The facilitator returned a non-2xx status with no parseable body.
    #[error("facilitator returned an unexpected status: {0}")]
    UnexpectedStatus(String),
}

/// Verifies and settles payment proofs against an external facilitator
/// service.
///
/// Dyn-compatible: stored as `Arc<dyn Facilitator>` in the gateway context
/// so the HTTP-backed implementation (`gateway_http::facilitator_client`)
/// and any test double share one call shape.
pub trait Facilitator: Send + Sync {
    /// Verifies a payment proof against a quoted cost.
    fn verify(&self, request: VerifyRequest) -> BoxFuture<'_, Result<VerifyResponse, FacilitatorError>>;

    /// Settles a previously verified payment proof. Called fire-and-forget
    /// after a successful backend call; its failures are logged but never
    /// influence the response already sent to the caller.
    fn settle(&self, request: SettleRequest) -> BoxFuture<'_, Result<SettleResponse, FacilitatorError>>;
}

impl<T: Facilitator> Facilitator for Arc<T> {
    fn verify(&self, request: VerifyRequest) -> BoxFuture<'_, Result<VerifyResponse, FacilitatorError>> {
        self.as_ref().verify(request)
    }

    fn settle(&self, request: SettleRequest) -> BoxFuture<'_, Result<SettleResponse, FacilitatorError>> {
        self.as_ref().settle(request)
    }
}
