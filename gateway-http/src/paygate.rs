//! The payment gate: verifies a caller's payment proof before a dispatch
//! proceeds.
//!
//! Header extraction, a facilitator round-trip, and a 402 response shape,
//! built around the gateway's quoted-micro-unit cost model rather than an
//! on-chain payment requirement.

use std::net::IpAddr;

use axum::http::HeaderMap;
use gateway_core::GatewayContext;
use gateway_core::facilitator::{PriceQuote, VerifyRequest};
use gateway_core::money::MicroUsd;
use gateway_core::replay::proof_identifier;
use tracing::{info, warn};

use crate::error::ApiError;

/// The header carrying a caller's payment proof.
pub const PAYMENT_HEADER: &str = "x-payment";
/// Legacy payment header, accepted for backward compatibility.
pub const LEGACY_PAYMENT_HEADER: &str = "payment-signature";
/// Header carrying the internal test-bypass key.
pub const TEST_KEY_HEADER: &str = "x-test-key";
/// Header carrying the caller's wallet address, for attribution and
/// usage self-query.
pub const WALLET_HEADER: &str = "x-wallet-address";

/// Static, per-process payment gate configuration.
#[derive(Debug, Clone)]
pub struct PaymentGateConfig {
    /// Address payment settles to.
    pub payout_address: String,
    /// Network identifier quoted to callers and the facilitator.
    pub network: String,
    /// Settlement asset symbol, e.g. `"USDC"`.
    pub asset: String,
    /// Base URL of the external facilitator, shown in 402 bodies.
    pub facilitator_url: String,
    /// Optional internal test-bypass key.
    pub test_bypass_key: Option<String>,
    /// Peers allowed to use the test-bypass key (loopback or internal
    /// overlay addresses).
    pub allow_listed_peers: Vec<IpAddr>,
}

impl PaymentGateConfig {
    /// Whether `peer` is allowed to present the test-bypass key.
    #[must_use]
    pub fn is_allow_listed(&self, peer: IpAddr) -> bool {
        peer.is_loopback() || self.allow_listed_peers.contains(&peer)
    }
}

/// Extracts the caller's payment proof from `X-Payment`, falling back to
/// the legacy `Payment-Signature` header.
#[must_use]
pub fn extract_payment_proof(headers: &HeaderMap) -> Option<String> {
    headers
        .get(PAYMENT_HEADER)
        .or_else(|| headers.get(LEGACY_PAYMENT_HEADER))
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
}

/// The outcome of a successful payment gate pass: the caller may proceed,
/// with this context retained for the post-dispatch settlement call.
#[derive(Debug, Clone)]
pub struct VerifiedPayment {
    /// The caller's raw payment proof, for the settlement call.
    pub proof: String,
    /// The quote the proof was verified against.
    pub quote: PriceQuote,
    /// Whether the test-bypass path was used (no facilitator round-trip).
    pub bypassed: bool,
}

/// Runs the full payment-gate algorithm for a single quoted cost (one
/// capability for `/do`, the summed chain cost for `/do/chain`).
///
/// # Errors
///
/// Returns [`ApiError::PaymentRequired`] if no proof is present,
/// [`ApiError::PaymentReplay`] if the proof was already used within the
/// replay window, [`ApiError::InvalidPayment`] if the facilitator rejects
/// it, or [`ApiError::VerificationUnavailable`] if the facilitator cannot
/// be reached.
pub async fn enforce_payment(
    context: &GatewayContext,
    config: &PaymentGateConfig,
    headers: &HeaderMap,
    peer: IpAddr,
    quoted_cost: MicroUsd,
) -> Result<VerifiedPayment, ApiError> {
    let presented_key = headers.get(TEST_KEY_HEADER).and_then(|v| v.to_str().ok());
    if let (Some(configured), Some(presented)) = (&config.test_bypass_key, presented_key) {
        if configured == presented && config.is_allow_listed(peer) {
            info!("test-bypass key accepted from allow-listed peer");
            return Ok(VerifiedPayment {
                proof: String::new(),
                quote: PriceQuote::new(quoted_cost, &config.asset, &config.payout_address, &config.network),
                bypassed: true,
            });
        }
        // A matching key from a non-allow-listed peer is treated exactly as
        // if no bypass had been presented at all — never surfaced in errors.
    }

    let quote = PriceQuote::new(quoted_cost, &config.asset, &config.payout_address, &config.network);

    let Some(proof) = extract_payment_proof(headers) else {
        return Err(ApiError::PaymentRequired { quote, facilitator_url: config.facilitator_url.clone() });
    };

    let identifier = proof_identifier(&proof);
    if context.replay_set.is_replay(&identifier) {
        return Err(ApiError::PaymentReplay);
    }

    let verify_result = context
        .facilitator
        .verify(VerifyRequest { payment_proof: proof.clone(), quote: quote.clone() })
        .await;

    match verify_result {
        Ok(response) if response.is_valid => {
            context.replay_set.mark_seen(&identifier);
            Ok(VerifiedPayment { proof, quote, bypassed: false })
        }
        Ok(response) => Err(ApiError::InvalidPayment(
            response.invalid_reason.unwrap_or_else(|| "payment proof rejected".to_owned()),
        )),
        Err(e) => {
            warn!(error = %e, "facilitator verification unavailable");
            Err(ApiError::VerificationUnavailable)
        }
    }
}

/// Fire-and-forget settlement notification after a successful backend call.
///
/// Spawned as a structured background task tied to the gateway context,
/// not a detached thread: its failure is logged but never influences the
/// response already sent to the caller.
pub fn spawn_settlement(context: std::sync::Arc<GatewayContext>, payment: VerifiedPayment) {
    if payment.bypassed {
        return;
    }
    tokio::spawn(async move {
        let result = context
            .facilitator
            .settle(gateway_core::facilitator::SettleRequest {
                payment_proof: payment.proof,
                quote: payment.quote,
            })
            .await;
        if let Err(e) = result {
            warn!(error = %e, "settlement notification failed");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_primary_header() {
        let mut headers = HeaderMap::new();
        headers.insert(PAYMENT_HEADER, "proof-value".parse().unwrap());
        assert_eq!(extract_payment_proof(&headers).as_deref(), Some("proof-value"));
    }

    #[test]
    fn falls_back_to_legacy_header() {
        let mut headers = HeaderMap::new();
        headers.insert(LEGACY_PAYMENT_HEADER, "legacy-proof".parse().unwrap());
        assert_eq!(extract_payment_proof(&headers).as_deref(), Some("legacy-proof"));
    }

    #[test]
    fn allow_list_includes_loopback_implicitly() {
        let config = PaymentGateConfig {
            payout_address: "0xabc".to_owned(),
            network: "base".to_owned(),
            asset: "USDC".to_owned(),
            facilitator_url: "https://facilitator.example".to_owned(),
            test_bypass_key: Some("secret".to_owned()),
            allow_listed_peers: vec![],
        };
        assert!(config.is_allow_listed("127.0.0.1".parse().unwrap()));
        assert!(!config.is_allow_listed("8.8.8.8".parse().unwrap()));
    }
}
