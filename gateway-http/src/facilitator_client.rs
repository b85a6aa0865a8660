//! HTTP-based implementation of [`gateway_core::facilitator::Facilitator`].
//!
//! Communicates with a remote x402-style facilitator over HTTP: a thin
//! `reqwest::Client` wrapper with a bounded timeout and a plain JSON wire
//! format.

use std::time::Duration;

use gateway_core::facilitator::{BoxFuture, Facilitator, FacilitatorError, SettleRequest, SettleResponse, VerifyRequest, VerifyResponse};
use serde_json::json;
use tracing::warn;

/// Bounds every facilitator HTTP call.
pub const FACILITATOR_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for [`HttpFacilitatorClient`].
#[derive(Debug, Clone)]
pub struct FacilitatorConfig {
    /// Facilitator base URL, without a trailing slash.
    pub url: String,
}

/// Talks to an external x402 facilitator over HTTP.
pub struct HttpFacilitatorClient {
    url: String,
    client: reqwest::Client,
}

impl HttpFacilitatorClient {
    /// Builds a client from `config`, constructing its own bounded-timeout
    /// `reqwest::Client`.
    ///
    /// # Panics
    ///
    /// Panics if the underlying TLS backend cannot be initialized.
    #[must_use]
    pub fn new(config: FacilitatorConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(FACILITATOR_TIMEOUT)
            .build()
            .expect("failed to build reqwest::Client");
        Self {
            url: config.url.trim_end_matches('/').to_owned(),
            client,
        }
    }

    /// Returns the facilitator base URL, for the 402 response body.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Facilitator for HttpFacilitatorClient {
    fn verify(&self, request: VerifyRequest) -> BoxFuture<'_, Result<VerifyResponse, FacilitatorError>> {
        Box::pin(async move {
            let body = json!({
                "paymentProof": request.payment_proof,
                "quote": request.quote,
            });
            let response = self
                .client
                .post(format!("{}/verify", self.url))
                .json(&body)
                .send()
                .await
                .map_err(|e| FacilitatorError::Transport(e.to_string()))?;

            if !response.status().is_success() {
                let status = response.status();
                return Err(FacilitatorError::UnexpectedStatus(status.to_string()));
            }

            response
                .json::<VerifyResponse>()
                .await
                .map_err(|e| FacilitatorError::UnexpectedStatus(e.to_string()))
        })
    }

    fn settle(&self, request: SettleRequest) -> BoxFuture<'_, Result<SettleResponse, FacilitatorError>> {
        Box::pin(async move {
            let body = json!({
                "paymentProof": request.payment_proof,
                "quote": request.quote,
            });
            let response = self
                .client
                .post(format!("{}/settle", self.url))
                .json(&body)
                .send()
                .await
                .map_err(|e| FacilitatorError::Transport(e.to_string()))?;

            if !response.status().is_success() {
                let status = response.status();
                warn!(%status, "facilitator settlement returned a non-2xx status");
                return Err(FacilitatorError::UnexpectedStatus(status.to_string()));
            }

            response
                .json::<SettleResponse>()
                .await
                .map_err(|e| FacilitatorError::UnexpectedStatus(e.to_string()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_core::facilitator::PriceQuote;
    use gateway_core::money::MicroUsd;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn quote() -> PriceQuote {
        PriceQuote::new(MicroUsd::from_micros(10_000), "USDC", "0xpayout", "base")
    }

    #[tokio::test]
    async fn verify_success_parses_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/verify"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "isValid": true })))
            .mount(&server)
            .await;

        let client = HttpFacilitatorClient::new(FacilitatorConfig { url: server.uri() });
        let result = client
            .verify(VerifyRequest { payment_proof: "proof".to_owned(), quote: quote() })
            .await
            .unwrap();
        assert!(result.is_valid);
    }

    #[tokio::test]
    async fn verify_non_2xx_is_unexpected_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/verify"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = HttpFacilitatorClient::new(FacilitatorConfig { url: server.uri() });
        let result = client
            .verify(VerifyRequest { payment_proof: "proof".to_owned(), quote: quote() })
            .await;
        assert!(matches!(result, Err(FacilitatorError::UnexpectedStatus(_))));
    }
}
