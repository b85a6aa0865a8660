//! HTTP-based implementation of [`gateway_core::marketplace::MarketplaceClient`].
//!
//! Same shape as [`crate::facilitator_client::HttpFacilitatorClient`]: a
//! thin bounded-timeout `reqwest::Client` wrapper over a single JSON
//! endpoint.

use std::time::Duration;

use gateway_core::discovery::MarketplaceListing;
use gateway_core::facilitator::BoxFuture;
use gateway_core::marketplace::{MarketplaceClient, MarketplaceError};
use serde_json::json;

/// Bounds a marketplace search call.
pub const MARKETPLACE_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for [`HttpMarketplaceClient`].
#[derive(Debug, Clone)]
pub struct MarketplaceConfig {
    /// Marketplace base URL, without a trailing slash.
    pub url: String,
}

/// Talks to an external capability marketplace over HTTP.
pub struct HttpMarketplaceClient {
    url: String,
    client: reqwest::Client,
}

impl HttpMarketplaceClient {
    /// Builds a client from `config`, constructing its own bounded-timeout
    /// `reqwest::Client`.
    ///
    /// # Panics
    ///
    /// Panics if the underlying TLS backend cannot be initialized.
    #[must_use]
    pub fn new(config: MarketplaceConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(MARKETPLACE_TIMEOUT)
            .build()
            .expect("failed to build reqwest::Client");
        Self { url: config.url.trim_end_matches('/').to_owned(), client }
    }
}

impl MarketplaceClient for HttpMarketplaceClient {
    fn search(&self, search_term: String) -> BoxFuture<'_, Result<Vec<MarketplaceListing>, MarketplaceError>> {
        Box::pin(async move {
            let response = self
                .client
                .get(format!("{}/search", self.url))
                .query(&[("q", search_term.as_str())])
                .send()
                .await
                .map_err(|e| MarketplaceError::Transport(e.to_string()))?;

            if !response.status().is_success() {
                return Err(MarketplaceError::UnexpectedResponse(response.status().to_string()));
            }

            #[derive(serde::Deserialize)]
            struct SearchResponse {
                #[serde(default)]
                listings: Vec<MarketplaceListing>,
            }

            response
                .json::<SearchResponse>()
                .await
                .map(|body| body.listings)
                .map_err(|e| MarketplaceError::UnexpectedResponse(e.to_string()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn search_parses_listings() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .and(query_param("q", "screenshot"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "listings": [{
                    "name": "Screenshot Service",
                    "description": "renders a screenshot of any url",
                    "endpoint": "https://provider.example/screenshot",
                    "method": "POST",
                    "outputType": "image",
                    "providerCostMicros": 1000,
                    "payTo": "0xprovider",
                    "network": "base",
                }],
            })))
            .mount(&server)
            .await;

        let client = HttpMarketplaceClient::new(MarketplaceConfig { url: server.uri() });
        let listings = client.search("screenshot".to_owned()).await.unwrap();
        assert_eq!(listings.len(), 1);
        assert_eq!(listings[0].name, "Screenshot Service");
    }
}
