//! HTTP-based implementation of [`gateway_core::planner::ChainPlanner`].
//!
//! Submits a task and the full capability catalog to an external LLM
//! planning endpoint and parses its JSON plan, same shape as
//! [`crate::facilitator_client::HttpFacilitatorClient`]. The gateway never
//! runs inference itself.

use std::time::Duration;

use gateway_core::capability::Capability;
use gateway_core::facilitator::BoxFuture;
use gateway_core::orchestrator::ChainPlan;
use gateway_core::planner::{ChainPlanner, PlannerError};
use serde_json::json;

/// Bounds a chain-planner call.
pub const PLANNER_TIMEOUT: Duration = Duration::from_secs(60);

/// Configuration for [`HttpChainPlanner`].
#[derive(Debug, Clone)]
pub struct PlannerConfig {
    /// Planner endpoint base URL, without a trailing slash.
    pub url: String,
    /// Bearer API key for the planner, if required.
    pub api_key: Option<String>,
}

/// Talks to an external LLM-backed chain planner over HTTP.
pub struct HttpChainPlanner {
    url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpChainPlanner {
    /// Builds a client from `config`, constructing its own bounded-timeout
    /// `reqwest::Client`.
    ///
    /// # Panics
    ///
    /// Panics if the underlying TLS backend cannot be initialized.
    #[must_use]
    pub fn new(config: PlannerConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(PLANNER_TIMEOUT)
            .build()
            .expect("failed to build reqwest::Client");
        Self {
            url: config.url.trim_end_matches('/').to_owned(),
            api_key: config.api_key,
            client,
        }
    }
}

impl ChainPlanner for HttpChainPlanner {
    fn plan(&self, task: String, catalog: Vec<Capability>) -> BoxFuture<'_, Result<ChainPlan, PlannerError>> {
        Box::pin(async move {
            let body = json!({ "task": task, "catalog": catalog });
            let mut request = self.client.post(format!("{}/plan", self.url)).json(&body);
            if let Some(key) = &self.api_key {
                request = request.bearer_auth(key);
            }

            let response = request.send().await.map_err(|e| PlannerError::Transport(e.to_string()))?;

            if !response.status().is_success() {
                return Err(PlannerError::UnparseablePlan(response.status().to_string()));
            }

            response
                .json::<ChainPlan>()
                .await
                .map_err(|e| PlannerError::UnparseablePlan(e.to_string()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn plan_parses_a_valid_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/plan"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "steps": [{ "capabilityId": "web-scrape", "params": {}, "inputMapping": {} }],
                "estimatedCostMicros": 10_000,
            })))
            .mount(&server)
            .await;

        let planner = HttpChainPlanner::new(PlannerConfig { url: server.uri(), api_key: None });
        let plan = planner.plan("scrape a page".to_owned(), vec![]).await.unwrap();
        assert_eq!(plan.steps.len(), 1);
    }
}
