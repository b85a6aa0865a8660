//! HTTP transport for the pay-per-request agent capability gateway.
//!
//! Wires ingress middleware, the payment gate, the backend caller, and the
//! route handlers onto a single [`axum::Router`].

pub mod backend_caller;
pub mod error;
pub mod facilitator_client;
pub mod ingress;
pub mod marketplace_client;
pub mod paygate;
pub mod planner_client;
pub mod routes;
pub mod state;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use gateway_core::GatewayContext;
use tower::ServiceBuilder;

pub use state::AppState;

/// Builds the fully-wired gateway [`Router`], ready for `axum::serve`.
///
/// `cors` is built once by the caller from operator configuration and
/// applied as the outermost layer, so CORS wraps everything else.
#[must_use]
pub fn build_router(state: AppState, cors: tower_http::cors::CorsLayer) -> Router {
    let rate_limit_state = Arc::clone(&state.context);

    Router::new()
        .route("/health", get(routes::health::health))
        .route("/status", get(routes::status::status))
        .route("/capabilities", get(routes::capabilities::capabilities))
        .route("/mcp", get(routes::mcp::mcp))
        .route("/providers", get(routes::providers::providers))
        .route("/discover", get(routes::discover::discover))
        .route("/do", post(routes::do_single::do_single))
        .route("/do/chain", post(routes::do_chain::do_chain))
        .route("/usage", get(routes::usage::usage))
        .route("/usage/capabilities", get(routes::usage::usage_capabilities))
        .route("/usage/timeline", get(routes::usage::usage_timeline))
        .layer(
            ServiceBuilder::new()
                .layer(cors)
                .layer(axum::middleware::from_fn(ingress::security_headers))
                .layer(axum::middleware::from_fn(ingress::request_logger))
                .layer(axum::middleware::from_fn_with_state(rate_limit_state, ingress::rate_limit)),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::Request;
    use gateway_core::capability::CapabilityRegistry;
    use gateway_core::ledger::SqliteUsageLedger;
    use tower::ServiceExt;

    use super::*;
    use crate::facilitator_client::{FacilitatorConfig, HttpFacilitatorClient};
    use crate::marketplace_client::{HttpMarketplaceClient, MarketplaceConfig};
    use crate::paygate::PaymentGateConfig;
    use crate::planner_client::{HttpChainPlanner, PlannerConfig};

    fn test_state() -> AppState {
        let registry = CapabilityRegistry::load(vec![]).unwrap();
        let ledger = SqliteUsageLedger::open_in_memory().unwrap();
        let facilitator = Arc::new(HttpFacilitatorClient::new(FacilitatorConfig {
            url: "https://facilitator.example".to_owned(),
        }));
        let marketplace = Arc::new(HttpMarketplaceClient::new(MarketplaceConfig {
            url: "https://marketplace.example".to_owned(),
        }));
        let planner = Arc::new(HttpChainPlanner::new(PlannerConfig {
            url: "https://planner.example".to_owned(),
            api_key: None,
        }));
        let context = Arc::new(GatewayContext::new(registry, ledger, facilitator, marketplace, planner));
        AppState {
            context,
            payment: Arc::new(PaymentGateConfig {
                payout_address: "0xabc".to_owned(),
                network: "base".to_owned(),
                asset: "USDC".to_owned(),
                facilitator_url: "https://facilitator.example".to_owned(),
                test_bypass_key: None,
                allow_listed_peers: vec![],
            }),
            bypass_credential: Arc::new("bypass".to_owned()),
            http_client: reqwest::Client::new(),
        }
    }

    #[tokio::test]
    async fn health_route_responds_ok() {
        let router = build_router(test_state(), tower_http::cors::CorsLayer::new());

        let mut request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let peer: SocketAddr = "127.0.0.1:1234".parse().unwrap();
        request.extensions_mut().insert(axum::extract::ConnectInfo(peer));

        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
    }
}
