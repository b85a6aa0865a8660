//! Pay-per-request API gateway binary.
//!
//! # Usage
//!
//! ```bash
//! # Run with default config (gateway.toml in the current directory)
//! cargo run -p gateway --release
//!
//! # Run with a custom config path
//! gateway --config /path/to/gateway.toml
//!
//! # Configure logging level
//! RUST_LOG=info cargo run -p gateway
//! ```
//!
//! # Environment Variables
//!
//! - `CONFIG` — Path to the TOML configuration file (default: `gateway.toml`)
//! - `HOST` / `PORT` — Override the bind address from the config file
//! - `RUST_LOG` — Log level filter (default: `info`)

mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use config::GatewayConfig;
use gateway_core::GatewayContext;
use gateway_core::capability::CapabilityRegistry;
use gateway_core::ledger::SqliteUsageLedger;
use gateway_http::facilitator_client::{FacilitatorConfig, HttpFacilitatorClient};
use gateway_http::marketplace_client::{HttpMarketplaceClient, MarketplaceConfig};
use gateway_http::planner_client::{HttpChainPlanner, PlannerConfig};
use gateway_http::state::AppState;
use tracing_subscriber::EnvFilter;

/// Command-line overrides for the TOML configuration.
#[derive(Parser, Debug)]
#[command(name = "gateway", version, about = "Pay-per-request API gateway for autonomous software agents")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, env = "CONFIG", default_value = "gateway.toml")]
    config: String,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(e) = run().await {
        tracing::error!("gateway failed: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = GatewayConfig::load_from(&args.config)?;

    tracing::info!(host = %config.host, port = config.port, network = %config.network, "loaded configuration");

    let catalog_toml = std::fs::read_to_string(&config.capability_catalog_path)
        .map_err(|e| format!("reading capability catalog {:?}: {e}", config.capability_catalog_path))?;
    let registry = CapabilityRegistry::load_from_toml_str(&catalog_toml)?;
    tracing::info!(capabilities = registry.len(), "loaded capability catalog");

    let ledger = SqliteUsageLedger::open(&config.ledger_path)?;

    let facilitator =
        Arc::new(HttpFacilitatorClient::new(FacilitatorConfig { url: config.facilitator_url.clone() }));
    let marketplace =
        Arc::new(HttpMarketplaceClient::new(MarketplaceConfig { url: config.marketplace_url.clone() }));
    let planner = Arc::new(HttpChainPlanner::new(PlannerConfig {
        url: config.planner_url.clone(),
        api_key: config.planner_api_key.clone(),
    }));

    let context = Arc::new(GatewayContext::new(registry, ledger, facilitator, marketplace, planner));
    let payment = Arc::new(config::to_payment_gate_config(&config));

    let state = AppState {
        context,
        payment,
        bypass_credential: Arc::new(config.bypass_credential.clone()),
        http_client: reqwest::Client::new(),
    };

    let cors = gateway_http::ingress::CorsConfig { allowed_origins: config.allowed_origins.clone() }.to_cors_layer();
    let app = gateway_http::build_router(state, cors);

    let addr = SocketAddr::new(config.host, config.port);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("gateway listening on http://{addr}");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("gateway shut down gracefully");
    Ok(())
}

/// Waits for Ctrl-C or SIGTERM (Unix) to initiate graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => tracing::info!("received Ctrl-C, shutting down..."),
            _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down..."),
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.expect("failed to listen for Ctrl-C");
        tracing::info!("received Ctrl-C, shutting down...");
    }
}
