//! Ingress middleware: security headers, CORS, and per-IP rate limiting.
//!
//! Bare `async fn` handlers wired through
//! `axum::middleware::from_fn`/`from_fn_with_state`, plus a
//! `tower_http::cors::CorsLayer` built from a small allow-list config.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderName, HeaderValue, Method, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use gateway_core::GatewayContext;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::info;

/// Paths exempt from per-IP rate limiting.
const RATE_LIMIT_EXEMPT_PATHS: [&str; 2] = ["/health", "/status"];

/// Allow-listed CORS origins: the gateway's own public origins plus local
/// development hosts.
#[derive(Debug, Clone)]
pub struct CorsConfig {
    /// Origins allowed to make cross-origin requests, e.g.
    /// `"https://console.example.com"`.
    pub allowed_origins: Vec<String>,
}

impl CorsConfig {
    /// Builds the closed allow-list [`CorsLayer`]: no wildcard, a fixed
    /// method set, and the headers the gateway actually reads.
    #[must_use]
    pub fn to_cors_layer(&self) -> CorsLayer {
        let origins: Vec<HeaderValue> = self
            .allowed_origins
            .iter()
            .filter_map(|o| HeaderValue::from_str(o).ok())
            .collect();

        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([
                header::CONTENT_TYPE,
                HeaderName::from_static("x-wallet-address"),
                HeaderName::from_static("x-payment"),
                HeaderName::from_static("x-test-key"),
                HeaderName::from_static("payment-signature"),
            ])
    }
}

/// Adds the fixed security-header set to every response: strict transport
/// security, no content-type sniffing, and deny framing.
pub async fn security_headers(req: Request, next: Next) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert(header::X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        header::STRICT_TRANSPORT_SECURITY,
        HeaderValue::from_static("max-age=63072000; includeSubDomains"),
    );
    headers.insert("x-xss-protection", HeaderValue::from_static("1; mode=block"));
    response
}

/// Logs method, path, status, and duration for every request as a single
/// structured tracing event.
pub async fn request_logger(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_owned();
    let started = Instant::now();

    let response = next.run(req).await;

    info!(
        http.method = %method,
        http.path = %path,
        http.status = response.status().as_u16(),
        http.duration_ms = started.elapsed().as_millis() as u64,
        "request completed"
    );

    response
}

/// Enforces the per-IP rate limit, keyed by the left-most
/// `X-Forwarded-For` entry when present, falling back to the connecting
/// peer. `/health` and `/status` are exempt.
pub async fn rate_limit(
    State(context): State<Arc<GatewayContext>>,
    ConnectInfo(peer): ConnectInfo<std::net::SocketAddr>,
    req: Request,
    next: Next,
) -> Response {
    if RATE_LIMIT_EXEMPT_PATHS.contains(&req.uri().path()) {
        return next.run(req).await;
    }

    let key = client_ip(&req, peer.ip()).to_string();
    if context.rate_limiter.check(&key) {
        next.run(req).await
    } else {
        (StatusCode::TOO_MANY_REQUESTS, "rate limit exceeded").into_response()
    }
}

/// Resolves the caller's IP for rate-limiting and attribution purposes:
/// the left-most entry of `X-Forwarded-For` if present and parseable,
/// else the directly connecting peer address.
#[must_use]
pub fn client_ip(req: &Request, peer: IpAddr) -> IpAddr {
    req.headers()
        .get("x-forwarded-for")
        .and_then(|value| {
            let raw = value.to_str().ok()?;
            raw.split(',').next()?.trim().parse().ok()
        })
        .unwrap_or(peer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_ip_prefers_left_most_forwarded_for_entry() {
        let mut req = Request::builder().body(axum::body::Body::empty()).unwrap();
        req.headers_mut()
            .insert("x-forwarded-for", HeaderValue::from_static("10.0.0.1, 10.0.0.2"));
        let peer: IpAddr = "127.0.0.1".parse().unwrap();
        assert_eq!(client_ip(&req, peer), "10.0.0.1".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn client_ip_falls_back_to_peer_without_header() {
        let req = Request::builder().body(axum::body::Body::empty()).unwrap();
        let peer: IpAddr = "127.0.0.1".parse().unwrap();
        assert_eq!(client_ip(&req, peer), peer);
    }
}
