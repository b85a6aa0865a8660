//! The [`MarketplaceClient`] trait: the gateway's boundary with the
//! external service marketplace consulted by the discovery engine.
//!
//! Mirrors [`crate::facilitator::Facilitator`]'s shape exactly: a single
//! dyn-compatible async method, boxed so an `Arc<dyn MarketplaceClient>`
//! can be shared across every dispatch that falls through to discovery.

use crate::discovery::MarketplaceListing;
use crate::facilitator::BoxFuture;

/// Errors querying the external marketplace.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum MarketplaceError {
    /// The marketplace was unreachable, timed out, or returned a transport
    /// error.
    #[error("marketplace unreachable: {0}")]
    Transport(String),
    /// The marketplace responded with a non-2xx status or an unparseable body.
    #[error("marketplace returned an unexpected response: {0}")]
    UnexpectedResponse(String),
}

/// Searches the external marketplace for capabilities matching a free-form
/// term, as used by [`crate::discovery::DiscoveryEngine`].
///
/// Dyn-compatible: stored as `Arc<dyn MarketplaceClient>` in the gateway
/// context so the HTTP-backed implementation (`gateway_http::marketplace_client`)
/// and any test double share one call shape.
pub trait MarketplaceClient: Send + Sync {
    /// Searches the marketplace for listings matching `search_term`.
    fn search(&self, search_term: String) -> BoxFuture<'_, Result<Vec<MarketplaceListing>, MarketplaceError>>;
}

impl<T: MarketplaceClient> MarketplaceClient for std::sync::Arc<T> {
    fn search(&self, search_term: String) -> BoxFuture<'_, Result<Vec<MarketplaceListing>, MarketplaceError>> {
        self.as_ref().search(search_term)
    }
}
