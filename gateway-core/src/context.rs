//! The single process-wide mutable-state owner.
//!
//! [`GatewayContext`] gathers every piece of shared state the gateway needs
//! — replay set, circuit breakers, rate-limit buckets, usage ledger, and
//! active-discovered map — plus the read-only capability registry and the
//! external service clients, and is handed to every axum handler as shared
//! `State`, rather than scattering ad-hoc module-level singletons.

use std::sync::Arc;

use dashmap::DashMap;

use crate::capability::{Capability, CapabilityRegistry};
use crate::discovery::DiscoveryEngine;
use crate::facilitator::Facilitator;
use crate::ledger::SqliteUsageLedger;
use crate::marketplace::MarketplaceClient;
use crate::planner::ChainPlanner;
use crate::rate_limit::RateLimiter;
use crate::reliability::ReliabilityLayer;
use crate::replay::ReplaySet;

/// All process-wide mutable and read-only state the gateway needs to serve
/// a request, gathered into one value so handlers borrow it rather than
/// reaching for module-level singletons.
pub struct GatewayContext {
    /// Native/partner capabilities, immutable for the process lifetime.
    pub registry: CapabilityRegistry,
    /// Capabilities activated at runtime by the discovery engine.
    pub active_discovered: DashMap<String, Capability>,
    /// Per-capability retry/circuit-breaker state.
    pub reliability: ReliabilityLayer,
    /// Payment-proof replay protection.
    pub replay_set: ReplaySet,
    /// Per-IP coarse rate limiting.
    pub rate_limiter: RateLimiter,
    /// The durable usage ledger.
    pub ledger: SqliteUsageLedger,
    /// Marketplace search cache and normalization.
    pub discovery: DiscoveryEngine,
    /// The external payment facilitator.
    pub facilitator: Arc<dyn Facilitator>,
    /// The external service marketplace consulted by the discovery engine.
    pub marketplace: Arc<dyn MarketplaceClient>,
    /// The external chain planner consulted by the orchestrator.
    pub planner: Arc<dyn ChainPlanner>,
}

impl GatewayContext {
    /// Assembles a new context from its already-constructed pieces.
    #[must_use]
    pub fn new(
        registry: CapabilityRegistry,
        ledger: SqliteUsageLedger,
        facilitator: Arc<dyn Facilitator>,
        marketplace: Arc<dyn MarketplaceClient>,
        planner: Arc<dyn ChainPlanner>,
    ) -> Self {
        Self {
            registry,
            active_discovered: DashMap::new(),
            reliability: ReliabilityLayer::default(),
            replay_set: ReplaySet::default(),
            rate_limiter: RateLimiter::default(),
            ledger,
            discovery: DiscoveryEngine::default(),
            facilitator,
            marketplace,
            planner,
        }
    }

    /// Looks up a capability across both native/partner and currently
    /// active discovered tiers, matching the dispatcher's explicit-ID path.
    #[must_use]
    pub fn find_capability(&self, id: &str) -> Option<Capability> {
        if let Some(capability) = self.registry.by_id(id) {
            return Some(capability.clone());
        }
        self.active_discovered.get(id).map(|entry| entry.value().clone())
    }

    /// Returns every capability the dispatcher may natural-language-match
    /// against: native/partner plus currently active discovered ones.
    #[must_use]
    pub fn all_matchable_capabilities(&self) -> Vec<Capability> {
        let mut all: Vec<Capability> = self.registry.list().into_iter().cloned().collect();
        all.extend(self.active_discovered.iter().map(|entry| entry.value().clone()));
        all
    }

    /// Activates a discovered capability, making it reachable by ID from
    /// this moment on. Insert-only: if another caller already activated the
    /// same ID, that activation wins.
    pub fn activate_discovered(&self, capability: Capability) {
        self.active_discovered
            .entry(capability.id.clone())
            .or_insert(capability);
    }
}
