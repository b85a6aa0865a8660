//! The [`ChainPlanner`] trait: the gateway's boundary with the external
//! large-language-model planner used by the orchestrator.
//!
//! Mirrors [`crate::facilitator::Facilitator`]'s shape: the gateway never
//! runs inference itself, it only submits a task and the capability
//! catalog and validates whatever plan comes back.

use crate::capability::Capability;
use crate::facilitator::BoxFuture;
use crate::orchestrator::ChainPlan;

/// Errors obtaining a plan from the external chain planner.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum PlannerError {
    /// The planner was unreachable, timed out, or returned a transport error.
    #[error("chain planner unreachable: {0}")]
    Transport(String),
    /// The planner responded but its output could not be parsed as a plan.
    #[error("chain planner returned an unparseable plan: {0}")]
    UnparseablePlan(String),
}

/// Plans a multi-step capability chain for a free-form task, given the full
/// capability catalog.
///
/// Dyn-compatible: stored as `Arc<dyn ChainPlanner>` in the gateway context
/// so the HTTP-backed implementation (`gateway_http::planner_client`) and
/// any test double share one call shape. The returned plan is untrusted
/// input until [`crate::orchestrator::validate_plan`] accepts it.
pub trait ChainPlanner: Send + Sync {
    /// Requests a plan for `task` against `catalog`.
    fn plan(&self, task: String, catalog: Vec<Capability>) -> BoxFuture<'_, Result<ChainPlan, PlannerError>>;
}

impl<T: ChainPlanner> ChainPlanner for std::sync::Arc<T> {
    fn plan(&self, task: String, catalog: Vec<Capability>) -> BoxFuture<'_, Result<ChainPlan, PlannerError>> {
        self.as_ref().plan(task, catalog)
    }
}
