//! Domain error type shared across the gateway core.
//!
//! Each variant carries a machine-readable code via [`Error::code`]; the
//! HTTP transport (`gateway-http::ApiError`) maps these to status codes
//! without re-deriving the policy here.

use thiserror::Error;

/// Errors raised by the domain layer: the dispatcher, the reliability
/// layer, the discovery engine, and the orchestrator.
#[derive(Debug, Error)]
pub enum Error {
    /// Neither `task` nor `capability` was present in the request.
    #[error("request must include either `task` or `capability`")]
    MissingTask,
    /// Required input parameters were absent after extraction and defaulting.
    #[error("missing required parameters: {missing:?}")]
    MissingParams {
        /// Names of the parameters that could not be resolved.
        missing: Vec<String>,
    },
    /// An explicit `capability` ID did not match any registered or
    /// discovered capability.
    #[error("unknown capability {0:?}")]
    UnknownCapability(String),
    /// A free-form `task` matched nothing and discovery yielded no
    /// candidate either.
    #[error("no capability matches the given task")]
    NoMatchingCapability,
    /// The capability's cost exceeds the caller-supplied budget.
    #[error("cost {cost} exceeds budget {budget}")]
    OverBudget {
        /// The capability's cost, in micro-dollars.
        cost: u64,
        /// The caller's budget, in micro-dollars.
        budget: u64,
    },
    /// The reliability layer's circuit breaker is open for this capability.
    #[error("capability {0:?} is temporarily unavailable (circuit open)")]
    CircuitOpen(String),
    /// The discovery engine refused to call an endpoint that resolves to a
    /// private, loopback, or link-local address.
    #[error("refusing to call blocked endpoint {0:?}")]
    BlockedEndpoint(String),
    /// The chain planner returned an invalid or over-budget plan.
    #[error("chain planning failed: {0}")]
    OrchestrationFailed(String),
    /// A specific chain step failed during execution.
    #[error("step {index} ({capability_id:?}) failed: {message}")]
    StepFailed {
        /// Zero-based index of the failed step.
        index: usize,
        /// The capability the step targeted.
        capability_id: String,
        /// Human-readable failure detail.
        message: String,
    },
    /// A single chain step exceeded its 30-second budget.
    #[error("step {index} timed out")]
    StepTimeout {
        /// Zero-based index of the timed-out step.
        index: usize,
    },
    /// The whole chain exceeded its 120-second budget.
    #[error("chain execution exceeded the total timeout")]
    TotalTimeout,
}

impl Error {
    /// The machine-readable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingTask => "missing_task",
            Self::MissingParams { .. } => "missing_params",
            Self::UnknownCapability(_) => "unknown_capability",
            Self::NoMatchingCapability => "no_matching_capability",
            Self::OverBudget { .. } => "over_budget",
            Self::CircuitOpen(_) => "circuit_open",
            Self::BlockedEndpoint(_) => "blocked_endpoint",
            Self::OrchestrationFailed(_) => "orchestration_failed",
            Self::StepFailed { .. } => "step_failed",
            Self::StepTimeout { .. } => "step_timeout",
            Self::TotalTimeout => "total_timeout",
        }
    }

    /// Whether this error represents a planner-level failure that must not
    /// bill the caller.
    #[must_use]
    pub fn is_unbillable_planning_failure(&self) -> bool {
        matches!(self, Self::OrchestrationFailed(_))
    }
}
