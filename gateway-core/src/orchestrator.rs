//! Multi-step chain planning and execution.
//!
//! A task is submitted, with the full capability catalog, to an external
//! LLM chain planner; the orchestrator validates the returned plan, then
//! executes its steps strictly sequentially, piping earlier outputs into
//! later inputs via a dotted-path input mapping.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::capability::CapabilityRegistry;
use crate::error::Error;
use crate::money::MicroUsd;

/// Chains may have at most this many steps.
pub const MAX_STEPS: usize = 5;

/// Hard gateway ceiling on total chain cost, independent of caller budget.
pub const CHAIN_COST_CEILING: MicroUsd = MicroUsd::from_micros(500_000);

/// Per-step execution timeout.
pub const STEP_TIMEOUT: Duration = Duration::from_secs(30);

/// Total chain execution timeout.
pub const TOTAL_CHAIN_TIMEOUT: Duration = Duration::from_secs(120);

/// A single planned step, as returned by the external chain planner.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedStep {
    /// The capability this step invokes.
    pub capability_id: String,
    /// Literal parameters supplied by the planner.
    #[serde(default)]
    pub params: HashMap<String, Value>,
    /// Dotted-path mappings from prior step outputs, keyed by input name.
    #[serde(default)]
    pub input_mapping: HashMap<String, String>,
}

/// A full plan as returned by the chain planner.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainPlan {
    /// The ordered steps to execute.
    pub steps: Vec<PlannedStep>,
    /// The planner's own cost estimate, in micro-dollars.
    pub estimated_cost_micros: u64,
}

/// Validates a planner-returned [`ChainPlan`]'s step count, capability
/// references, and total cost. Validation failures never bill the caller.
///
/// # Errors
///
/// Returns [`Error::OrchestrationFailed`] if the step count is out of
/// range, any `capabilityId` is unregistered, or the summed step cost
/// exceeds `min(budget, $0.50)`.
pub fn validate_plan(
    plan: &ChainPlan,
    registry: &CapabilityRegistry,
    budget: Option<MicroUsd>,
) -> Result<MicroUsd, Error> {
    if plan.steps.is_empty() || plan.steps.len() > MAX_STEPS {
        return Err(Error::OrchestrationFailed(format!(
            "step count {} is outside the allowed range 1..={MAX_STEPS}",
            plan.steps.len()
        )));
    }

    let mut total = MicroUsd::ZERO;
    for step in &plan.steps {
        let capability = registry
            .by_id(&step.capability_id)
            .ok_or_else(|| Error::OrchestrationFailed(format!("unknown capability {:?}", step.capability_id)))?;
        total = total
            .checked_add(capability.cost)
            .ok_or_else(|| Error::OrchestrationFailed("total chain cost overflowed".to_owned()))?;
    }

    let ceiling = budget.map_or(CHAIN_COST_CEILING, |b| {
        if b < CHAIN_COST_CEILING {
            b
        } else {
            CHAIN_COST_CEILING
        }
    });
    if total > ceiling {
        return Err(Error::OrchestrationFailed(format!(
            "total cost {total} exceeds ceiling {ceiling}"
        )));
    }

    Ok(total)
}

/// The result of one executed step, retained for later steps' input
/// mapping and for the final `allSteps` trace.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    /// Index of this step within the plan.
    pub index: usize,
    /// The capability that was invoked.
    pub capability_id: String,
    /// The raw JSON result returned by the backend caller.
    pub result: Value,
    /// Cost charged for this step, in micro-dollars.
    pub cost: MicroUsd,
    /// How many retries the reliability layer performed.
    pub retries: u32,
}

/// Resolves a dotted-path input mapping (`steps[N].<field>.<subfield>...`)
/// against the array of prior step results.
///
/// A pure lookup: no interpolation into strings, no expression evaluation.
/// An unresolvable path yields `None`, and the caller falls back to the
/// literal `params` value.
#[must_use]
pub fn resolve_input_mapping(path: &str, prior_results: &[StepResult]) -> Option<Value> {
    let rest = path.strip_prefix("steps[")?;
    let (index_str, rest) = rest.split_once(']')?;
    let index: usize = index_str.parse().ok()?;
    let step = prior_results.get(index)?;
    let rest = rest.strip_prefix('.').unwrap_or(rest);
    if rest.is_empty() {
        return Some(step.result.clone());
    }
    let mut current = &step.result;
    for segment in rest.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current.clone())
}

/// Builds the effective parameters for one step: schema defaults, then
/// literal params, then input mapping, each layer overriding the last.
#[must_use]
pub fn build_step_params(
    schema: &HashMap<String, crate::capability::ParamSpec>,
    step: &PlannedStep,
    prior_results: &[StepResult],
) -> HashMap<String, Value> {
    let mut params = HashMap::new();
    for (name, spec) in schema {
        if let Some(default) = &spec.default {
            params.insert(name.clone(), default.clone());
        }
    }
    for (name, value) in &step.params {
        params.insert(name.clone(), value.clone());
    }
    for (name, path) in &step.input_mapping {
        if let Some(resolved) = resolve_input_mapping(path, prior_results) {
            params.insert(name.clone(), resolved);
        }
        // Unresolvable path: the literal params value (if any) wins, i.e. we
        // simply do not overwrite what the previous layers already set.
    }
    params
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{BackendMethod, ContentClass, RawCapability, SourceTier};

    fn registry_with(ids: &[(&str, &str)]) -> CapabilityRegistry {
        let raw = ids
            .iter()
            .map(|(id, cost)| RawCapability {
                id: (*id).to_owned(),
                name: (*id).to_owned(),
                description: String::new(),
                cost: (*cost).to_owned(),
                keywords: vec!["x".to_owned()],
                endpoint: "https://backend.internal/x".to_owned(),
                method: BackendMethod::Post,
                input_schema: HashMap::new(),
                output_type: ContentClass::Json,
                source: SourceTier::Native,
                provider: None,
                revenue_split: None,
            })
            .collect();
        CapabilityRegistry::load(raw).unwrap()
    }

    #[test]
    fn rejects_zero_step_plans() {
        let registry = registry_with(&[]);
        let plan = ChainPlan { steps: vec![], estimated_cost_micros: 0 };
        assert!(validate_plan(&plan, &registry, None).is_err());
    }

    #[test]
    fn rejects_unknown_capability_in_plan() {
        let registry = registry_with(&[("scrape", "$0.01")]);
        let plan = ChainPlan {
            steps: vec![PlannedStep {
                capability_id: "nope".to_owned(),
                params: HashMap::new(),
                input_mapping: HashMap::new(),
            }],
            estimated_cost_micros: 0,
        };
        assert!(validate_plan(&plan, &registry, None).is_err());
    }

    #[test]
    fn rejects_plan_exceeding_budget() {
        let registry = registry_with(&[("scrape", "$0.40"), ("pdf", "$0.40")]);
        let plan = ChainPlan {
            steps: vec![
                PlannedStep { capability_id: "scrape".to_owned(), params: HashMap::new(), input_mapping: HashMap::new() },
                PlannedStep { capability_id: "pdf".to_owned(), params: HashMap::new(), input_mapping: HashMap::new() },
            ],
            estimated_cost_micros: 0,
        };
        // Sum is $0.80, exceeding the $0.50 hard ceiling.
        assert!(validate_plan(&plan, &registry, None).is_err());
    }

    #[test]
    fn accepts_valid_plan_and_sums_cost() {
        let registry = registry_with(&[("scrape", "$0.01"), ("pdf", "$0.02")]);
        let plan = ChainPlan {
            steps: vec![
                PlannedStep { capability_id: "scrape".to_owned(), params: HashMap::new(), input_mapping: HashMap::new() },
                PlannedStep { capability_id: "pdf".to_owned(), params: HashMap::new(), input_mapping: HashMap::new() },
            ],
            estimated_cost_micros: 0,
        };
        let total = validate_plan(&plan, &registry, None).unwrap();
        assert_eq!(total, MicroUsd::from_micros(30_000));
    }

    #[test]
    fn resolves_dotted_path_into_prior_step_result() {
        let prior = vec![StepResult {
            index: 0,
            capability_id: "scrape".to_owned(),
            result: serde_json::json!({ "content": "hello world" }),
            cost: MicroUsd::from_micros(10_000),
            retries: 0,
        }];
        let resolved = resolve_input_mapping("steps[0].content", &prior).unwrap();
        assert_eq!(resolved, Value::String("hello world".to_owned()));
    }

    #[test]
    fn unresolvable_path_yields_none() {
        let prior = vec![StepResult {
            index: 0,
            capability_id: "scrape".to_owned(),
            result: serde_json::json!({ "content": "hello" }),
            cost: MicroUsd::ZERO,
            retries: 0,
        }];
        assert!(resolve_input_mapping("steps[0].missing", &prior).is_none());
        assert!(resolve_input_mapping("steps[5].content", &prior).is_none());
    }
}
