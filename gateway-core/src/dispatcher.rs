//! Resolves a task to a capability and extracts call parameters.
//!
//! The dispatcher never talks to a backend itself; it only decides *which*
//! capability answers a request and *what* parameters to call it with,
//! leaving invocation to the reliability layer and backend caller.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::capability::{Capability, ParamType};
use crate::error::Error;
use crate::money::MicroUsd;

/// Action verbs the multi-step hint heuristic looks for; two or more
/// distinct hits suggest the task wants a chain, not a single call.
const ACTION_VERBS: &[&str] = &[
    "scrape", "screenshot", "extract", "convert", "generate", "search", "resize", "parse",
    "shorten", "validate", "lookup", "upload", "format",
];

/// Sequencing phrases that, alone, suggest a chain.
const SEQUENCING_PHRASES: &[&str] = &["then", "and then", "after that", "next", "pipe", "chain"];

const KNOWN_TLDS: &[&str] = &[
    "com", "org", "net", "io", "ai", "dev", "co", "app", "xyz", "me", "info", "tech", "gg", "tv",
];

const FORMAT_TOKENS: &[&str] = &["png", "jpeg", "jpg", "webp", "pdf"];

static URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https?://[^\s]+").expect("valid regex"));
static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}").expect("valid regex")
});
static DOMAIN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[a-zA-Z0-9][a-zA-Z0-9\-]*\.[a-zA-Z]{2,}\b").expect("valid regex")
});
static DIMENSIONS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\s*[x×]\s*(\d+)").expect("valid regex"));
static SIZE_PX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\s*px\b").expect("valid regex"));
static CONVERT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bconvert\s+\S+\s+to\s+\S+").expect("valid regex"));

/// How a capability was resolved for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    /// The caller supplied an explicit `capability` ID.
    Explicit,
    /// The task matched by keyword score.
    NaturalLanguage,
    /// No registered capability matched and discovery activated one.
    Discovered,
}

/// The outcome of resolving a single-step request: which capability, what
/// parameters, and whether a multi-step hint should be attached.
#[derive(Debug, Clone)]
pub struct DispatchResolution {
    /// How the capability was found.
    pub match_kind: MatchKind,
    /// Extracted and defaulted parameters, validated against the schema.
    pub params: HashMap<String, Value>,
    /// Whether the task resembles a chain the caller might prefer.
    pub multi_step_hint: bool,
}

/// Scores every capability against a free-form task string and returns the
/// ID of the highest scorer, or `None` if nothing scored above zero.
///
/// Each capability scores a keyword-length bonus per keyword substring
/// match, +10 if the capability name appears in the task, +15 if the
/// capability ID appears.
#[must_use]
pub fn score_task<'a>(task: &str, capabilities: impl IntoIterator<Item = &'a Capability>) -> Option<&'a Capability> {
    let lowered = task.to_lowercase();
    let mut best: Option<(&Capability, i64)> = None;
    for capability in capabilities {
        let mut score: i64 = 0;
        for keyword in &capability.keywords {
            if lowered.contains(keyword.as_str()) {
                score += keyword.len() as i64;
            }
        }
        if lowered.contains(&capability.name.to_lowercase()) {
            score += 10;
        }
        if lowered.contains(&capability.id.to_lowercase()) {
            score += 15;
        }
        if score > 0 && best.as_ref().is_none_or(|(_, best_score)| score > *best_score) {
            best = Some((capability, score));
        }
    }
    best.map(|(capability, _)| capability)
}

/// Whether a task reads like it wants a chain of capabilities rather than
/// one call.
#[must_use]
pub fn looks_like_a_chain(task: &str) -> bool {
    let lowered = task.to_lowercase();
    if SEQUENCING_PHRASES.iter().any(|phrase| lowered.contains(phrase)) {
        return true;
    }
    if CONVERT_RE.is_match(&lowered) {
        return true;
    }
    let distinct_verbs = ACTION_VERBS
        .iter()
        .filter(|verb| lowered.contains(*verb))
        .count();
    distinct_verbs >= 2
}

/// Extracts parameters from free text via a fixed heuristic table (URLs,
/// emails, domains, dimensions, pixel sizes, format tokens). Only called
/// when the caller supplied no explicit `params`.
#[must_use]
pub fn extract_params(task: &str, schema: &HashMap<String, crate::capability::ParamSpec>) -> HashMap<String, Value> {
    let mut extracted: HashMap<String, Value> = HashMap::new();

    let input_matches = |name: &str, word: &str| -> bool {
        schema
            .get(name)
            .is_some_and(|spec| spec.description.to_lowercase().contains(word))
    };

    if let Some(m) = URL_RE.find(task) {
        let target = schema
            .keys()
            .find(|k| k.as_str() == "url" || input_matches(k, "url"))
            .or_else(|| schema.keys().find(|k| k.as_str() == "data"))
            .cloned();
        if let Some(target) = target {
            extracted.insert(target, Value::String(m.as_str().to_owned()));
        }
    }

    if let Some(m) = EMAIL_RE.find(task) {
        let target = schema
            .keys()
            .find(|k| k.as_str() == "email" || input_matches(k, "email"))
            .cloned();
        if let Some(target) = target {
            extracted.insert(target, Value::String(m.as_str().to_owned()));
        }
    }

    if let Some(m) = DOMAIN_RE.find(task) {
        let candidate = m.as_str();
        let has_known_tld = KNOWN_TLDS.iter().any(|tld| {
            candidate
                .rsplit('.')
                .next()
                .is_some_and(|suffix| suffix.eq_ignore_ascii_case(tld))
        });
        if has_known_tld {
            if schema.contains_key("domain") {
                extracted.insert("domain".to_owned(), Value::String(candidate.to_owned()));
            }
            if !extracted.contains_key("url") && schema.contains_key("url") {
                extracted.insert("url".to_owned(), Value::String(format!("https://{candidate}")));
            }
        }
    }

    if let Some(caps) = DIMENSIONS_RE.captures(task) {
        if schema.contains_key("width") {
            if let Ok(w) = caps[1].parse::<i64>() {
                extracted.insert("width".to_owned(), Value::from(w));
            }
        }
        if schema.contains_key("height") {
            if let Ok(h) = caps[2].parse::<i64>() {
                extracted.insert("height".to_owned(), Value::from(h));
            }
        }
    }

    if let Some(caps) = SIZE_PX_RE.captures(task) {
        if schema.contains_key("size") {
            if let Ok(size) = caps[1].parse::<i64>() {
                extracted.insert("size".to_owned(), Value::from(size));
            }
        }
    }

    if task.to_lowercase().contains("full page") && schema.contains_key("fullPage") {
        extracted.insert("fullPage".to_owned(), Value::Bool(true));
    }

    let lowered = task.to_lowercase();
    if schema.contains_key("format") {
        if let Some(format) = FORMAT_TOKENS.iter().find(|tok| lowered.contains(**tok)) {
            extracted.insert("format".to_owned(), Value::String((*format).to_owned()));
        }
    }

    extracted
}

/// Applies schema defaults to fields absent after extraction, then checks
/// every required field is present.
///
/// # Errors
///
/// Returns [`Error::MissingParams`] naming every required field still
/// absent after defaulting.
pub fn apply_defaults_and_validate(
    schema: &HashMap<String, crate::capability::ParamSpec>,
    mut params: HashMap<String, Value>,
) -> Result<HashMap<String, Value>, Error> {
    for (name, spec) in schema {
        if !params.contains_key(name) {
            if let Some(default) = &spec.default {
                params.insert(name.clone(), default.clone());
            }
        }
    }

    let missing: Vec<String> = schema
        .iter()
        .filter(|(name, spec)| spec.required && !params.contains_key(*name))
        .map(|(name, _)| name.clone())
        .collect();

    if missing.is_empty() {
        Ok(params)
    } else {
        Err(Error::MissingParams { missing })
    }
}

/// Coerces a JSON value against a [`ParamType`], used when literal params
/// arrive from a loosely-typed source (query strings, planner output).
#[must_use]
pub fn coerce(value: &Value, param_type: ParamType) -> Value {
    match (param_type, value) {
        (ParamType::Number, Value::String(s)) => s
            .parse::<f64>()
            .map_or_else(|_| value.clone(), |n| serde_json::json!(n)),
        (ParamType::Boolean, Value::String(s)) => match s.as_str() {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => value.clone(),
        },
        _ => value.clone(),
    }
}

/// Checks a cost against an optional caller-supplied budget.
///
/// # Errors
///
/// Returns [`Error::OverBudget`] if `budget` is present and smaller than
/// `cost`. Budget strings are parsed toward zero so a near-miss is never
/// rounded into acceptance.
pub fn check_budget(cost: MicroUsd, budget: Option<MicroUsd>) -> Result<(), Error> {
    if let Some(budget) = budget {
        if cost > budget {
            return Err(Error::OverBudget {
                cost: cost.as_micros(),
                budget: budget.as_micros(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{BackendMethod, ContentClass, ParamSpec, RawCapability, SourceTier};

    fn cap(id: &str, name: &str, keywords: &[&str]) -> Capability {
        RawCapability {
            id: id.to_owned(),
            name: name.to_owned(),
            description: String::new(),
            cost: "$0.01".to_owned(),
            keywords: keywords.iter().map(|s| (*s).to_owned()).collect(),
            endpoint: "https://backend.internal/x".to_owned(),
            method: BackendMethod::Post,
            input_schema: HashMap::new(),
            output_type: ContentClass::Json,
            source: SourceTier::Native,
            provider: None,
            revenue_split: None,
        }
        .resolve()
        .unwrap()
    }

    #[test]
    fn scores_keyword_matches_and_picks_the_highest() {
        let screenshot = cap("screenshot", "Screenshot", &["screenshot", "render"]);
        let ocr = cap("ocr", "OCR", &["ocr", "text"]);
        let caps = vec![&screenshot, &ocr];
        let picked = score_task("take a screenshot of this page", caps).unwrap();
        assert_eq!(picked.id, "screenshot");
    }

    #[test]
    fn no_match_returns_none() {
        let ocr = cap("ocr", "OCR", &["ocr", "text"]);
        assert!(score_task("do something unrelated", [&ocr]).is_none());
    }

    #[test]
    fn detects_chain_via_sequencing_phrase() {
        assert!(looks_like_a_chain("scrape this and then convert to pdf"));
    }

    #[test]
    fn detects_chain_via_two_action_verbs() {
        assert!(looks_like_a_chain("scrape this page and resize the image"));
    }

    #[test]
    fn single_verb_is_not_a_chain() {
        assert!(!looks_like_a_chain("take a screenshot of this page"));
    }

    #[test]
    fn extracts_url_into_matching_field() {
        let mut schema = HashMap::new();
        schema.insert(
            "url".to_owned(),
            ParamSpec {
                param_type: ParamType::String,
                required: true,
                default: None,
                description: String::new(),
            },
        );
        let extracted = extract_params("take a screenshot of https://example.com", &schema);
        assert_eq!(extracted.get("url").unwrap(), "https://example.com");
    }

    #[test]
    fn missing_required_param_fails_validation() {
        let mut schema = HashMap::new();
        schema.insert(
            "url".to_owned(),
            ParamSpec {
                param_type: ParamType::String,
                required: true,
                default: None,
                description: String::new(),
            },
        );
        let err = apply_defaults_and_validate(&schema, HashMap::new()).unwrap_err();
        assert!(matches!(err, Error::MissingParams { .. }));
    }

    #[test]
    fn over_budget_is_rejected() {
        let err = check_budget(MicroUsd::from_micros(10_000), Some(MicroUsd::from_micros(1_000))).unwrap_err();
        assert!(matches!(err, Error::OverBudget { .. }));
    }
}
