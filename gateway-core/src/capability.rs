//! The capability catalog: native, partner, and discovered backend operations.
//!
//! A [`Capability`] is the one polymorphic abstraction the dispatcher, the
//! reliability layer, and the backend caller all operate on, tagged by
//! [`SourceTier`] rather than split into separate types — so discovered
//! capabilities created at runtime by the discovery engine need no special
//! casing beyond the no-bypass-credential rule and the SSRF check.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::money::MicroUsd;

/// The reserved ID prefix for capabilities created by the discovery engine.
pub const DISCOVERED_ID_PREFIX: &str = "discovered:";

/// HTTP method a capability's backend is invoked with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BackendMethod {
    /// Parameters are URL-encoded into the query string.
    Get,
    /// Parameters are sent as a JSON object body.
    Post,
}

/// The declared shape of a backend's response payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentClass {
    /// `application/json`, parsed and passed through.
    Json,
    /// An image format, buffered and base64-encoded.
    Image,
    /// `application/pdf`, buffered and base64-encoded.
    Pdf,
    /// Anything else, returned as a text payload.
    Text,
}

/// Where a capability came from, which governs trust and billing behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceTier {
    /// Operated directly by the gateway operator.
    Native,
    /// Operated by a third party with a revenue-share agreement.
    Partner,
    /// Surfaced at runtime by the discovery engine from an external marketplace.
    Discovered,
}

/// The semantic type of a single input parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    /// Free text.
    String,
    /// Any numeric value.
    Number,
    /// `true`/`false`.
    Boolean,
}

/// Declaration of a single capability input parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParamSpec {
    /// Semantic type used for coercion and validation.
    #[serde(rename = "type")]
    pub param_type: ParamType,
    /// Whether the parameter must be present after extraction and defaulting.
    #[serde(default)]
    pub required: bool,
    /// Value substituted if the parameter is absent after extraction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
    /// Human description, also consulted by parameter extraction heuristics.
    #[serde(default)]
    pub description: String,
}

/// A partner or discovered backend's provider record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Provider {
    /// Human-facing provider name.
    pub name: String,
    /// Address the provider's share of revenue is paid to.
    pub payout_address: String,
    /// Optional contact URL shown on the `/providers` endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_url: Option<String>,
}

/// Fraction of a capability's revenue paid to the provider vs. the gateway.
/// The two fractions must sum to `1.0`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevenueSplit {
    /// Fraction of the charged cost paid to the provider, in `[0, 1]`.
    pub provider_fraction: f64,
    /// Fraction of the charged cost retained by the gateway, in `[0, 1]`.
    pub gateway_fraction: f64,
}

impl RevenueSplit {
    /// Tolerance for the "sums to 1.0" invariant, to absorb float roundoff
    /// from config files written by hand.
    const SUM_TOLERANCE: f64 = 1e-6;

    /// Returns whether the two fractions sum to `1.0` within tolerance.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        (self.provider_fraction + self.gateway_fraction - 1.0).abs() < Self::SUM_TOLERANCE
    }
}

/// A single routable backend operation.
///
/// Native and partner capabilities are loaded once at startup and are
/// immutable for the process lifetime; discovered capabilities are
/// constructed by the discovery engine and held only in memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capability {
    /// Stable, URL-safe, globally unique identifier.
    pub id: String,
    /// Human-facing name.
    pub name: String,
    /// Human-facing description, also consulted by the dispatcher and by
    /// parameter extraction.
    pub description: String,
    /// Cost to the caller, in micro-dollars.
    pub cost: MicroUsd,
    /// Lowercased tokens used for natural-language matching.
    pub keywords: Vec<String>,
    /// Upstream backend URL.
    pub endpoint: String,
    /// HTTP method used to invoke the backend.
    pub method: BackendMethod,
    /// Declared input parameters, by name.
    pub input_schema: HashMap<String, ParamSpec>,
    /// Declared shape of the backend's response.
    pub output_type: ContentClass,
    /// Native, partner, or discovered.
    pub source: SourceTier,
    /// Present for partner and discovered capabilities.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<Provider>,
    /// Present for partner and discovered capabilities.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revenue_split: Option<RevenueSplit>,
}

impl Capability {
    /// Whether this capability was created by the discovery engine.
    #[must_use]
    pub fn is_discovered(&self) -> bool {
        self.source == SourceTier::Discovered
    }

    /// Whether the gateway should attach its backend-bypass credential when
    /// calling this capability's endpoint. Discovered backends never get it.
    #[must_use]
    pub fn uses_bypass_credential(&self) -> bool {
        !self.is_discovered()
    }
}

/// Errors rejecting a malformed capability definition at load time.
#[derive(Debug, Error)]
pub enum CapabilityLoadError {
    /// The declared endpoint is missing or not a URL.
    #[error("capability {id:?}: invalid or missing endpoint {endpoint:?}")]
    InvalidEndpoint {
        /// Offending capability ID.
        id: String,
        /// The malformed value.
        endpoint: String,
    },
    /// The cost string could not be parsed, or was negative.
    #[error("capability {id:?}: invalid cost {cost:?}: {source}")]
    InvalidCost {
        /// Offending capability ID.
        id: String,
        /// The malformed value.
        cost: String,
        /// Underlying parse error.
        #[source]
        source: crate::money::MoneyParseError,
    },
    /// A partner/discovered capability's revenue split does not sum to 1.0.
    #[error("capability {id:?}: revenue split does not sum to 1.0")]
    InvalidRevenueSplit {
        /// Offending capability ID.
        id: String,
    },
    /// Two capabilities share an ID.
    #[error("duplicate capability id {0:?}")]
    DuplicateId(String),
    /// The keyword set was empty for a capability expected to be natural-
    /// language matchable.
    #[error("capability {0:?}: empty keyword set")]
    EmptyKeywords(String),
}

/// A raw, string-costed capability definition as read from the registry file.
///
/// [`CapabilityRegistry::load`] resolves the `cost` string to [`MicroUsd`]
/// once at startup and validates the other invariants from this shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawCapability {
    /// See [`Capability::id`].
    pub id: String,
    /// See [`Capability::name`].
    pub name: String,
    /// See [`Capability::description`].
    pub description: String,
    /// Human-readable cost string, e.g. `"$0.01"`.
    pub cost: String,
    /// See [`Capability::keywords`].
    #[serde(default)]
    pub keywords: Vec<String>,
    /// See [`Capability::endpoint`].
    pub endpoint: String,
    /// See [`Capability::method`].
    pub method: BackendMethod,
    /// See [`Capability::input_schema`].
    #[serde(default)]
    pub input_schema: HashMap<String, ParamSpec>,
    /// See [`Capability::output_type`].
    pub output_type: ContentClass,
    /// See [`Capability::source`].
    pub source: SourceTier,
    /// See [`Capability::provider`].
    #[serde(default)]
    pub provider: Option<Provider>,
    /// See [`Capability::revenue_split`].
    #[serde(default)]
    pub revenue_split: Option<RevenueSplit>,
}

impl RawCapability {
    /// Resolves this raw definition into a [`Capability`], validating its
    /// endpoint, cost, and revenue split.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityLoadError`] if the endpoint is not a URL, the
    /// cost string is unparseable or negative, or the revenue split (when
    /// present) does not sum to `1.0`.
    pub fn resolve(self) -> Result<Capability, CapabilityLoadError> {
        if url::Url::parse(&self.endpoint).is_err() {
            return Err(CapabilityLoadError::InvalidEndpoint {
                id: self.id,
                endpoint: self.endpoint,
            });
        }
        let cost =
            MicroUsd::parse_round_away_from_zero(&self.cost).map_err(|source| CapabilityLoadError::InvalidCost {
                id: self.id.clone(),
                cost: self.cost.clone(),
                source,
            })?;
        if let Some(split) = &self.revenue_split {
            if !split.is_valid() {
                return Err(CapabilityLoadError::InvalidRevenueSplit { id: self.id });
            }
        }
        Ok(Capability {
            id: self.id,
            name: self.name,
            description: self.description,
            cost,
            keywords: self.keywords,
            endpoint: self.endpoint,
            method: self.method,
            input_schema: self.input_schema,
            output_type: self.output_type,
            source: self.source,
            provider: self.provider,
            revenue_split: self.revenue_split,
        })
    }
}

/// The read-only catalog of native and partner capabilities, populated once
/// at startup. Discovered capabilities live separately in the gateway
/// context's active-discovered map (see `crate::context`).
#[derive(Debug, Default)]
pub struct CapabilityRegistry {
    by_id: HashMap<String, Capability>,
}

/// On-disk shape of the static capability registry file (`capabilities.toml`).
#[derive(Debug, Deserialize)]
struct CapabilityFile {
    #[serde(rename = "capability", default)]
    capabilities: Vec<RawCapability>,
}

/// Errors loading the registry file itself, distinct from per-entry
/// validation errors.
#[derive(Debug, Error)]
pub enum RegistryFileError {
    /// The file could not be parsed as TOML.
    #[error("failed to parse capability registry: {0}")]
    Toml(#[from] toml::de::Error),
    /// An entry failed validation.
    #[error(transparent)]
    Entry(#[from] CapabilityLoadError),
}

impl CapabilityRegistry {
    /// Parses a `capabilities.toml` document (an array of `[[capability]]`
    /// tables) into a validated registry. Failure anywhere in the file is
    /// fatal at startup.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryFileError`] if the TOML is malformed or any entry
    /// fails validation.
    pub fn load_from_toml_str(contents: &str) -> Result<Self, RegistryFileError> {
        let file: CapabilityFile = toml::from_str(contents)?;
        Self::load(file.capabilities).map_err(RegistryFileError::from)
    }

    /// Parses and validates a set of raw definitions into a registry.
    ///
    /// Failure to parse the registry is fatal at startup: every entry is
    /// validated before the registry is considered usable at all.
    ///
    /// # Errors
    ///
    /// Returns the first [`CapabilityLoadError`] encountered: a malformed
    /// entry, a duplicate ID, or (for natively dispatchable capabilities)
    /// an empty keyword set.
    pub fn load(raw: Vec<RawCapability>) -> Result<Self, CapabilityLoadError> {
        let mut by_id = HashMap::with_capacity(raw.len());
        for entry in raw {
            let capability = entry.resolve()?;
            if capability.keywords.is_empty() {
                return Err(CapabilityLoadError::EmptyKeywords(capability.id));
            }
            if by_id.contains_key(&capability.id) {
                return Err(CapabilityLoadError::DuplicateId(capability.id));
            }
            by_id.insert(capability.id.clone(), capability);
        }
        Ok(Self { by_id })
    }

    /// Returns every registered capability.
    #[must_use]
    pub fn list(&self) -> Vec<&Capability> {
        self.by_id.values().collect()
    }

    /// Looks up a capability by its exact ID.
    #[must_use]
    pub fn by_id(&self, id: &str) -> Option<&Capability> {
        self.by_id.get(id)
    }

    /// Number of registered capabilities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Whether the registry has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_raw(id: &str) -> RawCapability {
        RawCapability {
            id: id.to_owned(),
            name: "Screenshot".to_owned(),
            description: "Renders a URL to an image".to_owned(),
            cost: "$0.01".to_owned(),
            keywords: vec!["screenshot".to_owned(), "render".to_owned()],
            endpoint: "https://backend.internal/screenshot".to_owned(),
            method: BackendMethod::Post,
            input_schema: HashMap::new(),
            output_type: ContentClass::Image,
            source: SourceTier::Native,
            provider: None,
            revenue_split: None,
        }
    }

    #[test]
    fn loads_a_valid_registry() {
        let registry = CapabilityRegistry::load(vec![sample_raw("screenshot")]).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.by_id("screenshot").is_some());
    }

    #[test]
    fn rejects_duplicate_ids() {
        let err = CapabilityRegistry::load(vec![sample_raw("screenshot"), sample_raw("screenshot")])
            .unwrap_err();
        assert!(matches!(err, CapabilityLoadError::DuplicateId(_)));
    }

    #[test]
    fn rejects_empty_keywords() {
        let mut raw = sample_raw("screenshot");
        raw.keywords.clear();
        let err = CapabilityRegistry::load(vec![raw]).unwrap_err();
        assert!(matches!(err, CapabilityLoadError::EmptyKeywords(_)));
    }

    #[test]
    fn rejects_malformed_endpoint() {
        let mut raw = sample_raw("screenshot");
        raw.endpoint = "not-a-url".to_owned();
        let err = CapabilityRegistry::load(vec![raw]).unwrap_err();
        assert!(matches!(err, CapabilityLoadError::InvalidEndpoint { .. }));
    }

    #[test]
    fn rejects_revenue_split_not_summing_to_one() {
        let mut raw = sample_raw("screenshot");
        raw.source = SourceTier::Partner;
        raw.revenue_split = Some(RevenueSplit {
            provider_fraction: 0.5,
            gateway_fraction: 0.6,
        });
        let err = CapabilityRegistry::load(vec![raw]).unwrap_err();
        assert!(matches!(err, CapabilityLoadError::InvalidRevenueSplit { .. }));
    }

    #[test]
    fn loads_a_registry_from_toml() {
        let toml = r#"
            [[capability]]
            id = "screenshot"
            name = "Screenshot"
            description = "Renders a URL to an image"
            cost = "$0.01"
            keywords = ["screenshot", "render"]
            endpoint = "https://backend.internal/screenshot"
            method = "POST"
            output_type = "image"
            source = "native"
        "#;
        let registry = CapabilityRegistry::load_from_toml_str(toml).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.by_id("screenshot").is_some());
    }
}
