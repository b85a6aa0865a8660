//! Dynamic service discovery against an external marketplace.
//!
//! Queried only when no registered capability matches a task. Results are
//! cached by search term, normalized into the same
//! [`Capability`] shape used by native/partner entries, and activated into
//! the gateway context's in-memory active-discovered map.

use std::collections::HashSet;
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::LazyLock;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::capability::{BackendMethod, Capability, ContentClass, DISCOVERED_ID_PREFIX, ParamSpec, SourceTier};
use crate::money::MicroUsd;

/// How long a search result stays cached, shared across callers.
pub const CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// Marketplace candidates whose provider cost exceeds this are dropped.
pub const PROVIDER_COST_CEILING: MicroUsd = MicroUsd::from_micros(250_000);

const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "is", "to", "of", "and", "for", "in", "on", "at", "by", "with", "from",
    "this", "that", "it", "i", "my", "me", "we", "our",
];

static URL_RE: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"https?://\S+").expect("valid regex"));
static EMAIL_RE: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"\S+@\S+\.\S+").expect("valid regex"));
static NON_ALNUM_RE: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"[^a-z0-9]+").expect("valid regex"));
static WORD_SPLIT_RE: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"\W+").expect("valid regex"));

/// Derives the marketplace search term from a free-form task, stripping
/// URLs, emails, and stop-words.
///
/// Returns `None` if nothing is left after stripping — discovery is then
/// skipped entirely.
#[must_use]
pub fn derive_search_term(task: &str) -> Option<String> {
    let stripped = URL_RE.replace_all(task, " ");
    let stripped = EMAIL_RE.replace_all(&stripped, " ");
    let kept: Vec<&str> = stripped
        .split_whitespace()
        .filter(|word| !STOP_WORDS.contains(&word.to_lowercase().as_str()))
        .collect();
    if kept.is_empty() {
        None
    } else {
        Some(kept.join(" "))
    }
}

/// A raw result as returned by the external marketplace.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketplaceListing {
    /// Provider-facing display name.
    pub name: String,
    /// Human description, mined for keywords after normalization.
    pub description: String,
    /// Endpoint URL to invoke.
    pub endpoint: String,
    /// HTTP method the endpoint expects.
    pub method: BackendMethod,
    /// Declared input schema.
    #[serde(default)]
    pub input_schema: std::collections::HashMap<String, ParamSpec>,
    /// Output content class.
    pub output_type: ContentClass,
    /// Provider's quoted cost, in micro-dollars.
    pub provider_cost_micros: u64,
    /// Address payment settles to.
    pub pay_to: String,
    /// Network identifier for settlement.
    pub network: String,
}

/// Markup applied when activating a marketplace listing:
/// `gatewayCost = ceil_to_0.001(max(2 * providerCost, providerCost + $0.005))`.
#[must_use]
pub fn compute_gateway_cost(provider_cost: MicroUsd) -> MicroUsd {
    let doubled = provider_cost.mul_ratio(2, 1);
    let plus_half_cent = provider_cost
        .checked_add(MicroUsd::from_micros(5_000))
        .unwrap_or(MicroUsd::from_micros(u64::MAX));
    let floor = if doubled > plus_half_cent { doubled } else { plus_half_cent };
    floor.ceil_to_multiple(MicroUsd::from_micros(1_000))
}

/// Slugifies a listing name into the suffix of a `discovered:` capability
/// ID: lowercase alphanumerics and hyphens, capped at 40 characters.
#[must_use]
pub fn slugify(name: &str) -> String {
    let lowered = name.to_lowercase();
    let replaced = NON_ALNUM_RE.replace_all(&lowered, "-");
    let trimmed = replaced.trim_matches('-');
    trimmed.chars().take(40).collect()
}

/// Derives keyword tokens from a listing description: split on non-word
/// characters, keep tokens of at least 4 characters, cap at 10.
#[must_use]
pub fn derive_keywords(description: &str) -> Vec<String> {
    WORD_SPLIT_RE
        .split(&description.to_lowercase())
        .filter(|token| token.len() >= 4)
        .take(10)
        .map(str::to_owned)
        .collect()
}

/// Normalizes a marketplace listing into a [`Capability`], applying the
/// gateway markup. Returns `None` if the listing's provider cost exceeds
/// [`PROVIDER_COST_CEILING`].
#[must_use]
pub fn normalize(listing: &MarketplaceListing) -> Option<Capability> {
    let provider_cost = MicroUsd::from_micros(listing.provider_cost_micros);
    if provider_cost > PROVIDER_COST_CEILING {
        return None;
    }
    let gateway_cost = compute_gateway_cost(provider_cost);
    let gateway_fee = MicroUsd::from_micros(gateway_cost.as_micros().saturating_sub(provider_cost.as_micros()));
    let _ = gateway_fee; // surfaced via Capability::revenue_split below for /providers grouping.

    Some(Capability {
        id: format!("{DISCOVERED_ID_PREFIX}{}", slugify(&listing.name)),
        name: listing.name.clone(),
        description: listing.description.clone(),
        cost: gateway_cost,
        keywords: derive_keywords(&listing.description),
        endpoint: listing.endpoint.clone(),
        method: listing.method,
        input_schema: listing.input_schema.clone(),
        output_type: listing.output_type,
        source: SourceTier::Discovered,
        provider: Some(crate::capability::Provider {
            name: listing.name.clone(),
            payout_address: listing.pay_to.clone(),
            contact_url: None,
        }),
        revenue_split: Some(crate::capability::RevenueSplit {
            #[allow(clippy::cast_precision_loss)]
            provider_fraction: provider_cost.as_micros() as f64 / gateway_cost.as_micros().max(1) as f64,
            #[allow(clippy::cast_precision_loss)]
            gateway_fraction: gateway_fee.as_micros() as f64 / gateway_cost.as_micros().max(1) as f64,
        }),
    })
}

/// A reject reason from the SSRF guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SsrfRejection {
    /// The URL could not be parsed.
    Unparseable,
    /// The host resolves (textually) to a blocked range or name.
    BlockedHost,
}

/// Rejects discovered-endpoint URLs whose host is loopback, a private IPv4
/// block, link-local/ULA IPv6, or the GCE metadata hostname. This is a
/// textual check against the literal host in the URL, not a DNS
/// resolution.
///
/// # Errors
///
/// Returns [`SsrfRejection`] when the URL is malformed or blocked.
pub fn check_ssrf(endpoint: &str) -> Result<(), SsrfRejection> {
    let parsed = url::Url::parse(endpoint).map_err(|_| SsrfRejection::Unparseable)?;
    let host = parsed.host_str().ok_or(SsrfRejection::Unparseable)?;

    if host.eq_ignore_ascii_case("metadata.google.internal") {
        return Err(SsrfRejection::BlockedHost);
    }

    if let Ok(ip) = IpAddr::from_str(host) {
        if is_blocked_ip(ip) {
            return Err(SsrfRejection::BlockedHost);
        }
    }

    Ok(())
}

fn is_blocked_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_link_local()
                || v4.octets()[0] == 10
                || (v4.octets()[0] == 172 && (16..=31).contains(&v4.octets()[1]))
                || (v4.octets()[0] == 192 && v4.octets()[1] == 168)
                || (v4.octets()[0] == 100 && (64..=127).contains(&v4.octets()[1]))
        }
        IpAddr::V6(v6) => {
            let segments = v6.segments();
            v6.is_loopback()
                || (segments[0] & 0xfe00) == 0xfc00 // fc00::/7 (ULA)
                || (segments[0] & 0xffc0) == 0xfe80 // fe80::/10 (link-local)
        }
    }
}

struct CacheEntry {
    at: Instant,
    capabilities: Vec<Capability>,
}

/// Queries the external marketplace, caches results by lowercased search
/// term, and hands back normalized capabilities ready for activation.
#[derive(Default)]
pub struct DiscoveryEngine {
    cache: DashMap<String, CacheEntry>,
}

impl DiscoveryEngine {
    /// Looks up a cached, non-expired result set for `search_term`.
    #[must_use]
    pub fn cached(&self, search_term: &str) -> Option<Vec<Capability>> {
        let key = search_term.to_lowercase();
        let entry = self.cache.get(&key)?;
        if entry.at.elapsed() <= CACHE_TTL {
            Some(entry.capabilities.clone())
        } else {
            None
        }
    }

    /// Stores a fresh result set for `search_term`.
    pub fn store(&self, search_term: &str, capabilities: Vec<Capability>) {
        self.cache.insert(
            search_term.to_lowercase(),
            CacheEntry {
                at: Instant::now(),
                capabilities,
            },
        );
    }

    /// Filters and normalizes raw marketplace listings, keeping only those
    /// with a reachable (non-SSRF-blocked) endpoint and an acceptable cost.
    #[must_use]
    pub fn filter_and_normalize(listings: &[MarketplaceListing]) -> Vec<Capability> {
        let mut seen_ids = HashSet::new();
        listings
            .iter()
            .filter(|listing| check_ssrf(&listing.endpoint).is_ok())
            .filter_map(normalize)
            .filter(|capability| seen_ids.insert(capability.id.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_search_term_stripping_urls_and_stop_words() {
        let term = derive_search_term("please scrape the https://example.com site for me").unwrap();
        assert!(!term.contains("https://"));
        assert!(!term.split_whitespace().any(|w| w == "the"));
    }

    #[test]
    fn empty_after_stripping_yields_none() {
        assert!(derive_search_term("the a an").is_none());
    }

    #[test]
    fn gateway_cost_is_at_least_double_or_half_cent_markup() {
        let provider_cost = MicroUsd::from_micros(1_000); // $0.001
        let cost = compute_gateway_cost(provider_cost);
        assert!(cost.as_micros() >= 2 * provider_cost.as_micros());
        assert_eq!(cost.as_micros() % 1_000, 0);
    }

    #[test]
    fn gateway_cost_uses_half_cent_floor_for_small_provider_costs() {
        // provider cost near zero: 2x is smaller than +$0.005, so the floor wins.
        let provider_cost = MicroUsd::from_micros(100);
        let cost = compute_gateway_cost(provider_cost);
        assert!(cost.as_micros() >= provider_cost.as_micros() + 5_000);
    }

    #[test]
    fn slugify_caps_at_forty_chars_and_lowercases() {
        let slug = slugify("My Amazing QR Code Generator Service With A Very Long Name Indeed");
        assert!(slug.len() <= 40);
        assert_eq!(slug, slug.to_lowercase());
    }

    #[test]
    fn ssrf_blocks_loopback_and_private_ranges() {
        assert!(check_ssrf("http://127.0.0.1/x").is_err());
        assert!(check_ssrf("http://10.0.0.5/x").is_err());
        assert!(check_ssrf("http://192.168.1.1/x").is_err());
        assert!(check_ssrf("http://172.16.0.1/x").is_err());
        assert!(check_ssrf("http://169.254.1.1/x").is_err());
        assert!(check_ssrf("http://100.64.0.1/x").is_err());
        assert!(check_ssrf("http://metadata.google.internal/x").is_err());
    }

    #[test]
    fn ssrf_allows_public_hosts() {
        assert!(check_ssrf("https://api.example.com/x").is_ok());
    }

    #[test]
    fn ssrf_rejects_unparseable_urls() {
        assert!(check_ssrf("not a url").is_err());
    }

    #[test]
    fn provider_cost_over_ceiling_is_dropped() {
        let listing = MarketplaceListing {
            name: "Pricey Service".to_owned(),
            description: "an expensive service description here".to_owned(),
            endpoint: "https://api.example.com/x".to_owned(),
            method: BackendMethod::Post,
            input_schema: std::collections::HashMap::new(),
            output_type: ContentClass::Json,
            provider_cost_micros: 1_000_000,
            pay_to: "0xabc".to_owned(),
            network: "base".to_owned(),
        };
        assert!(normalize(&listing).is_none());
    }
}
