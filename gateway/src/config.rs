//! Gateway process configuration.
//!
//! Loads a TOML file with `$VAR`/`${VAR}` environment expansion, plus
//! `HOST`/`PORT` environment overrides. The payment-facing fields (port,
//! payout address, facilitator URL, network, test-bypass key and
//! allow-list, backend-bypass credential, optional planner API key) sit
//! alongside the marketplace URL, planner URL, capability catalog path,
//! and CORS allow-list that every deployment still needs to provide.

use std::net::IpAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Top-level gateway configuration, as read from `gateway.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Server bind address.
    #[serde(default = "default_host")]
    pub host: IpAddr,
    /// Server port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Address settled payments are paid to.
    pub payout_address: String,
    /// Network identifier quoted to callers and the facilitator, e.g.
    /// `"eip155:8453"`.
    pub network: String,
    /// Settlement asset symbol, e.g. `"USDC"`.
    #[serde(default = "default_asset")]
    pub asset: String,
    /// Base URL of the external payment facilitator.
    pub facilitator_url: String,

    /// Base URL of the external service marketplace.
    pub marketplace_url: String,
    /// Base URL of the external chain planner.
    pub planner_url: String,
    /// Optional bearer API key for the chain planner.
    #[serde(default)]
    pub planner_api_key: Option<String>,

    /// Optional internal test-bypass key. Supports `$VAR`/`${VAR}`
    /// expansion so it is never committed in plaintext.
    #[serde(default)]
    pub test_bypass_key: Option<String>,
    /// Peers allowed to present the test-bypass key, beyond loopback.
    #[serde(default)]
    pub allow_listed_peers: Vec<IpAddr>,
    /// Credential attached when calling native/partner backends.
    #[serde(default)]
    pub bypass_credential: String,

    /// Path to the static capability catalog TOML file.
    #[serde(default = "default_catalog_path")]
    pub capability_catalog_path: String,
    /// Path to the usage-ledger SQLite database file.
    #[serde(default = "default_ledger_path")]
    pub ledger_path: String,

    /// CORS-allowed origins.
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

fn default_host() -> IpAddr {
    IpAddr::V4(std::net::Ipv4Addr::new(0, 0, 0, 0))
}

fn default_port() -> u16 {
    8080
}

fn default_asset() -> String {
    "USDC".to_owned()
}

fn default_catalog_path() -> String {
    "capabilities.toml".to_owned()
}

fn default_ledger_path() -> String {
    "usage-ledger.sqlite3".to_owned()
}

impl GatewayConfig {
    /// Loads configuration from `path`, falling back to built-in defaults
    /// for any field not present in the file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_from(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let content = if Path::new(path).exists() { std::fs::read_to_string(path)? } else { String::new() };

        let expanded = expand_env_vars(&content);
        let mut config: Self = toml::from_str(&expanded)?;

        if let Ok(host) = std::env::var("HOST") {
            if let Ok(addr) = host.parse() {
                config.host = addr;
            }
        }
        if let Ok(port) = std::env::var("PORT") {
            if let Ok(p) = port.parse() {
                config.port = p;
            }
        }

        Ok(config)
    }
}

/// Expands `$VAR` and `${VAR}` patterns in a string from the process
/// environment. Unresolved variables are left as-is.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '$' {
            result.push(ch);
            continue;
        }

        let braced = chars.peek() == Some(&'{');
        if braced {
            chars.next();
        }

        let mut var_name = String::new();
        while let Some(&c) = chars.peek() {
            if braced {
                if c == '}' {
                    chars.next();
                    break;
                }
            } else if !c.is_ascii_alphanumeric() && c != '_' {
                break;
            }
            var_name.push(c);
            chars.next();
        }

        if var_name.is_empty() {
            result.push('$');
            if braced {
                result.push('{');
            }
        } else if let Ok(val) = std::env::var(&var_name) {
            result.push_str(&val);
        } else {
            result.push('$');
            if braced {
                result.push('{');
            }
            result.push_str(&var_name);
            if braced {
                result.push('}');
            }
        }
    }

    result
}

/// Builds the transport-level payment gate configuration from the
/// top-level process configuration.
#[must_use]
pub fn to_payment_gate_config(config: &GatewayConfig) -> gateway_http::paygate::PaymentGateConfig {
    gateway_http::paygate::PaymentGateConfig {
        payout_address: config.payout_address.clone(),
        network: config.network.clone(),
        asset: config.asset.clone(),
        facilitator_url: config.facilitator_url.clone(),
        test_bypass_key: config.test_bypass_key.clone(),
        allow_listed_peers: config.allow_listed_peers.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_braced_and_bare_variables() {
        // SAFETY: test-only, single-threaded access to a uniquely-named var.
        unsafe {
            std::env::set_var("GATEWAY_CONFIG_TEST_VAR", "resolved");
        }
        assert_eq!(expand_env_vars("prefix-${GATEWAY_CONFIG_TEST_VAR}-suffix"), "prefix-resolved-suffix");
        assert_eq!(expand_env_vars("$GATEWAY_CONFIG_TEST_VAR"), "resolved");
        unsafe {
            std::env::remove_var("GATEWAY_CONFIG_TEST_VAR");
        }
    }

    #[test]
    fn leaves_unresolved_variables_untouched() {
        assert_eq!(expand_env_vars("$THIS_VAR_DOES_NOT_EXIST_HOPEFULLY"), "$THIS_VAR_DOES_NOT_EXIST_HOPEFULLY");
    }
}
