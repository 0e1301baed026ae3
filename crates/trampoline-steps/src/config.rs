//! Stage configuration.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use trampoline_ledger::{AddressBook, AddressError, ContractAddresses, DevAddressSource};

/// Network connector configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectorConfig {
    /// Try the connector injected by the host environment first
    #[serde(default = "default_true")]
    pub include_injected: bool,

    /// Local node tried after the injected connector
    #[serde(default = "default_local_endpoint")]
    pub local_endpoint: String,

    /// Public nodes tried last, in order
    #[serde(default = "default_public_endpoints")]
    pub public_endpoints: Vec<String>,

    /// Budget for one candidate, from dialing to the block number check
    #[serde(default = "default_candidate_timeout")]
    pub candidate_timeout_ms: u64,

    /// When set, the only candidate
    #[serde(default)]
    pub manual_endpoint: Option<String>,
}

impl ConnectorConfig {
    pub fn candidate_timeout(&self) -> Duration {
        Duration::from_millis(self.candidate_timeout_ms)
    }
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            include_injected: true,
            local_endpoint: default_local_endpoint(),
            public_endpoints: default_public_endpoints(),
            candidate_timeout_ms: default_candidate_timeout(),
            manual_endpoint: None,
        }
    }
}

/// Trusted contract address configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressConfig {
    /// Extra trusted tables keyed by network id; these win over pinned ones
    #[serde(default)]
    pub networks: HashMap<String, ContractAddresses>,

    /// Development contract registry for networks without a table
    #[serde(default)]
    pub dev_contracts_url: Option<String>,
}

impl AddressConfig {
    pub fn address_book(&self) -> Result<AddressBook, AddressError> {
        let mut book = AddressBook::pinned();
        for (network, addresses) in &self.networks {
            book = book.with_table(network, *addresses);
        }
        if let Some(url) = &self.dev_contracts_url {
            book = book.with_fallback(Arc::new(DevAddressSource::new(url)?));
        }
        Ok(book)
    }
}

// Default value helpers
fn default_true() -> bool {
    true
}

fn default_local_endpoint() -> String {
    "http://localhost:8545".to_string()
}

fn default_public_endpoints() -> Vec<String> {
    vec![
        "https://mainnet.infura.io/augur".to_string(),
        "https://rinkeby.infura.io/augur".to_string(),
    ]
}

fn default_candidate_timeout() -> u64 {
    5000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = ConnectorConfig::default();
        assert!(config.include_injected);
        assert_eq!(config.candidate_timeout(), Duration::from_secs(5));
        assert_eq!(config.public_endpoints.len(), 2);
        assert!(config.manual_endpoint.is_none());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: ConnectorConfig =
            serde_json::from_str(r#"{"candidate_timeout_ms": 250}"#).unwrap();
        assert_eq!(config.candidate_timeout_ms, 250);
        assert_eq!(config.local_endpoint, "http://localhost:8545");
    }
}
