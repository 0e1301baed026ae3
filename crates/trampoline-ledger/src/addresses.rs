//! Trusted contract addresses per network.
//!
//! Addresses come from pinned tables compiled into the binary, from operator
//! configuration, or (for local development networks only) from a contract
//! registry. They are never derived from user input. Resolved entries are
//! cached per network for the lifetime of the [`AddressBook`].

use crate::primitives::Address;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

pub const MAINNET: &str = "1";
pub const RINKEBY: &str = "4";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("Do not know how to get contract addresses for network {0}")]
    UnknownNetwork(String),

    #[error("Address source failed: {0}")]
    Source(String),
}

/// The three trusted contracts of one deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractAddresses {
    /// Emits `MarketCreated`.
    pub core: Address,
    /// The only accepted denomination token.
    pub token: Address,
    /// The namespace whose membership makes a market legitimate.
    pub trusted_namespace: Address,
}

fn pinned(core: &str, token: &str, namespace: &str) -> Option<ContractAddresses> {
    Some(ContractAddresses {
        core: core.parse().ok()?,
        token: token.parse().ok()?,
        trusted_namespace: namespace.parse().ok()?,
    })
}

/// Built-in tables for the public networks.
pub fn pinned_addresses(network: &str) -> Option<ContractAddresses> {
    match network {
        MAINNET => pinned(
            "0x75228dce4d82566d93068a8d5d49435216551599",
            "0xd5524179cb7ae012f5b642c1d6d700bbaa76b96b",
            "0xe991247b78f937d7b69cfc00f1a487a293557677",
        ),
        RINKEBY => pinned(
            "0x990b2d2af7e87cd015a607c3a95d7622c9bbede1",
            "0x2da4d465978981bd75bbac4c9f3bda10be0b465c",
            "0x02149d40d255fceac54a3ee3899807b0539bad60",
        ),
        _ => None,
    }
}

/// Fallback source consulted for networks without a pinned table.
#[async_trait]
pub trait AddressSource: Send + Sync {
    async fn lookup(&self, network: &str) -> Result<ContractAddresses, AddressError>;
}

/// Registry entry as published by the development contract server.
#[derive(Debug, Deserialize)]
struct RegistryEntry {
    #[serde(rename = "Augur")]
    core: Address,
    #[serde(rename = "Cash")]
    token: Address,
    #[serde(rename = "Universe")]
    trusted_namespace: Address,
}

/// Fetches `{"<network>": {"Augur", "Cash", "Universe"}}` from a local
/// development registry.
pub struct DevAddressSource {
    client: reqwest::Client,
    url: url::Url,
}

impl DevAddressSource {
    pub fn new(url: &str) -> Result<Self, AddressError> {
        let url = url::Url::parse(url)
            .map_err(|e| AddressError::Source(format!("invalid registry url '{}': {}", url, e)))?;
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| AddressError::Source(e.to_string()))?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl AddressSource for DevAddressSource {
    async fn lookup(&self, network: &str) -> Result<ContractAddresses, AddressError> {
        let source = |e: reqwest::Error| AddressError::Source(e.to_string());
        let mut registry: HashMap<String, RegistryEntry> = self
            .client
            .get(self.url.clone())
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(source)?
            .json()
            .await
            .map_err(source)?;
        let entry = registry
            .remove(network)
            .ok_or_else(|| AddressError::UnknownNetwork(network.to_string()))?;
        Ok(ContractAddresses {
            core: entry.core,
            token: entry.token,
            trusted_namespace: entry.trusted_namespace,
        })
    }
}

/// Per-network cache of trusted addresses. Shared by reference; entries are
/// never evicted.
pub struct AddressBook {
    tables: HashMap<String, ContractAddresses>,
    fallback: Option<Arc<dyn AddressSource>>,
    cache: DashMap<String, ContractAddresses>,
}

impl AddressBook {
    /// Pinned public networks only.
    pub fn pinned() -> Self {
        let tables = [MAINNET, RINKEBY]
            .into_iter()
            .filter_map(|network| Some((network.to_string(), pinned_addresses(network)?)))
            .collect();
        Self {
            tables,
            fallback: None,
            cache: DashMap::new(),
        }
    }

    /// Add or replace the table of one network.
    pub fn with_table(mut self, network: &str, addresses: ContractAddresses) -> Self {
        self.tables.insert(network.to_string(), addresses);
        self
    }

    pub fn with_fallback(mut self, source: Arc<dyn AddressSource>) -> Self {
        self.fallback = Some(source);
        self
    }

    pub async fn resolve(&self, network: &str) -> Result<ContractAddresses, AddressError> {
        if let Some(cached) = self.cache.get(network) {
            return Ok(*cached);
        }

        let addresses = match self.tables.get(network) {
            Some(table) => *table,
            None => match &self.fallback {
                Some(source) => {
                    tracing::debug!(network, "resolving contract addresses from fallback source");
                    source.lookup(network).await?
                }
                None => return Err(AddressError::UnknownNetwork(network.to_string())),
            },
        };

        self.cache.insert(network.to_string(), addresses);
        Ok(addresses)
    }

    pub fn cached_networks(&self) -> Vec<String> {
        let mut networks: Vec<String> = self.cache.iter().map(|e| e.key().clone()).collect();
        networks.sort();
        networks
    }
}

impl Default for AddressBook {
    fn default() -> Self {
        Self::pinned()
    }
}
