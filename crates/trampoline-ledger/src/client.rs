//! Ledger RPC surface consumed by the pipeline.

use crate::abi::AbiError;
use crate::primitives::{Address, TxHash, H256};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// Endpoint unreachable, connection dropped, HTTP failure.
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// The endpoint answered with something that is not a valid reply.
    #[error("Malformed reply: {0}")]
    Decode(String),

    #[error("ABI error: {0}")]
    Abi(#[from] AbiError),
}

impl From<reqwest::Error> for LedgerError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

/// Reorg status of a log entry as reported by the node.
///
/// `Missing` (no `removed` field at all) and `Unrecognized` (a field that is
/// present but not a bool, `null` included) are kept apart: only the former
/// is ever tolerated, and only on local test networks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemovalMark {
    NotRemoved,
    Removed,
    Missing,
    Unrecognized(String),
}

impl RemovalMark {
    pub fn describe(&self) -> String {
        match self {
            Self::NotRemoved => "false".to_string(),
            Self::Removed => "true".to_string(),
            Self::Missing => "undefined".to_string(),
            Self::Unrecognized(raw) => raw.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub address: Address,
    pub topics: Vec<H256>,
    pub data: Vec<u8>,
    pub removed: RemovalMark,
    /// Node-specific log type marker, `"mined"` on some test nodes.
    pub log_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionReceipt {
    pub transaction_hash: TxHash,
    pub block_number: Option<u64>,
    pub logs: Vec<LogEntry>,
}

/// Asynchronous ledger client. Every call may fail with a transport error.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    async fn accounts(&self) -> Result<Vec<Address>, LedgerError>;

    /// Network identifier exactly as the node reports it.
    async fn network_id(&self) -> Result<String, LedgerError>;

    async fn block_number(&self) -> Result<u64, LedgerError>;

    /// `None` when the node does not know the transaction.
    async fn transaction_receipt(
        &self,
        hash: &TxHash,
    ) -> Result<Option<TransactionReceipt>, LedgerError>;

    /// Read-only contract call with ABI-encoded call data.
    async fn call(&self, to: &Address, data: &[u8]) -> Result<Vec<u8>, LedgerError>;
}

/// Opens clients for endpoint URLs.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, endpoint: &str) -> Result<Arc<dyn LedgerClient>, LedgerError>;
}
