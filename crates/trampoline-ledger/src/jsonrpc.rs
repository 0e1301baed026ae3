//! HTTP JSON-RPC ledger client.

use crate::client::{Dialer, LedgerClient, LedgerError, LogEntry, RemovalMark, TransactionReceipt};
use crate::primitives::{parse_hex_bytes, parse_quantity, to_hex_prefixed, Address, TxHash, H256};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

/// Wire form of a receipt. Hex strings are validated when converted.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireReceipt {
    transaction_hash: String,
    #[serde(default)]
    block_number: Option<String>,
    #[serde(default)]
    logs: Vec<WireLog>,
}

#[derive(Debug, Deserialize)]
struct WireLog {
    address: String,
    #[serde(default)]
    topics: Vec<String>,
    data: String,
    /// `None` when the field is absent, `Some(Value::Null)` when it is null.
    #[serde(default, deserialize_with = "present")]
    removed: Option<Value>,
    #[serde(rename = "type", default)]
    log_type: Option<String>,
}

fn present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

fn removal_mark(raw: Option<Value>) -> RemovalMark {
    match raw {
        None => RemovalMark::Missing,
        Some(Value::Bool(false)) => RemovalMark::NotRemoved,
        Some(Value::Bool(true)) => RemovalMark::Removed,
        Some(other) => RemovalMark::Unrecognized(other.to_string()),
    }
}

fn malformed(what: &str, err: impl std::fmt::Display) -> LedgerError {
    LedgerError::Decode(format!("{}: {}", what, err))
}

impl WireLog {
    fn into_entry(self) -> Result<LogEntry, LedgerError> {
        let topics = self
            .topics
            .iter()
            .map(|topic| topic.parse::<H256>().map_err(|e| malformed("log topic", e)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(LogEntry {
            address: self
                .address
                .parse()
                .map_err(|e| malformed("log address", e))?,
            topics,
            data: parse_hex_bytes(&self.data).map_err(|e| malformed("log data", e))?,
            removed: removal_mark(self.removed),
            log_type: self.log_type,
        })
    }
}

impl WireReceipt {
    fn into_receipt(self) -> Result<TransactionReceipt, LedgerError> {
        let block_number = self
            .block_number
            .as_deref()
            .map(parse_quantity)
            .transpose()
            .map_err(|e| malformed("block number", e))?;
        Ok(TransactionReceipt {
            transaction_hash: self
                .transaction_hash
                .parse()
                .map_err(|e| malformed("transaction hash", e))?,
            block_number,
            logs: self
                .logs
                .into_iter()
                .map(WireLog::into_entry)
                .collect::<Result<_, _>>()?,
        })
    }
}

/// Ledger client speaking Ethereum JSON-RPC over HTTP.
pub struct JsonRpcClient {
    client: Client,
    endpoint: String,
    next_id: AtomicU64,
}

impl JsonRpcClient {
    pub fn new(endpoint: &str) -> Result<Self, LedgerError> {
        Self::with_timeout(endpoint, Duration::from_secs(30))
    }

    pub fn with_timeout(endpoint: &str, timeout: Duration) -> Result<Self, LedgerError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<Option<T>, LedgerError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = RpcRequest {
            jsonrpc: "2.0",
            id,
            method,
            params,
        };
        tracing::trace!(endpoint = %self.endpoint, method, id, "json-rpc request");

        let response = self.client.post(&self.endpoint).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(LedgerError::Transport(format!("HTTP {}: {}", status, text)));
        }

        let reply: RpcResponse<T> = response
            .json()
            .await
            .map_err(|e| malformed(method, e))?;
        if let Some(error) = reply.error {
            return Err(LedgerError::Rpc {
                code: error.code,
                message: error.message,
            });
        }
        Ok(reply.result)
    }

    async fn require<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<T, LedgerError> {
        self.request(method, params)
            .await?
            .ok_or_else(|| malformed(method, "missing result"))
    }
}

#[async_trait]
impl LedgerClient for JsonRpcClient {
    async fn accounts(&self) -> Result<Vec<Address>, LedgerError> {
        let raw: Vec<String> = self.require("eth_accounts", json!([])).await?;
        raw.iter()
            .map(|account| account.parse().map_err(|e| malformed("account", e)))
            .collect()
    }

    async fn network_id(&self) -> Result<String, LedgerError> {
        self.require("net_version", json!([])).await
    }

    async fn block_number(&self) -> Result<u64, LedgerError> {
        let raw: String = self.require("eth_blockNumber", json!([])).await?;
        parse_quantity(&raw).map_err(|e| malformed("eth_blockNumber", e))
    }

    async fn transaction_receipt(
        &self,
        hash: &TxHash,
    ) -> Result<Option<TransactionReceipt>, LedgerError> {
        let raw: Option<WireReceipt> = self
            .request("eth_getTransactionReceipt", json!([hash.to_string()]))
            .await?;
        raw.map(WireReceipt::into_receipt).transpose()
    }

    async fn call(&self, to: &Address, data: &[u8]) -> Result<Vec<u8>, LedgerError> {
        let params = json!([
            { "to": to.to_string(), "data": to_hex_prefixed(data) },
            "latest"
        ]);
        let raw: String = self.require("eth_call", params).await?;
        parse_hex_bytes(&raw).map_err(|e| malformed("eth_call", e))
    }
}

/// Dials HTTP endpoints.
#[derive(Debug, Clone)]
pub struct HttpDialer {
    request_timeout: Duration,
}

impl HttpDialer {
    pub fn new(request_timeout: Duration) -> Self {
        Self { request_timeout }
    }
}

impl Default for HttpDialer {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[async_trait]
impl Dialer for HttpDialer {
    async fn dial(&self, endpoint: &str) -> Result<Arc<dyn LedgerClient>, LedgerError> {
        let url = reqwest::Url::parse(endpoint)
            .map_err(|e| LedgerError::Transport(format!("invalid endpoint {}: {}", endpoint, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(LedgerError::Transport(format!(
                "unsupported endpoint scheme '{}'",
                url.scheme()
            )));
        }
        let client = JsonRpcClient::with_timeout(endpoint, self.request_timeout)?;
        Ok(Arc::new(client))
    }
}
