//! In-memory ledger with scripted replies, for tests and offline demos.

use crate::client::{Dialer, LedgerClient, LedgerError, TransactionReceipt};
use crate::primitives::{Address, TxHash};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone)]
enum Behaviour {
    Answer,
    /// Every call fails with this error.
    Fail(LedgerError),
    /// Every call waits forever.
    Hang,
}

#[derive(Debug, Clone)]
pub struct ScriptedLedger {
    network_id: String,
    block_number: u64,
    accounts: Vec<Address>,
    receipts: HashMap<TxHash, TransactionReceipt>,
    calls: HashMap<(Address, Vec<u8>), Result<Vec<u8>, LedgerError>>,
    behaviour: Behaviour,
    requests: Arc<AtomicUsize>,
}

impl ScriptedLedger {
    pub fn new(network_id: &str) -> Self {
        Self {
            network_id: network_id.to_string(),
            block_number: 1,
            accounts: Vec::new(),
            receipts: HashMap::new(),
            calls: HashMap::new(),
            behaviour: Behaviour::Answer,
            requests: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_block_number(mut self, block_number: u64) -> Self {
        self.block_number = block_number;
        self
    }

    pub fn with_accounts(mut self, accounts: Vec<Address>) -> Self {
        self.accounts = accounts;
        self
    }

    pub fn with_receipt(mut self, receipt: TransactionReceipt) -> Self {
        self.receipts.insert(receipt.transaction_hash, receipt);
        self
    }

    /// Answer `eth_call(to, data)` with `reply`.
    pub fn with_call(mut self, to: Address, data: Vec<u8>, reply: Vec<u8>) -> Self {
        self.calls.insert((to, data), Ok(reply));
        self
    }

    pub fn with_call_error(mut self, to: Address, data: Vec<u8>, err: LedgerError) -> Self {
        self.calls.insert((to, data), Err(err));
        self
    }

    pub fn failing(mut self, err: LedgerError) -> Self {
        self.behaviour = Behaviour::Fail(err);
        self
    }

    pub fn unresponsive(mut self) -> Self {
        self.behaviour = Behaviour::Hang;
        self
    }

    /// Number of requests received so far, across clones.
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    async fn enter(&self) -> Result<(), LedgerError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        match &self.behaviour {
            Behaviour::Answer => Ok(()),
            Behaviour::Fail(err) => Err(err.clone()),
            Behaviour::Hang => std::future::pending().await,
        }
    }
}

#[async_trait]
impl LedgerClient for ScriptedLedger {
    async fn accounts(&self) -> Result<Vec<Address>, LedgerError> {
        self.enter().await?;
        Ok(self.accounts.clone())
    }

    async fn network_id(&self) -> Result<String, LedgerError> {
        self.enter().await?;
        Ok(self.network_id.clone())
    }

    async fn block_number(&self) -> Result<u64, LedgerError> {
        self.enter().await?;
        Ok(self.block_number)
    }

    async fn transaction_receipt(
        &self,
        hash: &TxHash,
    ) -> Result<Option<TransactionReceipt>, LedgerError> {
        self.enter().await?;
        Ok(self.receipts.get(hash).cloned())
    }

    async fn call(&self, to: &Address, data: &[u8]) -> Result<Vec<u8>, LedgerError> {
        self.enter().await?;
        self.calls
            .get(&(*to, data.to_vec()))
            .cloned()
            .unwrap_or_else(|| {
                Err(LedgerError::Rpc {
                    code: -32000,
                    message: "execution reverted".to_string(),
                })
            })
    }
}

/// Dialer over a fixed set of scripted endpoints. Unknown endpoints refuse
/// the connection.
#[derive(Default, Clone)]
pub struct ScriptedDialer {
    endpoints: HashMap<String, Arc<dyn LedgerClient>>,
    dialed: Arc<std::sync::Mutex<Vec<String>>>,
}

impl ScriptedDialer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_endpoint(mut self, endpoint: &str, client: Arc<dyn LedgerClient>) -> Self {
        self.endpoints.insert(endpoint.to_string(), client);
        self
    }

    /// Endpoints dialed so far, in order.
    pub fn dialed(&self) -> Vec<String> {
        self.dialed
            .lock()
            .map(|dialed| dialed.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Dialer for ScriptedDialer {
    async fn dial(&self, endpoint: &str) -> Result<Arc<dyn LedgerClient>, LedgerError> {
        if let Ok(mut dialed) = self.dialed.lock() {
            dialed.push(endpoint.to_string());
        }
        self.endpoints
            .get(endpoint)
            .cloned()
            .ok_or_else(|| LedgerError::Transport(format!("connection refused: {}", endpoint)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unscripted_call_reverts() {
        let ledger = ScriptedLedger::new("4");
        let err = ledger
            .call(&Address::new([1; 20]), &[0xde, 0xad])
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Rpc { code: -32000, .. }));
        assert_eq!(ledger.request_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unresponsive_ledger_never_answers() {
        let ledger = ScriptedLedger::new("4").unresponsive();
        let waited =
            tokio::time::timeout(std::time::Duration::from_secs(60), ledger.network_id()).await;
        assert!(waited.is_err());
    }
}
