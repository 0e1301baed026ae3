use thiserror::Error;
use trampoline_engine::Cancelled;
use trampoline_ledger::{Address, AddressError, LedgerError, TxHash};

/// Failures of a single stage run.
///
/// A stage turns these into its own `Failed` state; they never cross the
/// stage boundary as errors. Integrity failures mean the claimed market could
/// not be proven genuine and must never be downgraded to a warning.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StageError {
    #[error("{0}")]
    Transport(String),

    #[error("timed out")]
    Timeout,

    #[error("This node belongs to wrong network. It is in {actual}, while we want {expected}")]
    WrongNetwork { expected: String, actual: String },

    #[error("Could not establish an Ethereum connection")]
    NoReachableNetwork,

    #[error("Could not find an Ethereum account")]
    NoIdentityAvailable,

    #[error("Do not know how to get contract addresses for network {0}")]
    UnknownNetwork(String),

    #[error(
        "Trusted universe {namespace} did not recognize market {market} as legitimate \
         (it returned {returned}). Failing to avoid scam."
    )]
    UnrecognizedSubject {
        namespace: Address,
        market: Address,
        returned: String,
    },

    #[error(
        "Market {market} returned {actual} as denomination token. \
         We only support the trusted token ({expected}) at the moment."
    )]
    UnsupportedDenomination {
        market: Address,
        actual: Address,
        expected: Address,
    },

    #[error(
        "We observed transaction {transaction} with logs that are marked as removed={removed}, \
         and type={log_type}. This may be an attempt of scam, or a technical issue."
    )]
    SuspiciousLog {
        transaction: TxHash,
        removed: String,
        log_type: String,
    },

    #[error("{0}")]
    AmbiguousOrMissingCreationProof(String),

    #[error("Malformed market metadata: {0}")]
    MalformedMetadata(String),

    #[error("callback has been cancelled")]
    Cancelled,
}

impl StageError {
    pub fn creation_events(found: usize) -> Self {
        Self::AmbiguousOrMissingCreationProof(format!(
            "Expected to have one MarketCreated event, got {}",
            found
        ))
    }

    pub fn unknown_transaction(transaction: TxHash) -> Self {
        Self::AmbiguousOrMissingCreationProof(format!(
            "Transaction {} is not known to the network",
            transaction
        ))
    }

    pub fn malformed(detail: impl std::fmt::Display) -> Self {
        Self::MalformedMetadata(detail.to_string())
    }

    /// The claimed market could not be proven genuine.
    pub fn is_integrity_failure(&self) -> bool {
        matches!(
            self,
            Self::UnrecognizedSubject { .. }
                | Self::UnsupportedDenomination { .. }
                | Self::SuspiciousLog { .. }
                | Self::AmbiguousOrMissingCreationProof(_)
                | Self::MalformedMetadata(_)
        )
    }

    /// Transport-level failures, worth re-running the stage for.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout)
    }
}

impl From<LedgerError> for StageError {
    fn from(err: LedgerError) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<AddressError> for StageError {
    fn from(err: AddressError) -> Self {
        match err {
            AddressError::UnknownNetwork(network) => Self::UnknownNetwork(network),
            AddressError::Source(detail) => Self::Transport(detail),
        }
    }
}

impl From<Cancelled> for StageError {
    fn from(_: Cancelled) -> Self {
        Self::Cancelled
    }
}
