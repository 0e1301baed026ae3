//! The trade pipeline: connect, pick an identity, verify the market.

use crate::config::ConnectorConfig;
use crate::connect::{ConnectMessage, ConnectView, Environment, NetworkConnector};
use crate::identity::{IdentityMessage, IdentitySelector, IdentityView};
use crate::verify::{SubjectMetadata, SubjectVerifier, VerifyMessage, VerifyView};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use trampoline_engine::{chain, Chain, ChainMessage, ChainView};
use trampoline_ledger::{AddressBook, Dialer};

pub type TradePipeline = Chain<NetworkConnector, Chain<IdentitySelector, SubjectVerifier>>;
pub type TradeMessage = ChainMessage<ConnectMessage, ChainMessage<IdentityMessage, VerifyMessage>>;
pub type TradeView = ChainView<ConnectView, ChainView<IdentityView, VerifyView>>;

pub fn trade_pipeline(
    config: ConnectorConfig,
    environment: Arc<dyn Environment>,
    dialer: Arc<dyn Dialer>,
    addresses: Arc<AddressBook>,
) -> TradePipeline {
    chain(
        NetworkConnector::new(config, environment, dialer),
        chain(IdentitySelector::new(), SubjectVerifier::new(addresses)),
    )
}

pub fn retry_connection() -> TradeMessage {
    ChainMessage::First(ConnectMessage::Retry)
}

/// Probe only `endpoint` from now on; `None` restores the default plan.
pub fn configure_endpoint(endpoint: Option<String>) -> TradeMessage {
    ChainMessage::First(ConnectMessage::Configure { endpoint })
}

pub fn retry_identity() -> TradeMessage {
    ChainMessage::to_current_second(ChainMessage::First(IdentityMessage::Retry))
}

pub fn retry_verification() -> TradeMessage {
    ChainMessage::to_current_second(ChainMessage::to_current_second(VerifyMessage::Retry))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Connect,
    Identity,
    Verify,
}

impl Stage {
    /// The user command that re-runs this stage.
    pub fn retry(self) -> TradeMessage {
        match self {
            Self::Connect => retry_connection(),
            Self::Identity => retry_identity(),
            Self::Verify => retry_verification(),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Connect => "connect",
            Self::Identity => "identity",
            Self::Verify => "verify",
        })
    }
}

/// Where the pipeline stands as a whole.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Progress {
    Running,
    Verified(SubjectMetadata),
    Failed {
        stage: Stage,
        reason: String,
        integrity: bool,
    },
}

impl Progress {
    pub fn is_settled(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

fn failed(stage: Stage, reason: &str, integrity: bool) -> Progress {
    Progress::Failed {
        stage,
        reason: reason.to_string(),
        integrity,
    }
}

pub fn progress(view: &TradeView) -> Progress {
    if let Some(reason) = view.first.status.failure() {
        return failed(Stage::Connect, reason, false);
    }
    let Some(identified) = &view.second else {
        return Progress::Running;
    };
    if let Some(reason) = identified.first.status.failure() {
        return failed(Stage::Identity, reason, false);
    }
    let Some(verify) = &identified.second else {
        return Progress::Running;
    };
    if let Some(metadata) = verify.status.succeeded() {
        return Progress::Verified(metadata.clone());
    }
    match verify.status.failure() {
        Some(reason) => failed(Stage::Verify, reason, verify.integrity_failure),
        None => Progress::Running,
    }
}
