//! Trade trampoline stages.
//!
//! A trade request arrives through a link. Before anything is signed the
//! pipeline connects to a node of the requested network, selects the account
//! to trade with, and proves that the linked market is genuine:
//!
//! ```text
//! Request -> NetworkConnector -> IdentitySelector -> SubjectVerifier
//! ```
//!
//! Each stage is a [`trampoline_engine::Step`]; [`trade_pipeline`] chains them.

#![deny(unsafe_code)]

pub mod config;
pub mod connect;
pub mod error;
pub mod identity;
pub mod pipeline;
pub mod request;
pub mod verify;

pub use config::{AddressConfig, ConnectorConfig};
pub use connect::{
    candidate_plan, connect, Candidate, CandidateSource, ConnectMessage, ConnectView, Connected,
    Connection, Environment, HostEnvironment, NetworkConnector, ReadyGate,
};
pub use error::StageError;
pub use identity::{select_identity, Identified, IdentityMessage, IdentitySelector, IdentityView};
pub use pipeline::{
    configure_endpoint, progress, retry_connection, retry_identity, retry_verification,
    trade_pipeline, Progress, Stage, TradeMessage, TradePipeline, TradeView,
};
pub use request::{RawRequest, Request, RequestError, TradeAction};
pub use verify::{
    fetch_subject, SubjectKind, SubjectMetadata, SubjectVerifier, VerifyMessage, VerifyView,
};
