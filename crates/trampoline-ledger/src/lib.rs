//! Ledger access for the trampoline.
//!
//! Fixed-size primitives, a strict contract ABI codec, the asynchronous
//! [`LedgerClient`] surface with its HTTP JSON-RPC implementation, and the
//! trusted per-network contract address book.

#![deny(unsafe_code)]

pub mod abi;
pub mod addresses;
pub mod client;
pub mod contracts;
pub mod jsonrpc;
pub mod primitives;
pub mod scripted;

pub use abi::{AbiError, DecodedEvent, Event, EventParam, Function, ParamType, Token};
pub use addresses::{
    pinned_addresses, AddressBook, AddressError, AddressSource, ContractAddresses,
    DevAddressSource, MAINNET, RINKEBY,
};
pub use client::{Dialer, LedgerClient, LedgerError, LogEntry, RemovalMark, TransactionReceipt};
pub use contracts::{market_created_event, MarketContract, MarketCreated, NamespaceContract};
pub use jsonrpc::{HttpDialer, JsonRpcClient};
pub use primitives::{Address, Int256, ParseError, TxHash, Uint256, H256};
pub use scripted::{ScriptedDialer, ScriptedLedger};
