//! Fetch a claimed market and prove it genuine.
//!
//! Both the market address and the creation transaction come from a link the
//! user followed, so neither is trusted. The checks below corroborate each
//! other against addresses that never come from the request:
//!
//! - the trusted namespace must contain the market (a strict ABI `true`),
//! - the market must be denominated in the trusted token,
//! - the creation transaction must carry exactly one `MarketCreated` event
//!   for this market, emitted by the trusted core contract, in logs that were
//!   not removed by a reorg.

use super::metadata::{assemble, OnChainState, SubjectMetadata};
use crate::error::StageError;
use trampoline_ledger::{
    market_created_event, Address, AddressBook, ContractAddresses, LedgerClient, LedgerError,
    LogEntry, MarketContract, MarketCreated, NamespaceContract, RemovalMark, TransactionReceipt,
    TxHash,
};

/// Networks with larger ids are local test nodes, which use a timestamp as
/// their id and do not report log removal.
const LOCAL_NETWORK_THRESHOLD: u64 = 1_000_000_000;

pub async fn fetch_subject(
    client: &dyn LedgerClient,
    addresses: &AddressBook,
    network_id: &str,
    market: Address,
    creation_tx: TxHash,
) -> Result<SubjectMetadata, StageError> {
    let trusted = addresses.resolve(network_id).await?;

    // All three run to completion; the reported failure follows check
    // order, not arrival order.
    let (legitimate, state, event) = futures::join!(
        ensure_legitimate(client, &trusted, market),
        read_state(client, market),
        creation_event(client, &trusted, network_id, market, creation_tx),
    );
    if let Some(err) = most_severe([
        legitimate.err(),
        event.as_ref().err().cloned(),
        state.as_ref().err().cloned(),
    ]) {
        return Err(err);
    }
    let (state, event) = (state?, event?);

    if state.denomination_token != trusted.token {
        return Err(StageError::UnsupportedDenomination {
            market,
            actual: state.denomination_token,
            expected: trusted.token,
        });
    }

    assemble(market, state, &event)
}

async fn ensure_legitimate(
    client: &dyn LedgerClient,
    trusted: &ContractAddresses,
    market: Address,
) -> Result<(), StageError> {
    let namespace = NamespaceContract::at(client, trusted.trusted_namespace);
    let returned = match namespace.is_container_for_market(market).await {
        Ok(true) => return Ok(()),
        Ok(false) => "false".to_string(),
        Err(LedgerError::Abi(err)) => format!("a non-boolean value ({})", err),
        Err(err) => return Err(err.into()),
    };
    Err(StageError::UnrecognizedSubject {
        namespace: trusted.trusted_namespace,
        market,
        returned,
    })
}

/// First integrity failure in check order, otherwise the first failure.
fn most_severe(failures: [Option<StageError>; 3]) -> Option<StageError> {
    let mut first = None;
    for err in failures.into_iter().flatten() {
        if err.is_integrity_failure() {
            return Some(err);
        }
        first.get_or_insert(err);
    }
    first
}

/// A getter of the claimed market answered with something that is not its
/// declared return type. The address is user supplied, so this is a property
/// of the market, not of the connection.
fn market_reply(market: Address, getter: &'static str) -> impl Fn(LedgerError) -> StageError {
    move |err| match err {
        LedgerError::Abi(err) => StageError::malformed(format!(
            "market {} answered {} with an invalid value ({})",
            market, getter, err
        )),
        err => err.into(),
    }
}

async fn read_state(
    client: &dyn LedgerClient,
    market: Address,
) -> Result<OnChainState, StageError> {
    let contract = MarketContract::at(client, market);
    let (number_of_outcomes, num_ticks, denomination_token, end_time, is_finalized) =
        futures::try_join!(
            async {
                contract
                    .number_of_outcomes()
                    .await
                    .map_err(market_reply(market, "getNumberOfOutcomes"))
            },
            async {
                contract
                    .num_ticks()
                    .await
                    .map_err(market_reply(market, "getNumTicks"))
            },
            async {
                contract
                    .denomination_token()
                    .await
                    .map_err(market_reply(market, "getDenominationToken"))
            },
            async {
                contract
                    .end_time()
                    .await
                    .map_err(market_reply(market, "getEndTime"))
            },
            async {
                contract
                    .is_finalized()
                    .await
                    .map_err(market_reply(market, "isFinalized"))
            },
        )?;
    Ok(OnChainState {
        number_of_outcomes,
        num_ticks,
        denomination_token,
        end_time,
        is_finalized,
    })
}

async fn creation_event(
    client: &dyn LedgerClient,
    trusted: &ContractAddresses,
    network_id: &str,
    market: Address,
    creation_tx: TxHash,
) -> Result<MarketCreated, StageError> {
    let receipt = client
        .transaction_receipt(&creation_tx)
        .await?
        .ok_or_else(|| StageError::unknown_transaction(creation_tx))?;
    find_creation_event(&receipt, trusted.core, network_id, market)
}

/// Accept a log only when it is positively not removed. A missing removal
/// flag is tolerated on local test networks for mined logs, nowhere else.
pub fn check_removal(
    log: &LogEntry,
    network_id: &str,
    transaction: TxHash,
) -> Result<(), StageError> {
    let local_network = network_id
        .parse::<u64>()
        .map_or(false, |id| id > LOCAL_NETWORK_THRESHOLD);
    let accepted = match &log.removed {
        RemovalMark::NotRemoved => true,
        RemovalMark::Missing => local_network && log.log_type.as_deref() == Some("mined"),
        RemovalMark::Removed | RemovalMark::Unrecognized(_) => false,
    };
    if accepted {
        return Ok(());
    }
    Err(StageError::SuspiciousLog {
        transaction,
        removed: log.removed.describe(),
        log_type: log
            .log_type
            .clone()
            .unwrap_or_else(|| "undefined".to_string()),
    })
}

/// The single `MarketCreated` event for `market` that `core` logged in
/// `receipt`.
pub fn find_creation_event(
    receipt: &TransactionReceipt,
    core: Address,
    network_id: &str,
    market: Address,
) -> Result<MarketCreated, StageError> {
    let schema = market_created_event();
    let trusted: Vec<&LogEntry> = receipt
        .logs
        .iter()
        .filter(|log| log.address == core)
        .collect();
    for log in &trusted {
        check_removal(log, network_id, receipt.transaction_hash)?;
    }

    let mut matching = Vec::new();
    for log in trusted.into_iter().filter(|log| schema.matches(&log.topics)) {
        let decoded = schema
            .decode_log(&log.topics, &log.data)
            .map_err(StageError::malformed)?;
        let created = MarketCreated::from_event(&decoded).map_err(StageError::malformed)?;
        if created.market == market {
            matching.push(created);
        }
    }

    match <[MarketCreated; 1]>::try_from(matching) {
        Ok([event]) => Ok(event),
        Err(found) => Err(StageError::creation_events(found.len())),
    }
}
