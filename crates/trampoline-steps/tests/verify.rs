mod common;

use async_trait::async_trait;
use common::{unmarked, MarketFixture, LOCAL_NETWORK};
use std::time::Duration;
use trampoline_engine::{PipelineDriver, StageStatus};
use trampoline_ledger::abi::encode;
use trampoline_ledger::{
    Address, LedgerClient, LedgerError, RemovalMark, ScriptedLedger, Token, TransactionReceipt,
    TxHash, Uint256,
};
use trampoline_steps::{fetch_subject, StageError, SubjectKind, SubjectVerifier, VerifyMessage};

async fn fetch(fixture: &MarketFixture) -> Result<trampoline_steps::SubjectMetadata, StageError> {
    let ledger = fixture.ledger();
    fetch_subject(
        &ledger,
        &fixture.address_book(),
        &fixture.network_id,
        fixture.market,
        fixture.creation_tx,
    )
    .await
}

#[tokio::test]
async fn genuine_market_assembles_event_fields() {
    let fixture = MarketFixture::genuine("4");
    let metadata = fetch(&fixture).await.unwrap();

    assert_eq!(metadata.market, fixture.market);
    assert_eq!(metadata.description, fixture.event.description);
    assert_eq!(metadata.long_description, "Any rain counts.");
    assert_eq!(metadata.resolution_source, "https://weather.example");
    assert_eq!(metadata.outcomes, vec!["Yes", "No"]);
    assert_eq!(metadata.market_creation_fee, fixture.event.market_creation_fee);
    assert_eq!(metadata.min_price, fixture.event.min_price);
    assert_eq!(metadata.max_price, fixture.event.max_price);
    assert_eq!(metadata.kind, SubjectKind::YesNo);
    assert_eq!(metadata.number_of_outcomes, Uint256::from(2u64));
    assert_eq!(metadata.denomination_token, fixture.trusted.token);
    assert!(!metadata.is_finalized);
}

#[tokio::test]
async fn string_true_is_not_membership() {
    let mut fixture = MarketFixture::genuine("4");
    fixture.membership_reply = encode(&[Token::String("true".into())]);

    let err = fetch(&fixture).await.unwrap_err();
    assert!(matches!(err, StageError::UnrecognizedSubject { .. }), "{err}");
    assert!(err.is_integrity_failure());
}

#[tokio::test]
async fn false_membership_is_rejected() {
    let mut fixture = MarketFixture::genuine("4");
    fixture.membership_reply = encode(&[Token::Bool(false)]);

    let err = fetch(&fixture).await.unwrap_err();
    assert_eq!(
        err,
        StageError::UnrecognizedSubject {
            namespace: fixture.trusted.trusted_namespace,
            market: fixture.market,
            returned: "false".into(),
        }
    );
}

#[tokio::test]
async fn event_from_untrusted_emitter_is_ignored() {
    let mut fixture = MarketFixture::genuine("4");
    fixture.logs = vec![fixture.logged_by(Address::new([0xee; 20]))];

    assert_eq!(
        fetch(&fixture).await.unwrap_err(),
        StageError::creation_events(0)
    );
}

#[tokio::test]
async fn duplicate_creation_events_are_ambiguous() {
    let mut fixture = MarketFixture::genuine("4");
    let duplicate = fixture.logged_by(fixture.trusted.core);
    fixture.logs.push(duplicate);

    assert_eq!(
        fetch(&fixture).await.unwrap_err(),
        StageError::creation_events(2)
    );
}

#[tokio::test]
async fn event_for_another_market_does_not_count() {
    let mut fixture = MarketFixture::genuine("4");
    let mut other = fixture.event.clone();
    other.market = Address::new([0xbb; 20]);
    fixture.logs = vec![other.to_log(fixture.trusted.core).unwrap()];

    assert_eq!(
        fetch(&fixture).await.unwrap_err(),
        StageError::creation_events(0)
    );
}

#[tokio::test]
async fn removed_log_is_suspicious() {
    let mut fixture = MarketFixture::genuine("4");
    fixture.logs = vec![unmarked(
        fixture.logs[0].clone(),
        RemovalMark::Removed,
        Some("mined"),
    )];

    let err = fetch(&fixture).await.unwrap_err();
    assert!(matches!(err, StageError::SuspiciousLog { ref removed, .. } if removed == "true"));
}

#[tokio::test]
async fn missing_removal_flag_passes_on_local_network() {
    let mut fixture = MarketFixture::genuine(LOCAL_NETWORK);
    fixture.logs = vec![unmarked(
        fixture.logs[0].clone(),
        RemovalMark::Missing,
        Some("mined"),
    )];

    assert!(fetch(&fixture).await.is_ok());
}

#[tokio::test]
async fn missing_removal_flag_fails_on_public_network() {
    let mut fixture = MarketFixture::genuine("4");
    fixture.logs = vec![unmarked(
        fixture.logs[0].clone(),
        RemovalMark::Missing,
        Some("mined"),
    )];

    let err = fetch(&fixture).await.unwrap_err();
    assert!(err.to_string().contains("removed=undefined, and type=mined"));
}

#[tokio::test]
async fn foreign_denomination_is_unsupported() {
    let mut fixture = MarketFixture::genuine("4");
    fixture.denomination = Address::new([0xcc; 20]);

    assert_eq!(
        fetch(&fixture).await.unwrap_err(),
        StageError::UnsupportedDenomination {
            market: fixture.market,
            actual: Address::new([0xcc; 20]),
            expected: fixture.trusted.token,
        }
    );
}

#[tokio::test]
async fn malformed_extra_info_is_fatal() {
    let mut fixture = MarketFixture::genuine("4");
    fixture.event.extra_info = r#"{"resolutionSource":"x"}"#.into();
    fixture.logs = vec![fixture.logged_by(fixture.trusted.core)];

    assert!(matches!(
        fetch(&fixture).await.unwrap_err(),
        StageError::MalformedMetadata(_)
    ));
}

#[tokio::test]
async fn missing_resolution_source_defaults_to_empty() {
    let mut fixture = MarketFixture::genuine("4");
    fixture.event.extra_info = r#"{"longDescription":"x","_scalarDenomination":"mm"}"#.into();
    fixture.event.market_type = 2;
    fixture.logs = vec![fixture.logged_by(fixture.trusted.core)];

    let metadata = fetch(&fixture).await.unwrap();
    assert_eq!(metadata.resolution_source, "");
    assert_eq!(metadata.scalar_denomination.as_deref(), Some("mm"));
    assert_eq!(metadata.kind, SubjectKind::Scalar);
}

#[tokio::test]
async fn unknown_network_has_no_trusted_addresses() {
    let fixture = MarketFixture::genuine("4");
    let ledger = fixture.ledger();
    let err = fetch_subject(
        &ledger,
        &trampoline_ledger::AddressBook::pinned(),
        "1337",
        fixture.market,
        fixture.creation_tx,
    )
    .await
    .unwrap_err();
    assert_eq!(err, StageError::UnknownNetwork("1337".into()));
}

#[tokio::test]
async fn transport_failure_is_retryable() {
    let fixture = MarketFixture::genuine("4");
    let ledger = fixture
        .ledger()
        .failing(LedgerError::Transport("connection reset".into()));
    let err = fetch_subject(
        &ledger,
        &fixture.address_book(),
        "4",
        fixture.market,
        fixture.creation_tx,
    )
    .await
    .unwrap_err();
    assert!(err.is_retryable());
    assert!(!err.is_integrity_failure());
}

/// Answers the namespace contract only after every other call.
struct SlowNamespace {
    inner: ScriptedLedger,
    namespace: Address,
}

#[async_trait]
impl LedgerClient for SlowNamespace {
    async fn accounts(&self) -> Result<Vec<Address>, LedgerError> {
        self.inner.accounts().await
    }

    async fn network_id(&self) -> Result<String, LedgerError> {
        self.inner.network_id().await
    }

    async fn block_number(&self) -> Result<u64, LedgerError> {
        self.inner.block_number().await
    }

    async fn transaction_receipt(
        &self,
        hash: &TxHash,
    ) -> Result<Option<TransactionReceipt>, LedgerError> {
        self.inner.transaction_receipt(hash).await
    }

    async fn call(&self, to: &Address, data: &[u8]) -> Result<Vec<u8>, LedgerError> {
        if *to == self.namespace {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        self.inner.call(to, data).await
    }
}

#[tokio::test(start_paused = true)]
async fn late_namespace_rejection_wins_over_market_without_code() {
    let mut fixture = MarketFixture::genuine("4");
    fixture.membership_reply = encode(&[Token::Bool(false)]);
    let ledger = SlowNamespace {
        inner: fixture.without_market_code(fixture.ledger()),
        namespace: fixture.trusted.trusted_namespace,
    };

    let err = fetch_subject(
        &ledger,
        &fixture.address_book(),
        "4",
        fixture.market,
        fixture.creation_tx,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, StageError::UnrecognizedSubject { .. }), "{err}");
    assert!(err.is_integrity_failure());
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn market_without_code_is_malformed_not_transport() {
    let fixture = MarketFixture::genuine("4");
    let ledger = fixture.without_market_code(fixture.ledger());

    let err = fetch_subject(
        &ledger,
        &fixture.address_book(),
        "4",
        fixture.market,
        fixture.creation_tx,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, StageError::MalformedMetadata(_)), "{err}");
    assert!(err.to_string().contains(&fixture.market.to_string()));
    assert!(err.is_integrity_failure());
}

#[tokio::test]
async fn creation_proof_failure_outranks_transport_failure_of_the_market() {
    let mut fixture = MarketFixture::genuine("4");
    fixture.logs.clear();
    let ledger = fixture.ledger().with_call_error(
        fixture.market,
        trampoline_ledger::contracts::market::get_end_time()
            .encode_call(&[])
            .unwrap(),
        LedgerError::Transport("connection reset".into()),
    );

    let err = fetch_subject(
        &ledger,
        &fixture.address_book(),
        "4",
        fixture.market,
        fixture.creation_tx,
    )
    .await
    .unwrap_err();
    assert_eq!(err, StageError::creation_events(0));
}

#[tokio::test]
async fn stage_passes_input_through_on_success() {
    let fixture = MarketFixture::genuine("4");
    let mut driver =
        PipelineDriver::start(SubjectVerifier::new(fixture.address_book()), fixture.identified())
            .unwrap();
    driver
        .run_until(|d| d.external_state().output.is_ready())
        .await
        .unwrap();

    let output = driver.external_state().output.result().cloned().unwrap();
    assert!(std::sync::Arc::ptr_eq(&output, driver.input()));

    let view = driver.view().unwrap();
    assert!(!view.having_errors);
    assert_eq!(
        view.status.succeeded().map(|m| m.market),
        Some(fixture.market)
    );
}

#[tokio::test]
async fn stage_failure_raises_having_errors_and_retry_reruns() {
    let mut fixture = MarketFixture::genuine("4");
    fixture.logs.clear();
    let mut driver =
        PipelineDriver::start(SubjectVerifier::new(fixture.address_book()), fixture.identified())
            .unwrap();
    driver
        .run_until(|d| d.view().map_or(false, |v| v.status.is_terminal()))
        .await
        .unwrap();

    let view = driver.view().unwrap();
    assert!(view.having_errors);
    assert!(view.integrity_failure);
    assert_eq!(
        view.status,
        StageStatus::Failed {
            reason: "Expected to have one MarketCreated event, got 0".into()
        }
    );
    assert!(!driver.external_state().output.is_ready());

    driver.dispatch(VerifyMessage::Retry).unwrap();
    assert!(driver.view().unwrap().status.is_running());
    driver
        .run_until(|d| d.view().map_or(false, |v| v.status.is_terminal()))
        .await
        .unwrap();
    assert!(driver.view().unwrap().having_errors);
}
