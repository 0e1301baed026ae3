mod common;

use common::{plan_config, request, Hold, Lock, MarketFixture};
use std::sync::Arc;
use trampoline_engine::{chain, ChainMessage, PipelineDriver, Step};
use trampoline_ledger::{LedgerClient, ScriptedDialer, ScriptedLedger};
use trampoline_steps::{
    ConnectMessage, Connected, HostEnvironment, Identified, IdentityMessage, IdentitySelector,
    NetworkConnector, Request, SubjectVerifier, VerifyMessage,
};

type Second<S> = ChainMessage<Hold, <S as Step>::Message>;

fn command<S: Step>(message: S::Message) -> Second<S> {
    ChainMessage::to_current_second(message)
}

fn release<S: Step>() -> Second<S> {
    ChainMessage::First(Hold(false))
}

#[tokio::test]
async fn locked_connector_ignores_retry_and_endpoint_changes() {
    let good: Arc<dyn LedgerClient> = Arc::new(ScriptedLedger::new("4").with_block_number(42));
    let dialer = ScriptedDialer::new()
        .with_endpoint("http://good", good)
        .with_endpoint("http://other", Arc::new(ScriptedLedger::new("4")));
    let connector = NetworkConnector::new(
        plan_config("http://good", &[]),
        Arc::new(HostEnvironment::ready_now(None)),
        Arc::new(dialer.clone()),
    );
    let locked = chain(Lock::<Request>::new(), connector);
    let mut driver = PipelineDriver::start(locked, request("4")).unwrap();
    driver
        .run_until(|d| d.external_state().output.is_ready())
        .await
        .unwrap();
    assert!(driver.locked());

    let before = driver.view().unwrap().second.unwrap();
    let output = driver.external_state().output.clone();
    assert!(before.immutable);

    driver
        .dispatch(command::<NetworkConnector>(ConnectMessage::Retry))
        .unwrap();
    driver
        .dispatch(command::<NetworkConnector>(ConnectMessage::Configure {
            endpoint: Some("http://other".into()),
        }))
        .unwrap();

    assert_eq!(driver.view().unwrap().second.unwrap(), before);
    assert_eq!(driver.external_state().output, output);
    assert_eq!(dialer.dialed(), vec!["http://good"]);

    driver.dispatch(release::<NetworkConnector>()).unwrap();
    assert!(!driver.locked());
    driver
        .dispatch(command::<NetworkConnector>(ConnectMessage::Retry))
        .unwrap();
    assert!(driver.view().unwrap().second.unwrap().status.is_running());
}

#[tokio::test]
async fn locked_identity_selector_ignores_retry() {
    let fixture = MarketFixture::genuine("4");
    let locked = chain(Lock::<Connected>::new(), IdentitySelector::new());
    let mut driver = PipelineDriver::start(locked, fixture.connected()).unwrap();
    driver
        .run_until(|d| d.external_state().output.is_ready())
        .await
        .unwrap();

    let before = driver.view().unwrap().second.unwrap();
    let output = driver.external_state().output.clone();
    assert!(before.immutable);

    driver
        .dispatch(command::<IdentitySelector>(IdentityMessage::Retry))
        .unwrap();
    assert_eq!(driver.view().unwrap().second.unwrap(), before);
    assert_eq!(driver.external_state().output, output);

    driver.dispatch(release::<IdentitySelector>()).unwrap();
    driver
        .dispatch(command::<IdentitySelector>(IdentityMessage::Retry))
        .unwrap();
    let after = driver.view().unwrap().second.unwrap();
    assert!(!after.immutable);
    assert!(after.status.is_running());
    assert!(!driver.external_state().output.is_ready());
}

#[tokio::test]
async fn locked_verifier_keeps_its_failure_on_retry() {
    let mut fixture = MarketFixture::genuine("4");
    fixture.logs.clear();
    let locked = chain(
        Lock::<Identified>::new(),
        SubjectVerifier::new(fixture.address_book()),
    );
    let mut driver = PipelineDriver::start(locked, fixture.identified()).unwrap();
    driver
        .run_until(|d| {
            d.view()
                .and_then(|v| v.second)
                .map_or(false, |v| v.status.is_terminal())
        })
        .await
        .unwrap();

    let before = driver.view().unwrap().second.unwrap();
    assert!(before.immutable);
    assert!(before.having_errors);

    driver
        .dispatch(command::<SubjectVerifier>(VerifyMessage::Retry))
        .unwrap();
    assert_eq!(driver.view().unwrap().second.unwrap(), before);
    assert!(!driver.external_state().output.is_ready());

    driver.dispatch(release::<SubjectVerifier>()).unwrap();
    driver
        .dispatch(command::<SubjectVerifier>(VerifyMessage::Retry))
        .unwrap();
    assert!(driver.view().unwrap().second.unwrap().status.is_running());
}
