mod common;

use common::{plan_config, request};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use trampoline_engine::PipelineDriver;
use trampoline_ledger::{Dialer, LedgerClient, ScriptedDialer, ScriptedLedger};
use trampoline_steps::{
    candidate_plan, connect, ConnectMessage, ConnectorConfig, Environment, HostEnvironment,
    NetworkConnector, StageError,
};

fn scripted(network: &str) -> Arc<dyn LedgerClient> {
    Arc::new(ScriptedLedger::new(network).with_block_number(42))
}

fn probing_dialer() -> ScriptedDialer {
    ScriptedDialer::new()
        .with_endpoint(
            "http://hang",
            Arc::new(ScriptedLedger::new("4").unresponsive()),
        )
        .with_endpoint("http://wrong", scripted("1"))
        .with_endpoint("http://good", scripted("4"))
}

fn ready_environment() -> Arc<dyn Environment> {
    Arc::new(HostEnvironment::ready_now(None))
}

#[tokio::test(start_paused = true)]
async fn settles_on_first_candidate_passing_every_check() {
    let config = plan_config("http://hang", &["http://wrong", "http://good"]);
    let plan = candidate_plan(&config, None);
    let dialer = probing_dialer();
    let lines = Mutex::new(Vec::new());
    let log = |line: String| -> Result<(), StageError> {
        lines.lock().unwrap().push(line);
        Ok(())
    };

    let connection = connect(
        &request("4"),
        &plan,
        ready_environment().as_ref(),
        &dialer,
        config.candidate_timeout(),
        &log,
    )
    .await
    .unwrap();

    assert_eq!(connection.description, "http://good");
    assert_eq!(connection.network_id, "4");

    let lines = lines.into_inner().unwrap();
    let failures: Vec<&String> = lines
        .iter()
        .filter(|line| line.starts_with("Failed to connect to"))
        .collect();
    assert_eq!(
        failures,
        vec![
            "Failed to connect to http://hang: timed out",
            "Failed to connect to http://wrong: This node belongs to wrong network. \
             It is in 1, while we want 4",
        ]
    );
    assert!(lines.contains(&"Block number for <http://good> is 42".to_string()));
    assert_eq!(lines.last().map(String::as_str), Some("Choosing <http://good>"));
}

#[tokio::test(start_paused = true)]
async fn exhausted_plan_is_no_reachable_network() {
    let config = plan_config("http://hang", &["http://refused"]);
    let err = connect(
        &request("4"),
        &candidate_plan(&config, None),
        ready_environment().as_ref(),
        &probing_dialer(),
        Duration::from_millis(config.candidate_timeout_ms),
        &|_| Ok(()),
    )
    .await
    .unwrap_err();
    assert_eq!(err, StageError::NoReachableNetwork);
}

#[tokio::test]
async fn cancelled_log_stops_the_attempt() {
    let dialer = probing_dialer();
    let err = connect(
        &request("4"),
        &candidate_plan(&plan_config("http://good", &[]), None),
        ready_environment().as_ref(),
        &dialer,
        Duration::from_secs(5),
        &|_| Err(StageError::Cancelled),
    )
    .await
    .unwrap_err();
    assert_eq!(err, StageError::Cancelled);
    assert!(dialer.dialed().is_empty());
}

#[tokio::test]
async fn absent_injected_provider_is_skipped() {
    let config = ConnectorConfig {
        local_endpoint: "http://good".into(),
        public_endpoints: Vec::new(),
        ..ConnectorConfig::default()
    };
    let lines = Mutex::new(Vec::new());
    let log = |line: String| -> Result<(), StageError> {
        lines.lock().unwrap().push(line);
        Ok(())
    };

    let connection = connect(
        &request("4"),
        &candidate_plan(&config, None),
        ready_environment().as_ref(),
        &probing_dialer(),
        config.candidate_timeout(),
        &log,
    )
    .await
    .unwrap();

    assert_eq!(connection.description, "http://good");
    assert!(lines.into_inner().unwrap().contains(
        &"Failed to connect to injected provider: ledger provider is unavailable".to_string()
    ));
}

#[tokio::test]
async fn injected_provider_is_preferred() {
    let config = ConnectorConfig::default();
    let environment = HostEnvironment::ready_now(Some(scripted("4")));
    let dialer = probing_dialer();

    let connection = connect(
        &request("4"),
        &candidate_plan(&config, None),
        &environment,
        &dialer,
        config.candidate_timeout(),
        &|_| Ok(()),
    )
    .await
    .unwrap();

    assert_eq!(connection.description, "injected provider");
    assert!(dialer.dialed().is_empty());
}

#[tokio::test]
async fn probing_waits_for_the_environment() {
    let (environment, gate) = HostEnvironment::gated(None);
    let dialer: Arc<dyn Dialer> = Arc::new(probing_dialer());
    let connector = NetworkConnector::new(
        plan_config("http://good", &[]),
        Arc::new(environment),
        dialer,
    );
    let mut driver = PipelineDriver::start(connector, request("4")).unwrap();
    for _ in 0..5 {
        tokio::task::yield_now().await;
    }
    while let Ok(message) = tokio::time::timeout(Duration::from_millis(10), driver.next()).await {
        message.unwrap();
    }
    let texts: Vec<String> = driver
        .view()
        .unwrap()
        .log
        .texts()
        .map(str::to_string)
        .collect();
    assert_eq!(texts.len(), 1, "{texts:?}");

    gate.open();
    driver
        .run_until(|d| d.external_state().output.is_ready())
        .await
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn manual_endpoint_restarts_against_only_that_endpoint() {
    let dialer = probing_dialer();
    let connector = NetworkConnector::new(
        plan_config("http://hang", &[]),
        ready_environment(),
        Arc::new(dialer.clone()),
    );
    let mut driver = PipelineDriver::start(connector, request("4")).unwrap();
    driver
        .run_until(|d| {
            d.view()
                .map_or(false, |v| v.log.texts().any(|t| t.contains("<http://hang>")))
        })
        .await
        .unwrap();

    driver
        .dispatch(ConnectMessage::Configure {
            endpoint: Some("http://good".into()),
        })
        .unwrap();
    driver
        .run_until(|d| d.external_state().output.is_ready())
        .await
        .unwrap();

    let view = driver.view().unwrap();
    assert_eq!(view.manual_endpoint.as_deref(), Some("http://good"));
    assert!(view.log.texts().all(|t| !t.contains("http://hang")));
    assert_eq!(view.status.succeeded().map(String::as_str), Some("http://good"));
    assert_eq!(dialer.dialed(), vec!["http://hang", "http://good"]);
}

#[tokio::test]
async fn blank_endpoint_is_a_no_op_and_retry_resets_output() {
    let connector = NetworkConnector::new(
        plan_config("http://good", &[]),
        ready_environment(),
        Arc::new(probing_dialer()),
    );
    let mut driver = PipelineDriver::start(connector, request("4")).unwrap();
    driver
        .run_until(|d| d.external_state().output.is_ready())
        .await
        .unwrap();
    let revision = driver.revision();

    driver
        .dispatch(ConnectMessage::Configure {
            endpoint: Some("   ".into()),
        })
        .unwrap();
    assert_eq!(driver.revision(), revision);
    assert!(driver.external_state().output.is_ready());

    driver.dispatch(ConnectMessage::Retry).unwrap();
    assert!(!driver.external_state().output.is_ready());
    assert!(driver.view().unwrap().status.is_running());
}
