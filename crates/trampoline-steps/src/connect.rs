//! Network connection stage.
//!
//! Probes an ordered list of endpoint candidates, each under a fixed
//! timeout, and commits to the first one that reports the requested network
//! and answers a block number query. Every attempt is written to the
//! stage's visible log.

use crate::config::ConnectorConfig;
use crate::error::StageError;
use crate::request::Request;
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use trampoline_engine::{
    JobSlot, PipelineError, PropsGuard, RunId, StageLog, StageStatus, Step, StepContext,
    StepOutput, StepProps,
};
use trampoline_ledger::{Dialer, LedgerClient};

/// The host the pipeline runs in.
#[async_trait]
pub trait Environment: Send + Sync {
    /// Resolves once the host finished initializing. Injected connectors are
    /// unreliable before that.
    async fn ready(&self);

    /// Connector provided by the host itself, if any.
    fn injected_client(&self) -> Option<Arc<dyn LedgerClient>>;
}

/// Opens a [`HostEnvironment`] gate.
pub struct ReadyGate(watch::Sender<bool>);

impl ReadyGate {
    pub fn open(&self) {
        self.0.send_replace(true);
    }
}

pub struct HostEnvironment {
    ready: watch::Receiver<bool>,
    injected: Option<Arc<dyn LedgerClient>>,
}

impl HostEnvironment {
    /// An environment that is ready from the start.
    pub fn ready_now(injected: Option<Arc<dyn LedgerClient>>) -> Self {
        let (_, ready) = watch::channel(true);
        Self { ready, injected }
    }

    /// An environment that becomes ready when the returned gate opens.
    pub fn gated(injected: Option<Arc<dyn LedgerClient>>) -> (Self, ReadyGate) {
        let (tx, ready) = watch::channel(false);
        (Self { ready, injected }, ReadyGate(tx))
    }
}

#[async_trait]
impl Environment for HostEnvironment {
    async fn ready(&self) {
        let mut ready = self.ready.clone();
        if ready.wait_for(|ready| *ready).await.is_err() {
            // The gate was dropped without opening; it never will.
            tracing::debug!("environment gate dropped, proceeding");
        }
    }

    fn injected_client(&self) -> Option<Arc<dyn LedgerClient>> {
        self.injected.clone()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CandidateSource {
    Injected,
    Endpoint(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub description: String,
    pub source: CandidateSource,
}

impl Candidate {
    pub fn endpoint(url: &str) -> Self {
        Self {
            description: url.to_string(),
            source: CandidateSource::Endpoint(url.to_string()),
        }
    }

    pub fn injected() -> Self {
        Self {
            description: "injected provider".to_string(),
            source: CandidateSource::Injected,
        }
    }
}

/// Candidates in probing order. A manual endpoint replaces the whole list.
pub fn candidate_plan(config: &ConnectorConfig, manual: Option<&str>) -> Vec<Candidate> {
    if let Some(manual) = manual {
        return vec![Candidate::endpoint(manual)];
    }
    let mut plan = Vec::new();
    if config.include_injected {
        plan.push(Candidate::injected());
    }
    plan.push(Candidate::endpoint(&config.local_endpoint));
    plan.extend(config.public_endpoints.iter().map(|url| Candidate::endpoint(url)));
    plan
}

/// An accepted ledger connection.
#[derive(Clone)]
pub struct Connection {
    pub client: Arc<dyn LedgerClient>,
    pub description: String,
    pub network_id: String,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("description", &self.description)
            .field("network_id", &self.network_id)
            .finish()
    }
}

/// Output of the connection stage.
#[derive(Debug, Clone)]
pub struct Connected {
    pub request: Arc<Request>,
    pub connection: Connection,
}

/// Line sink for the stage log; fails once the run was cancelled.
pub type LogFn<'a> = &'a (dyn Fn(String) -> Result<(), StageError> + Send + Sync);

async fn probe(
    request: &Request,
    candidate: &Candidate,
    environment: &dyn Environment,
    dialer: &dyn Dialer,
    log: LogFn<'_>,
) -> Result<Arc<dyn LedgerClient>, StageError> {
    let client = match &candidate.source {
        CandidateSource::Injected => environment
            .injected_client()
            .ok_or_else(|| StageError::Transport("ledger provider is unavailable".into()))?,
        CandidateSource::Endpoint(url) => dialer.dial(url).await?,
    };

    let network = client.network_id().await?;
    log(format!("Network for <{}> is {}", candidate.description, network))?;
    if network != request.network_id {
        return Err(StageError::WrongNetwork {
            expected: request.network_id.clone(),
            actual: network,
        });
    }

    let block_number = client.block_number().await?;
    log(format!(
        "Block number for <{}> is {}",
        candidate.description, block_number
    ))?;
    Ok(client)
}

/// Try `plan` in order and return the first candidate that passes.
pub async fn connect(
    request: &Request,
    plan: &[Candidate],
    environment: &dyn Environment,
    dialer: &dyn Dialer,
    timeout: Duration,
    log: LogFn<'_>,
) -> Result<Connection, StageError> {
    log(
        "Waiting for the environment to finish loading so injected connectors are available..."
            .into(),
    )?;
    environment.ready().await;
    log("Environment is fully loaded".into())?;

    for candidate in plan {
        log(format!("Attempting to connect to <{}>", candidate.description))?;
        let attempt = tokio::time::timeout(
            timeout,
            probe(request, candidate, environment, dialer, log),
        )
        .await
        .unwrap_or(Err(StageError::Timeout));

        match attempt {
            Ok(client) => {
                log(format!("Choosing <{}>", candidate.description))?;
                tracing::info!(candidate = %candidate.description, "connected to ledger");
                return Ok(Connection {
                    client,
                    description: candidate.description.clone(),
                    network_id: request.network_id.clone(),
                });
            }
            Err(StageError::Cancelled) => return Err(StageError::Cancelled),
            Err(err) => {
                tracing::warn!(
                    candidate = %candidate.description,
                    error = %err,
                    "candidate rejected"
                );
                log(format!(
                    "Failed to connect to {}: {}",
                    candidate.description, err
                ))?;
            }
        }
    }

    Err(StageError::NoReachableNetwork)
}

#[derive(Debug)]
pub enum ConnectMessage {
    Log { run: RunId, line: String },
    Finished {
        run: RunId,
        outcome: Result<Connection, StageError>,
    },
    /// User command: re-run the whole algorithm.
    Retry,
    /// User command: probe only this endpoint, or restore the default plan
    /// with `None`.
    Configure { endpoint: Option<String> },
}

pub struct ConnectState {
    guard: PropsGuard<Request, ConnectMessage>,
    manual_endpoint: Option<String>,
    log: StageLog,
    status: StageStatus<String>,
    output: StepOutput<Connected>,
    immutable: bool,
    job: JobSlot,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectView {
    pub status: StageStatus<String>,
    pub log: StageLog,
    pub manual_endpoint: Option<String>,
    pub immutable: bool,
}

/// Connects to a ledger node for the requested network.
pub struct NetworkConnector {
    config: ConnectorConfig,
    environment: Arc<dyn Environment>,
    dialer: Arc<dyn Dialer>,
}

impl NetworkConnector {
    pub fn new(
        config: ConnectorConfig,
        environment: Arc<dyn Environment>,
        dialer: Arc<dyn Dialer>,
    ) -> Self {
        Self {
            config,
            environment,
            dialer,
        }
    }

    fn start(&self, state: &mut ConnectState) -> Result<(), PipelineError> {
        state.log.clear();
        state.status = StageStatus::Running;

        let request = Arc::clone(state.guard.input());
        let plan = candidate_plan(&self.config, state.manual_endpoint.as_deref());
        let timeout = self.config.candidate_timeout();
        let environment = Arc::clone(&self.environment);
        let dialer = Arc::clone(&self.dialer);

        state.job.start(state.guard.sink(), move |scope| async move {
            let run = scope.run();
            let log = |line: String| {
                scope
                    .emit(ConnectMessage::Log { run, line })
                    .map_err(StageError::from)
            };
            let outcome = connect(
                &request,
                &plan,
                environment.as_ref(),
                dialer.as_ref(),
                timeout,
                &log,
            )
            .await;

            if let Err(StageError::Cancelled) = outcome {
                tracing::trace!(%run, "connection run cancelled");
                return;
            }
            if let Err(err) = &outcome {
                let _ = log(err.to_string());
            }
            if scope.emit(ConnectMessage::Finished { run, outcome }).is_err() {
                tracing::trace!(%run, "connection result dropped after cancel");
            }
        })?;
        Ok(())
    }

    fn restart(
        &self,
        state: &mut ConnectState,
        ctx: &mut StepContext<ConnectMessage, Connected>,
    ) -> Result<(), PipelineError> {
        state.job.stop();
        let before = std::mem::replace(&mut state.output, StepOutput::NotReady);
        ctx.publish_output_change(&before, StepOutput::NotReady);
        self.start(state)
    }
}

impl Step for NetworkConnector {
    type Input = Request;
    type Output = Connected;
    type Message = ConnectMessage;
    type State = ConnectState;
    type View = ConnectView;

    fn mount(
        &self,
        props: StepProps<Request>,
        ctx: &mut StepContext<ConnectMessage, Connected>,
    ) -> Result<ConnectState, PipelineError> {
        let mut state = ConnectState {
            guard: PropsGuard::new(&props, ctx),
            manual_endpoint: self.config.manual_endpoint.clone(),
            log: StageLog::new(),
            status: StageStatus::Unknown,
            output: StepOutput::NotReady,
            immutable: props.immutable,
            job: JobSlot::new(),
        };
        self.start(&mut state)?;
        Ok(state)
    }

    fn activate(
        &self,
        state: &mut ConnectState,
        props: StepProps<Request>,
        ctx: &mut StepContext<ConnectMessage, Connected>,
    ) -> Result<(), PipelineError> {
        state.guard.check(&props, ctx)?;
        state.immutable = props.immutable;
        Ok(())
    }

    fn update(
        &self,
        state: &mut ConnectState,
        message: ConnectMessage,
        ctx: &mut StepContext<ConnectMessage, Connected>,
    ) -> Result<(), PipelineError> {
        match message {
            ConnectMessage::Log { run, line } => {
                if state.job.is_current(run) {
                    state.log.push(line);
                }
            }
            ConnectMessage::Finished { run, outcome } => {
                if !state.job.settle(run) {
                    tracing::trace!(%run, "ignoring result of stale connection run");
                    return Ok(());
                }
                let after = match outcome {
                    Ok(connection) => {
                        state.status = StageStatus::Succeeded {
                            result: connection.description.clone(),
                        };
                        StepOutput::ready(Connected {
                            request: Arc::clone(state.guard.input()),
                            connection,
                        })
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "connection stage failed");
                        state.status = StageStatus::Failed {
                            reason: err.to_string(),
                        };
                        StepOutput::NotReady
                    }
                };
                let before = std::mem::replace(&mut state.output, after.clone());
                ctx.publish_output_change(&before, after);
            }
            ConnectMessage::Retry => {
                if state.immutable {
                    tracing::debug!("ignoring retry while the pipeline is locked");
                    return Ok(());
                }
                self.restart(state, ctx)?;
            }
            ConnectMessage::Configure { endpoint } => {
                if state.immutable {
                    tracing::debug!("ignoring endpoint change while the pipeline is locked");
                    return Ok(());
                }
                let endpoint = endpoint.filter(|url| !url.trim().is_empty());
                if endpoint == state.manual_endpoint {
                    return Ok(());
                }
                tracing::info!(endpoint = ?endpoint, "manual endpoint changed");
                state.manual_endpoint = endpoint;
                self.restart(state, ctx)?;
            }
        }
        Ok(())
    }

    fn unmount(&self, state: &mut ConnectState) {
        state.job.stop();
    }

    fn view(&self, state: &ConnectState) -> ConnectView {
        ConnectView {
            status: state.status.clone(),
            log: state.log.clone(),
            manual_endpoint: state.manual_endpoint.clone(),
            immutable: state.immutable,
        }
    }
}
