//! Identity selection stage: pick the account trades are signed with.

use crate::connect::{Connected, Connection};
use crate::error::StageError;
use crate::request::Request;
use serde::Serialize;
use std::sync::Arc;
use trampoline_engine::{
    JobSlot, PipelineError, PropsGuard, RunId, StageLog, StageStatus, Step, StepContext,
    StepOutput, StepProps,
};
use trampoline_ledger::{Address, LedgerClient};

/// Output of the identity stage.
#[derive(Debug, Clone)]
pub struct Identified {
    pub request: Arc<Request>,
    pub connection: Connection,
    pub identity: Address,
}

/// First account the node offers, deterministically.
pub async fn select_identity(
    client: &dyn LedgerClient,
) -> Result<(Vec<Address>, Address), StageError> {
    let accounts = client.accounts().await?;
    let first = accounts.first().copied().ok_or(StageError::NoIdentityAvailable)?;
    Ok((accounts, first))
}

#[derive(Debug)]
pub enum IdentityMessage {
    Finished {
        run: RunId,
        outcome: Result<(Vec<Address>, Address), StageError>,
    },
    Retry,
}

pub struct IdentityState {
    guard: PropsGuard<Connected, IdentityMessage>,
    log: StageLog,
    status: StageStatus<Address>,
    output: StepOutput<Identified>,
    immutable: bool,
    job: JobSlot,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IdentityView {
    pub status: StageStatus<Address>,
    pub log: StageLog,
    pub immutable: bool,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct IdentitySelector;

impl IdentitySelector {
    pub fn new() -> Self {
        Self
    }

    fn start(&self, state: &mut IdentityState) -> Result<(), PipelineError> {
        state.log.clear();
        state.status = StageStatus::Running;
        let client = Arc::clone(&state.guard.input().connection.client);

        state.job.start(state.guard.sink(), move |scope| async move {
            let run = scope.run();
            let outcome = select_identity(client.as_ref()).await;
            if scope
                .emit(IdentityMessage::Finished { run, outcome })
                .is_err()
            {
                tracing::trace!(%run, "identity result dropped after cancel");
            }
        })?;
        Ok(())
    }
}

impl Step for IdentitySelector {
    type Input = Connected;
    type Output = Identified;
    type Message = IdentityMessage;
    type State = IdentityState;
    type View = IdentityView;

    fn mount(
        &self,
        props: StepProps<Connected>,
        ctx: &mut StepContext<IdentityMessage, Identified>,
    ) -> Result<IdentityState, PipelineError> {
        let mut state = IdentityState {
            guard: PropsGuard::new(&props, ctx),
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
        state: &mut IdentityState,
        props: StepProps<Connected>,
        ctx: &mut StepContext<IdentityMessage, Identified>,
    ) -> Result<(), PipelineError> {
        state.guard.check(&props, ctx)?;
        state.immutable = props.immutable;
        Ok(())
    }

    fn update(
        &self,
        state: &mut IdentityState,
        message: IdentityMessage,
        ctx: &mut StepContext<IdentityMessage, Identified>,
    ) -> Result<(), PipelineError> {
        match message {
            IdentityMessage::Finished { run, outcome } => {
                if !state.job.settle(run) {
                    tracing::trace!(%run, "ignoring result of stale identity run");
                    return Ok(());
                }
                let after = match outcome {
                    Ok((accounts, identity)) => {
                        let listed: Vec<String> =
                            accounts.iter().map(ToString::to_string).collect();
                        state
                            .log
                            .push(format!("Identified accounts: [{}]", listed.join(", ")));
                        tracing::info!(%identity, "identity selected");
                        state.status = StageStatus::Succeeded { result: identity };
                        let connected = state.guard.input();
                        StepOutput::ready(Identified {
                            request: Arc::clone(&connected.request),
                            connection: connected.connection.clone(),
                            identity,
                        })
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "identity stage failed");
                        state.log.push(err.to_string());
                        state.status = StageStatus::Failed {
                            reason: err.to_string(),
                        };
                        StepOutput::NotReady
                    }
                };
                let before = std::mem::replace(&mut state.output, after.clone());
                ctx.publish_output_change(&before, after);
            }
            IdentityMessage::Retry => {
                if state.immutable {
                    tracing::debug!("ignoring retry while the pipeline is locked");
                    return Ok(());
                }
                state.job.stop();
                let before = std::mem::replace(&mut state.output, StepOutput::NotReady);
                ctx.publish_output_change(&before, StepOutput::NotReady);
                self.start(state)?;
            }
        }
        Ok(())
    }

    fn unmount(&self, state: &mut IdentityState) {
        state.job.stop();
    }

    fn view(&self, state: &IdentityState) -> IdentityView {
        IdentityView {
            status: state.status.clone(),
            log: state.log.clone(),
            immutable: state.immutable,
        }
    }
}
