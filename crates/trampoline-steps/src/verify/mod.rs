//! Subject verification stage.
//!
//! Runs the fetch protocol in [`fetch`] against the identified connection.
//! On success the stage passes its input through unchanged and exposes the
//! verified [`SubjectMetadata`] in its view; on failure the output stays
//! `NotReady` and `having_errors` is raised.

mod fetch;
mod metadata;

pub use fetch::{check_removal, fetch_subject, find_creation_event};
pub use metadata::{assemble, decode_short_string, OnChainState, SubjectKind, SubjectMetadata};

use crate::error::StageError;
use crate::identity::Identified;
use serde::Serialize;
use std::sync::Arc;
use trampoline_engine::{
    JobSlot, PipelineError, PropsGuard, RunId, StageStatus, Step, StepContext, StepOutput,
    StepProps,
};
use trampoline_ledger::AddressBook;

#[derive(Debug)]
pub enum VerifyMessage {
    Finished {
        run: RunId,
        outcome: Result<SubjectMetadata, StageError>,
    },
    Retry,
}

pub struct VerifyState {
    guard: PropsGuard<Identified, VerifyMessage>,
    status: StageStatus<SubjectMetadata>,
    having_errors: bool,
    integrity_failure: bool,
    output: StepOutput<Identified>,
    immutable: bool,
    job: JobSlot,
}

impl VerifyState {
    pub fn metadata(&self) -> Option<&SubjectMetadata> {
        self.status.succeeded()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerifyView {
    pub status: StageStatus<SubjectMetadata>,
    pub having_errors: bool,
    /// The last failure means the market could not be proven genuine.
    pub integrity_failure: bool,
    pub immutable: bool,
}

pub struct SubjectVerifier {
    addresses: Arc<AddressBook>,
}

impl SubjectVerifier {
    pub fn new(addresses: Arc<AddressBook>) -> Self {
        Self { addresses }
    }

    fn start(&self, state: &mut VerifyState) -> Result<(), PipelineError> {
        state.status = StageStatus::Running;
        let input = Arc::clone(state.guard.input());
        let addresses = Arc::clone(&self.addresses);

        state.job.start(state.guard.sink(), move |scope| async move {
            let run = scope.run();
            let outcome = fetch_subject(
                input.connection.client.as_ref(),
                &addresses,
                &input.connection.network_id,
                input.request.market,
                input.request.creation_tx,
            )
            .await;
            if scope.emit(VerifyMessage::Finished { run, outcome }).is_err() {
                tracing::trace!(%run, "verification result dropped after cancel");
            }
        })?;
        Ok(())
    }
}

impl Step for SubjectVerifier {
    type Input = Identified;
    type Output = Identified;
    type Message = VerifyMessage;
    type State = VerifyState;
    type View = VerifyView;

    fn mount(
        &self,
        props: StepProps<Identified>,
        ctx: &mut StepContext<VerifyMessage, Identified>,
    ) -> Result<VerifyState, PipelineError> {
        let mut state = VerifyState {
            guard: PropsGuard::new(&props, ctx),
            status: StageStatus::Unknown,
            having_errors: false,
            integrity_failure: false,
            output: StepOutput::NotReady,
            immutable: props.immutable,
            job: JobSlot::new(),
        };
        self.start(&mut state)?;
        Ok(state)
    }

    fn activate(
        &self,
        state: &mut VerifyState,
        props: StepProps<Identified>,
        ctx: &mut StepContext<VerifyMessage, Identified>,
    ) -> Result<(), PipelineError> {
        state.guard.check(&props, ctx)?;
        state.immutable = props.immutable;
        Ok(())
    }

    fn update(
        &self,
        state: &mut VerifyState,
        message: VerifyMessage,
        ctx: &mut StepContext<VerifyMessage, Identified>,
    ) -> Result<(), PipelineError> {
        match message {
            VerifyMessage::Finished { run, outcome } => {
                if !state.job.settle(run) {
                    tracing::trace!(%run, "ignoring result of stale verification run");
                    return Ok(());
                }
                let after = match outcome {
                    Ok(metadata) => {
                        tracing::info!(market = %metadata.market, "market verified");
                        state.having_errors = false;
                        state.integrity_failure = false;
                        state.status = StageStatus::Succeeded { result: metadata };
                        StepOutput::shared(Arc::clone(state.guard.input()))
                    }
                    Err(err) => {
                        state.integrity_failure = err.is_integrity_failure();
                        if state.integrity_failure {
                            tracing::error!(error = %err, "market failed verification");
                        } else {
                            tracing::warn!(error = %err, "could not fetch market");
                        }
                        state.having_errors = true;
                        state.status = StageStatus::Failed {
                            reason: err.to_string(),
                        };
                        StepOutput::NotReady
                    }
                };
                let before = std::mem::replace(&mut state.output, after.clone());
                ctx.publish_output_change(&before, after);
            }
            VerifyMessage::Retry => {
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

    fn unmount(&self, state: &mut VerifyState) {
        state.job.stop();
    }

    fn view(&self, state: &VerifyState) -> VerifyView {
        VerifyView {
            status: state.status.clone(),
            having_errors: state.having_errors,
            integrity_failure: state.integrity_failure,
            immutable: state.immutable,
        }
    }
}
