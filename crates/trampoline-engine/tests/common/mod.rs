#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use trampoline_engine::{
    PipelineError, PropsGuard, Step, StepContext, StepExternalState, StepOutput, StepProps,
};

/// Manually driven step: every state change comes from a test message.
#[derive(Clone, Default)]
pub struct Probe {
    pub mounts: Arc<AtomicUsize>,
    pub unmounts: Arc<AtomicUsize>,
}

impl Probe {
    pub fn mounted(&self) -> usize {
        self.mounts.load(Ordering::SeqCst)
    }

    pub fn unmounted(&self) -> usize {
        self.unmounts.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub enum ProbeMsg {
    Ready(u32),
    NotReady,
    Exclusive(bool),
    /// Publish the current state again, unchanged.
    Republish,
}

pub struct ProbeState {
    guard: PropsGuard<u32, ProbeMsg>,
    output: StepOutput<u32>,
    exclusive: bool,
    immutable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeView {
    pub input: u32,
    pub immutable: bool,
    pub output: Option<u32>,
    pub exclusive: bool,
}

impl Step for Probe {
    type Input = u32;
    type Output = u32;
    type Message = ProbeMsg;
    type State = ProbeState;
    type View = ProbeView;

    fn mount(
        &self,
        props: StepProps<u32>,
        ctx: &mut StepContext<ProbeMsg, u32>,
    ) -> Result<ProbeState, PipelineError> {
        self.mounts.fetch_add(1, Ordering::SeqCst);
        Ok(ProbeState {
            guard: PropsGuard::new(&props, ctx),
            output: StepOutput::NotReady,
            exclusive: false,
            immutable: props.immutable,
        })
    }

    fn activate(
        &self,
        state: &mut ProbeState,
        props: StepProps<u32>,
        ctx: &mut StepContext<ProbeMsg, u32>,
    ) -> Result<(), PipelineError> {
        state.guard.check(&props, ctx)?;
        state.immutable = props.immutable;
        Ok(())
    }

    fn update(
        &self,
        state: &mut ProbeState,
        message: ProbeMsg,
        ctx: &mut StepContext<ProbeMsg, u32>,
    ) -> Result<(), PipelineError> {
        match message {
            ProbeMsg::Ready(value) => state.output = StepOutput::ready(value),
            ProbeMsg::NotReady => state.output = StepOutput::NotReady,
            ProbeMsg::Exclusive(exclusive) => state.exclusive = exclusive,
            ProbeMsg::Republish => {}
        }
        ctx.publish(StepExternalState::new(state.output.clone(), state.exclusive));
        Ok(())
    }

    fn unmount(&self, _state: &mut ProbeState) {
        self.unmounts.fetch_add(1, Ordering::SeqCst);
    }

    fn view(&self, state: &ProbeState) -> ProbeView {
        ProbeView {
            input: **state.guard.input(),
            immutable: state.immutable,
            output: state.output.result().map(|value| **value),
            exclusive: state.exclusive,
        }
    }
}

/// Hands its child a fresh copy of the input on every activation, which the
/// engine must reject.
pub struct Rewrap<S>(pub S);

impl<S> Step for Rewrap<S>
where
    S: Step,
    S::Input: Clone,
{
    type Input = S::Input;
    type Output = S::Output;
    type Message = S::Message;
    type State = S::State;
    type View = S::View;

    fn mount(
        &self,
        props: StepProps<S::Input>,
        ctx: &mut StepContext<S::Message, S::Output>,
    ) -> Result<S::State, PipelineError> {
        self.0.mount(props, ctx)
    }

    fn activate(
        &self,
        state: &mut S::State,
        props: StepProps<S::Input>,
        ctx: &mut StepContext<S::Message, S::Output>,
    ) -> Result<(), PipelineError> {
        let copied = StepProps {
            immutable: props.immutable,
            input: Arc::new((*props.input).clone()),
        };
        self.0.activate(state, copied, ctx)
    }

    fn update(
        &self,
        state: &mut S::State,
        message: S::Message,
        ctx: &mut StepContext<S::Message, S::Output>,
    ) -> Result<(), PipelineError> {
        self.0.update(state, message, ctx)
    }

    fn unmount(&self, state: &mut S::State) {
        self.0.unmount(state)
    }

    fn view(&self, state: &S::State) -> S::View {
        self.0.view(state)
    }
}
