//! Two-step combinator.
//!
//! [`Chain`] composes `A: Input -> Mid` and `B: Mid -> Output` into one step
//! `Input -> Output`. `B` exists only while `A` is ready, and its entire
//! state is dropped and re-created whenever `A`'s ready result changes
//! identity. Every such change advances the chain's [`Epoch`]; messages
//! addressed to an older epoch are dropped.
//!
//! Exclusivity is OR-reduced: the chain is exclusive while either side is.

use crate::error::PipelineError;
use crate::step::{PropsGuard, Sink, Step, StepContext, StepExternalState, StepOutput, StepProps};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Generation counter of a chain's downstream step.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Epoch(u64);

impl Epoch {
    pub const ZERO: Epoch = Epoch(0);

    pub fn next(self) -> Epoch {
        Epoch(self.0 + 1)
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "epoch-{}", self.0)
    }
}

/// Messages of a chain.
#[derive(Debug)]
pub enum ChainMessage<MA, MB> {
    First(MA),
    /// `epoch: None` addresses whichever downstream instance is current;
    /// user commands use it. Asynchronous results always carry their epoch.
    Second { epoch: Option<Epoch>, message: MB },
}

impl<MA, MB> ChainMessage<MA, MB> {
    pub fn to_current_second(message: MB) -> Self {
        Self::Second {
            epoch: None,
            message,
        }
    }
}

/// Snapshot of a chain for presentation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChainView<VA, VB> {
    pub first: VA,
    pub second: Option<VB>,
    pub epoch: Epoch,
}

pub struct Chain<A, B> {
    first: A,
    second: B,
}

/// Compose two steps.
pub fn chain<A, B>(first: A, second: B) -> Chain<A, B>
where
    A: Step,
    B: Step<Input = A::Output>,
{
    Chain { first, second }
}

impl<A, B> Chain<A, B> {
    pub fn first(&self) -> &A {
        &self.first
    }

    pub fn second(&self) -> &B {
        &self.second
    }
}

struct Downstream<B: Step> {
    epoch: Epoch,
    sink: Sink<B::Message>,
    state: B::State,
}

pub struct ChainState<A: Step, B: Step> {
    guard: PropsGuard<A::Input, ChainMessage<A::Message, B::Message>>,
    first_sink: Sink<A::Message>,
    first: A::State,
    upstream: StepExternalState<A::Output>,
    epoch: Epoch,
    downstream: StepExternalState<B::Output>,
    second: Option<Downstream<B>>,
}

impl<A: Step, B: Step> ChainState<A, B> {
    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    pub fn upstream(&self) -> &StepExternalState<A::Output> {
        &self.upstream
    }

    pub fn downstream(&self) -> &StepExternalState<B::Output> {
        &self.downstream
    }

    pub fn first_state(&self) -> &A::State {
        &self.first
    }

    pub fn second_state(&self) -> Option<&B::State> {
        self.second.as_ref().map(|slot| &slot.state)
    }
}

type Ctx<A, B> =
    StepContext<ChainMessage<<A as Step>::Message, <B as Step>::Message>, <B as Step>::Output>;

impl<A, B> Chain<A, B>
where
    A: Step,
    B: Step<Input = A::Output>,
{
    fn on_first(
        &self,
        state: &mut ChainState<A, B>,
        new_state: StepExternalState<A::Output>,
        ctx: &mut Ctx<A, B>,
    ) {
        if new_state == state.upstream {
            return;
        }

        let output_changed = new_state.output != state.upstream.output;
        state.upstream = new_state;

        if output_changed {
            state.epoch = state.epoch.next();
            if let Some(mut retired) = state.second.take() {
                tracing::debug!(
                    retired = %retired.epoch,
                    current = %state.epoch,
                    "retiring downstream step"
                );
                self.second.unmount(&mut retired.state);
            }
            state.downstream = StepExternalState::initial();
        }

        ctx.publish(StepExternalState::new(
            state.downstream.output.clone(),
            state.upstream.exclusive || state.downstream.exclusive,
        ));
    }

    fn on_second(
        &self,
        state: &mut ChainState<A, B>,
        new_state: StepExternalState<B::Output>,
        ctx: &mut Ctx<A, B>,
    ) {
        if new_state == state.downstream {
            return;
        }

        let exclusive = state.upstream.exclusive || new_state.exclusive;
        state.downstream = new_state;
        ctx.publish(StepExternalState::new(
            state.downstream.output.clone(),
            exclusive,
        ));
    }

    fn fold_first(
        &self,
        state: &mut ChainState<A, B>,
        child: &mut StepContext<A::Message, A::Output>,
        ctx: &mut Ctx<A, B>,
    ) {
        for published in child.take_published() {
            self.on_first(state, published, ctx);
        }
    }

    fn fold_second(
        &self,
        state: &mut ChainState<A, B>,
        published: Vec<StepExternalState<B::Output>>,
        ctx: &mut Ctx<A, B>,
    ) {
        for new_state in published {
            self.on_second(state, new_state, ctx);
        }
    }

    /// Make the downstream step match the upstream output: absent while not
    /// ready, one instance per epoch while ready.
    fn reconcile_second(
        &self,
        state: &mut ChainState<A, B>,
        immutable: bool,
        ctx: &mut Ctx<A, B>,
    ) -> Result<(), PipelineError> {
        let input = match &state.upstream.output {
            StepOutput::Ready { result } => result.clone(),
            StepOutput::NotReady => {
                if let Some(mut retired) = state.second.take() {
                    self.second.unmount(&mut retired.state);
                }
                return Ok(());
            }
        };
        let props = StepProps { immutable, input };

        if state.second.as_ref().map(|slot| slot.epoch) != Some(state.epoch) {
            let epoch = state.epoch;
            let sink = ctx.sink().map(move |message| ChainMessage::Second {
                epoch: Some(epoch),
                message,
            });
            let mut child = StepContext::new(sink.clone());
            let mounted = self.second.mount(props.clone(), &mut child)?;
            tracing::debug!(%epoch, "mounted downstream step");
            state.second = Some(Downstream {
                epoch,
                sink,
                state: mounted,
            });
            let published = child.take_published();
            self.fold_second(state, published, ctx);
        }

        let published = match state.second.as_mut() {
            Some(slot) => {
                let mut child = StepContext::new(slot.sink.clone());
                self.second.activate(&mut slot.state, props, &mut child)?;
                child.take_published()
            }
            None => Vec::new(),
        };
        self.fold_second(state, published, ctx);
        Ok(())
    }
}

impl<A, B> Step for Chain<A, B>
where
    A: Step,
    B: Step<Input = A::Output>,
{
    type Input = A::Input;
    type Output = B::Output;
    type Message = ChainMessage<A::Message, B::Message>;
    type State = ChainState<A, B>;
    type View = ChainView<A::View, B::View>;

    fn mount(
        &self,
        props: StepProps<Self::Input>,
        ctx: &mut StepContext<Self::Message, Self::Output>,
    ) -> Result<Self::State, PipelineError> {
        let guard = PropsGuard::new(&props, ctx);
        let first_sink = ctx.sink().map(ChainMessage::First);
        let mut child = StepContext::new(first_sink.clone());
        let first = self.first.mount(props, &mut child)?;

        let mut state = ChainState {
            guard,
            first_sink,
            first,
            upstream: StepExternalState::initial(),
            epoch: Epoch::ZERO,
            downstream: StepExternalState::initial(),
            second: None,
        };
        self.fold_first(&mut state, &mut child, ctx);
        Ok(state)
    }

    fn activate(
        &self,
        state: &mut Self::State,
        props: StepProps<Self::Input>,
        ctx: &mut StepContext<Self::Message, Self::Output>,
    ) -> Result<(), PipelineError> {
        state.guard.check(&props, ctx)?;
        let immutable = props.immutable;

        let mut child = StepContext::new(state.first_sink.clone());
        self.first.activate(&mut state.first, props, &mut child)?;
        self.fold_first(state, &mut child, ctx);

        self.reconcile_second(state, immutable, ctx)
    }

    fn update(
        &self,
        state: &mut Self::State,
        message: Self::Message,
        ctx: &mut StepContext<Self::Message, Self::Output>,
    ) -> Result<(), PipelineError> {
        match message {
            ChainMessage::First(message) => {
                let mut child = StepContext::new(state.first_sink.clone());
                self.first.update(&mut state.first, message, &mut child)?;
                self.fold_first(state, &mut child, ctx);
            }
            ChainMessage::Second { epoch, message } => {
                let published = match state.second.as_mut() {
                    Some(slot) if epoch.map_or(true, |epoch| epoch == slot.epoch) => {
                        let mut child = StepContext::new(slot.sink.clone());
                        self.second.update(&mut slot.state, message, &mut child)?;
                        child.take_published()
                    }
                    _ => {
                        tracing::trace!(
                            addressed = ?epoch,
                            current = %state.epoch,
                            "dropping message for retired downstream step"
                        );
                        Vec::new()
                    }
                };
                self.fold_second(state, published, ctx);
            }
        }
        Ok(())
    }

    fn unmount(&self, state: &mut Self::State) {
        if let Some(mut retired) = state.second.take() {
            self.second.unmount(&mut retired.state);
        }
        self.first.unmount(&mut state.first);
    }

    fn view(&self, state: &Self::State) -> Self::View {
        ChainView {
            first: self.first.view(&state.first),
            second: state
                .second
                .as_ref()
                .map(|slot| self.second.view(&slot.state)),
            epoch: state.epoch,
        }
    }
}
