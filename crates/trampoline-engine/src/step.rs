//! Step contract.
//!
//! A step is one stage of the pipeline: stateful, asynchronous and
//! independently retryable. A step never holds a reference to its owner.
//! It receives props, emits messages to itself through a [`Sink`], and
//! reports its external state by publishing into its [`StepContext`]. The
//! owner folds those publications into its own state.

use crate::error::PipelineError;
use std::fmt;
use std::sync::Arc;

/// Whether a step has produced a usable downstream input.
pub enum StepOutput<R> {
    Ready { result: Arc<R> },
    NotReady,
}

impl<R> StepOutput<R> {
    pub fn ready(result: R) -> Self {
        Self::Ready {
            result: Arc::new(result),
        }
    }

    pub fn shared(result: Arc<R>) -> Self {
        Self::Ready { result }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready { .. })
    }

    pub fn result(&self) -> Option<&Arc<R>> {
        match self {
            Self::Ready { result } => Some(result),
            Self::NotReady => None,
        }
    }
}

impl<R> Clone for StepOutput<R> {
    fn clone(&self) -> Self {
        match self {
            Self::Ready { result } => Self::Ready {
                result: Arc::clone(result),
            },
            Self::NotReady => Self::NotReady,
        }
    }
}

/// Shallow equality: two `Ready` outputs are equal only when they carry the
/// very same result.
impl<R> PartialEq for StepOutput<R> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Ready { result: a }, Self::Ready { result: b }) => Arc::ptr_eq(a, b),
            (Self::NotReady, Self::NotReady) => true,
            _ => false,
        }
    }
}

impl<R> Eq for StepOutput<R> {}

impl<R> fmt::Debug for StepOutput<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready { result } => write!(f, "Ready({:p})", Arc::as_ptr(result)),
            Self::NotReady => f.write_str("NotReady"),
        }
    }
}

/// What a step exposes to its owner.
pub struct StepExternalState<R> {
    pub output: StepOutput<R>,
    /// The step wants every other step to stop accepting user input.
    pub exclusive: bool,
}

impl<R> StepExternalState<R> {
    pub fn initial() -> Self {
        Self {
            output: StepOutput::NotReady,
            exclusive: false,
        }
    }

    pub fn new(output: StepOutput<R>, exclusive: bool) -> Self {
        Self { output, exclusive }
    }
}

impl<R> Default for StepExternalState<R> {
    fn default() -> Self {
        Self::initial()
    }
}

impl<R> Clone for StepExternalState<R> {
    fn clone(&self) -> Self {
        Self {
            output: self.output.clone(),
            exclusive: self.exclusive,
        }
    }
}

impl<R> PartialEq for StepExternalState<R> {
    fn eq(&self, other: &Self) -> bool {
        self.exclusive == other.exclusive && self.output == other.output
    }
}

impl<R> Eq for StepExternalState<R> {}

impl<R> fmt::Debug for StepExternalState<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepExternalState")
            .field("output", &self.output)
            .field("exclusive", &self.exclusive)
            .finish()
    }
}

/// Props handed to a step on mount and on every activation.
///
/// Only `immutable` may change during the lifetime of one step instance.
pub struct StepProps<I> {
    pub immutable: bool,
    pub input: Arc<I>,
}

impl<I> Clone for StepProps<I> {
    fn clone(&self) -> Self {
        Self {
            immutable: self.immutable,
            input: Arc::clone(&self.input),
        }
    }
}

/// Delivery endpoint for a step's own messages.
pub struct Sink<M> {
    deliver: Arc<dyn Fn(M) + Send + Sync>,
}

impl<M: Send + 'static> Sink<M> {
    pub fn new<F>(deliver: F) -> Self
    where
        F: Fn(M) + Send + Sync + 'static,
    {
        Self {
            deliver: Arc::new(deliver),
        }
    }

    pub fn send(&self, message: M) {
        (self.deliver)(message)
    }

    /// Sink for a child whose messages are wrapped into ours by `wrap`.
    pub fn map<N, F>(&self, wrap: F) -> Sink<N>
    where
        N: Send + 'static,
        F: Fn(N) -> M + Send + Sync + 'static,
    {
        let parent = self.clone();
        Sink::new(move |message| parent.send(wrap(message)))
    }

    /// Identity comparison.
    pub fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.deliver, &other.deliver)
    }
}

impl<M> Clone for Sink<M> {
    fn clone(&self) -> Self {
        Self {
            deliver: Arc::clone(&self.deliver),
        }
    }
}

impl<M> fmt::Debug for Sink<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sink({:p})", Arc::as_ptr(&self.deliver) as *const ())
    }
}

/// Per-call context: where a step sends its messages and publishes its
/// external state. Together these are the step's mutation callback.
pub struct StepContext<M, O> {
    sink: Sink<M>,
    published: Vec<StepExternalState<O>>,
}

impl<M: Send + 'static, O> StepContext<M, O> {
    pub fn new(sink: Sink<M>) -> Self {
        Self {
            sink,
            published: Vec::new(),
        }
    }

    pub fn sink(&self) -> &Sink<M> {
        &self.sink
    }

    pub fn publish(&mut self, state: StepExternalState<O>) {
        self.published.push(state);
    }

    /// Publish a non-exclusive state when the output moved.
    pub fn publish_output_change(&mut self, before: &StepOutput<O>, after: StepOutput<O>) {
        if *before != after {
            self.publish(StepExternalState::new(after, false));
        }
    }

    pub fn take_published(&mut self) -> Vec<StepExternalState<O>> {
        std::mem::take(&mut self.published)
    }
}

/// One stage of the pipeline.
///
/// The owner calls `mount` once per instance, immediately followed by
/// `activate` with the same props. `activate` is then repeated whenever the
/// owner re-evaluates its children; only `props.immutable` may differ
/// between activations.
pub trait Step: Send + Sync + 'static {
    type Input: Send + Sync + 'static;
    type Output: Send + Sync + 'static;
    type Message: Send + 'static;
    type State: Send;
    type View;

    fn mount(
        &self,
        props: StepProps<Self::Input>,
        ctx: &mut StepContext<Self::Message, Self::Output>,
    ) -> Result<Self::State, PipelineError>;

    fn activate(
        &self,
        state: &mut Self::State,
        props: StepProps<Self::Input>,
        ctx: &mut StepContext<Self::Message, Self::Output>,
    ) -> Result<(), PipelineError>;

    fn update(
        &self,
        state: &mut Self::State,
        message: Self::Message,
        ctx: &mut StepContext<Self::Message, Self::Output>,
    ) -> Result<(), PipelineError>;

    /// Stop all work. Results still in flight must have no effect afterwards.
    fn unmount(&self, state: &mut Self::State);

    fn view(&self, state: &Self::State) -> Self::View;
}

/// Remembers the props an instance was mounted with and rejects changes.
pub struct PropsGuard<I, M> {
    input: Arc<I>,
    sink: Sink<M>,
}

impl<I, M: Send + 'static> PropsGuard<I, M> {
    pub fn new<O>(props: &StepProps<I>, ctx: &StepContext<M, O>) -> Self {
        Self {
            input: Arc::clone(&props.input),
            sink: ctx.sink().clone(),
        }
    }

    pub fn check<O>(
        &self,
        props: &StepProps<I>,
        ctx: &StepContext<M, O>,
    ) -> Result<(), PipelineError> {
        if !Arc::ptr_eq(&self.input, &props.input) {
            return Err(PipelineError::props_changed("input"));
        }
        if !self.sink.same_as(ctx.sink()) {
            return Err(PipelineError::props_changed("on_mutation"));
        }
        Ok(())
    }

    pub fn input(&self) -> &Arc<I> {
        &self.input
    }

    pub fn sink(&self) -> &Sink<M> {
        &self.sink
    }
}
