//! Root owner of a step pipeline.
//!
//! The driver owns the top-level step state, the `locked` flag (the
//! exclusivity of the outermost published state) and the inbox every
//! asynchronous result and user command flows through. Messages are applied
//! one at a time on the caller's task, so step state is only ever touched by
//! its single owner.

use crate::error::PipelineError;
use crate::step::{Sink, Step, StepContext, StepExternalState, StepProps};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Cloneable entry point for user commands.
pub struct PipelineHandle<M> {
    session: Uuid,
    sink: Sink<M>,
}

impl<M: Send + 'static> PipelineHandle<M> {
    pub fn send(&self, message: M) {
        self.sink.send(message)
    }

    pub fn session(&self) -> Uuid {
        self.session
    }
}

impl<M> Clone for PipelineHandle<M> {
    fn clone(&self) -> Self {
        Self {
            session: self.session,
            sink: self.sink.clone(),
        }
    }
}

pub struct PipelineDriver<S: Step> {
    session: Uuid,
    step: S,
    input: Arc<S::Input>,
    sink: Sink<S::Message>,
    inbox: mpsc::UnboundedReceiver<S::Message>,
    state: Option<S::State>,
    locked: bool,
    published: StepExternalState<S::Output>,
    revision: u64,
    poisoned: Option<PipelineError>,
}

impl<S: Step> PipelineDriver<S> {
    /// Mount and activate `step` for `input`. Must be called from within a
    /// tokio runtime, since steps spawn their work on mount.
    pub fn start(step: S, input: S::Input) -> Result<Self, PipelineError> {
        let session = Uuid::new_v4();
        let (tx, inbox) = mpsc::unbounded_channel();
        let sink = Sink::new(move |message| {
            if tx.send(message).is_err() {
                tracing::trace!("pipeline inbox closed; dropping message");
            }
        });

        let mut driver = Self {
            session,
            step,
            input: Arc::new(input),
            sink,
            inbox,
            state: None,
            locked: false,
            published: StepExternalState::initial(),
            revision: 0,
            poisoned: None,
        };

        let mut ctx = StepContext::new(driver.sink.clone());
        let props = driver.props();
        let state = driver.step.mount(props, &mut ctx)?;
        driver.state = Some(state);
        driver.absorb(&mut ctx);
        driver.settle()?;

        tracing::info!(session = %session, "pipeline started");
        Ok(driver)
    }

    pub fn session(&self) -> Uuid {
        self.session
    }

    pub fn handle(&self) -> PipelineHandle<S::Message> {
        PipelineHandle {
            session: self.session,
            sink: self.sink.clone(),
        }
    }

    /// True while some step is exclusive; every step is then immutable.
    pub fn locked(&self) -> bool {
        self.locked
    }

    pub fn external_state(&self) -> &StepExternalState<S::Output> {
        &self.published
    }

    /// Number of state notifications that reached the root.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn input(&self) -> &Arc<S::Input> {
        &self.input
    }

    pub fn state(&self) -> Option<&S::State> {
        self.state.as_ref()
    }

    pub fn view(&self) -> Option<S::View> {
        self.state.as_ref().map(|state| self.step.view(state))
    }

    /// Apply one message and re-activate the tree.
    pub fn dispatch(&mut self, message: S::Message) -> Result<(), PipelineError> {
        if let Some(err) = &self.poisoned {
            return Err(err.clone());
        }
        let Some(state) = self.state.as_mut() else {
            return Ok(());
        };

        let mut ctx = StepContext::new(self.sink.clone());
        let outcome = self.step.update(state, message, &mut ctx);
        self.absorb(&mut ctx);
        outcome.map_err(|err| self.poison(err))?;
        self.settle()
    }

    /// Wait for the next queued message and apply it. Returns false once
    /// the pipeline was shut down.
    pub async fn next(&mut self) -> Result<bool, PipelineError> {
        if self.state.is_none() {
            return Ok(false);
        }
        match self.inbox.recv().await {
            Some(message) => {
                self.dispatch(message)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Apply messages until `done` holds.
    pub async fn run_until<F>(&mut self, mut done: F) -> Result<(), PipelineError>
    where
        F: FnMut(&Self) -> bool,
    {
        while !done(&*self) {
            if !self.next().await? {
                break;
            }
        }
        Ok(())
    }

    /// Unmount every step; in-flight work has no further effect.
    pub fn shutdown(&mut self) {
        if let Some(mut state) = self.state.take() {
            self.step.unmount(&mut state);
            tracing::info!(session = %self.session, "pipeline shut down");
        }
    }

    fn props(&self) -> StepProps<S::Input> {
        StepProps {
            immutable: self.locked,
            input: Arc::clone(&self.input),
        }
    }

    /// Root reducer: the outermost published state sets `locked`.
    fn absorb(&mut self, ctx: &mut StepContext<S::Message, S::Output>) {
        for published in ctx.take_published() {
            if self.locked != published.exclusive {
                tracing::debug!(locked = published.exclusive, "pipeline lock changed");
            }
            self.locked = published.exclusive;
            self.published = published;
            self.revision += 1;
        }
    }

    /// Activate until `locked` stops changing.
    fn settle(&mut self) -> Result<(), PipelineError> {
        loop {
            let locked = self.locked;
            let props = self.props();
            let Some(state) = self.state.as_mut() else {
                return Ok(());
            };
            let mut ctx = StepContext::new(self.sink.clone());
            let outcome = self.step.activate(state, props, &mut ctx);
            self.absorb(&mut ctx);
            outcome.map_err(|err| self.poison(err))?;
            if self.locked == locked {
                return Ok(());
            }
        }
    }

    fn poison(&mut self, err: PipelineError) -> PipelineError {
        tracing::error!(session = %self.session, error = %err, "pipeline contract violated");
        self.shutdown();
        self.poisoned = Some(err.clone());
        err
    }
}

impl<S: Step> Drop for PipelineDriver<S> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
