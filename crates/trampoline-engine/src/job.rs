//! Background runs of a leaf step.
//!
//! Each run gets a fresh [`Cancelable`] outlet into the step's sink and a
//! [`RunId`]. Stopping a run cancels the outlet and aborts the task; any
//! result the run still manages to produce is rejected by the outlet, and
//! anything already queued is recognised as stale by its run id.

use crate::cancellable::{Cancelable, Canceller};
use crate::error::{Cancelled, PipelineError};
use crate::step::Sink;
use std::fmt;
use std::future::Future;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RunId(u64);

impl RunId {
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "run-{}", self.0)
    }
}

/// Handed to the body of a run.
pub struct JobScope<M> {
    run: RunId,
    outlet: Cancelable<M>,
}

impl<M> JobScope<M> {
    pub fn run(&self) -> RunId {
        self.run
    }

    /// Deliver a message to the owning step, unless the run was stopped.
    pub fn emit(&self, message: M) -> Result<(), Cancelled> {
        self.outlet.call(message)
    }
}

impl<M> Clone for JobScope<M> {
    fn clone(&self) -> Self {
        Self {
            run: self.run,
            outlet: self.outlet.clone(),
        }
    }
}

struct ActiveJob {
    run: RunId,
    canceller: Canceller,
    task: JoinHandle<()>,
}

/// At most one active run per step.
#[derive(Default)]
pub struct JobSlot {
    issued: u64,
    active: Option<ActiveJob>,
}

impl JobSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a run. Must be called from within a tokio runtime.
    pub fn start<M, F, Fut>(&mut self, sink: &Sink<M>, body: F) -> Result<RunId, PipelineError>
    where
        M: Send + 'static,
        F: FnOnce(JobScope<M>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.active.is_some() {
            return Err(PipelineError::contract("must have stopped before starting"));
        }

        self.issued += 1;
        let run = RunId(self.issued);
        let target = sink.clone();
        let outlet = Cancelable::wrap(move |message| target.send(message));
        let canceller = outlet.canceller();
        let task = tokio::spawn(body(JobScope { run, outlet }));

        tracing::trace!(%run, "run started");
        self.active = Some(ActiveJob {
            run,
            canceller,
            task,
        });
        Ok(run)
    }

    /// Cancel the active run, if any.
    pub fn stop(&mut self) {
        if let Some(job) = self.active.take() {
            job.canceller.cancel();
            job.task.abort();
            tracing::trace!(run = %job.run, "run stopped");
        }
    }

    /// Accept the final result of `run`: true when it is the active run,
    /// which is then retired. Stale runs yield false.
    pub fn settle(&mut self, run: RunId) -> bool {
        if self.is_current(run) {
            self.stop();
            true
        } else {
            false
        }
    }

    pub fn is_current(&self, run: RunId) -> bool {
        self.active.as_ref().map(|job| job.run) == Some(run)
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }
}

impl Drop for JobSlot {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for JobSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobSlot")
            .field("issued", &self.issued)
            .field("active", &self.active.as_ref().map(|job| job.run))
            .finish()
    }
}
