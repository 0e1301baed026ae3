//! Step pipeline engine.
//!
//! Composes stateful, asynchronous and independently retryable stages into
//! one unit. Each stage publishes a ready result (or not) plus an
//! exclusivity flag; [`chain`] wires two stages so the downstream one is
//! re-created from scratch whenever the upstream result changes identity,
//! and [`PipelineDriver`] owns the root, turning exclusivity into a global
//! lock on user input.

#![deny(unsafe_code)]

pub mod cancellable;
pub mod chain;
pub mod driver;
pub mod error;
pub mod job;
pub mod status;
pub mod step;

pub use cancellable::{Cancelable, Canceller};
pub use chain::{chain, Chain, ChainMessage, ChainState, ChainView, Epoch};
pub use driver::{PipelineDriver, PipelineHandle};
pub use error::{Cancelled, PipelineError};
pub use job::{JobScope, JobSlot, RunId};
pub use status::{LogLine, StageLog, StageStatus};
pub use step::{PropsGuard, Sink, Step, StepContext, StepExternalState, StepOutput, StepProps};
