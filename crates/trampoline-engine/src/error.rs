use thiserror::Error;

/// Engine errors.
///
/// Stage failures never surface here: a stage turns its own failures into
/// state. What remains are breaches of the engine contract, which are fatal
/// to the whole pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error("Contract violation: {0}")]
    ContractViolation(String),
}

impl PipelineError {
    pub fn contract(detail: impl Into<String>) -> Self {
        Self::ContractViolation(detail.into())
    }

    pub fn props_changed(what: &str) -> Self {
        Self::ContractViolation(format!(
            "'{}' is not supported to be updated dynamically; the owner must \
             re-create the step instead",
            what
        ))
    }
}

/// Signal returned by a cancelled handle.
///
/// Only the boundary owning the handle may swallow it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("callback has been cancelled")]
pub struct Cancelled;
