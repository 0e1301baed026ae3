use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of one stage activation.
///
/// `Failed` and `Succeeded` are terminal for a run; the owner re-arms the
/// stage by starting a new run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StageStatus<T> {
    Unknown,
    Running,
    Failed { reason: String },
    Succeeded { result: T },
}

impl<T> StageStatus<T> {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Running => "running",
            Self::Failed { .. } => "failed",
            Self::Succeeded { .. } => "succeeded",
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed { .. } | Self::Succeeded { .. })
    }

    pub fn succeeded(&self) -> Option<&T> {
        match self {
            Self::Succeeded { result } => Some(result),
            _ => None,
        }
    }

    pub fn failure(&self) -> Option<&str> {
        match self {
            Self::Failed { reason } => Some(reason),
            _ => None,
        }
    }

    pub fn map<U, F: FnOnce(&T) -> U>(&self, f: F) -> StageStatus<U> {
        match self {
            Self::Unknown => StageStatus::Unknown,
            Self::Running => StageStatus::Running,
            Self::Failed { reason } => StageStatus::Failed {
                reason: reason.clone(),
            },
            Self::Succeeded { result } => StageStatus::Succeeded { result: f(result) },
        }
    }
}

impl<T> Default for StageStatus<T> {
    fn default() -> Self {
        Self::Unknown
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    pub at: DateTime<Utc>,
    pub text: String,
}

/// Append-only, user-visible log of one stage run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageLog {
    lines: Vec<LogLine>,
}

impl StageLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, text: impl Into<String>) {
        self.lines.push(LogLine {
            at: Utc::now(),
            text: text.into(),
        });
    }

    /// Start a fresh run.
    pub fn clear(&mut self) {
        self.lines.clear();
    }

    pub fn lines(&self) -> &[LogLine] {
        &self.lines
    }

    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(|line| line.text.as_str())
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}
