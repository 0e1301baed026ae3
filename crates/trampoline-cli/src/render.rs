//! Output formatting for stage views

use serde::Serialize;
use std::fmt::Write;
use trampoline_engine::{StageLog, StageStatus};
use trampoline_steps::{SubjectKind, SubjectMetadata, TradeView};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable stage summaries
    #[default]
    Text,
    /// One JSON document per view change
    Json,
}

fn status_line<T>(
    out: &mut String,
    stage: &str,
    status: &StageStatus<T>,
    result: impl Fn(&T) -> String,
) {
    let detail = match status {
        StageStatus::Succeeded { result: value } => format!(": {}", result(value)),
        StageStatus::Failed { reason } => format!(": {}", reason),
        StageStatus::Unknown | StageStatus::Running => String::new(),
    };
    let _ = writeln!(out, "[{}] {}{}", stage, status.name(), detail);
}

fn log_lines(out: &mut String, log: &StageLog) {
    for line in log.lines() {
        let _ = writeln!(out, "    {} {}", line.at.format("%H:%M:%S%.3f"), line.text);
    }
}

/// One block per mounted stage, with the stage logs indented below.
pub fn render_text(view: &TradeView) -> String {
    let mut out = String::new();

    status_line(&mut out, "connect", &view.first.status, String::clone);
    if let Some(endpoint) = &view.first.manual_endpoint {
        let _ = writeln!(out, "    manual endpoint: {}", endpoint);
    }
    log_lines(&mut out, &view.first.log);

    let Some(identified) = &view.second else {
        return out;
    };
    status_line(&mut out, "identity", &identified.first.status, ToString::to_string);
    log_lines(&mut out, &identified.first.log);

    if let Some(verify) = &identified.second {
        status_line(&mut out, "verify", &verify.status, |m| m.description.clone());
        if verify.integrity_failure {
            let _ = writeln!(out, "    the market could not be proven genuine; do not trade");
        }
    }
    out
}

fn kind_name(kind: SubjectKind) -> &'static str {
    match kind {
        SubjectKind::YesNo => "yes/no",
        SubjectKind::Categorical => "categorical",
        SubjectKind::Scalar => "scalar",
    }
}

pub fn render_metadata(metadata: &SubjectMetadata) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Market:      {}", metadata.market);
    let _ = writeln!(out, "Question:    {}", metadata.description);
    let _ = writeln!(out, "Details:     {}", metadata.long_description);
    if !metadata.resolution_source.is_empty() {
        let _ = writeln!(out, "Resolution:  {}", metadata.resolution_source);
    }
    let _ = writeln!(out, "Type:        {}", kind_name(metadata.kind));
    let _ = writeln!(out, "Outcomes:    {}", metadata.outcomes.join(", "));
    let _ = writeln!(out, "Price range: {} .. {}", metadata.min_price, metadata.max_price);
    if let Some(unit) = &metadata.scalar_denomination {
        let _ = writeln!(out, "Unit:        {}", unit);
    }
    let _ = writeln!(out, "Ends at:     {}", metadata.end_time);
    let _ = writeln!(out, "Finalized:   {}", metadata.is_finalized);
    out
}

pub fn render_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string(value)
}
