//! Output port: progress reporting and operator interaction.
//!
//! The engine never talks to a console directly; everything an operator
//! sees or answers goes through [`OutputPort`]. The interactive console
//! implementation lives in the embedding application; [`LogOutput`] is the
//! non-interactive default, routing messages to `tracing` and answering
//! every question with its default choice.

use tracing::{error, info, warn};

use crate::core::ids::IdTuple;

/// Severity of an operator-facing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// Progress and interaction contract between the engine and its front-end.
pub trait OutputPort: Send + Sync {
    /// A migration run is starting; `total` is the source row count.
    fn start(&self, migration: &str, total: u64);

    /// One row was processed. `dest_ids` is `None` for skipped rows.
    fn write_progress(&self, count: u64, source_ids: &IdTuple, dest_ids: Option<&IdTuple>);

    /// The current migration run finished.
    fn finish(&self);

    /// Show a message to the operator.
    fn message(&self, text: &str, severity: Severity);

    /// Ask the operator to pick one of `choices`; returns the chosen index.
    fn ask(&self, prompt: &str, choices: &[&str], default: usize) -> usize;
}

/// Non-interactive output port backed by `tracing`.
#[derive(Debug, Default)]
pub struct LogOutput;

impl OutputPort for LogOutput {
    fn start(&self, migration: &str, total: u64) {
        info!("Starting migration '{}' ({} rows)", migration, total);
    }

    fn write_progress(&self, count: u64, source_ids: &IdTuple, dest_ids: Option<&IdTuple>) {
        match dest_ids {
            Some(dest) => info!("Row {}: {} -> {}", count, source_ids, dest),
            None => info!("Row {}: {} skipped", count, source_ids),
        }
    }

    fn finish(&self) {
        info!("Migration finished");
    }

    fn message(&self, text: &str, severity: Severity) {
        match severity {
            Severity::Info => info!("{}", text),
            Severity::Warning => warn!("{}", text),
            Severity::Error => error!("{}", text),
        }
    }

    fn ask(&self, prompt: &str, choices: &[&str], default: usize) -> usize {
        info!(
            "Non-interactive: answering '{}' with '{}'",
            prompt,
            choices.get(default).copied().unwrap_or("?")
        );
        default
    }
}
