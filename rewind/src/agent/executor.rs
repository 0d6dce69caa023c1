//! Model-facing side of a step.
//!
//! A [`StepExecutor`] turns the current history into one action, runs it
//! against the environment and reports what happened. Model transport and
//! tool execution live behind this trait; the agent only records results.

use anyhow::Result;

use crate::core::budget::ModelStats;
use crate::core::history::History;
use crate::core::types::StepRecord;
use crate::env::Environment;

/// Result of one executor turn.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutput {
    /// The completed turn. Its `state` is filled in by the agent.
    pub record: StepRecord,
    /// The executor has finished the task (e.g. it submitted).
    pub done: bool,
    pub exit_status: Option<String>,
    /// Explicit submission; defaults to the captured diff when `done`.
    pub submission: Option<String>,
}

impl StepOutput {
    /// A turn after which the run continues.
    pub fn next(record: StepRecord) -> Self {
        Self {
            record,
            done: false,
            exit_status: None,
            submission: None,
        }
    }

    /// The final turn of a run.
    pub fn finished(record: StepRecord, exit_status: impl Into<String>) -> Self {
        Self {
            record,
            done: true,
            exit_status: Some(exit_status.into()),
            submission: None,
        }
    }
}

/// Produces steps for an agent.
///
/// Executors that enforce a call limit fail with
/// [`BudgetExhausted`](crate::core::error::BudgetExhausted) once it is used up.
pub trait StepExecutor<E: Environment> {
    fn step(&mut self, history: &History, env: &mut E) -> Result<StepOutput>;

    /// Usage so far; cumulative over the executor's lifetime.
    fn stats(&self) -> &ModelStats;
}
