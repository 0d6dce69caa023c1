//! Typed errors that callers branch on.
//!
//! Everything else travels as `anyhow::Error`. These types are wrapped in
//! `anyhow::Error` at the API boundary and recovered with `downcast_ref`.

use thiserror::Error;

use crate::record::BranchId;

/// Caller error detected before any state was touched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PreconditionError {
    /// Step number outside `[0, len]` of the addressed trajectory.
    #[error("invalid step number {step}: must be between 0 and {len}")]
    StepOutOfRange { step: usize, len: usize },

    #[error("branch '{0}' not found")]
    UnknownBranch(BranchId),

    /// No environment/problem statement bound yet.
    #[error("agent is not set up (call setup first)")]
    NotSetUp,

    #[error("branching is disabled for agent '{0}'")]
    BranchingDisabled(String),

    /// The run already holds the largest representable branch id.
    #[error("no branch ids left after '{0}'")]
    BranchIdsExhausted(BranchId),
}

/// A role used its whole call allowance.
///
/// Raised by step executors and surfaced by the agent as a terminal
/// condition (`exit_call_limit`).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("call limit exhausted: {used} of {limit} calls used")]
pub struct BudgetExhausted {
    pub used: u64,
    pub limit: u64,
}
