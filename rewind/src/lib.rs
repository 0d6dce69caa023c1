//! Step-indexed checkpoint, rollback and branching for tool-calling agents.
//!
//! An agent executes one step at a time against a single stateful
//! environment (usually a git working copy). Every step is recorded with a
//! snapshot of the environment, which lets the agent back up to an earlier
//! step and either resume linearly or fork a new branch, while the
//! environment and the replayed conversation stay consistent.
//!
//! - **[`core`]**: Pure, deterministic logic (trajectories, history rebuild,
//!   best-step selection, budgets). No I/O.
//! - **[`io`]**: Side-effecting operations (filesystem, git, child processes,
//!   templates, configuration).
//!
//! [`agent`], [`branch`] and [`phased`] coordinate core logic with the
//! [`env::Environment`] adapter.

pub mod agent;
pub mod branch;
pub mod core;
pub mod env;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod phased;
pub mod record;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
