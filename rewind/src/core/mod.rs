//! Deterministic, pure logic shared by the agent, branch manager and CLI.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod best_step;
pub mod budget;
pub mod error;
pub mod history;
pub mod invariants;
pub mod trajectory;
pub mod types;
