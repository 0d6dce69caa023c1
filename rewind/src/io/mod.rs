//! I/O helpers: configuration, persistence, git, child processes, templates.

pub mod config;
pub mod git;
pub mod problem;
pub mod process;
pub mod run_record;
pub mod templates;
pub mod workdir;
