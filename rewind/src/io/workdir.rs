//! Snapshot adapter for a git working copy.
//!
//! A snapshot is the staged diff against the base commit pinned at
//! construction, plus the raw output of the configured test command.

use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::core::types::{
    ObservableState, STATE_DIFF, STATE_DIFF_HEX, STATE_TEST_EXIT_CODE, STATE_TEST_OUTPUT,
    StateBlob,
};
use crate::env::Environment;
use crate::io::config::EnvironmentConfig;
use crate::io::git::Git;
use crate::io::process::run_command_with_timeout;

/// Command run after every step to record test results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCommand {
    pub argv: Vec<String>,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
}

impl TestCommand {
    /// `None` when no command is configured.
    pub fn from_config(cfg: &EnvironmentConfig) -> Option<Self> {
        if cfg.test_command.is_empty() {
            return None;
        }
        Some(Self {
            argv: cfg.test_command.clone(),
            timeout: Duration::from_secs(cfg.test_timeout_secs),
            output_limit_bytes: cfg.output_limit_bytes,
        })
    }
}

/// A git working copy pinned to its `HEAD` at construction.
#[derive(Debug, Clone)]
pub struct GitWorkdir {
    git: Git,
    base_commit: String,
    test: Option<TestCommand>,
}

impl GitWorkdir {
    /// Pin `git`'s current `HEAD` as the pristine state.
    pub fn open(git: Git, test: Option<TestCommand>) -> Result<Self> {
        let base_commit = git.head_sha().context("resolve base commit")?;
        info!(workdir = %git.workdir().display(), %base_commit, "opened working copy");
        Ok(Self {
            git,
            base_commit,
            test,
        })
    }

    /// Use an explicit base commit instead of the current `HEAD`.
    pub fn with_base(git: Git, base_commit: impl Into<String>, test: Option<TestCommand>) -> Self {
        Self {
            git,
            base_commit: base_commit.into(),
            test,
        }
    }

    pub fn git(&self) -> &Git {
        &self.git
    }

    pub fn base_commit(&self) -> &str {
        &self.base_commit
    }

    #[instrument(skip_all)]
    fn run_tests(&self, test: &TestCommand) -> Result<(String, Option<i32>)> {
        let (program, args) = test
            .argv
            .split_first()
            .ok_or_else(|| anyhow!("test command is empty"))?;
        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(self.git.workdir());
        let out = run_command_with_timeout(cmd, None, test.timeout, test.output_limit_bytes)
            .with_context(|| format!("run test command {}", test.argv.join(" ")))?;
        if out.timed_out {
            // Timeouts land in the snapshot with a null exit code.
            debug!("recording test command timeout as a step outcome");
            let mut output = out.stdout_text();
            if !output.is_empty() && !output.ends_with('\n') {
                output.push('\n');
            }
            output.push_str(&format!(
                "[test command timed out after {}ms]",
                test.timeout.as_millis()
            ));
            return Ok((output, None));
        }
        debug!(exit_code = ?out.status.code(), "test command finished");
        Ok((out.stdout_text(), out.status.code()))
    }
}

impl Environment for GitWorkdir {
    #[instrument(skip_all)]
    fn reset(&mut self) -> Result<()> {
        self.git
            .reset_hard(&self.base_commit)
            .context("reset working copy")?;
        self.git.clean().context("clean working copy")
    }

    #[instrument(skip_all)]
    fn restore(&mut self, state: &StateBlob) -> Result<()> {
        let diff = snapshot_diff(state)?;
        self.reset()?;
        if diff.iter().all(u8::is_ascii_whitespace) {
            return Ok(());
        }
        self.git.apply(&diff).context("apply snapshot diff")
    }

    fn observe_state(&mut self) -> Result<ObservableState> {
        let mut state = ObservableState::new();
        state.insert(
            "working_dir".to_string(),
            self.git.workdir().display().to_string(),
        );
        state.insert("base_commit".to_string(), self.base_commit.clone());
        Ok(state)
    }

    #[instrument(skip_all)]
    fn capture_state(&mut self) -> Result<StateBlob> {
        self.git.add_all().context("stage changes")?;
        let diff = self.git.diff_cached(&self.base_commit)?;
        let mut state = match String::from_utf8(diff) {
            Ok(text) => StateBlob::new().with(STATE_DIFF, text),
            Err(err) => {
                let bytes = err.into_bytes();
                debug!(diff_bytes = bytes.len(), "diff is not UTF-8, storing hex copy");
                StateBlob::new()
                    .with(STATE_DIFF, String::from_utf8_lossy(&bytes).into_owned())
                    .with(STATE_DIFF_HEX, hex::encode(&bytes))
            }
        };
        if let Some(test) = &self.test {
            let (output, exit_code) = self.run_tests(test)?;
            state.insert(STATE_TEST_OUTPUT, output);
            state.insert(STATE_TEST_EXIT_CODE, exit_code);
        }
        Ok(state)
    }
}

/// Exact patch bytes of a snapshot: the hex copy when present, else `diff`.
fn snapshot_diff(state: &StateBlob) -> Result<Vec<u8>> {
    if let Some(encoded) = state.get(STATE_DIFF_HEX) {
        let Value::String(encoded) = encoded else {
            return Err(anyhow!("snapshot '{STATE_DIFF_HEX}' is not a string: {encoded}"));
        };
        return hex::decode(encoded)
            .with_context(|| format!("decode snapshot '{STATE_DIFF_HEX}'"));
    }
    match state.get(STATE_DIFF) {
        None => Err(anyhow!("snapshot has no '{STATE_DIFF}' entry")),
        Some(Value::String(diff)) => Ok(diff.clone().into_bytes()),
        Some(other) => Err(anyhow!("snapshot '{STATE_DIFF}' is not a string: {other}")),
    }
}
