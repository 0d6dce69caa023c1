//! Test doubles: an in-memory environment, a scripted executor and a
//! throwaway git repository.

use std::cell::Cell;
use std::collections::VecDeque;
use std::path::Path;
use std::process::Command;
use std::rc::Rc;

use anyhow::{Context, Result, anyhow};
use serde_json::json;
use tempfile::TempDir;

use crate::agent::{StepExecutor, StepOutput};
use crate::core::budget::ModelStats;
use crate::core::error::BudgetExhausted;
use crate::core::history::History;
use crate::core::types::{ObservableState, STATE_DIFF, STATE_TEST_OUTPUT, StateBlob, StepRecord};
use crate::env::Environment;

/// Calls observed by [`ScriptedEnvironment`], in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvCall {
    Reset,
    /// Restore with the snapshot's diff.
    Restore(String),
    Observe,
    Capture,
}

/// Environment whose whole state is one string (`content`), captured as the diff.
#[derive(Debug, Clone)]
pub struct ScriptedEnvironment {
    pub content: String,
    pub test_output: Option<String>,
    pub working_dir: String,
    pub calls: Vec<EnvCall>,
    /// While set, `reset` and `restore` fail without touching `content`.
    /// Shared so tests can flip it while an agent borrows the environment.
    pub fail_restore: Rc<Cell<bool>>,
}

impl Default for ScriptedEnvironment {
    fn default() -> Self {
        Self {
            content: String::new(),
            test_output: None,
            working_dir: "/repo".to_string(),
            calls: Vec::new(),
            fail_restore: Rc::new(Cell::new(false)),
        }
    }
}

impl ScriptedEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle that toggles restore failures.
    pub fn fail_switch(&self) -> Rc<Cell<bool>> {
        Rc::clone(&self.fail_restore)
    }

    pub fn restores(&self) -> usize {
        self.calls
            .iter()
            .filter(|call| matches!(call, EnvCall::Restore(_) | EnvCall::Reset))
            .count()
    }
}

impl Environment for ScriptedEnvironment {
    fn reset(&mut self) -> Result<()> {
        self.calls.push(EnvCall::Reset);
        if self.fail_restore.get() {
            return Err(anyhow!("scripted reset failure"));
        }
        self.content.clear();
        self.test_output = None;
        Ok(())
    }

    fn restore(&mut self, state: &StateBlob) -> Result<()> {
        let diff = state
            .get_str(STATE_DIFF)
            .ok_or_else(|| anyhow!("snapshot has no diff"))?;
        self.calls.push(EnvCall::Restore(diff.to_string()));
        if self.fail_restore.get() {
            return Err(anyhow!("scripted restore failure"));
        }
        self.content = diff.to_string();
        self.test_output = state.get_str(STATE_TEST_OUTPUT).map(str::to_string);
        Ok(())
    }

    fn observe_state(&mut self) -> Result<ObservableState> {
        self.calls.push(EnvCall::Observe);
        Ok(ObservableState::from([(
            "working_dir".to_string(),
            self.working_dir.clone(),
        )]))
    }

    fn capture_state(&mut self) -> Result<StateBlob> {
        self.calls.push(EnvCall::Capture);
        let mut state = StateBlob::new().with(STATE_DIFF, self.content.clone());
        if let Some(output) = &self.test_output {
            state.insert(STATE_TEST_OUTPUT, output.clone());
        }
        Ok(state)
    }
}

/// One scripted executor turn.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptedStep {
    pub action: String,
    /// New environment content; `None` leaves it unchanged.
    pub content: Option<String>,
    pub test_output: Option<String>,
    pub done: bool,
    /// Fail the turn with this message after applying the edit.
    pub error: Option<String>,
}

impl ScriptedStep {
    /// A turn that replaces the environment content.
    pub fn edit(action: &str, content: &str) -> Self {
        Self {
            action: action.to_string(),
            content: Some(content.to_string()),
            test_output: None,
            done: false,
            error: None,
        }
    }

    /// A turn that leaves the environment alone.
    pub fn look(action: &str) -> Self {
        Self {
            content: None,
            ..Self::edit(action, "")
        }
    }

    /// A turn that fails.
    pub fn fail(message: &str) -> Self {
        Self {
            error: Some(message.to_string()),
            ..Self::look("crash")
        }
    }

    pub fn with_tests(mut self, output: impl Into<String>) -> Self {
        self.test_output = Some(output.into());
        self
    }

    pub fn finish(mut self) -> Self {
        self.done = true;
        self
    }
}

/// Executor replaying a fixed queue of turns, one model call each.
#[derive(Debug, Clone, Default)]
pub struct ScriptedExecutor {
    steps: VecDeque<ScriptedStep>,
    stats: ModelStats,
    call_limit: Option<u64>,
    /// History length seen at each call.
    pub seen_history_lens: Vec<usize>,
}

impl ScriptedExecutor {
    pub fn new(steps: Vec<ScriptedStep>) -> Self {
        Self {
            steps: steps.into(),
            ..Self::default()
        }
    }

    pub fn with_call_limit(mut self, call_limit: Option<u64>) -> Self {
        self.call_limit = call_limit;
        self
    }

    pub fn call_limit(&self) -> Option<u64> {
        self.call_limit
    }

    pub fn remaining(&self) -> usize {
        self.steps.len()
    }
}

impl StepExecutor<ScriptedEnvironment> for ScriptedExecutor {
    fn step(&mut self, history: &History, env: &mut ScriptedEnvironment) -> Result<StepOutput> {
        if let Some(limit) = self.call_limit
            && self.stats.api_calls >= limit
        {
            return Err(BudgetExhausted {
                used: self.stats.api_calls,
                limit,
            }
            .into());
        }
        self.stats.api_calls += 1;
        self.stats.tokens_sent += history.len() as u64;
        self.seen_history_lens.push(history.len());

        let step = self
            .steps
            .pop_front()
            .context("scripted executor ran out of steps")?;
        if let Some(content) = &step.content {
            env.content = content.clone();
        }
        if let Some(output) = &step.test_output {
            env.test_output = Some(output.clone());
        }
        if let Some(message) = step.error {
            return Err(anyhow!(message));
        }

        let record = StepRecord::new(
            step.action.clone(),
            format!("ran {}", step.action),
            format!("I will {}", step.action),
        );
        Ok(if step.done {
            StepOutput::finished(record, "submitted")
        } else {
            StepOutput::next(record)
        })
    }

    fn stats(&self) -> &ModelStats {
        &self.stats
    }
}

/// A pytest-json-report document with `passed` passing tests.
pub fn pytest_report(passed: u64) -> String {
    json!({"summary": {"passed": passed, "total": passed + 1}}).to_string()
}

/// Temporary git repository with one commit (`README.md`).
pub struct TestRepo {
    dir: TempDir,
}

impl TestRepo {
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir().context("create temp dir")?;
        let repo = Self { dir };
        repo.git(&["init", "--quiet"])?;
        repo.git(&["config", "user.email", "rewind@example.com"])?;
        repo.git(&["config", "user.name", "rewind tests"])?;
        repo.git(&["config", "commit.gpgsign", "false"])?;
        std::fs::write(repo.path().join("README.md"), "hello\n").context("write README")?;
        repo.git(&["add", "-A"])?;
        repo.git(&["commit", "--quiet", "-m", "initial"])?;
        Ok(repo)
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    fn git(&self, args: &[&str]) -> Result<()> {
        let out = Command::new("git")
            .args(args)
            .current_dir(self.path())
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))?;
        if !out.status.success() {
            return Err(anyhow!(
                "git {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&out.stderr).trim()
            ));
        }
        Ok(())
    }
}
