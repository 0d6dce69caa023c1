//! Single-role agent: steps, records, rolls back and forks.
//!
//! An [`Agent`] borrows one [`Environment`] for the whole run. Every step it
//! takes is appended to the active branch together with a snapshot of the
//! environment, and the run record is saved after each step.

pub mod branching;
pub mod checkpoint;
pub mod executor;

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

pub use branching::Branchable;
pub use checkpoint::Checkpointable;
pub use executor::{StepExecutor, StepOutput};

use crate::branch::{Branch, BranchManager};
use crate::core::best_step::best_step_for_reset;
use crate::core::budget::ModelStats;
use crate::core::error::{BudgetExhausted, PreconditionError};
use crate::core::history::{History, Message, Preamble, append_step, rebuild_history};
use crate::core::invariants::validate_invariants;
use crate::core::trajectory::Trajectory;
use crate::core::types::{ObservableState, ProblemStatement, STATE_DIFF};
use crate::env::{Environment, restore_to_step};
use crate::io::config::{RewindConfig, RoleConfig};
use crate::io::problem::validate_id;
use crate::io::run_record::{record_path, write_run_record};
use crate::io::templates::{PromptTemplates, load_demonstrations};
use crate::record::{AgentInfo, Identity, RunRecord};

/// Exit reason when the call budget ran out.
pub const EXIT_CALL_LIMIT: &str = "exit_call_limit";
/// Exit reason for any other step failure.
pub const EXIT_ERROR: &str = "exit_error";

/// Static configuration of one agent.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentSettings {
    pub name: String,
    /// Allow forks; branching runs save the whole branch tree.
    pub branching: bool,
    pub templates: PromptTemplates,
    pub demonstrations: Vec<Message>,
    pub identity: Identity,
}

impl AgentSettings {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            branching: false,
            templates: PromptTemplates::default(),
            demonstrations: Vec::new(),
            identity: Identity::default(),
        }
    }

    pub fn with_branching(mut self, branching: bool) -> Self {
        self.branching = branching;
        self
    }

    pub fn with_templates(mut self, templates: PromptTemplates) -> Self {
        self.templates = templates;
        self
    }

    pub fn from_config(cfg: &RewindConfig) -> Result<Self> {
        Ok(Self {
            name: cfg.agent.name.clone(),
            branching: cfg.agent.branching,
            templates: PromptTemplates::from_config(&cfg.templates)?,
            demonstrations: load_demonstrations(&cfg.templates.demonstrations)?,
            identity: cfg.identity.clone(),
        })
    }

    /// The same settings under a role's name.
    pub fn for_role(&self, role: &RoleConfig) -> Self {
        Self {
            name: role.name.clone(),
            ..self.clone()
        }
    }

    fn preamble(&self, problem: &ProblemStatement, observed: &ObservableState) -> Result<Preamble> {
        Ok(Preamble {
            system: self.templates.render_system(problem, observed)?,
            demonstrations: self.demonstrations.clone(),
            instance: self.templates.render_instance(problem, observed)?,
        })
    }
}

struct Session<'env, E> {
    env: &'env mut E,
    problem: ProblemStatement,
    record_path: PathBuf,
    branches: BranchManager,
}

/// One agent bound (after [`Agent::setup`]) to an environment and a problem.
pub struct Agent<'env, E: Environment> {
    settings: AgentSettings,
    session: Option<Session<'env, E>>,
}

impl<'env, E: Environment> Agent<'env, E> {
    pub fn new(settings: AgentSettings) -> Self {
        Self {
            settings,
            session: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.settings.name
    }

    pub fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    /// Bind the environment and problem and start the root branch.
    ///
    /// The run record is saved to `<output_dir>/<problem id>.traj`.
    #[instrument(skip_all, fields(agent = %self.settings.name, problem = %problem.id))]
    pub fn setup(
        &mut self,
        env: &'env mut E,
        problem: ProblemStatement,
        output_dir: &Path,
    ) -> Result<()> {
        validate_id(&problem.id).context("problem id")?;
        let observed = env.observe_state().context("observe environment")?;
        let preamble = self.settings.preamble(&problem, &observed)?;
        let branches = BranchManager::new_root(
            rebuild_history(&preamble, &[]),
            AgentInfo::fresh(&self.settings.identity),
        );
        let record_path = record_path(output_dir, &problem.id);
        info!(record = %record_path.display(), "agent set up");
        self.session = Some(Session {
            env,
            problem,
            record_path,
            branches,
        });
        Ok(())
    }

    /// Continue from a saved record.
    ///
    /// The environment is restored to the tip of the record's active branch.
    /// Histories of inactive branches are rebuilt from their trajectories.
    #[instrument(skip_all, fields(agent = %settings.name, problem = %problem.id))]
    pub fn resume(
        settings: AgentSettings,
        env: &'env mut E,
        problem: ProblemStatement,
        record_path: PathBuf,
        record: RunRecord,
    ) -> Result<Self> {
        let errors = validate_invariants(&record);
        if !errors.is_empty() {
            return Err(anyhow!("cannot resume: {}", errors.join("; ")));
        }
        let RunRecord {
            trajectory,
            history,
            info,
            branches,
            current_branch_id,
        } = record;

        let branches = match (branches, current_branch_id) {
            (Some(data), Some(current)) => {
                if !settings.branching {
                    return Err(PreconditionError::BranchingDisabled(settings.name.clone()).into());
                }
                let observed = env.observe_state().context("observe environment")?;
                let preamble = settings.preamble(&problem, &observed)?;
                let mut loaded = Vec::with_capacity(data.len());
                for (id, branch) in data {
                    let history = if id == current {
                        history.clone()
                    } else {
                        rebuild_history(&preamble, branch.trajectory.steps())
                    };
                    loaded.push(Branch {
                        id,
                        parent_id: branch.parent_id,
                        fork_step: branch.fork_step,
                        trajectory: branch.trajectory,
                        history,
                        info: branch.info,
                    });
                }
                BranchManager::from_branches(loaded, current)?
            }
            _ => {
                let mut manager = BranchManager::new_root(history, info);
                manager.active_mut().trajectory = trajectory;
                manager
            }
        };

        let active = branches.active();
        restore_to_step(&mut *env, &active.trajectory, active.trajectory.len())
            .context("restore environment to the saved tip")?;
        info!(
            branches = branches.len(),
            active = %active.id,
            steps = active.trajectory.len(),
            "resumed run"
        );

        Ok(Self {
            settings,
            session: Some(Session {
                env,
                problem,
                record_path,
                branches,
            }),
        })
    }

    pub fn is_set_up(&self) -> bool {
        self.session.is_some()
    }

    pub fn problem(&self) -> Result<&ProblemStatement> {
        Ok(&self.session()?.problem)
    }

    pub fn record_path(&self) -> Result<&Path> {
        Ok(&self.session()?.record_path)
    }

    pub fn branches(&self) -> Result<&BranchManager> {
        Ok(&self.session()?.branches)
    }

    pub fn trajectory(&self) -> Result<&Trajectory> {
        Ok(&self.session()?.branches.active().trajectory)
    }

    pub fn history(&self) -> Result<&History> {
        Ok(&self.session()?.branches.active().history)
    }

    pub fn info(&self) -> Result<&AgentInfo> {
        Ok(&self.session()?.branches.active().info)
    }

    /// Run one executor turn and record it on the active branch.
    #[instrument(skip_all, fields(agent = %self.settings.name))]
    pub fn step<X: StepExecutor<E>>(&mut self, executor: &mut X) -> Result<StepOutput> {
        let session = self.session.as_mut().ok_or(PreconditionError::NotSetUp)?;
        let started = Instant::now();
        let mut output = executor.step(&session.branches.active().history, &mut *session.env)?;
        output.record.state = session
            .env
            .capture_state()
            .context("capture environment state")?;
        output.record.execution_time_ms =
            u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let branch = session.branches.active_mut();
        append_step(&mut branch.history, &output.record);
        branch.trajectory.push(output.record.clone());
        branch.info.model_stats = executor.stats().clone();
        if output.done {
            branch.info.exit_status = output.exit_status.clone();
            branch.info.submission = output.submission.clone().or_else(|| {
                output
                    .record
                    .state
                    .get_str(STATE_DIFF)
                    .filter(|diff| !diff.trim().is_empty())
                    .map(str::to_string)
            });
        }
        debug!(
            branch = %branch.id,
            step = branch.trajectory.len(),
            done = output.done,
            "step recorded"
        );

        self.save_run_data()?;
        Ok(output)
    }

    /// Step until the executor is done or a step fails.
    ///
    /// A failed step (including an exhausted call budget) ends the run with
    /// an autosubmission; caller errors are returned instead.
    #[instrument(skip_all, fields(agent = %self.settings.name))]
    pub fn run<X: StepExecutor<E>>(&mut self, executor: &mut X) -> Result<RunRecord> {
        self.session()?;
        info!("run started");
        loop {
            match self.step(executor) {
                Ok(output) if output.done => break,
                Ok(_) => {}
                Err(err) if err.downcast_ref::<PreconditionError>().is_some() => return Err(err),
                Err(err) => {
                    self.attempt_autosubmission_after_error(&err, executor.stats())?;
                    break;
                }
            }
        }
        let record = self.run_data()?;
        info!(
            steps = record.trajectory.len(),
            exit_status = ?record.info.exit_status,
            "run finished"
        );
        Ok(record)
    }

    /// Salvage a submission after a failed step.
    ///
    /// Rolls back to the step with the most passing tests (forking instead
    /// when branching is enabled), then submits the environment's diff.
    /// A failed rollback is logged and the current state is submitted.
    #[instrument(skip_all, fields(agent = %self.settings.name))]
    pub fn attempt_autosubmission_after_error(
        &mut self,
        error: &anyhow::Error,
        stats: &ModelStats,
    ) -> Result<()> {
        let reason = if error.downcast_ref::<BudgetExhausted>().is_some() {
            EXIT_CALL_LIMIT
        } else {
            EXIT_ERROR
        };
        let cause = format!("{error:#}");
        warn!(reason, error = %cause, "step failed, attempting autosubmission");

        let best = best_step_for_reset(self.trajectory()?.steps());
        if best.step > 0 {
            let rollback = if self.settings.branching {
                let active = self.active_branch_id()?;
                self.fork(active, best.step).map(|_| ())
            } else {
                self.reset_to_step(best.step)
            };
            match rollback {
                Ok(()) => info!(step = best.step, passed = ?best.passed, "rolled back to best step"),
                Err(err) => {
                    let cause = format!("{err:#}");
                    warn!(step = best.step, error = %cause, "rollback before autosubmission failed");
                }
            }
        }

        let session = self.session.as_mut().ok_or(PreconditionError::NotSetUp)?;
        let submission = match session.env.capture_state() {
            Ok(state) => state
                .get_str(STATE_DIFF)
                .filter(|diff| !diff.trim().is_empty())
                .map(str::to_string),
            Err(err) => {
                let cause = format!("{err:#}");
                warn!(error = %cause, "could not capture environment for autosubmission");
                None
            }
        };

        let info = &mut session.branches.active_mut().info;
        info.model_stats = stats.clone();
        info.exit_status = Some(match submission {
            Some(_) => format!("submitted ({reason})"),
            None => reason.to_string(),
        });
        info.submission = submission;

        self.save_run_data()?;
        Ok(())
    }

    /// Snapshot of the run as saved to disk.
    pub fn run_data(&self) -> Result<RunRecord> {
        let session = self.session()?;
        let active = session.branches.active();
        let (branches, current_branch_id) = if self.settings.branching {
            (Some(session.branches.branches_data()), Some(active.id))
        } else {
            (None, None)
        };
        Ok(RunRecord {
            trajectory: active.trajectory.clone(),
            history: active.history.clone(),
            info: active.info.clone(),
            branches,
            current_branch_id,
        })
    }

    /// Write [`Agent::run_data`] to the record path.
    pub fn save_run_data(&self) -> Result<PathBuf> {
        let session = self.session()?;
        write_run_record(&session.record_path, &self.run_data()?)?;
        Ok(session.record_path.clone())
    }

    /// Consume the agent, releasing the environment borrow.
    pub fn into_run_data(self) -> Result<RunRecord> {
        let session = self.session.ok_or(PreconditionError::NotSetUp)?;
        let (active, data) = session.branches.into_active_and_data();
        let (branches, current_branch_id) = if self.settings.branching {
            (Some(data), Some(active.id))
        } else {
            (None, None)
        };
        Ok(RunRecord {
            trajectory: active.trajectory,
            history: active.history,
            info: active.info,
            branches,
            current_branch_id,
        })
    }

    fn session(&self) -> Result<&Session<'env, E>, PreconditionError> {
        self.session.as_ref().ok_or(PreconditionError::NotSetUp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::STATE_TEST_OUTPUT;
    use crate::record::BranchId;
    use crate::test_support::{EnvCall, ScriptedEnvironment, ScriptedExecutor, ScriptedStep, pytest_report};

    fn problem() -> ProblemStatement {
        ProblemStatement::new("task-1", "Make the tests pass.")
    }

    #[test]
    fn operations_before_setup_fail_with_not_set_up() {
        let mut agent: Agent<'_, ScriptedEnvironment> = Agent::new(AgentSettings::new("main"));
        let err = agent.reset_to_step(0).expect_err("not set up");
        assert_eq!(
            err.downcast_ref::<PreconditionError>(),
            Some(&PreconditionError::NotSetUp)
        );
        assert!(agent.run_data().is_err());
    }

    #[test]
    fn step_records_snapshot_and_saves() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut env = ScriptedEnvironment::new();
        let mut executor = ScriptedExecutor::new(vec![
            ScriptedStep::edit("write a", "a").with_tests(pytest_report(1)),
            ScriptedStep::edit("write ab", "ab").finish(),
        ]);
        let mut agent = Agent::new(AgentSettings::new("main"));
        agent.setup(&mut env, problem(), temp.path()).expect("setup");

        let record = agent.run(&mut executor).expect("run");
        assert_eq!(record.trajectory.len(), 2);
        assert_eq!(record.trajectory.steps()[0].state.get_str(STATE_DIFF), Some("a"));
        assert!(record.trajectory.steps()[0].state.get(STATE_TEST_OUTPUT).is_some());
        assert_eq!(record.info.submission.as_deref(), Some("ab"));
        assert_eq!(record.info.model_stats.api_calls, 2);
        assert!(record.branches.is_none());
        assert!(temp.path().join("task-1.traj").exists());
    }

    #[test]
    fn rollback_truncates_and_restores() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut env = ScriptedEnvironment::new();
        let mut executor = ScriptedExecutor::new(vec![
            ScriptedStep::edit("one", "1"),
            ScriptedStep::edit("two", "12"),
            ScriptedStep::edit("three", "123").finish(),
        ]);
        let mut agent = Agent::new(AgentSettings::new("main"));
        agent.setup(&mut env, problem(), temp.path()).expect("setup");
        agent.run(&mut executor).expect("run");

        agent.reset_to_step(1).expect("rollback");
        assert_eq!(agent.trajectory().expect("trajectory").len(), 1);
        assert_eq!(agent.info().expect("info").exit_status, None);
        drop(agent);
        assert_eq!(env.content, "1");
        assert_eq!(env.calls.last(), Some(&EnvCall::Observe));
    }

    #[test]
    fn fork_requires_branching() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut env = ScriptedEnvironment::new();
        let mut agent = Agent::new(AgentSettings::new("main"));
        agent.setup(&mut env, problem(), temp.path()).expect("setup");

        let err = agent.fork(BranchId::ROOT, 0).expect_err("disabled");
        assert_eq!(
            err.downcast_ref::<PreconditionError>(),
            Some(&PreconditionError::BranchingDisabled("main".to_string()))
        );
    }

    #[test]
    fn budget_exhaustion_autosubmits_best_step() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut env = ScriptedEnvironment::new();
        let mut executor = ScriptedExecutor::new(vec![
            ScriptedStep::edit("good", "good").with_tests(pytest_report(5)),
            ScriptedStep::edit("worse", "worse").with_tests(pytest_report(2)),
            ScriptedStep::edit("never", "never"),
        ])
        .with_call_limit(Some(2));
        let mut agent = Agent::new(AgentSettings::new("main"));
        agent.setup(&mut env, problem(), temp.path()).expect("setup");

        let record = agent.run(&mut executor).expect("run");
        assert_eq!(record.trajectory.len(), 1);
        assert_eq!(
            record.info.exit_status.as_deref(),
            Some("submitted (exit_call_limit)")
        );
        assert_eq!(record.info.submission.as_deref(), Some("good"));
        assert_eq!(record.info.model_stats.api_calls, 2);
    }
}
