//! Multi-role runs over one shared environment.
//!
//! Roles (e.g. design, dev, test) run one after another. Each gets a fresh
//! agent and its own record directory, and a call allowance reduced by what
//! earlier roles consumed. Their records are merged into one document tagged
//! by role.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::agent::{Agent, AgentSettings, StepExecutor};
use crate::core::budget::{ModelStats, remaining_calls};
use crate::core::history::Message;
use crate::core::types::{ProblemStatement, StepRecord};
use crate::env::Environment;
use crate::io::config::{RewindConfig, RoleConfig};
use crate::io::run_record::{record_path, write_json_atomic};
use crate::record::{AgentInfo, Identity, RunRecord};

/// An entry tagged with the role that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tagged<T> {
    pub agent: String,
    #[serde(flatten)]
    pub entry: T,
}

/// Merged record of every role, saved as `<output_dir>/<id>.traj`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhasedRunRecord {
    /// All roles' steps, in role order.
    pub trajectory: Vec<Tagged<StepRecord>>,
    pub history: Vec<Tagged<Message>>,
    /// Last role's info plus `<role>_model_stats` and summed `model_stats`.
    pub info: AgentInfo,
    /// Each role's own steps, tagged like `trajectory` and keyed `<role>_trajectory`.
    #[serde(flatten)]
    pub role_trajectories: BTreeMap<String, Vec<Tagged<StepRecord>>>,
}

/// Outcome of one role.
#[derive(Debug, Clone, PartialEq)]
pub struct RoleRun {
    pub role: String,
    pub record: RunRecord,
    /// Executor usage for this role alone.
    pub stats: ModelStats,
}

/// Roles to run in order, sharing one base agent configuration.
#[derive(Debug, Clone)]
pub struct PhasedRun {
    settings: AgentSettings,
    roles: Vec<RoleConfig>,
}

impl PhasedRun {
    pub fn new(settings: AgentSettings, roles: Vec<RoleConfig>) -> Self {
        Self { settings, roles }
    }

    /// Agent settings from `cfg`; roles from `cfg.roles` or the defaults.
    pub fn from_config(cfg: &RewindConfig) -> Result<Self> {
        Ok(Self::new(
            AgentSettings::from_config(cfg)?,
            cfg.roles_or_default(),
        ))
    }

    pub fn roles(&self) -> &[RoleConfig] {
        &self.roles
    }

    /// Run every role against `env` and save the merged record.
    ///
    /// `factory` builds each role's executor from its config and remaining
    /// call allowance (`None` is unlimited).
    #[instrument(skip_all, fields(problem = %problem.id, roles = self.roles.len()))]
    pub fn run<E, X, F>(
        &self,
        env: &mut E,
        problem: &ProblemStatement,
        output_dir: &Path,
        mut factory: F,
    ) -> Result<PhasedRunRecord>
    where
        E: Environment,
        X: StepExecutor<E>,
        F: FnMut(&RoleConfig, Option<u64>) -> Result<X>,
    {
        let mut consumed = 0u64;
        let mut runs = Vec::with_capacity(self.roles.len());
        for role in &self.roles {
            let call_limit = remaining_calls(role.call_limit, consumed);
            info!(role = %role.name, consumed, ?call_limit, "starting role");

            let mut executor = factory(role, call_limit)
                .with_context(|| format!("build executor for role '{}'", role.name))?;
            let mut agent = Agent::new(self.settings.for_role(role));
            agent.setup(
                &mut *env,
                problem.clone(),
                &output_dir.join(format!("{}_agent", role.name)),
            )?;
            agent
                .run(&mut executor)
                .with_context(|| format!("run role '{}'", role.name))?;

            let stats = executor.stats().clone();
            consumed += stats.api_calls;
            info!(role = %role.name, api_calls = stats.api_calls, "role finished");
            runs.push(RoleRun {
                role: role.name.clone(),
                record: agent.into_run_data()?,
                stats,
            });
        }

        let merged = merge_role_runs(&runs, &self.settings.identity);
        let path = record_path(output_dir, &problem.id);
        write_json_atomic(&path, &merged)?;
        info!(record = %path.display(), steps = merged.trajectory.len(), "saved merged record");
        Ok(merged)
    }
}

/// Concatenate role records in order, tagging every entry with its role.
pub fn merge_role_runs(runs: &[RoleRun], identity: &Identity) -> PhasedRunRecord {
    let mut merged = PhasedRunRecord {
        trajectory: Vec::new(),
        history: Vec::new(),
        info: runs
            .last()
            .map(|run| run.record.info.clone())
            .unwrap_or_else(|| AgentInfo::fresh(identity)),
        role_trajectories: BTreeMap::new(),
    };

    for run in runs {
        merged
            .trajectory
            .extend(tag(&run.role, run.record.trajectory.steps()));
        merged.history.extend(run.record.history.iter().map(|message| Tagged {
            agent: run.role.clone(),
            entry: message.clone(),
        }));
        merged.info.set_role_model_stats(&run.role, &run.stats);
        merged.role_trajectories.insert(
            format!("{}_trajectory", run.role),
            tag(&run.role, run.record.trajectory.steps()),
        );
    }
    merged.info.model_stats = runs.iter().map(|run| run.stats.clone()).sum();
    merged
}

fn tag(role: &str, steps: &[StepRecord]) -> Vec<Tagged<StepRecord>> {
    steps
        .iter()
        .map(|step| Tagged {
            agent: role.to_string(),
            entry: step.clone(),
        })
        .collect()
}
