//! Forking and switching between branches of one run.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use tracing::{info, instrument};

use crate::agent::Agent;
use crate::core::error::PreconditionError;
use crate::core::history::rebuild_history;
use crate::env::{Environment, restore_to_step};
use crate::record::{AgentInfo, BranchData, BranchId};

/// Tree-shaped exploration on top of checkpoints.
pub trait Branchable {
    /// Create a branch holding the first `step` records of `branch_id` and
    /// make it active. The source branch is not modified.
    ///
    /// Unknown ids, out-of-range steps and an exhausted id space are
    /// rejected before anything changes; an environment failure leaves every branch and the active
    /// pointer as they were.
    fn fork(&mut self, branch_id: BranchId, step: usize) -> Result<BranchId>;

    /// Re-activate an existing branch, restoring the environment to its tip.
    fn switch_to(&mut self, branch_id: BranchId) -> Result<()>;

    fn active_branch_id(&self) -> Result<BranchId>;

    /// Every branch (without histories), keyed by id.
    fn branches_data(&self) -> Result<BTreeMap<BranchId, BranchData>>;
}

impl<E: Environment> Branchable for Agent<'_, E> {
    #[instrument(skip_all, fields(agent = %self.settings.name, branch = %branch_id, step))]
    fn fork(&mut self, branch_id: BranchId, step: usize) -> Result<BranchId> {
        if !self.settings.branching {
            return Err(PreconditionError::BranchingDisabled(self.settings.name.clone()).into());
        }
        let session = self.session.as_mut().ok_or(PreconditionError::NotSetUp)?;
        let source = session.branches.get(branch_id)?;
        source.trajectory.check_step(step)?;
        session.branches.next_id()?;

        restore_to_step(&mut *session.env, &source.trajectory, step)?;
        let observed = session
            .env
            .observe_state()
            .context("observe environment")?;
        let preamble = self.settings.preamble(&session.problem, &observed)?;
        let history = rebuild_history(&preamble, source.trajectory.prefix(step)?);

        let id = session.branches.create_branch(
            branch_id,
            step,
            history,
            AgentInfo::fresh(&self.settings.identity),
        )?;
        session.branches.set_active(id)?;
        info!(new_branch = %id, "forked");
        Ok(id)
    }

    #[instrument(skip_all, fields(agent = %self.settings.name, branch = %branch_id))]
    fn switch_to(&mut self, branch_id: BranchId) -> Result<()> {
        let session = self.session.as_mut().ok_or(PreconditionError::NotSetUp)?;
        let branch = session.branches.get(branch_id)?;
        let tip = branch.trajectory.len();

        restore_to_step(&mut *session.env, &branch.trajectory, tip)?;
        let observed = session
            .env
            .observe_state()
            .context("observe environment")?;
        let preamble = self.settings.preamble(&session.problem, &observed)?;
        let history = rebuild_history(&preamble, branch.trajectory.steps());

        session.branches.get_mut(branch_id)?.history = history;
        session.branches.set_active(branch_id)?;
        info!(tip, "switched branch");
        Ok(())
    }

    fn active_branch_id(&self) -> Result<BranchId> {
        Ok(self.session()?.branches.active_id())
    }

    fn branches_data(&self) -> Result<BTreeMap<BranchId, BranchData>> {
        Ok(self.session()?.branches.branches_data())
    }
}
