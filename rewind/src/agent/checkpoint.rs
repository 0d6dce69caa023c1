//! Linear rollback of the active branch.

use anyhow::{Context, Result};
use tracing::{info, instrument};

use crate::agent::Agent;
use crate::core::error::PreconditionError;
use crate::core::history::rebuild_history;
use crate::env::{Environment, restore_to_step};
use crate::record::AgentInfo;

/// Rewind to an earlier step, discarding everything after it.
pub trait Checkpointable {
    /// Truncate the active trajectory to `step` records and bring the
    /// environment and history back in line with it.
    ///
    /// Step 0 is the pristine environment. Steps past the trajectory length
    /// fail with [`PreconditionError::StepOutOfRange`]; any failure leaves the
    /// trajectory, history and info untouched.
    fn reset_to_step(&mut self, step: usize) -> Result<()>;
}

impl<E: Environment> Checkpointable for Agent<'_, E> {
    #[instrument(skip_all, fields(agent = %self.settings.name, step))]
    fn reset_to_step(&mut self, step: usize) -> Result<()> {
        let session = self.session.as_mut().ok_or(PreconditionError::NotSetUp)?;
        let branch = session.branches.active();
        branch.trajectory.check_step(step)?;

        restore_to_step(&mut *session.env, &branch.trajectory, step)?;
        let observed = session
            .env
            .observe_state()
            .context("observe environment")?;
        let preamble = self.settings.preamble(&session.problem, &observed)?;
        let history = rebuild_history(&preamble, branch.trajectory.prefix(step)?);
        let dropped = branch.trajectory.len() - step;

        let branch = session.branches.active_mut();
        branch.trajectory.truncate(step);
        branch.history = history;
        branch.info = AgentInfo::fresh(&self.settings.identity);
        info!(branch = %branch.id, dropped, "rolled back");
        Ok(())
    }
}
