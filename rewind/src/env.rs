//! Environment adapter contract.
//!
//! The agent core never inspects a [`StateBlob`]. It asks the adapter for a
//! snapshot after every step and hands that snapshot back on rollback.

use anyhow::{Context, Result};
use tracing::debug;

use crate::core::trajectory::Trajectory;
use crate::core::types::{ObservableState, StateBlob};

/// A stateful environment whose condition can be snapshotted and restored.
///
/// Implementations must make `restore` followed by `capture_state` return a
/// blob equivalent to the one restored, and `reset` must bring the
/// environment back to its initial condition (step 0).
pub trait Environment {
    /// Return to the initial (pristine) condition.
    fn reset(&mut self) -> Result<()>;

    /// Bring the environment to the condition described by `state`.
    fn restore(&mut self, state: &StateBlob) -> Result<()>;

    /// Facts about the live environment rendered into the instance message.
    fn observe_state(&mut self) -> Result<ObservableState>;

    /// Snapshot the current condition.
    fn capture_state(&mut self) -> Result<StateBlob>;
}

impl<E: Environment + ?Sized> Environment for &mut E {
    fn reset(&mut self) -> Result<()> {
        (**self).reset()
    }

    fn restore(&mut self, state: &StateBlob) -> Result<()> {
        (**self).restore(state)
    }

    fn observe_state(&mut self) -> Result<ObservableState> {
        (**self).observe_state()
    }

    fn capture_state(&mut self) -> Result<StateBlob> {
        (**self).capture_state()
    }
}

/// Bring `env` to its condition after `step` of `trajectory`.
///
/// Step 0 resets; any other step restores the snapshot recorded on record
/// `step - 1`. The step must already be validated against the trajectory.
pub fn restore_to_step<E: Environment + ?Sized>(
    env: &mut E,
    trajectory: &Trajectory,
    step: usize,
) -> Result<()> {
    match trajectory.state_after(step)? {
        None => {
            debug!("resetting environment to step 0");
            env.reset().context("reset environment")
        }
        Some(state) => {
            debug!(step, "restoring environment snapshot");
            env.restore(state)
                .with_context(|| format!("restore environment to step {step}"))
        }
    }
}
