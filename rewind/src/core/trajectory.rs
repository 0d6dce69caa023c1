//! Step-indexed trajectory storage.
//!
//! Records are stored 0-indexed. Callers address them with step numbers:
//! step `0` is the pristine environment and step `k` (`1 <= k <= len`) is the
//! state after record `k - 1`.

use serde::{Deserialize, Serialize};

use crate::core::error::PreconditionError;
use crate::core::types::{StateBlob, StepRecord};

/// Ordered step records of one linear execution path.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Trajectory(Vec<StepRecord>);

impl Trajectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn steps(&self) -> &[StepRecord] {
        &self.0
    }

    pub fn iter(&self) -> std::slice::Iter<'_, StepRecord> {
        self.0.iter()
    }

    /// Reject step numbers outside `[0, len]`.
    pub fn check_step(&self, step: usize) -> Result<(), PreconditionError> {
        if step > self.0.len() {
            return Err(PreconditionError::StepOutOfRange {
                step,
                len: self.0.len(),
            });
        }
        Ok(())
    }

    /// Records executed up to and including `step`.
    pub fn prefix(&self, step: usize) -> Result<&[StepRecord], PreconditionError> {
        self.check_step(step)?;
        Ok(&self.0[..step])
    }

    /// Snapshot to restore for `step`; `None` means the pristine environment.
    pub fn state_after(&self, step: usize) -> Result<Option<&StateBlob>, PreconditionError> {
        self.check_step(step)?;
        Ok(step.checked_sub(1).map(|index| &self.0[index].state))
    }

    pub(crate) fn push(&mut self, record: StepRecord) {
        self.0.push(record);
    }

    pub(crate) fn truncate(&mut self, step: usize) {
        self.0.truncate(step);
    }
}

impl From<Vec<StepRecord>> for Trajectory {
    fn from(records: Vec<StepRecord>) -> Self {
        Self(records)
    }
}

impl<'a> IntoIterator for &'a Trajectory {
    type Item = &'a StepRecord;
    type IntoIter = std::slice::Iter<'a, StepRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
