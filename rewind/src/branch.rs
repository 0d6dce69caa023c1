//! Branch tree of one agent run.
//!
//! Every run has exactly one root branch. Forks copy a prefix of their
//! parent's trajectory into a new branch with a fresh id; parents are never
//! mutated by a fork and branches are never removed while the run lives.

use std::collections::BTreeMap;

use tracing::debug;

use crate::core::error::PreconditionError;
use crate::core::history::History;
use crate::core::trajectory::Trajectory;
use crate::record::{AgentInfo, BranchData, BranchId};

/// One linear execution path.
#[derive(Debug, Clone, PartialEq)]
pub struct Branch {
    pub id: BranchId,
    pub parent_id: Option<BranchId>,
    /// Parent step this branch was forked from.
    pub fork_step: Option<usize>,
    pub trajectory: Trajectory,
    pub history: History,
    pub info: AgentInfo,
}

impl Branch {
    /// Serializable view without the history.
    pub fn data(&self) -> BranchData {
        BranchData {
            id: self.id,
            parent_id: self.parent_id,
            fork_step: self.fork_step,
            trajectory: self.trajectory.clone(),
            info: self.info.clone(),
        }
    }

    fn into_data(self) -> BranchData {
        BranchData {
            id: self.id,
            parent_id: self.parent_id,
            fork_step: self.fork_step,
            trajectory: self.trajectory,
            info: self.info,
        }
    }
}

/// Owns all branches of a run and the active-branch pointer.
#[derive(Debug, Clone)]
pub struct BranchManager {
    branches: BTreeMap<BranchId, Branch>,
    active: BranchId,
    /// `None` once ids are exhausted.
    next_id: Option<BranchId>,
    last_id: BranchId,
}

impl BranchManager {
    /// Start a run with its root branch (id 0) active.
    pub fn new_root(history: History, info: AgentInfo) -> Self {
        let root = Branch {
            id: BranchId::ROOT,
            parent_id: None,
            fork_step: None,
            trajectory: Trajectory::new(),
            history,
            info,
        };
        let mut branches = BTreeMap::new();
        branches.insert(root.id, root);
        Self {
            branches,
            active: BranchId::ROOT,
            next_id: BranchId::ROOT.next(),
            last_id: BranchId::ROOT,
        }
    }

    /// Reassemble a manager from branches loaded from a saved record.
    ///
    /// New ids continue after the largest loaded id.
    pub(crate) fn from_branches(
        branches: Vec<Branch>,
        active: BranchId,
    ) -> Result<Self, PreconditionError> {
        let branches: BTreeMap<BranchId, Branch> =
            branches.into_iter().map(|b| (b.id, b)).collect();
        if !branches.contains_key(&active) {
            return Err(PreconditionError::UnknownBranch(active));
        }
        let last_id = branches
            .keys()
            .next_back()
            .copied()
            .unwrap_or(BranchId::ROOT);
        Ok(Self {
            branches,
            active,
            next_id: last_id.next(),
            last_id,
        })
    }

    /// Id the next created branch will get.
    pub fn next_id(&self) -> Result<BranchId, PreconditionError> {
        self.next_id
            .ok_or(PreconditionError::BranchIdsExhausted(self.last_id))
    }

    pub fn active_id(&self) -> BranchId {
        self.active
    }

    pub fn active(&self) -> &Branch {
        &self.branches[&self.active]
    }

    pub(crate) fn active_mut(&mut self) -> &mut Branch {
        self.branches
            .get_mut(&self.active)
            .expect("active branch is always present")
    }

    pub fn get(&self, id: BranchId) -> Result<&Branch, PreconditionError> {
        self.branches
            .get(&id)
            .ok_or(PreconditionError::UnknownBranch(id))
    }

    pub(crate) fn get_mut(&mut self, id: BranchId) -> Result<&mut Branch, PreconditionError> {
        self.branches
            .get_mut(&id)
            .ok_or(PreconditionError::UnknownBranch(id))
    }

    /// Branches in creation order.
    pub fn branches(&self) -> impl Iterator<Item = &Branch> {
        self.branches.values()
    }

    pub fn len(&self) -> usize {
        self.branches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.branches.is_empty()
    }

    /// Copy `parent`'s first `fork_step` records into a new branch.
    ///
    /// Does not change the active branch.
    pub fn create_branch(
        &mut self,
        parent_id: BranchId,
        fork_step: usize,
        history: History,
        info: AgentInfo,
    ) -> Result<BranchId, PreconditionError> {
        let parent = self.get(parent_id)?;
        let trajectory: Trajectory = parent.trajectory.prefix(fork_step)?.to_vec().into();

        let id = self.next_id()?;
        self.next_id = id.next();
        self.last_id = id;
        self.branches.insert(
            id,
            Branch {
                id,
                parent_id: Some(parent_id),
                fork_step: Some(fork_step),
                trajectory,
                history,
                info,
            },
        );
        debug!(%id, %parent_id, fork_step, "created branch");
        Ok(id)
    }

    pub fn set_active(&mut self, id: BranchId) -> Result<(), PreconditionError> {
        self.get(id)?;
        self.active = id;
        Ok(())
    }

    /// Every branch without its history, keyed by id.
    pub fn branches_data(&self) -> BTreeMap<BranchId, BranchData> {
        self.branches
            .iter()
            .map(|(id, branch)| (*id, branch.data()))
            .collect()
    }

    /// Split into the active branch and the serialized view of all branches.
    pub(crate) fn into_active_and_data(self) -> (Branch, BTreeMap<BranchId, BranchData>) {
        let mut data = BTreeMap::new();
        let mut active = None;
        for (id, branch) in self.branches {
            if id == self.active {
                data.insert(id, branch.data());
                active = Some(branch);
            } else {
                data.insert(id, branch.into_data());
            }
        }
        let active = active.expect("active branch is always present");
        (active, data)
    }
}
