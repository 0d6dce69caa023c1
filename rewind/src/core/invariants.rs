//! Semantic invariants of a run record not expressible via JSON Schema.

use crate::record::{BranchId, RunRecord};

/// Check branch-tree invariants of a loaded record:
/// - `branches` and `current_branch_id` appear together
/// - each branch is keyed by its own id
/// - exactly one root (no parent, no fork step)
/// - `parent_id` and `fork_step` are set together
/// - parents exist and were created earlier (smaller id)
/// - the active branch exists and matches the top-level trajectory
pub fn validate_invariants(record: &RunRecord) -> Vec<String> {
    let mut errors = Vec::new();

    let (branches, current) = match (&record.branches, record.current_branch_id) {
        (None, None) => return errors,
        (Some(branches), Some(current)) => (branches, current),
        (Some(_), None) => {
            errors.push("branches present without current_branch_id".to_string());
            return errors;
        }
        (None, Some(_)) => {
            errors.push("current_branch_id present without branches".to_string());
            return errors;
        }
    };

    let mut roots: Vec<BranchId> = Vec::new();
    for (key, branch) in branches {
        if *key != branch.id {
            errors.push(format!("branch keyed '{}' has id '{}'", key, branch.id));
        }
        match (branch.parent_id, branch.fork_step) {
            (None, None) => roots.push(branch.id),
            (Some(parent_id), Some(_)) => {
                if parent_id >= branch.id {
                    errors.push(format!(
                        "branch '{}': parent '{}' must have a smaller id",
                        branch.id, parent_id
                    ));
                }
                if !branches.contains_key(&parent_id) {
                    errors.push(format!(
                        "branch '{}': parent '{}' not found",
                        branch.id, parent_id
                    ));
                }
            }
            _ => errors.push(format!(
                "branch '{}': parent_id and fork_step must be set together",
                branch.id
            )),
        }
    }

    if roots.len() != 1 {
        errors.push(format!("expected exactly one root branch, found {}", roots.len()));
    }

    match branches.get(&current) {
        None => errors.push(format!("current branch '{current}' not found")),
        Some(active) => {
            if active.trajectory != record.trajectory {
                errors.push(format!(
                    "top-level trajectory differs from current branch '{current}'"
                ));
            }
        }
    }

    errors
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::core::history::History;
    use crate::core::trajectory::Trajectory;
    use crate::core::types::StepRecord;
    use crate::record::{AgentInfo, BranchData};

    fn trajectory(len: usize) -> Trajectory {
        (0..len)
            .map(|i| StepRecord::new(format!("a{i}"), "ok", ""))
            .collect::<Vec<_>>()
            .into()
    }

    fn branch(id: u32, parent: Option<(u32, usize)>, len: usize) -> BranchData {
        BranchData {
            id: BranchId::new(id),
            parent_id: parent.map(|(p, _)| BranchId::new(p)),
            fork_step: parent.map(|(_, s)| s),
            trajectory: trajectory(len),
            info: AgentInfo::default(),
        }
    }

    fn record(branches: Vec<BranchData>, current: u32) -> RunRecord {
        let active = branches
            .iter()
            .find(|b| b.id == BranchId::new(current))
            .map(|b| b.trajectory.clone())
            .unwrap_or_default();
        RunRecord {
            trajectory: active,
            history: History::default(),
            info: AgentInfo::default(),
            branches: Some(branches.into_iter().map(|b| (b.id, b)).collect::<BTreeMap<_, _>>()),
            current_branch_id: Some(BranchId::new(current)),
        }
    }

    #[test]
    fn linear_record_has_no_branch_invariants() {
        let rec = RunRecord {
            trajectory: trajectory(2),
            history: History::default(),
            info: AgentInfo::default(),
            branches: None,
            current_branch_id: None,
        };
        assert!(validate_invariants(&rec).is_empty());
    }

    #[test]
    fn valid_tree_passes() {
        let rec = record(
            vec![branch(0, None, 3), branch(1, Some((0, 2)), 4), branch(2, Some((1, 0)), 0)],
            1,
        );
        assert_eq!(validate_invariants(&rec), Vec::<String>::new());
    }

    #[test]
    fn reports_broken_tree() {
        let mut rec = record(
            vec![branch(0, None, 3), branch(1, None, 1), branch(2, Some((5, 9)), 2)],
            2,
        );
        rec.trajectory = trajectory(7);

        let errors = validate_invariants(&rec);
        assert!(errors.iter().any(|e| e.contains("exactly one root")));
        assert!(errors.iter().any(|e| e.contains("parent '5' must have a smaller id")));
        assert!(errors.iter().any(|e| e.contains("parent '5' not found")));
        assert!(errors.iter().any(|e| e.contains("top-level trajectory differs")));
    }

    #[test]
    fn missing_current_branch_is_reported() {
        let mut rec = record(vec![branch(0, None, 0)], 0);
        rec.current_branch_id = Some(BranchId::new(3));
        let errors = validate_invariants(&rec);
        assert!(errors.iter().any(|e| e.contains("current branch '3' not found")));
    }
}
