//! Forking: isolation from the parent, id allocation, switching and the saved tree.

use std::collections::BTreeSet;

use rewind::agent::{Agent, AgentSettings, Branchable, Checkpointable};
use rewind::core::error::PreconditionError;
use rewind::core::types::ProblemStatement;
use rewind::io::run_record::load_run_record;
use rewind::record::BranchId;
use rewind::test_support::{
    EnvCall, ScriptedEnvironment, ScriptedExecutor, ScriptedStep, pytest_report,
};
use serde_json::Value;
use tempfile::TempDir;

fn problem() -> ProblemStatement {
    ProblemStatement::new("issue-7", "Handle empty input in the parser.")
}

fn settings() -> AgentSettings {
    AgentSettings::new("main").with_branching(true)
}

/// Branching agent with three steps on the root branch (contents "a", "ab", "abc").
fn stepped_agent<'env>(
    env: &'env mut ScriptedEnvironment,
    out: &TempDir,
) -> Agent<'env, ScriptedEnvironment> {
    let mut agent = Agent::new(settings());
    agent.setup(env, problem(), out.path()).expect("setup");
    let mut executor = ScriptedExecutor::new(vec![
        ScriptedStep::edit("add a", "a"),
        ScriptedStep::edit("add b", "ab"),
        ScriptedStep::edit("add c", "abc"),
    ]);
    for _ in 0..3 {
        agent.step(&mut executor).expect("step");
    }
    agent
}

#[test]
fn fork_copies_prefix_and_leaves_parent_alone() {
    let out = tempfile::tempdir().expect("tempdir");
    let mut env = ScriptedEnvironment::new();
    let mut agent = stepped_agent(&mut env, &out);
    let parent_before = agent.branches().expect("branches").active().clone();

    let child = agent.fork(BranchId::ROOT, 1).expect("fork");

    assert_eq!(child, BranchId::new(1));
    assert_eq!(agent.active_branch_id().expect("active"), child);
    let branches = agent.branches().expect("branches");
    assert_eq!(branches.get(BranchId::ROOT).expect("root"), &parent_before);

    let forked = branches.get(child).expect("child");
    assert_eq!(forked.parent_id, Some(BranchId::ROOT));
    assert_eq!(forked.fork_step, Some(1));
    assert_eq!(forked.trajectory.steps(), &parent_before.trajectory.steps()[..1]);
    assert_eq!(forked.info.exit_status, None);
    assert_eq!(forked.info.model_stats.api_calls, 0);
    drop(agent);
    assert_eq!(env.content, "a");
}

#[test]
fn steps_after_a_fork_only_touch_the_child() {
    let out = tempfile::tempdir().expect("tempdir");
    let mut env = ScriptedEnvironment::new();
    let mut agent = stepped_agent(&mut env, &out);
    let child = agent.fork(BranchId::ROOT, 2).expect("fork");

    let mut executor = ScriptedExecutor::new(vec![ScriptedStep::edit("add z", "abz")]);
    agent.step(&mut executor).expect("step");

    let branches = agent.branches().expect("branches");
    let actions: Vec<&str> = branches
        .get(child)
        .expect("child")
        .trajectory
        .iter()
        .map(|r| r.action.as_str())
        .collect();
    assert_eq!(actions, vec!["add a", "add b", "add z"]);
    assert_eq!(branches.get(BranchId::ROOT).expect("root").trajectory.len(), 3);
    assert_eq!(
        branches
            .get(BranchId::ROOT)
            .expect("root")
            .trajectory
            .steps()[2]
            .action,
        "add c"
    );
}

#[test]
fn repeated_forks_get_distinct_increasing_ids() {
    let out = tempfile::tempdir().expect("tempdir");
    let mut env = ScriptedEnvironment::new();
    let mut agent = stepped_agent(&mut env, &out);

    let mut ids = Vec::new();
    for round in 0..12 {
        let (source, step) = if round % 3 == 0 {
            (BranchId::ROOT, round % 4)
        } else {
            (agent.active_branch_id().expect("active"), 0)
        };
        ids.push(agent.fork(source, step).expect("fork"));
    }

    let unique: BTreeSet<_> = ids.iter().copied().collect();
    assert_eq!(unique.len(), ids.len());
    assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));
    assert!(!unique.contains(&BranchId::ROOT));
    assert_eq!(agent.branches().expect("branches").len(), 13);
}

#[test]
fn invalid_fork_requests_change_nothing() {
    let out = tempfile::tempdir().expect("tempdir");
    let mut env = ScriptedEnvironment::new();
    let mut agent = stepped_agent(&mut env, &out);
    let before = agent.run_data().expect("data");

    let err = agent.fork(BranchId::new(9), 0).expect_err("unknown branch");
    assert_eq!(
        err.downcast_ref::<PreconditionError>(),
        Some(&PreconditionError::UnknownBranch(BranchId::new(9)))
    );

    let err = agent.fork(BranchId::ROOT, 4).expect_err("step out of range");
    assert_eq!(
        err.downcast_ref::<PreconditionError>(),
        Some(&PreconditionError::StepOutOfRange { step: 4, len: 3 })
    );

    assert_eq!(agent.run_data().expect("data"), before);
    drop(agent);
    assert_eq!(env.restores(), 0);
}

#[test]
fn environment_failure_during_fork_keeps_the_tree() {
    let out = tempfile::tempdir().expect("tempdir");
    let mut env = ScriptedEnvironment::new();
    let fail = env.fail_switch();
    let mut agent = stepped_agent(&mut env, &out);
    let before = agent.run_data().expect("data");

    fail.set(true);
    let err = agent.fork(BranchId::ROOT, 1).expect_err("restore fails");
    assert!(format!("{err:#}").contains("scripted restore failure"));

    assert_eq!(agent.run_data().expect("data"), before);
    assert_eq!(agent.active_branch_id().expect("active"), BranchId::ROOT);
    assert_eq!(agent.branches().expect("branches").len(), 1);

    fail.set(false);
    assert_eq!(agent.fork(BranchId::ROOT, 1).expect("fork"), BranchId::new(1));
}

#[test]
fn switch_restores_the_branch_tip() {
    let out = tempfile::tempdir().expect("tempdir");
    let mut env = ScriptedEnvironment::new();
    let mut agent = stepped_agent(&mut env, &out);
    let root_history = agent.history().expect("history").clone();
    agent.fork(BranchId::ROOT, 0).expect("fork");
    assert_eq!(agent.trajectory().expect("trajectory").len(), 0);

    agent.switch_to(BranchId::ROOT).expect("switch");

    assert_eq!(agent.active_branch_id().expect("active"), BranchId::ROOT);
    assert_eq!(agent.history().expect("history"), &root_history);
    let err = agent.switch_to(BranchId::new(5)).expect_err("unknown");
    assert_eq!(
        err.downcast_ref::<PreconditionError>(),
        Some(&PreconditionError::UnknownBranch(BranchId::new(5)))
    );
    drop(agent);
    assert_eq!(env.content, "abc");
    assert!(env.calls.contains(&EnvCall::Reset));
}

#[test]
fn rollback_in_a_child_does_not_reach_the_parent() {
    let out = tempfile::tempdir().expect("tempdir");
    let mut env = ScriptedEnvironment::new();
    let mut agent = stepped_agent(&mut env, &out);
    let child = agent.fork(BranchId::ROOT, 3).expect("fork");

    agent.reset_to_step(1).expect("rollback child");

    let branches = agent.branches().expect("branches");
    assert_eq!(branches.get(child).expect("child").trajectory.len(), 1);
    assert_eq!(branches.get(child).expect("child").fork_step, Some(3));
    assert_eq!(branches.get(BranchId::ROOT).expect("root").trajectory.len(), 3);
    assert!(agent.run_data().expect("data").branches.is_some());
}

#[test]
fn saved_record_carries_the_tree_without_histories() {
    let out = tempfile::tempdir().expect("tempdir");
    let mut env = ScriptedEnvironment::new();
    let mut agent = stepped_agent(&mut env, &out);
    agent.fork(BranchId::ROOT, 2).expect("fork");
    let path = agent.save_run_data().expect("save");

    let value: Value =
        serde_json::from_str(&std::fs::read_to_string(&path).expect("read")).expect("json");
    assert_eq!(value["current_branch_id"], Value::from("1"));
    let branches = value["branches"].as_object().expect("branches object");
    assert_eq!(branches.keys().collect::<Vec<_>>(), vec!["0", "1"]);
    for branch in branches.values() {
        assert!(branch.get("history").is_none());
    }
    assert_eq!(branches["1"]["parent_id"], Value::from("0"));
    assert_eq!(branches["1"]["fork_step"], Value::from(2));
    assert_eq!(value["trajectory"].as_array().expect("trajectory").len(), 2);

    let record = load_run_record(&path).expect("load");
    assert_eq!(record.current_branch_id, Some(BranchId::new(1)));
}

#[test]
fn autosubmission_forks_from_the_best_step() {
    let out = tempfile::tempdir().expect("tempdir");
    let mut env = ScriptedEnvironment::new();
    let mut executor = ScriptedExecutor::new(vec![
        ScriptedStep::edit("first", "1").with_tests(pytest_report(1)),
        ScriptedStep::edit("second", "12").with_tests(pytest_report(4)),
        ScriptedStep::edit("third", "123").with_tests(pytest_report(2)),
        ScriptedStep::fail("model endpoint unavailable"),
    ]);
    let mut agent = Agent::new(settings());
    agent.setup(&mut env, problem(), out.path()).expect("setup");

    let record = agent.run(&mut executor).expect("run");

    assert_eq!(record.current_branch_id, Some(BranchId::new(1)));
    assert_eq!(record.trajectory.len(), 2);
    assert_eq!(record.info.exit_status.as_deref(), Some("submitted (exit_error)"));
    assert_eq!(record.info.submission.as_deref(), Some("12"));
    let branches = record.branches.expect("branches");
    assert_eq!(branches[&BranchId::ROOT].trajectory.len(), 3);
    assert_eq!(branches[&BranchId::new(1)].fork_step, Some(2));
}
