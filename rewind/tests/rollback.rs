//! Linear rollback: truncation, environment restore and history rebuild.

use rewind::agent::{Agent, AgentSettings, Checkpointable};
use rewind::core::error::PreconditionError;
use rewind::core::history::MessageType;
use rewind::core::types::{ProblemStatement, STATE_DIFF};
use rewind::io::run_record::load_run_record;
use rewind::record::RunRecord;
use rewind::test_support::{EnvCall, ScriptedEnvironment, ScriptedExecutor, ScriptedStep};
use tempfile::TempDir;

const STEPS: usize = 4;

fn problem() -> ProblemStatement {
    ProblemStatement::new("issue-1", "Fix the off-by-one in the pager.")
}

fn script() -> ScriptedExecutor {
    ScriptedExecutor::new(
        (1..=STEPS)
            .map(|i| ScriptedStep::edit(&format!("edit {i}"), &"x".repeat(i)))
            .collect(),
    )
}

/// Agent that has taken `STEPS` steps.
fn stepped_agent<'env>(
    env: &'env mut ScriptedEnvironment,
    out: &TempDir,
) -> Agent<'env, ScriptedEnvironment> {
    let mut agent = Agent::new(AgentSettings::new("main"));
    agent.setup(env, problem(), out.path()).expect("setup");
    let mut executor = script();
    for _ in 0..STEPS {
        agent.step(&mut executor).expect("step");
    }
    agent
}

#[test]
fn rollback_to_every_step_truncates_and_restores() {
    for step in 0..=STEPS {
        let out = tempfile::tempdir().expect("tempdir");
        let mut env = ScriptedEnvironment::new();
        let mut agent = stepped_agent(&mut env, &out);
        let before: RunRecord = agent.run_data().expect("data");

        agent.reset_to_step(step).expect("rollback");

        let after = agent.run_data().expect("data");
        assert_eq!(after.trajectory.len(), step, "step {step}");
        assert_eq!(
            after.trajectory.steps(),
            &before.trajectory.steps()[..step],
            "retained records are untouched at step {step}"
        );
        let expected_actions = 2 * step;
        let actions = after
            .history
            .iter()
            .filter(|m| m.message_type != MessageType::SystemPrompt)
            .count();
        // instance message + action/observation per retained step
        assert_eq!(actions, 1 + expected_actions, "step {step}");
        assert_eq!(after.info.model_stats.api_calls, 0);
        drop(agent);

        let expected_content = match step {
            0 => String::new(),
            k => before.trajectory.steps()[k - 1]
                .state
                .get_str(STATE_DIFF)
                .expect("diff")
                .to_string(),
        };
        assert_eq!(env.content, expected_content, "step {step}");
        let restore_call = env.calls[env.calls.len() - 2].clone();
        if step == 0 {
            assert_eq!(restore_call, EnvCall::Reset);
        } else {
            assert_eq!(restore_call, EnvCall::Restore(expected_content.clone()));
        }
    }
}

#[test]
fn rollback_to_current_length_is_a_no_op() {
    let out = tempfile::tempdir().expect("tempdir");
    let mut env = ScriptedEnvironment::new();
    let mut agent = stepped_agent(&mut env, &out);
    let before = agent.run_data().expect("data");

    agent.reset_to_step(STEPS).expect("rollback");
    let after = agent.run_data().expect("data");

    assert_eq!(after.trajectory, before.trajectory);
    assert_eq!(after.history, before.history);
    drop(agent);
    assert_eq!(env.content, "x".repeat(STEPS));
}

#[test]
fn history_after_rollback_is_a_prefix_of_the_grown_history() {
    let out = tempfile::tempdir().expect("tempdir");
    let mut env = ScriptedEnvironment::new();
    let mut agent = stepped_agent(&mut env, &out);
    let full = agent.run_data().expect("data");

    agent.reset_to_step(2).expect("rollback");
    let rolled = agent.run_data().expect("data");

    let preamble_len = full.history.len() - 2 * STEPS;
    assert_eq!(
        rolled.history.messages(),
        &full.history.messages()[..preamble_len + 4]
    );

    agent.reset_to_step(2).expect("rollback again");
    assert_eq!(agent.run_data().expect("data").history, rolled.history);
}

#[test]
fn out_of_range_step_is_rejected_without_mutation() {
    let out = tempfile::tempdir().expect("tempdir");
    let mut env = ScriptedEnvironment::new();
    let mut agent = stepped_agent(&mut env, &out);
    let before = agent.run_data().expect("data");

    let err = agent.reset_to_step(STEPS + 1).expect_err("out of range");
    assert_eq!(
        err.downcast_ref::<PreconditionError>(),
        Some(&PreconditionError::StepOutOfRange {
            step: STEPS + 1,
            len: STEPS
        })
    );
    assert_eq!(agent.run_data().expect("data"), before);
    drop(agent);
    assert_eq!(env.restores(), 0);
    assert_eq!(env.content, "x".repeat(STEPS));
}

#[test]
fn restore_failure_keeps_trajectory_history_and_info() {
    let out = tempfile::tempdir().expect("tempdir");
    let mut env = ScriptedEnvironment::new();
    let fail = env.fail_switch();
    let mut agent = stepped_agent(&mut env, &out);
    let before = agent.run_data().expect("data");

    fail.set(true);
    for step in [0, 2] {
        let err = agent.reset_to_step(step).expect_err("environment fails");
        assert!(err.downcast_ref::<PreconditionError>().is_none());
        assert_eq!(agent.run_data().expect("data"), before, "step {step}");
    }

    fail.set(false);
    agent.reset_to_step(2).expect("rollback after recovery");
    assert_eq!(agent.trajectory().expect("trajectory").len(), 2);
    drop(agent);
    assert_eq!(env.content, "xx");
}

#[test]
fn rollback_is_not_saved_until_the_next_step() {
    let out = tempfile::tempdir().expect("tempdir");
    let mut env = ScriptedEnvironment::new();
    let mut agent = stepped_agent(&mut env, &out);
    let path = agent.record_path().expect("path").to_path_buf();

    agent.reset_to_step(1).expect("rollback");
    assert_eq!(load_run_record(&path).expect("load").trajectory.len(), STEPS);

    let mut executor = ScriptedExecutor::new(vec![ScriptedStep::edit("retry", "y")]);
    agent.step(&mut executor).expect("step");
    let saved = load_run_record(&path).expect("load");
    assert_eq!(saved.trajectory.len(), 2);
    assert_eq!(saved.trajectory.steps()[1].action, "retry");
}
