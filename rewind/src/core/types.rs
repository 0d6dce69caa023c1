//! Shared deterministic types for the trajectory core.
//!
//! These types are the stable contract between the agent, the environment
//! adapter and the persisted run record. Field names follow the `.traj`
//! format, so renames here are format changes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Key of the working-copy diff inside a [`StateBlob`].
pub const STATE_DIFF: &str = "diff";
/// Key of the exact diff bytes, hex-encoded, when the diff is not valid UTF-8.
/// `diff` then only holds a lossy rendering for display.
pub const STATE_DIFF_HEX: &str = "diff_hex";
/// Key of the raw test report inside a [`StateBlob`].
pub const STATE_TEST_OUTPUT: &str = "test_output";
/// Key of the test command exit code inside a [`StateBlob`].
pub const STATE_TEST_EXIT_CODE: &str = "test_exit_code";

/// Environment snapshot captured after a step.
///
/// Opaque to the core: only the environment adapter interprets it. The core
/// stores it on the step record and hands it back unmodified on restore.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateBlob(BTreeMap<String, Value>);

impl StateBlob {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: &str, value: impl Into<Value>) {
        self.0.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Observable facts about the live environment (e.g. working directory).
///
/// Rendered into the instance message whenever a history is (re)built.
pub type ObservableState = BTreeMap<String, String>;

/// One tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

/// One completed agent turn. Never mutated after it is appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    /// Tool invocation issued by the model.
    pub action: String,
    /// What the environment returned for `action`.
    pub observation: String,
    /// Raw model response.
    #[serde(rename = "response")]
    pub model_output: String,
    #[serde(default)]
    pub thought: Option<String>,
    /// Snapshot that restores the environment to its post-step condition.
    #[serde(default)]
    pub state: StateBlob,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default)]
    pub execution_time_ms: u64,
}

impl StepRecord {
    pub fn new(
        action: impl Into<String>,
        observation: impl Into<String>,
        model_output: impl Into<String>,
    ) -> Self {
        Self {
            action: action.into(),
            observation: observation.into(),
            model_output: model_output.into(),
            thought: None,
            state: StateBlob::default(),
            tool_calls: Vec::new(),
            execution_time_ms: 0,
        }
    }

    pub fn with_thought(mut self, thought: impl Into<String>) -> Self {
        self.thought = Some(thought.into());
        self
    }

    pub fn with_state(mut self, state: StateBlob) -> Self {
        self.state = state;
        self
    }

    pub fn with_tool_calls(mut self, tool_calls: Vec<ToolCall>) -> Self {
        self.tool_calls = tool_calls;
        self
    }

    /// Identifiers linking this step's tool calls to history entries, in call order.
    pub fn tool_call_ids(&self) -> Vec<String> {
        self.tool_calls.iter().map(|call| call.id.clone()).collect()
    }
}

/// Task given to an agent at setup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProblemStatement {
    /// Stable identifier; names the run record file (`<id>.traj`).
    pub id: String,
    pub text: String,
}

impl ProblemStatement {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn step_record_uses_response_key_for_model_output() {
        let record = StepRecord::new("ls", "a.txt", "I will list files")
            .with_state(StateBlob::new().with(STATE_DIFF, ""));
        let value = serde_json::to_value(&record).expect("serialize");

        assert_eq!(value["response"], json!("I will list files"));
        assert!(value.get("model_output").is_none());
        assert!(value.get("tool_calls").is_none());
        assert_eq!(value["thought"], Value::Null);
    }

    #[test]
    fn tool_call_ids_preserve_call_order() {
        let record = StepRecord::new("edit", "ok", "").with_tool_calls(vec![
            ToolCall {
                id: "call_b".to_string(),
                name: "edit".to_string(),
                arguments: json!({}),
            },
            ToolCall {
                id: "call_a".to_string(),
                name: "view".to_string(),
                arguments: json!({"path": "x"}),
            },
        ]);

        assert_eq!(record.tool_call_ids(), vec!["call_b", "call_a"]);
    }
}
