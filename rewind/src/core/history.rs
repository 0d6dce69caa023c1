//! Conversation history rebuilt from a trajectory prefix.
//!
//! The history an agent sends to its model is never patched in place after a
//! rollback. It is rebuilt from a fixed preamble plus the retained step
//! records, so it cannot drift from the trajectory. [`append_step`] is the
//! same per-record rule used while stepping, which keeps an incrementally
//! grown history identical to a rebuild.

use serde::{Deserialize, Serialize};

use crate::core::types::{StepRecord, ToolCall};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    SystemPrompt,
    Demonstration,
    Observation,
    Action,
}

/// One entry of the conversation sent to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub message_type: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_call_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_demo: bool,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>, message_type: MessageType) -> Self {
        Self {
            role,
            content: content.into(),
            message_type,
            thought: None,
            action: None,
            tool_calls: Vec::new(),
            tool_call_ids: Vec::new(),
            is_demo: false,
        }
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Fixed messages that open every history.
#[derive(Debug, Clone, PartialEq)]
pub struct Preamble {
    /// Rendered system prompt.
    pub system: String,
    /// Demonstration messages; flagged `is_demo` when added to a history.
    pub demonstrations: Vec<Message>,
    /// Rendered task message, including the environment's observable state.
    pub instance: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct History(Vec<Message>);

impl History {
    pub fn messages(&self) -> &[Message] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Message> {
        self.0.iter()
    }

    fn push(&mut self, message: Message) {
        self.0.push(message);
    }
}

impl From<Vec<Message>> for History {
    fn from(messages: Vec<Message>) -> Self {
        Self(messages)
    }
}

/// Rebuild the history for `prefix` from scratch.
///
/// An empty prefix yields the preamble alone.
pub fn rebuild_history(preamble: &Preamble, prefix: &[StepRecord]) -> History {
    let mut history = History::default();
    history.push(Message::new(
        Role::System,
        preamble.system.clone(),
        MessageType::SystemPrompt,
    ));
    for demo in &preamble.demonstrations {
        let mut message = demo.clone();
        message.is_demo = true;
        history.push(message);
    }
    history.push(Message::new(
        Role::User,
        preamble.instance.clone(),
        MessageType::Observation,
    ));
    for record in prefix {
        append_step(&mut history, record);
    }
    history
}

/// Append the messages for one completed step: the model's action, then the observation.
pub fn append_step(history: &mut History, record: &StepRecord) {
    history.push(Message {
        thought: record.thought.clone(),
        action: Some(record.action.clone()),
        tool_calls: record.tool_calls.clone(),
        ..Message::new(
            Role::Assistant,
            record.model_output.clone(),
            MessageType::Action,
        )
    });

    let tool_call_ids = record.tool_call_ids();
    let role = if tool_call_ids.is_empty() {
        Role::User
    } else {
        Role::Tool
    };
    history.push(Message {
        tool_call_ids,
        ..Message::new(role, record.observation.clone(), MessageType::Observation)
    });
}
