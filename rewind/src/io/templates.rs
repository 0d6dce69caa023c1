//! Preamble templates (minijinja) and demonstration loading.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use tracing::debug;

use crate::core::history::{Message, MessageType, Role};
use crate::core::types::{ObservableState, ProblemStatement};
use crate::io::config::TemplatesConfig;
use crate::io::run_record::load_run_record;

const SYSTEM_TEMPLATE: &str = include_str!("prompts/system.md");
const INSTANCE_TEMPLATE: &str = include_str!("prompts/instance.md");

/// System and instance templates, syntax-checked at construction.
///
/// Both templates see `problem_id`, `problem_statement` and `state` (the
/// environment's observable state, a string map).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplates {
    system: String,
    instance: String,
}

impl PromptTemplates {
    pub fn new(system: impl Into<String>, instance: impl Into<String>) -> Result<Self> {
        let templates = Self {
            system: system.into(),
            instance: instance.into(),
        };
        let env = Environment::new();
        env.template_from_str(&templates.system)
            .context("parse system template")?;
        env.template_from_str(&templates.instance)
            .context("parse instance template")?;
        Ok(templates)
    }

    /// Configured templates, built-in defaults for unset ones.
    pub fn from_config(cfg: &TemplatesConfig) -> Result<Self> {
        Self::new(
            cfg.system.as_deref().unwrap_or(SYSTEM_TEMPLATE),
            cfg.instance.as_deref().unwrap_or(INSTANCE_TEMPLATE),
        )
    }

    pub fn render_system(
        &self,
        problem: &ProblemStatement,
        state: &ObservableState,
    ) -> Result<String> {
        Self::render(&self.system, problem, state)
            .context("render system template")
    }

    pub fn render_instance(
        &self,
        problem: &ProblemStatement,
        state: &ObservableState,
    ) -> Result<String> {
        Self::render(&self.instance, problem, state)
            .context("render instance template")
    }

    fn render(
        source: &str,
        problem: &ProblemStatement,
        state: &ObservableState,
    ) -> Result<String> {
        let rendered = Environment::new().render_str(
            source,
            context! {
                problem_id => problem.id.as_str(),
                problem_statement => problem.text.trim(),
                state => state,
            },
        )?;
        Ok(rendered.trim().to_string())
    }
}

impl Default for PromptTemplates {
    fn default() -> Self {
        Self {
            system: SYSTEM_TEMPLATE.to_string(),
            instance: INSTANCE_TEMPLATE.to_string(),
        }
    }
}

/// Conversation of each saved run, replayed as demonstration messages.
///
/// System prompts and the demonstrations of the saved runs are left out.
pub fn load_demonstrations(paths: &[PathBuf]) -> Result<Vec<Message>> {
    let mut messages = Vec::new();
    for path in paths {
        messages.extend(load_demonstration(path)?);
    }
    Ok(messages)
}

fn load_demonstration(path: &Path) -> Result<Vec<Message>> {
    let record =
        load_run_record(path).with_context(|| format!("load demonstration {}", path.display()))?;
    let messages: Vec<Message> = record
        .history
        .iter()
        .filter(|message| message.role != Role::System && !message.is_demo)
        .map(|message| Message {
            message_type: MessageType::Demonstration,
            is_demo: true,
            ..message.clone()
        })
        .collect();
    debug!(path = %path.display(), messages = messages.len(), "loaded demonstration");
    Ok(messages)
}
