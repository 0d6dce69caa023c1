//! Agent and orchestration configuration (`rewind.toml`).

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::io::problem::validate_id;
use crate::record::Identity;

/// Top-level configuration (TOML).
///
/// Every section may be omitted; missing fields fall back to defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RewindConfig {
    pub agent: AgentConfig,
    pub templates: TemplatesConfig,
    /// Identity fields stamped on every fresh run info.
    pub identity: Identity,
    pub environment: EnvironmentConfig,
    /// Roles of a multi-phase run, in execution order.
    pub roles: Vec<RoleConfig>,
}

/// Single-agent settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    pub name: String,
    /// Enable forking and the branch tree in saved records.
    pub branching: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: "main".to_string(),
            branching: false,
        }
    }
}

/// Preamble templates. Unset templates use the built-in defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TemplatesConfig {
    /// minijinja source of the system message.
    pub system: Option<String>,
    /// minijinja source of the instance (task) message.
    pub instance: Option<String>,
    /// Saved run records replayed as demonstrations.
    pub demonstrations: Vec<PathBuf>,
}

/// Settings of the git working-copy adapter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EnvironmentConfig {
    /// Command run after every step to capture a test report (e.g.
    /// `["pytest","-q"]`). Empty disables test capture.
    pub test_command: Vec<String>,
    pub test_timeout_secs: u64,
    /// Truncate captured test output beyond this many bytes.
    pub output_limit_bytes: usize,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            test_command: Vec::new(),
            test_timeout_secs: 600,
            output_limit_bytes: 100_000,
        }
    }
}

/// One role of a multi-phase run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoleConfig {
    pub name: String,
    /// Call limit before subtracting earlier roles' usage.
    #[serde(default)]
    pub call_limit: Option<u64>,
}

impl RoleConfig {
    pub fn new(name: impl Into<String>, call_limit: Option<u64>) -> Self {
        Self {
            name: name.into(),
            call_limit,
        }
    }
}

/// Design, develop and test roles sharing 200 calls.
pub fn default_roles() -> Vec<RoleConfig> {
    ["design", "dev", "test"]
        .into_iter()
        .map(|name| RoleConfig::new(name, Some(200)))
        .collect()
}

impl RewindConfig {
    pub fn validate(&self) -> Result<()> {
        validate_id(&self.agent.name).context("agent.name")?;
        if self.environment.test_timeout_secs == 0 {
            return Err(anyhow!("environment.test_timeout_secs must be > 0"));
        }
        if self.environment.output_limit_bytes == 0 {
            return Err(anyhow!("environment.output_limit_bytes must be > 0"));
        }
        if let Some(program) = self.environment.test_command.first()
            && program.trim().is_empty()
        {
            return Err(anyhow!("environment.test_command must start with a program"));
        }
        let mut seen = Vec::new();
        for role in &self.roles {
            validate_id(&role.name).with_context(|| format!("role name '{}'", role.name))?;
            if seen.contains(&role.name.as_str()) {
                return Err(anyhow!("duplicate role '{}'", role.name));
            }
            seen.push(role.name.as_str());
        }
        Ok(())
    }

    /// Configured roles, or [`default_roles`] when none are listed.
    pub fn roles_or_default(&self) -> Vec<RoleConfig> {
        if self.roles.is_empty() {
            default_roles()
        } else {
            self.roles.clone()
        }
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `RewindConfig::default()`.
pub fn load_config(path: &Path) -> Result<RewindConfig> {
    if !path.exists() {
        let cfg = RewindConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: RewindConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &RewindConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, buf)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))
}
