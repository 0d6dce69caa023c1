//! Persisted run record (`<id>.traj`) and the identifiers it carries.

use std::collections::BTreeMap;
use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::budget::ModelStats;
use crate::core::history::History;
use crate::core::trajectory::Trajectory;

/// Branch identifier, unique within one agent run and never reused.
///
/// Serialized as a decimal string so it can key JSON objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct BranchId(u32);

impl BranchId {
    pub const ROOT: BranchId = BranchId(0);

    pub fn new(value: u32) -> Self {
        Self(value)
    }

    pub fn value(self) -> u32 {
        self.0
    }

    /// `None` once the id space is used up.
    pub(crate) fn next(self) -> Option<Self> {
        self.0.checked_add(1).map(Self)
    }
}

impl fmt::Display for BranchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for BranchId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<u32>().map(Self)
    }
}

impl From<BranchId> for String {
    fn from(id: BranchId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for BranchId {
    type Error = ParseIntError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Static identifying fields stamped on every fresh [`AgentInfo`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Identity {
    pub agent_version: String,
    pub agent_hash: String,
    pub environment_version: String,
    pub environment_hash: String,
}

impl Default for Identity {
    fn default() -> Self {
        Self {
            agent_version: env!("CARGO_PKG_VERSION").to_string(),
            agent_hash: "unknown".to_string(),
            environment_version: "unknown".to_string(),
            environment_hash: "unknown".to_string(),
        }
    }
}

/// Accumulated run metadata of one branch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentInfo {
    #[serde(default)]
    pub agent_version: String,
    #[serde(default)]
    pub agent_hash: String,
    #[serde(default)]
    pub environment_version: String,
    #[serde(default)]
    pub environment_hash: String,
    #[serde(default)]
    pub model_stats: ModelStats,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submission: Option<String>,
    /// Any other `info` keys, kept verbatim. Merged multi-role runs store
    /// per-role statistics here under `<role>_model_stats`.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl AgentInfo {
    /// Info carrying only the static identity fields.
    pub fn fresh(identity: &Identity) -> Self {
        Self {
            agent_version: identity.agent_version.clone(),
            agent_hash: identity.agent_hash.clone(),
            environment_version: identity.environment_version.clone(),
            environment_hash: identity.environment_hash.clone(),
            ..Self::default()
        }
    }

    /// Statistics of `role` in a merged multi-role record.
    pub fn role_model_stats(&self, role: &str) -> Option<ModelStats> {
        let value = self.extra.get(&role_stats_key(role))?;
        serde_json::from_value(value.clone()).ok()
    }

    pub fn set_role_model_stats(&mut self, role: &str, stats: &ModelStats) {
        let value = serde_json::to_value(stats).expect("model stats serialize to JSON");
        self.extra.insert(role_stats_key(role), value);
    }
}

fn role_stats_key(role: &str) -> String {
    format!("{role}_model_stats")
}

/// Serialized view of one branch. Histories are left out; they are
/// recomputable from the trajectory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchData {
    pub id: BranchId,
    pub parent_id: Option<BranchId>,
    pub fork_step: Option<usize>,
    pub trajectory: Trajectory,
    pub info: AgentInfo,
}

/// Everything saved for one agent run.
///
/// Top-level `trajectory`/`history`/`info` describe the active branch.
/// Branching runs also carry every branch and the active branch id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub trajectory: Trajectory,
    pub history: History,
    pub info: AgentInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branches: Option<BTreeMap<BranchId, BranchData>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_branch_id: Option<BranchId>,
}
