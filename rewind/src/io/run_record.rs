//! Run record load/save with schema + invariant validation.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result, anyhow};
use jsonschema::{Draft, Validator};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::core::invariants::validate_invariants;
use crate::record::RunRecord;

const RUN_RECORD_SCHEMA: &str = include_str!("../../schemas/run_record.schema.json");

/// File extension of saved run records.
pub const RECORD_EXTENSION: &str = "traj";

static VALIDATOR: LazyLock<Result<Validator, String>> = LazyLock::new(|| {
    let schema: Value = serde_json::from_str(RUN_RECORD_SCHEMA)
        .map_err(|err| format!("parse run record schema: {err}"))?;
    jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .map_err(|err| format!("invalid run record schema: {err}"))
});

/// `<output_dir>/<id>.traj`.
pub fn record_path(output_dir: &Path, id: &str) -> PathBuf {
    output_dir.join(format!("{id}.{RECORD_EXTENSION}"))
}

/// Load a run record and validate it (schema + branch invariants).
pub fn load_run_record(path: &Path) -> Result<RunRecord> {
    debug!(path = %path.display(), "loading run record");
    let contents =
        fs::read_to_string(path).with_context(|| format!("read run record {}", path.display()))?;
    let value: Value = serde_json::from_str(&contents)
        .with_context(|| format!("parse run record {}", path.display()))?;
    validate_schema(&value).with_context(|| format!("validate {}", path.display()))?;
    let record: RunRecord = serde_json::from_value(value)
        .with_context(|| format!("deserialize run record {}", path.display()))?;

    let errors = validate_invariants(&record);
    if !errors.is_empty() {
        return Err(anyhow!(
            "run record invariants failed in {}: {}",
            path.display(),
            errors.join("; ")
        ));
    }
    debug!(
        steps = record.trajectory.len(),
        branches = record.branches.as_ref().map_or(0, |b| b.len()),
        "run record loaded"
    );
    Ok(record)
}

/// Atomically write a run record.
pub fn write_run_record(path: &Path, record: &RunRecord) -> Result<()> {
    debug!(path = %path.display(), steps = record.trajectory.len(), "writing run record");
    write_json_atomic(path, record)
}

/// Pretty-print `value` with a trailing newline (temp file + rename).
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value).context("serialize json")?;
    buf.push('\n');
    let parent = path
        .parent()
        .with_context(|| format!("record path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension(format!("{RECORD_EXTENSION}.tmp"));
    fs::write(&tmp_path, buf).with_context(|| format!("write temp {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}

/// Check a JSON document against the run record schema.
pub fn validate_schema(value: &Value) -> Result<()> {
    let validator = VALIDATOR.as_ref().map_err(|err| anyhow!("{err}"))?;
    if !validator.is_valid(value) {
        let messages = validator
            .iter_errors(value)
            .map(|err| err.to_string())
            .collect::<Vec<_>>();
        return Err(anyhow!(
            "run record schema validation failed: {}",
            messages.join("; ")
        ));
    }
    Ok(())
}
