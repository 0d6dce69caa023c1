//! Pick the step to roll back to before an emergency submission.
//!
//! Each step's state may carry the raw output of the test command. The best
//! step is the one with the most passing tests; on ties the later step wins.
//! Outputs that cannot be parsed are skipped and reported as diagnostics.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::core::types::{STATE_TEST_OUTPUT, StepRecord};

/// Outcome of the best-step scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BestStep {
    /// 1-indexed step to reset to; `0` when no step had a usable report.
    pub step: usize,
    /// Passing-test count recorded at `step`.
    pub passed: Option<u64>,
    /// One entry per step whose report could not be parsed.
    pub diagnostics: Vec<String>,
}

/// Scan `records` in order and return the step with the most passing tests.
pub fn best_step_for_reset(records: &[StepRecord]) -> BestStep {
    let mut best = BestStep {
        step: 0,
        passed: None,
        diagnostics: Vec::new(),
    };

    for (index, record) in records.iter().enumerate() {
        let step = index + 1;
        let Some(raw) = record.state.get(STATE_TEST_OUTPUT) else {
            continue;
        };
        if is_blank(raw) {
            continue;
        }
        match passed_count(raw) {
            Ok(passed) => {
                if best.passed.is_none_or(|max| passed >= max) {
                    best.step = step;
                    best.passed = Some(passed);
                }
            }
            Err(reason) => {
                warn!(step, %reason, "could not parse test output");
                best.diagnostics
                    .push(format!("step {step}: could not parse test output: {reason}"));
            }
        }
    }

    debug!(step = best.step, passed = ?best.passed, "best step selected");
    best
}

/// Number of passing tests in a recorded test report.
///
/// Accepts a JSON report (`{"summary": {"passed": N}}`, possibly
/// double-encoded as a JSON string) or a pytest terminal summary line such as
/// `=== 3 passed, 1 failed in 0.20s ===`.
pub fn passed_count(raw: &Value) -> Result<u64, String> {
    match raw {
        Value::String(text) => passed_count_from_text(text),
        Value::Object(_) => passed_count_from_report(raw),
        other => Err(format!("unexpected test output type: {other}")),
    }
}

fn passed_count_from_text(text: &str) -> Result<u64, String> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::String(inner)) => match serde_json::from_str::<Value>(&inner) {
            Ok(report @ Value::Object(_)) => passed_count_from_report(&report),
            Ok(other) => Err(format!("double-encoded report is not an object: {other}")),
            Err(err) => Err(format!("invalid double-encoded report: {err}")),
        },
        Ok(report @ Value::Object(_)) => passed_count_from_report(&report),
        Ok(other) => Err(format!("report is not an object: {other}")),
        Err(_) => passed_count_from_summary_line(text),
    }
}

/// A report without `summary` is an error, so its step drops out of the
/// scan rather than ranking as a sentinel below every real count.
fn passed_count_from_report(report: &Value) -> Result<u64, String> {
    let summary = report
        .get("summary")
        .ok_or_else(|| "report has no summary".to_string())?;
    // pytest-json-report omits zero counts, so a missing `passed` is a real 0.
    match summary.get("passed") {
        None => Ok(0),
        Some(value) => value
            .as_u64()
            .ok_or_else(|| format!("summary.passed is not a count: {value}")),
    }
}

fn passed_count_from_summary_line(text: &str) -> Result<u64, String> {
    static PASSED_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\b(\d+) passed\b").expect("valid passed regex"));
    static SUMMARY_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"\b\d+ (failed|error|errors|skipped|xfailed|xpassed)\b|no tests ran")
            .expect("valid summary regex")
    });

    if let Some(caps) = PASSED_RE.captures_iter(text).last() {
        return caps[1]
            .parse::<u64>()
            .map_err(|err| format!("invalid passed count: {err}"));
    }
    if SUMMARY_RE.is_match(text) {
        return Ok(0);
    }
    Err("neither a JSON report nor a pytest summary".to_string())
}

fn is_blank(raw: &Value) -> bool {
    match raw {
        Value::Null => true,
        Value::String(text) => text.trim().is_empty(),
        _ => false,
    }
}
