//! Thin wrapper around `git` subprocess calls on one working copy.
//!
//! Only the handful of operations the snapshot adapter needs: pin a base
//! commit, throw away local changes, and move changes around as a diff.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};

use crate::io::process::run_command_with_timeout;

const APPLY_TIMEOUT: Duration = Duration::from_secs(120);
const APPLY_OUTPUT_LIMIT: usize = 64 * 1024;

/// Git commands executed in one working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Full SHA of `HEAD`.
    pub fn head_sha(&self) -> Result<String> {
        let out = self.run_capture(&["rev-parse", "HEAD"])?;
        Ok(out.trim().to_string())
    }

    /// Discard tracked changes and move `HEAD` to `rev`.
    #[instrument(skip_all, fields(rev))]
    pub fn reset_hard(&self, rev: &str) -> Result<()> {
        debug!(rev, "git reset --hard");
        self.run_checked(&["reset", "--hard", "--quiet", rev])?;
        Ok(())
    }

    /// Remove untracked files and directories (ignored files stay).
    pub fn clean(&self) -> Result<()> {
        self.run_checked(&["clean", "-fd", "--quiet"])?;
        Ok(())
    }

    /// Stage all changes (respects .gitignore).
    pub fn add_all(&self) -> Result<()> {
        self.run_checked(&["add", "-A"])?;
        Ok(())
    }

    /// Staged changes relative to `base`, as raw bytes.
    ///
    /// File contents are not necessarily UTF-8, so the patch is not decoded.
    pub fn diff_cached(&self, base: &str) -> Result<Vec<u8>> {
        let output = self.run_checked(&["diff", "--cached", "--binary", base])?;
        Ok(output.stdout)
    }

    /// Apply `diff` to the working tree and index.
    #[instrument(skip_all, fields(diff_bytes = diff.len()))]
    pub fn apply(&self, diff: &[u8]) -> Result<()> {
        let mut cmd = Command::new("git");
        cmd.args(["apply", "--index", "--whitespace=nowarn", "-"])
            .current_dir(&self.workdir);
        let out = run_command_with_timeout(
            cmd,
            Some(diff),
            APPLY_TIMEOUT,
            APPLY_OUTPUT_LIMIT,
        )
        .context("run git apply")?;
        if out.timed_out {
            return Err(anyhow!("git apply timed out after {:?}", APPLY_TIMEOUT));
        }
        if !out.status.success() {
            warn!(exit_code = ?out.status.code(), "git apply failed");
            return Err(anyhow!("git apply failed: {}", out.stderr_text().trim()));
        }
        Ok(())
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}
