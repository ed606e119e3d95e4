//! Git interface (§6) used by the Commit step of the Iteration Loop (C8).
//!
//! Grounded on the teacher's `harness::git_manager::GitManager`: a thin
//! subprocess wrapper with retry-with-backoff, restricted to the operations
//! §6 assumes exist (`diff --name-only`, `add`, `commit`, `rev-parse`).

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::GitError;

const DEFAULT_MAX_RETRIES: u32 = 3;
const RETRY_BASE_DELAY_MS: u64 = 100;

/// Distinguishes orchestration-authored commits from human ones (§11, "Git
/// checkpoint metadata") so the progress log and session retrospective can
/// report which is which.
pub fn is_orchestration_checkpoint(message: &str, prefix: &str) -> bool {
    message.starts_with(prefix)
}

pub struct GitRepo {
    working_dir: PathBuf,
    commit_prefix: String,
    max_retries: u32,
}

impl GitRepo {
    pub fn new(working_dir: impl Into<PathBuf>, commit_prefix: impl Into<String>) -> Self {
        Self {
            working_dir: working_dir.into(),
            commit_prefix: commit_prefix.into(),
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn with_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    fn run_git(&self, args: &[&str]) -> Result<String, GitError> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.working_dir)
            .output()
            .map_err(GitError::Spawn)?;
        if !output.status.success() {
            return Err(GitError::CommandFailed {
                args: args.join(" "),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn run_git_with_retry(&self, args: &[&str]) -> Result<String, GitError> {
        let mut attempt = 0;
        loop {
            match self.run_git(args) {
                Ok(out) => return Ok(out),
                Err(e) if attempt < self.max_retries => {
                    let delay = RETRY_BASE_DELAY_MS * (1 << attempt);
                    warn!(attempt, delay_ms = delay, error = %e, "git command failed, retrying");
                    std::thread::sleep(Duration::from_millis(delay));
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub fn current_branch(&self) -> Result<String, GitError> {
        self.run_git_with_retry(&["rev-parse", "--abbrev-ref", "HEAD"])
    }

    pub fn current_commit(&self) -> Result<String, GitError> {
        self.run_git_with_retry(&["rev-parse", "--short", "HEAD"])
    }

    pub fn has_uncommitted_changes(&self) -> Result<bool, GitError> {
        let status = self.run_git_with_retry(&["status", "--porcelain"])?;
        Ok(!status.is_empty())
    }

    /// `git diff --name-only` against HEAD, the post-agent changed-file set (§6).
    pub fn diff_name_only(&self) -> Result<Vec<PathBuf>, GitError> {
        let out = self.run_git_with_retry(&["diff", "--name-only", "HEAD"])?;
        Ok(out.lines().map(PathBuf::from).collect())
    }

    /// Aggregate lines added/removed across the working-tree diff, used by
    /// the Governance Enforcer's numeric caps (§4.2).
    pub fn diff_numstat(&self) -> Result<(u32, u32), GitError> {
        let out = self.run_git_with_retry(&["diff", "--numstat", "HEAD"])?;
        let mut added = 0u32;
        let mut removed = 0u32;
        for line in out.lines() {
            let mut fields = line.split_whitespace();
            if let (Some(a), Some(r)) = (fields.next(), fields.next()) {
                added += a.parse().unwrap_or(0);
                removed += r.parse().unwrap_or(0);
            }
        }
        Ok((added, removed))
    }

    pub fn add(&self, files: &[PathBuf]) -> Result<(), GitError> {
        if files.is_empty() {
            return Ok(());
        }
        let mut args = vec!["add"];
        let paths: Vec<String> = files.iter().map(|p| p.display().to_string()).collect();
        args.extend(paths.iter().map(String::as_str));
        self.run_git_with_retry(&args)?;
        Ok(())
    }

    /// Commits with message `[{task_id}] {description}` (§4.8 Commit step).
    pub fn commit(&self, task_id: &str, description: &str) -> Result<String, GitError> {
        if !self.has_uncommitted_changes()? {
            return Err(GitError::NothingToCommit);
        }
        let message = format!("{}[{task_id}] {description}", self.commit_prefix);
        self.run_git_with_retry(&["commit", "-m", &message])?;
        self.current_commit()
    }

    /// Stages only `changed_files` and commits; returns the new short hash.
    pub fn create_checkpoint(&self, task_id: &str, description: &str, changed_files: &[PathBuf]) -> Result<String, GitError> {
        self.add(changed_files)?;
        let hash = self.commit(task_id, description)?;
        debug!(task_id, hash, "checkpoint committed");
        Ok(hash)
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }
}
