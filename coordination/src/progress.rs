//! Progress log (§6): append-only markdown, one dated section per iteration
//! outcome, enumerating completed/in-progress/blocked tasks with commit
//! hashes. Grounded on the teacher's `harness::progress::ProgressTracker`
//! but uses markdown sections instead of single-line log entries, matching
//! the format §6 specifies.

use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::PathBuf;

use chrono::{DateTime, Utc};

#[derive(Debug, Clone)]
pub struct TaskProgressLine {
    pub task_id: String,
    pub description: String,
    pub commit_ref: Option<String>,
    pub reason: Option<String>,
}

impl TaskProgressLine {
    pub fn completed(task_id: impl Into<String>, description: impl Into<String>, commit_ref: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            description: description.into(),
            commit_ref: Some(commit_ref.into()),
            reason: None,
        }
    }

    pub fn blocked(task_id: impl Into<String>, description: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            description: description.into(),
            commit_ref: None,
            reason: Some(reason.into()),
        }
    }

    pub fn in_progress(task_id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            description: description.into(),
            commit_ref: None,
            reason: None,
        }
    }

    fn to_bullet(&self) -> String {
        match (&self.commit_ref, &self.reason) {
            (Some(commit), _) => format!("- {}: {} (commit {})", self.task_id, self.description, commit),
            (None, Some(reason)) => format!("- {}: {} (reason: {})", self.task_id, self.description, reason),
            (None, None) => format!("- {}: {}", self.task_id, self.description),
        }
    }
}

pub struct ProgressLog {
    path: PathBuf,
}

impl ProgressLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Appends one dated section. Never rewrites prior sections.
    pub fn append_entry(
        &self,
        timestamp: DateTime<Utc>,
        completed: &[TaskProgressLine],
        in_progress: &[TaskProgressLine],
        blocked: &[TaskProgressLine],
    ) -> Result<(), std::io::Error> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut section = format!("## {}\n\n", timestamp.format("%Y-%m-%d %H:%M:%S UTC"));

        section.push_str("### Completed\n\n");
        if completed.is_empty() {
            section.push_str("_none_\n\n");
        } else {
            for line in completed {
                section.push_str(&line.to_bullet());
                section.push('\n');
            }
            section.push('\n');
        }

        section.push_str("### In Progress\n\n");
        if in_progress.is_empty() {
            section.push_str("_none_\n\n");
        } else {
            for line in in_progress {
                section.push_str(&line.to_bullet());
                section.push('\n');
            }
            section.push('\n');
        }

        section.push_str("### Blocked\n\n");
        if blocked.is_empty() {
            section.push_str("_none_\n\n");
        } else {
            for line in blocked {
                section.push_str(&line.to_bullet());
                section.push('\n');
            }
            section.push('\n');
        }

        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        file.write_all(section.as_bytes())
    }

    pub fn read_all(&self) -> Result<String, std::io::Error> {
        if !self.path.exists() {
            return Ok(String::new());
        }
        std::fs::read_to_string(&self.path)
    }
}
