//! Task and Queue data types (§3, §6).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskType {
    Bugfix,
    Codequality,
    QaTeam,
    DevTeam,
    Feature,
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Bugfix => "bugfix",
            Self::Codequality => "codequality",
            Self::QaTeam => "qa-team",
            Self::DevTeam => "dev-team",
            Self::Feature => "feature",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Complete,
    Blocked,
    Abandoned,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Complete => "complete",
            Self::Blocked => "blocked",
            Self::Abandoned => "abandoned",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub description: String,
    pub file: Option<String>,
    #[serde(default)]
    pub tests: Vec<String>,
    pub status: TaskStatus,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Short commit hash recorded once the task reaches `complete` (§3 invariant:
    /// a task marked complete must have an associated commit reference).
    #[serde(default)]
    pub commit_ref: Option<String>,
}

impl Task {
    pub fn new(id: impl Into<String>, task_type: TaskType, description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            task_type,
            description: description.into(),
            file: None,
            tests: Vec::new(),
            status: TaskStatus::Pending,
            attempts: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
            commit_ref: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, TaskStatus::Complete | TaskStatus::Blocked | TaskStatus::Abandoned)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Queue {
    pub project: String,
    pub tasks: Vec<Task>,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct QueueStats {
    pub pending: usize,
    pub in_progress: usize,
    pub complete: usize,
    pub blocked: usize,
    pub abandoned: usize,
}

impl QueueStats {
    pub fn total(&self) -> usize {
        self.pending + self.in_progress + self.complete + self.blocked + self.abandoned
    }
}

impl Queue {
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            tasks: Vec::new(),
        }
    }

    pub fn stats(&self) -> QueueStats {
        let mut stats = QueueStats::default();
        for task in &self.tasks {
            match task.status {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::InProgress => stats.in_progress += 1,
                TaskStatus::Complete => stats.complete += 1,
                TaskStatus::Blocked => stats.blocked += 1,
                TaskStatus::Abandoned => stats.abandoned += 1,
            }
        }
        stats
    }

    pub fn find(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn find_mut(&mut self, id: &str) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }

    pub fn in_progress_task(&self) -> Option<&Task> {
        self.tasks.iter().find(|t| t.status == TaskStatus::InProgress)
    }
}
