//! Session State data types (§3, §6).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusToken {
    Active,
    Resumable,
    Finalized,
}

impl std::fmt::Display for StatusToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Active => "active",
            Self::Resumable => "resumable",
            Self::Finalized => "finalized",
        };
        write!(f, "{s}")
    }
}

/// The YAML/JSON frontmatter header of a checkpoint file (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub task_id: String,
    pub agent_type: String,
    pub iteration: u32,
    pub max_iterations: u32,
    pub session_id: String,
    pub status_token: StatusToken,
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
}

impl SessionState {
    pub fn new(task_id: impl Into<String>, agent_type: impl Into<String>, max_iterations: u32) -> Self {
        let now = Utc::now();
        Self {
            task_id: task_id.into(),
            agent_type: agent_type.into(),
            iteration: 0,
            max_iterations,
            session_id: Uuid::new_v4().to_string(),
            status_token: StatusToken::Active,
            last_updated: now,
            started_at: Some(now),
        }
    }

    /// Resumable means iteration < max_iterations AND status_token != finalized (§3).
    pub fn is_resumable(&self) -> bool {
        self.status_token != StatusToken::Finalized && self.iteration < self.max_iterations
    }

    pub fn next_iteration(&mut self) {
        self.iteration += 1;
        self.last_updated = Utc::now();
    }
}

/// One entry in the per-checkpoint markdown body, describing the outcome of
/// a single iteration.
#[derive(Debug, Clone)]
pub struct IterationEntry {
    pub iteration: u32,
    pub verdict: String,
    pub fix_strategy: Option<String>,
    pub changed_files: Vec<String>,
    pub note: Option<String>,
}

impl IterationEntry {
    pub fn to_markdown(&self) -> String {
        let mut out = format!("### Iteration {}\n\n- verdict: {}\n", self.iteration, self.verdict);
        if let Some(strategy) = &self.fix_strategy {
            out.push_str(&format!("- fix strategy: {strategy}\n"));
        }
        if !self.changed_files.is_empty() {
            out.push_str(&format!("- changed files: {}\n", self.changed_files.join(", ")));
        }
        if let Some(note) = &self.note {
            out.push_str(&format!("- note: {note}\n"));
        }
        out
    }
}

/// Derived, read-only summary appended at finalization (§11, "Session
/// retrospective") — reporting only, no control flow.
#[derive(Debug, Clone, Serialize)]
pub struct SessionRetrospective {
    pub task_id: String,
    pub iterations_used: u32,
    pub max_iterations: u32,
    pub budget_exhausted: bool,
    pub final_status_token: StatusToken,
}

impl SessionRetrospective {
    pub fn to_markdown(&self) -> String {
        format!(
            "## Retrospective\n\n- iterations used: {}/{}\n- budget exhausted: {}\n- final status: {}\n",
            self.iterations_used, self.max_iterations, self.budget_exhausted, self.final_status_token
        )
    }
}
