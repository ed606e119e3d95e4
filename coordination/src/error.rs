//! Error taxonomy for the orchestration core (§7).
//!
//! Each subsystem owns a narrow error enum; [`OrchestratorError`] is the
//! union consumed at the CLI boundary. Recoverability follows §7's
//! propagation policy: per-iteration errors are classified into a verdict,
//! per-task errors block the task, per-run errors terminate the loop.

use std::path::PathBuf;
use thiserror::Error;

/// Kinds of [`PolicyViolation`] raised by the Governance Enforcer (C2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyViolationKind {
    Forbidden,
    NotAllowed,
    LimitExceeded,
    BranchMismatch,
    ReviewRequired,
    KillSwitchOff,
}

impl std::fmt::Display for PolicyViolationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Forbidden => "forbidden",
            Self::NotAllowed => "not_allowed",
            Self::LimitExceeded => "limit_exceeded",
            Self::BranchMismatch => "branch_mismatch",
            Self::ReviewRequired => "review_required",
            Self::KillSwitchOff => "kill_switch_off",
        };
        write!(f, "{s}")
    }
}

/// Raised when the Governance Enforcer rejects an intended action.
#[derive(Error, Debug, Clone)]
#[error("policy violation ({kind}): {detail}")]
pub struct PolicyViolation {
    pub kind: PolicyViolationKind,
    pub action: String,
    pub detail: String,
}

impl PolicyViolation {
    pub fn new(kind: PolicyViolationKind, action: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            kind,
            action: action.into(),
            detail: detail.into(),
        }
    }
}

/// C1 — malformed or missing agent-type contract.
#[derive(Error, Debug)]
pub enum ContractError {
    #[error("no contract found for agent type {agent_type:?} in {dir}")]
    NotFound { agent_type: String, dir: PathBuf },

    #[error("contract for {agent_type:?} is invalid: {violations:?}")]
    Invalid {
        agent_type: String,
        violations: Vec<String>,
    },

    #[error("failed to read contract file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse contract YAML at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// C4 — work queue persistence and lifecycle errors.
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("task {0} not found in queue")]
    TaskNotFound(String),

    #[error("task {0} already exists in queue")]
    DuplicateTask(String),

    #[error("a task is already in_progress ({0}); only one may be in_progress at a time")]
    AlreadyInProgress(String),

    #[error("invalid status transition for {task_id}: {from} -> {to}")]
    InvalidTransition {
        task_id: String,
        from: String,
        to: String,
    },

    #[error("failed to read queue file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse queue JSON at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// C3 — session checkpoint persistence errors.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("failed to read session file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed checkpoint frontmatter in {path}: {detail}")]
    MalformedCheckpoint { path: PathBuf, detail: String },

    #[error("cannot checkpoint a finalized session: {task_id}")]
    AlreadyFinalized { task_id: String },
}

/// C5 — verifier tier/infrastructure errors (these become a BLOCKED verdict,
/// never an `Err` surfaced to the caller of `FastVerifier::run`).
#[derive(Error, Debug)]
pub enum VerifierInfrastructureError {
    #[error("verifier command not found: {command}")]
    CommandMissing { command: String },

    #[error("verifier tool crashed: {detail}")]
    ToolCrashed { detail: String },

    #[error("tier {tier} timed out after {budget_secs}s")]
    Timeout { tier: String, budget_secs: u64 },
}

/// C8/C9 — git interaction failures.
#[derive(Error, Debug)]
pub enum GitError {
    #[error("git {args} failed: {stderr}")]
    CommandFailed { args: String, stderr: String },

    #[error("failed to execute git: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("nothing to commit")]
    NothingToCommit,
}

/// Top-level error union surfaced by the Autonomous Loop / CLI.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error(transparent)]
    Contract(#[from] ContractError),

    #[error(transparent)]
    Policy(#[from] PolicyViolation),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    Agent(#[from] crate::agent::AgentError),

    #[error("persistence failure, aborting run: {0}")]
    Persistence(String),

    #[error("kill-switch is OFF at startup")]
    KillSwitchOff,
}
