//! The external Agent capability boundary (§9, "Pluggable agent backend").
//!
//! Modeled as `invoke(prompt, tools_allowed) -> (output_text, completion_token,
//! changed_files_since_baseline)`. The core treats the agent as an opaque
//! collaborator; whether it is a subprocess CLI or an in-process SDK call is
//! a CLI-layer implementation choice, not part of this crate.

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

/// Sentinel the agent is expected to embed in its output to signal it
/// believes the task is complete (§6).
pub const COMPLETION_MARKER: &str = "<promise>COMPLETE</promise>";

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("agent invocation failed: {0}")]
    InvocationFailed(String),

    #[error("agent invocation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("failed to spawn agent process: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Whether the agent's output contained a well-formed completion marker.
/// §9 "Completion token discipline": a missing or malformed token must
/// never be treated as success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionSignal {
    Complete,
    Missing,
}

/// Scans `output_text` for [`COMPLETION_MARKER`]. Never infers success from
/// silence or from agent exit code alone.
pub fn detect_completion(output_text: &str) -> CompletionSignal {
    if output_text.contains(COMPLETION_MARKER) {
        CompletionSignal::Complete
    } else {
        CompletionSignal::Missing
    }
}

#[derive(Debug, Clone)]
pub struct AgentOutcome {
    pub output_text: String,
    pub completion: CompletionSignal,
    pub changed_files: Vec<PathBuf>,
}

/// The pluggable, code-modifying agent capability the core invokes once per
/// iteration. Implementations live outside this crate (e.g. a subprocess CLI
/// adapter in the orchestrator binary).
#[async_trait]
pub trait Agent: Send + Sync {
    async fn invoke(&self, prompt: &str, tools_allowed: &[String]) -> Result<AgentOutcome, AgentError>;
}
