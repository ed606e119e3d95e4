//! Default `coordination::Agent` implementation: shells out to a configured
//! program, passing the prompt on stdin and reading its stdout for the
//! completion token. Grounded on the teacher's subprocess-wrapping style in
//! `harness::git_manager` and the `VerifierAdapter::SubprocessAdapter` in the
//! orchestration core — same pattern, applied to the agent boundary instead
//! of the verifier boundary.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use coordination::agent::detect_completion;
use coordination::{Agent, AgentError, AgentOutcome, GitRepo, ToolCommand};
use tokio::io::AsyncWriteExt as _;
use tokio::process::Command;

pub struct SubprocessAgent {
    command: ToolCommand,
    project_root: PathBuf,
    git: GitRepo,
}

impl SubprocessAgent {
    pub fn new(command: ToolCommand, project_root: PathBuf, git: GitRepo) -> Self {
        Self { command, project_root, git }
    }
}

#[async_trait]
impl Agent for SubprocessAgent {
    async fn invoke(&self, prompt: &str, tools_allowed: &[String]) -> Result<AgentOutcome, AgentError> {
        let mut args = self.command.args.clone();
        args.push("--tools-allowed".to_string());
        args.push(tools_allowed.join(","));

        let mut child = Command::new(&self.command.program)
            .args(&args)
            .current_dir(&self.project_root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(AgentError::Spawn)?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(prompt.as_bytes())
                .await
                .map_err(|e| AgentError::InvocationFailed(format!("failed writing prompt to agent stdin: {e}")))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| AgentError::InvocationFailed(format!("agent process wait failed: {e}")))?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        if !output.status.success() {
            return Err(AgentError::InvocationFailed(format!(
                "agent exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        let completion = detect_completion(&stdout);
        let changed_files = self.git.diff_name_only().unwrap_or_default();

        Ok(AgentOutcome {
            output_text: stdout,
            completion,
            changed_files,
        })
    }
}
