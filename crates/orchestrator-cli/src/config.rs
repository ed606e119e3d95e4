use std::path::PathBuf;

use coordination::ToolCommand;

/// Per-project tool table defaults, used when a project doesn't override a
/// tier's command via its environment variable (§9 Open Question: "verifier
/// tool commands are language-agnostic, supplied by the adapter").
fn default_lint() -> ToolCommand {
    ToolCommand {
        program: "cargo".into(),
        args: vec!["clippy".into(), "--message-format=short".into()],
    }
}

fn default_typecheck() -> ToolCommand {
    ToolCommand {
        program: "cargo".into(),
        args: vec!["check".into(), "--message-format=short".into()],
    }
}

fn default_test() -> ToolCommand {
    ToolCommand {
        program: "cargo".into(),
        args: vec!["test".into()],
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_path_or(key: &str, default: &str) -> PathBuf {
    std::env::var(key).map(PathBuf::from).unwrap_or_else(|_| PathBuf::from(default))
}

fn env_u32_or(key: &str, default: u32) -> u32 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_command(program_key: &str, args_key: &str, default: ToolCommand) -> ToolCommand {
    match std::env::var(program_key) {
        Ok(program) => {
            let args = std::env::var(args_key)
                .map(|s| s.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default();
            ToolCommand { program, args }
        }
        Err(_) => default,
    }
}

/// Top-level orchestrator configuration, loaded from environment variables
/// with documented defaults (§10.3), following the teacher's
/// `SwarmConfig::default()` pattern.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Human-readable label for this project, used only in log fields.
    pub project: String,
    pub project_root: PathBuf,
    pub queue_path: PathBuf,
    pub contracts_dir: PathBuf,
    pub session_dir: PathBuf,
    pub progress_path: PathBuf,
    /// Name of the environment variable the Governance Enforcer reads for
    /// the kill switch (default matches `coordination::governance`'s own
    /// constant; kept configurable so multiple orchestrators on one host
    /// can use distinct switches).
    pub kill_switch_env_var: String,
    /// Bound on tasks processed per `AutonomousLoop::run` invocation,
    /// distinct from any single task's `max_iterations`.
    pub global_iteration_cap: u32,
    pub commit_prefix: String,
    pub lint_command: ToolCommand,
    pub typecheck_command: ToolCommand,
    pub test_command: ToolCommand,
    pub autofix_command: Option<ToolCommand>,
    /// Program + args used to invoke the external code-modifying agent.
    /// The prompt is appended as the final argument and the completion
    /// token is read from its stdout.
    pub agent_command: ToolCommand,
}

impl OrchestratorConfig {
    pub fn from_env(project_root: PathBuf) -> Self {
        let agent_program = env_or("ORCHESTRATOR_AGENT_PROGRAM", "agent-cli");
        let agent_args = std::env::var("ORCHESTRATOR_AGENT_ARGS")
            .map(|s| s.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();

        Self {
            project: env_or("ORCHESTRATOR_PROJECT", "default"),
            queue_path: env_path_or("ORCHESTRATOR_QUEUE_PATH", "queue/work_queue.json"),
            contracts_dir: env_path_or("ORCHESTRATOR_CONTRACTS_DIR", "contracts"),
            session_dir: env_path_or("ORCHESTRATOR_SESSION_DIR", "sessions"),
            progress_path: env_path_or("ORCHESTRATOR_PROGRESS_PATH", "PROGRESS.md"),
            kill_switch_env_var: env_or("ORCHESTRATOR_KILL_SWITCH_VAR", coordination::governance::KILL_SWITCH_ENV_VAR),
            global_iteration_cap: env_u32_or("ORCHESTRATOR_GLOBAL_ITERATION_CAP", 50),
            commit_prefix: env_or("ORCHESTRATOR_COMMIT_PREFIX", "[orchestrator] "),
            lint_command: env_command("ORCHESTRATOR_LINT_PROGRAM", "ORCHESTRATOR_LINT_ARGS", default_lint()),
            typecheck_command: env_command(
                "ORCHESTRATOR_TYPECHECK_PROGRAM",
                "ORCHESTRATOR_TYPECHECK_ARGS",
                default_typecheck(),
            ),
            test_command: env_command("ORCHESTRATOR_TEST_PROGRAM", "ORCHESTRATOR_TEST_ARGS", default_test()),
            autofix_command: std::env::var("ORCHESTRATOR_AUTOFIX_PROGRAM").ok().map(|program| ToolCommand {
                program,
                args: std::env::var("ORCHESTRATOR_AUTOFIX_ARGS")
                    .map(|s| s.split_whitespace().map(str::to_string).collect())
                    .unwrap_or_default(),
            }),
            agent_command: ToolCommand {
                program: agent_program,
                args: agent_args,
            },
            project_root,
        }
    }
}
