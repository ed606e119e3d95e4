mod config;
mod subprocess_agent;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use config::OrchestratorConfig;
use coordination::{
    AutonomousLoop, AutonomousLoopConfig, ContractLoader, FastVerifier, GitRepo, KillSwitchMode, ProgressLog,
    SessionStore, StopReason, SubprocessAdapter, Task, TaskType, ToolTable, WorkQueue,
};
use subprocess_agent::SubprocessAgent;

#[derive(Parser)]
#[command(name = "orchestrator", about = "Autonomous agent orchestration core driver")]
struct Cli {
    /// Project root; defaults to the current directory.
    #[arg(long, global = true)]
    project_root: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the autonomous loop until the queue drains, the kill switch
    /// fires, or `--max-global-iterations` is reached.
    Run {
        #[arg(long)]
        max_global_iterations: Option<u32>,
    },
    /// Append a task to the work queue.
    Discover {
        #[arg(long)]
        id: String,
        #[arg(long, value_enum)]
        task_type: TaskTypeArg,
        #[arg(long)]
        description: String,
        #[arg(long)]
        file: Option<String>,
        #[arg(long, value_delimiter = ',')]
        tests: Vec<String>,
    },
    /// Print current queue stats and the tail of the progress log.
    Status,
}

#[derive(Clone, clap::ValueEnum)]
enum TaskTypeArg {
    Bugfix,
    Codequality,
    QaTeam,
    DevTeam,
    Feature,
}

impl From<TaskTypeArg> for TaskType {
    fn from(value: TaskTypeArg) -> Self {
        match value {
            TaskTypeArg::Bugfix => TaskType::Bugfix,
            TaskTypeArg::Codequality => TaskType::Codequality,
            TaskTypeArg::QaTeam => TaskType::QaTeam,
            TaskTypeArg::DevTeam => TaskType::DevTeam,
            TaskTypeArg::Feature => TaskType::Feature,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    match run().await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "orchestrator exited with a fatal error");
            ExitCode::from(1)
        }
    }
}

async fn run() -> Result<ExitCode> {
    let cli = Cli::parse();
    let project_root = cli
        .project_root
        .map(Ok)
        .unwrap_or_else(std::env::current_dir)
        .context("resolving project root")?;

    let config = OrchestratorConfig::from_env(project_root.clone());
    info!(
        project = %config.project,
        kill_switch_var = %config.kill_switch_env_var,
        global_iteration_cap = config.global_iteration_cap,
        "orchestrator configured"
    );

    match cli.command {
        Command::Run { max_global_iterations } => run_loop(config, max_global_iterations).await,
        Command::Discover { id, task_type, description, file, tests } => {
            discover(&config, id, task_type.into(), description, file, tests)
        }
        Command::Status => status(&config),
    }
}

async fn run_loop(config: OrchestratorConfig, max_global_iterations: Option<u32>) -> Result<ExitCode> {
    if KillSwitchMode::read_from_env() == KillSwitchMode::Off {
        warn!("kill switch is OFF at startup, refusing to start");
        return Ok(ExitCode::from(2));
    }

    let mut queue = WorkQueue::load(&config.queue_path, &config.project).context("loading work queue")?;
    let mut contracts = ContractLoader::new(&config.contracts_dir);
    let session_store = SessionStore::new(&config.session_dir);
    let progress = ProgressLog::new(&config.progress_path);
    let git = GitRepo::new(&config.project_root, config.commit_prefix.clone());

    let tools = ToolTable {
        lint: Some(config.lint_command.clone()),
        typecheck: Some(config.typecheck_command.clone()),
        test: Some(config.test_command.clone()),
    };
    let verifier = FastVerifier::new(SubprocessAdapter::new(tools));
    let agent = SubprocessAgent::new(
        config.agent_command.clone(),
        config.project_root.clone(),
        GitRepo::new(&config.project_root, config.commit_prefix.clone()),
    );

    let loop_config = AutonomousLoopConfig {
        global_iteration_cap: max_global_iterations.unwrap_or(config.global_iteration_cap),
        autofix_command: config.autofix_command.clone(),
    };

    let mut autonomous_loop = AutonomousLoop {
        queue: &mut queue,
        contracts: &mut contracts,
        session_store: &session_store,
        verifier: &verifier,
        agent: &agent,
        git: &git,
        progress: &progress,
        project_root: config.project_root.clone(),
        config: loop_config,
    };

    let summary = autonomous_loop.run().await?;
    info!(tasks_run = summary.tasks_run, stop_reason = ?summary.stop_reason, "autonomous loop finished");

    Ok(match summary.stop_reason {
        StopReason::QueueDrained | StopReason::GlobalIterationCapReached => ExitCode::from(0),
        StopReason::KillSwitchOff | StopReason::KillSwitchPaused => ExitCode::from(2),
    })
}

fn discover(
    config: &OrchestratorConfig,
    id: String,
    task_type: TaskType,
    description: String,
    file: Option<String>,
    tests: Vec<String>,
) -> Result<ExitCode> {
    let mut queue = WorkQueue::load(&config.queue_path, &config.project).context("loading work queue")?;
    let mut task = Task::new(id.clone(), task_type, description);
    task.file = file;
    task.tests = tests;
    queue.add_task(task)?;
    queue.save().context("saving work queue")?;
    info!(task_id = %id, "task added to queue");
    Ok(ExitCode::from(0))
}

fn status(config: &OrchestratorConfig) -> Result<ExitCode> {
    let queue = WorkQueue::load(&config.queue_path, &config.project).context("loading work queue")?;
    let stats = queue.stats();
    println!(
        "project={} pending={} in_progress={} complete={} blocked={} abandoned={} total={}",
        config.project,
        stats.pending,
        stats.in_progress,
        stats.complete,
        stats.blocked,
        stats.abandoned,
        stats.total()
    );

    let progress = ProgressLog::new(&config.progress_path);
    if let Ok(contents) = progress.read_all() {
        if let Some(last_section) = contents.rsplit("## ").next() {
            println!("--- latest progress section ---\n## {last_section}");
        }
    }
    Ok(ExitCode::from(0))
}
