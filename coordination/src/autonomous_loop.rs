//! C9 — Autonomous Loop: top-level driver (§4.9).
//!
//! Pulls a task, runs the Iteration Loop to a terminal state, updates the
//! queue, appends a progress-log entry, and repeats — bounded by a global
//! iteration cap distinct from any single task's `max_iterations`.

use chrono::Utc;
use tracing::{info, warn};

use crate::agent::Agent;
use crate::contracts::ContractLoader;
use crate::error::OrchestratorError;
use crate::governance::KillSwitchMode;
use crate::iteration_loop::{IterationLoop, IterationOutcome};
use crate::progress::ProgressLog;
use crate::queue::WorkQueue;
use crate::session::SessionStore;
use crate::verifier::{FastVerifier, ToolCommand, VerifierAdapter};

/// Why the Autonomous Loop stopped running tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    QueueDrained,
    KillSwitchOff,
    KillSwitchPaused,
    GlobalIterationCapReached,
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub tasks_run: u32,
    pub stop_reason: StopReason,
}

pub struct AutonomousLoopConfig {
    pub global_iteration_cap: u32,
    pub autofix_command: Option<ToolCommand>,
}

/// Drives C9's startup ritual and main loop over a single project's queue.
pub struct AutonomousLoop<'a, A: VerifierAdapter, AG: Agent> {
    pub queue: &'a mut WorkQueue,
    pub contracts: &'a mut ContractLoader,
    pub session_store: &'a SessionStore,
    pub verifier: &'a FastVerifier<A>,
    pub agent: &'a AG,
    pub git: &'a crate::git::GitRepo,
    pub progress: &'a ProgressLog,
    pub project_root: std::path::PathBuf,
    pub config: AutonomousLoopConfig,
}

impl<'a, A: VerifierAdapter, AG: Agent> AutonomousLoop<'a, A, AG> {
    /// Runs startup then the main loop; returns a summary of what happened
    /// without ever panicking on a task-level failure.
    pub async fn run(&mut self) -> Result<RunSummary, OrchestratorError> {
        if KillSwitchMode::read_from_env() == KillSwitchMode::Off {
            info!("kill-switch is OFF at startup, exiting");
            return Ok(RunSummary {
                tasks_run: 0,
                stop_reason: StopReason::KillSwitchOff,
            });
        }

        // Step 3: a task left in_progress from a crashed prior run stays
        // in_progress and is picked first if its session is resumable.
        if let Some(candidate) = self.queue.resumable_candidate() {
            let task_id = candidate.id.clone();
            match self.session_store.resume(&task_id) {
                Ok(Some(_)) => info!(task_id, "resuming in-progress task from prior run"),
                Ok(None) => warn!(task_id, "in-progress task has no resumable session, will retry from scratch"),
                Err(e) => warn!(task_id, error = %e, "failed to check session resumability"),
            }
        }

        let mut tasks_run = 0u32;
        loop {
            if tasks_run >= self.config.global_iteration_cap {
                return Ok(RunSummary {
                    tasks_run,
                    stop_reason: StopReason::GlobalIterationCapReached,
                });
            }

            match KillSwitchMode::read_from_env() {
                KillSwitchMode::Off => {
                    return Ok(RunSummary {
                        tasks_run,
                        stop_reason: StopReason::KillSwitchOff,
                    })
                }
                KillSwitchMode::Paused => {
                    return Ok(RunSummary {
                        tasks_run,
                        stop_reason: StopReason::KillSwitchPaused,
                    })
                }
                _ => {}
            }

            // Task boundary: pick up any on-disk edits an operator made
            // while the previous task was running. A resumable in-progress
            // task always takes priority, so a mid-task edit to some other
            // task can never preempt the active one.
            self.queue.reload()?;

            let next_task_id = self
                .queue
                .resumable_candidate()
                .map(|t| t.id.clone())
                .or_else(|| self.queue.get_next_pending().map(|t| t.id.clone()));

            let Some(task_id) = next_task_id else {
                return Ok(RunSummary {
                    tasks_run,
                    stop_reason: StopReason::QueueDrained,
                });
            };

            self.run_one_task(&task_id).await?;
            tasks_run += 1;
        }
    }

    async fn run_one_task(&mut self, task_id: &str) -> Result<(), OrchestratorError> {
        self.queue.mark_in_progress(task_id)?;
        self.queue.save()?;

        let task = self.queue.queue().find(task_id).expect("just marked in_progress").clone();
        let agent_type = task.task_type.to_string();
        let contract = self.contracts.load(&agent_type)?.clone();

        let iteration_loop = IterationLoop {
            contract: &contract,
            verifier: self.verifier,
            agent: self.agent,
            session_store: self.session_store,
            git: self.git,
            project_root: self.project_root.clone(),
            autofix_command: self.config.autofix_command.clone(),
        };

        let outcome = iteration_loop.run(&task).await?;
        self.queue.increment_attempt(task_id)?;

        match &outcome {
            IterationOutcome::Committed { commit_hash, .. } => {
                self.queue.mark_complete(task_id, commit_hash.clone())?;
            }
            IterationOutcome::Blocked { reason, .. } => {
                self.queue.mark_blocked(task_id, reason.clone())?;
            }
            IterationOutcome::BudgetExhausted { .. } => {
                self.queue.mark_blocked(task_id, "budget exhausted")?;
            }
        }
        self.queue.save()?;

        let line = outcome.to_progress_line(&task);
        let completed = matches!(outcome, IterationOutcome::Committed { .. });
        let result = if completed {
            self.progress.append_entry(Utc::now(), &[line], &[], &[])
        } else {
            self.progress.append_entry(Utc::now(), &[], &[], &[line])
        };
        result.map_err(|e| OrchestratorError::Persistence(format!("progress log write failed: {e}")))?;

        Ok(())
    }
}
