//! C8 — Iteration Loop: per-task driver (§4.8).
//!
//! Prepare → Invoke → Enforce → Verify → (Commit | Escalate | Strategize) →
//! Checkpoint, bounded by `contract.max_iterations`.

use std::path::PathBuf;

use tracing::{info, warn};

use crate::agent::{Agent, AgentOutcome, CompletionSignal};
use crate::contracts::Contract;
use crate::governance::{ActionContext, GovernanceEnforcer, KillSwitchMode};
use crate::progress::TaskProgressLine;
use crate::queue::Task;
use crate::session::{IterationEntry, SessionRetrospective, SessionState, SessionStore, StatusToken};
use crate::stop_hook::{StopDecisionKind, StopHook};
use crate::strategist::{FixStrategyAction, SelfCorrectionStrategist};
use crate::verifier::{FastVerifier, ToolCommand, Verdict, VerifierAdapter, VerifyResult};

/// Terminal result of running one task through the Iteration Loop.
#[derive(Debug, Clone)]
pub enum IterationOutcome {
    Committed { commit_hash: String, iterations: u32 },
    Blocked { reason: String, iterations: u32 },
    BudgetExhausted { iterations: u32 },
}

impl IterationOutcome {
    pub fn to_progress_line(&self, task: &Task) -> TaskProgressLine {
        match self {
            Self::Committed { commit_hash, .. } => {
                TaskProgressLine::completed(&task.id, &task.description, commit_hash.clone())
            }
            Self::Blocked { reason, .. } => TaskProgressLine::blocked(&task.id, &task.description, reason.clone()),
            Self::BudgetExhausted { .. } => {
                TaskProgressLine::blocked(&task.id, &task.description, "budget exhausted")
            }
        }
    }
}

/// What the loop should do in its next pass: ask the agent for a new
/// attempt, or apply a deterministic fix command and re-verify directly.
enum NextStep {
    InvokeAgent { prompt: String },
    RunAutofix { command: ToolCommand },
}

fn build_prompt(task: &Task, contract: &Contract, state: &SessionState) -> String {
    format!(
        "Task {}: {}\nTarget: {}\nTests: {}\nIteration: {}/{}\nAgent type: {}\n",
        task.id,
        task.description,
        task.file.as_deref().unwrap_or("<unspecified>"),
        task.tests.join(", "),
        state.iteration,
        state.max_iterations,
        contract.agent_type,
    )
}

fn allowed_tools(contract: &Contract) -> Vec<String> {
    contract.allowed_actions.iter().cloned().collect()
}

/// Drives one task from `Prepare` through a terminal state.
pub struct IterationLoop<'a, A: VerifierAdapter, AG: Agent> {
    pub contract: &'a Contract,
    pub verifier: &'a FastVerifier<A>,
    pub agent: &'a AG,
    pub session_store: &'a SessionStore,
    pub git: &'a crate::git::GitRepo,
    pub project_root: PathBuf,
    pub autofix_command: Option<ToolCommand>,
}

impl<'a, A: VerifierAdapter, AG: Agent> IterationLoop<'a, A, AG> {
    pub async fn run(&self, task: &Task) -> Result<IterationOutcome, crate::error::OrchestratorError> {
        let agent_type = task.task_type.to_string();

        // Crash recovery: if the queue still shows this task in_progress but
        // its session was already finalized, the process died between
        // `SessionStore::finalize` and the queue save that would have marked
        // it complete/blocked. Re-running from scratch would hit the
        // finalized-session guard on the first checkpoint write, so recover
        // by treating it as already terminal instead of starting fresh.
        let latest_session = self.session_store.latest(&task.id)?;
        if let Some(existing) = &latest_session {
            if existing.status_token == StatusToken::Finalized {
                warn!(
                    task_id = %task.id,
                    iteration = existing.iteration,
                    "session already finalized from a prior run; recovering task as blocked instead of re-running"
                );
                return Ok(IterationOutcome::Blocked {
                    reason: "recovered after crash: session was already finalized before the queue recorded it"
                        .to_string(),
                    iterations: existing.iteration,
                });
            }
        }

        let mut state = latest_session
            .filter(SessionState::is_resumable)
            .unwrap_or_else(|| SessionState::new(&task.id, agent_type, self.contract.limits.max_iterations));

        let mut entries: Vec<IterationEntry> = Vec::new();
        let mut verdict_history: Vec<VerifyResult> = Vec::new();
        let strategist = SelfCorrectionStrategist::new(self.autofix_command.clone());
        let governance = GovernanceEnforcer::new(self.contract);

        let mut next_step = NextStep::InvokeAgent {
            prompt: build_prompt(task, self.contract, &state),
        };

        loop {
            let (verify_result, changed_files) = match next_step {
                NextStep::InvokeAgent { prompt } => {
                    let outcome = match self.agent.invoke(&prompt, &allowed_tools(self.contract)).await {
                        Ok(o) => o,
                        Err(e) => AgentOutcome {
                            output_text: format!("agent error: {e}"),
                            completion: CompletionSignal::Missing,
                            changed_files: Vec::new(),
                        },
                    };

                    state.next_iteration();

                    let changed_files = self.git.diff_name_only().unwrap_or_default();
                    let (lines_added, lines_removed) = self.git.diff_numstat().unwrap_or((0, 0));
                    let ctx = ActionContext {
                        files_changed: changed_files.len() as u32,
                        lines_added,
                        lines_removed,
                        branch: self.git.current_branch().ok(),
                        path: None,
                    };
                    if let Err(violation) = governance.check("write_file", &ctx) {
                        warn!(task_id = %task.id, %violation, "governance rejected write during iteration");
                        return self
                            .finalize_blocked(task, &mut state, &entries, format!("policy violation: {violation}"))
                            .await;
                    }

                    let mut result = self
                        .verifier
                        .run(&changed_files, &self.project_root, &task.tests)
                        .await;

                    if outcome.completion == CompletionSignal::Missing && result.status == Verdict::Pass {
                        result = VerifyResult {
                            status: Verdict::Fail,
                            reason: "no completion token".to_string(),
                            ..result
                        };
                    }
                    (result, changed_files)
                }
                NextStep::RunAutofix { command } => {
                    let ctx = ActionContext {
                        branch: self.git.current_branch().ok(),
                        ..ActionContext::new()
                    };
                    if let Err(violation) = governance.check("run_lint", &ctx) {
                        return self
                            .finalize_blocked(task, &mut state, &entries, format!("policy violation: {violation}"))
                            .await;
                    }
                    run_autofix_command(&command, &self.project_root);
                    state.next_iteration();
                    let changed_files = self.git.diff_name_only().unwrap_or_default();
                    let result = self
                        .verifier
                        .run(&changed_files, &self.project_root, &task.tests)
                        .await;
                    (result, changed_files)
                }
            };

            verdict_history.push(verify_result.clone());
            entries.push(IterationEntry {
                iteration: state.iteration,
                verdict: verify_result.status.to_string(),
                fix_strategy: None,
                changed_files: changed_files.iter().map(|p| p.display().to_string()).collect(),
                note: Some(verify_result.reason.clone()),
            });
            self.session_store.save(&state, &entries)?;

            let kill_switch = KillSwitchMode::read_from_env();
            let decision = StopHook::decide(kill_switch, self.contract, state.iteration, &verdict_history, &strategist);
            info!(task_id = %task.id, iteration = state.iteration, decision = ?decision.decision, "stop hook decision");

            match decision.decision {
                StopDecisionKind::HaltSuccess => {
                    let ctx = ActionContext {
                        branch: self.git.current_branch().ok(),
                        files_changed: changed_files.len() as u32,
                        ..ActionContext::new()
                    };
                    if let Err(violation) = governance.check("git_commit", &ctx) {
                        return self
                            .finalize_blocked(task, &mut state, &entries, format!("policy violation: {violation}"))
                            .await;
                    }
                    let hash = self
                        .git
                        .create_checkpoint(&task.id, &task.description, &changed_files)
                        .map_err(crate::error::OrchestratorError::from)?;
                    let retro = SessionRetrospective {
                        task_id: task.id.clone(),
                        iterations_used: state.iteration,
                        max_iterations: state.max_iterations,
                        budget_exhausted: false,
                        final_status_token: StatusToken::Finalized,
                    };
                    self.session_store.finalize(state.clone(), &entries, retro)?;
                    return Ok(IterationOutcome::Committed {
                        commit_hash: hash,
                        iterations: state.iteration,
                    });
                }
                StopDecisionKind::Escalate => {
                    return self
                        .finalize_blocked(task, &mut state, &entries, decision.reason)
                        .await;
                }
                StopDecisionKind::HaltFailure => {
                    return self
                        .finalize_blocked(task, &mut state, &entries, decision.reason)
                        .await;
                }
                StopDecisionKind::BudgetExhausted => {
                    let retro = SessionRetrospective {
                        task_id: task.id.clone(),
                        iterations_used: state.iteration,
                        max_iterations: state.max_iterations,
                        budget_exhausted: true,
                        final_status_token: StatusToken::Finalized,
                    };
                    self.session_store.finalize(state.clone(), &entries, retro)?;
                    return Ok(IterationOutcome::BudgetExhausted {
                        iterations: state.iteration,
                    });
                }
                StopDecisionKind::Continue => {
                    let strategy = decision.next_fix_strategy.expect("continue always carries a strategy");
                    next_step = match strategy.action {
                        FixStrategyAction::RunAutofix => NextStep::RunAutofix {
                            command: strategy.command.expect("RUN_AUTOFIX carries a command"),
                        },
                        FixStrategyAction::FixTypes | FixStrategyAction::FixTests | FixStrategyAction::FixImplementation => {
                            NextStep::InvokeAgent {
                                prompt: strategy.prompt.expect("FIX_* carries a prompt"),
                            }
                        }
                        FixStrategyAction::Escalate => {
                            return self
                                .finalize_blocked(task, &mut state, &entries, strategy.rationale)
                                .await;
                        }
                    };
                }
            }
        }
    }

    async fn finalize_blocked(
        &self,
        task: &Task,
        state: &mut SessionState,
        entries: &[IterationEntry],
        reason: String,
    ) -> Result<IterationOutcome, crate::error::OrchestratorError> {
        let retro = SessionRetrospective {
            task_id: task.id.clone(),
            iterations_used: state.iteration,
            max_iterations: state.max_iterations,
            budget_exhausted: false,
            final_status_token: StatusToken::Finalized,
        };
        self.session_store.finalize(state.clone(), entries, retro)?;
        Ok(IterationOutcome::Blocked {
            reason,
            iterations: state.iteration,
        })
    }
}

/// Deterministic, non-agent fix command invoked directly by the loop
/// (§4.7: "for RUN_AUTOFIX, the strategist executes the command ... and
/// reports outcome"). Failures are non-fatal — the next verify pass will
/// simply still show the original lint errors.
fn run_autofix_command(command: &ToolCommand, project_root: &std::path::Path) {
    let result = std::process::Command::new(&command.program)
        .args(&command.args)
        .current_dir(project_root)
        .output();
    if let Err(e) = result {
        warn!(program = %command.program, error = %e, "autofix command failed to spawn");
    }
}
