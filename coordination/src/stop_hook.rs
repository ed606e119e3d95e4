//! C6 — Stop Hook.
//!
//! Pure end-of-iteration arbitrator (§4.6): given the contract, the
//! verdict history accumulated so far, and the current kill-switch mode,
//! decides whether to continue, halt, or escalate. Never mutates state.

use serde::Serialize;

use crate::contracts::Contract;
use crate::governance::KillSwitchMode;
use crate::strategist::{FixStrategy, SelfCorrectionStrategist};
use crate::verifier::{Verdict, VerifyResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StopDecisionKind {
    Continue,
    HaltSuccess,
    HaltFailure,
    Escalate,
    BudgetExhausted,
}

#[derive(Debug, Clone)]
pub struct StopDecision {
    pub decision: StopDecisionKind,
    pub reason: String,
    pub iteration: u32,
    pub next_fix_strategy: Option<FixStrategy>,
}

pub struct StopHook;

impl StopHook {
    /// Applies the ordered decision tree from §4.6. `verdict_history` is the
    /// cumulative sequence of verify verdicts for the current task attempt,
    /// most recent last, and must be non-empty. `iteration` is the 1-based
    /// count of agent attempts made so far (the caller increments it before
    /// calling `decide`), so budget is exhausted once `iteration` reaches
    /// `max_iterations`, not before — a task with `max_iterations = 3` gets
    /// exactly 3 agent attempts.
    pub fn decide(
        kill_switch: KillSwitchMode,
        contract: &Contract,
        iteration: u32,
        verdict_history: &[VerifyResult],
        strategist: &SelfCorrectionStrategist,
    ) -> StopDecision {
        let Some(last) = verdict_history.last() else {
            return StopDecision {
                decision: StopDecisionKind::Escalate,
                reason: "no verdict available".to_string(),
                iteration,
                next_fix_strategy: None,
            };
        };

        if kill_switch == KillSwitchMode::Paused {
            return StopDecision {
                decision: StopDecisionKind::Escalate,
                reason: "kill-switch is PAUSED; waiting for operator".to_string(),
                iteration,
                next_fix_strategy: None,
            };
        }

        if last.status == Verdict::Pass {
            return StopDecision {
                decision: StopDecisionKind::HaltSuccess,
                reason: last.reason.clone(),
                iteration,
                next_fix_strategy: None,
            };
        }

        if last.status == Verdict::Blocked {
            return StopDecision {
                decision: StopDecisionKind::Escalate,
                reason: last.reason.clone(),
                iteration,
                next_fix_strategy: None,
            };
        }

        if iteration >= contract.limits.max_iterations {
            return StopDecision {
                decision: StopDecisionKind::BudgetExhausted,
                reason: "iteration budget exhausted".to_string(),
                iteration,
                next_fix_strategy: None,
            };
        }

        if verdict_history.len() >= 2 {
            let prev = &verdict_history[verdict_history.len() - 2];
            if prev.status == Verdict::Fail
                && last.status == Verdict::Fail
                && prev.failure_signature() == last.failure_signature()
            {
                return StopDecision {
                    decision: StopDecisionKind::HaltFailure,
                    reason: "identical failure signature two iterations in a row".to_string(),
                    iteration,
                    next_fix_strategy: None,
                };
            }
        }

        let strategy = strategist.analyze(last, iteration, contract.limits.max_iterations);
        StopDecision {
            decision: StopDecisionKind::Continue,
            reason: strategy.rationale.clone(),
            iteration,
            next_fix_strategy: Some(strategy),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::ContractLimits;
    use std::collections::HashSet;

    fn contract(max_iterations: u32) -> Contract {
        Contract {
            agent_type: "bugfix".to_string(),
            limits: ContractLimits {
                max_iterations,
                max_files_changed: 10,
                max_lines_added: 100,
                max_lines_removed: 100,
            },
            allowed_actions: HashSet::new(),
            forbidden_actions: HashSet::new(),
            branch_policy: "^fix/.*".to_string(),
            requires_review: Vec::new(),
        }
    }

    fn pass() -> VerifyResult {
        VerifyResult::pass()
    }

    fn fail(signature_seed: &str) -> VerifyResult {
        VerifyResult {
            status: Verdict::Fail,
            reason: "fail".to_string(),
            lint_errors: Vec::new(),
            type_errors: vec![crate::verifier::TypeError {
                file: signature_seed.to_string(),
                line: 1,
                message: "mismatched types".to_string(),
            }],
            test_failures: Vec::new(),
            has_guardrails: false,
            guardrail_hits: Vec::new(),
        }
    }

    fn blocked() -> VerifyResult {
        VerifyResult::blocked("guardrail: test_skip_marker")
    }

    #[test]
    fn pass_verdict_halts_success() {
        let c = contract(5);
        let strategist = SelfCorrectionStrategist::new(None);
        let decision = StopHook::decide(KillSwitchMode::Normal, &c, 0, &[pass()], &strategist);
        assert_eq!(decision.decision, StopDecisionKind::HaltSuccess);
    }

    #[test]
    fn blocked_verdict_escalates() {
        let c = contract(5);
        let strategist = SelfCorrectionStrategist::new(None);
        let decision = StopHook::decide(KillSwitchMode::Normal, &c, 0, &[blocked()], &strategist);
        assert_eq!(decision.decision, StopDecisionKind::Escalate);
    }

    #[test]
    fn paused_kill_switch_escalates_even_on_pass() {
        let c = contract(5);
        let strategist = SelfCorrectionStrategist::new(None);
        let decision = StopHook::decide(KillSwitchMode::Paused, &c, 0, &[pass()], &strategist);
        assert_eq!(decision.decision, StopDecisionKind::Escalate);
    }

    #[test]
    fn continues_while_attempts_remain_under_cap() {
        let c = contract(3);
        let strategist = SelfCorrectionStrategist::new(None);
        // iteration=2 means 2 of 3 attempts are used; one remains.
        let decision = StopHook::decide(KillSwitchMode::Normal, &c, 2, &[fail("a")], &strategist);
        assert_eq!(decision.decision, StopDecisionKind::Continue);
    }

    #[test]
    fn budget_exhaustion_when_iteration_meets_cap() {
        let c = contract(3);
        let strategist = SelfCorrectionStrategist::new(None);
        // iteration=3 means all 3 attempts are used.
        let decision = StopHook::decide(KillSwitchMode::Normal, &c, 3, &[fail("a")], &strategist);
        assert_eq!(decision.decision, StopDecisionKind::BudgetExhausted);
    }

    #[test]
    fn scenario_4_budget_exhaustion_gives_exactly_max_iterations_attempts() {
        // §8 scenario 4: max_iterations=3, every verify FAILs with a distinct
        // signature so decisions are C, C, BUDGET_EXHAUSTED — three attempts,
        // not two.
        let c = contract(3);
        let strategist = SelfCorrectionStrategist::new(None);

        let mut history = vec![fail("one.rs")];
        let d1 = StopHook::decide(KillSwitchMode::Normal, &c, 1, &history, &strategist);
        assert_eq!(d1.decision, StopDecisionKind::Continue);

        history.push(fail("two.rs"));
        let d2 = StopHook::decide(KillSwitchMode::Normal, &c, 2, &history, &strategist);
        assert_eq!(d2.decision, StopDecisionKind::Continue);

        history.push(fail("three.rs"));
        let d3 = StopHook::decide(KillSwitchMode::Normal, &c, 3, &history, &strategist);
        assert_eq!(d3.decision, StopDecisionKind::BudgetExhausted);
    }

    #[test]
    fn repeated_identical_fail_signature_halts_failure() {
        let c = contract(10);
        let strategist = SelfCorrectionStrategist::new(None);
        let history = vec![fail("same.rs"), fail("same.rs")];
        let decision = StopHook::decide(KillSwitchMode::Normal, &c, 1, &history, &strategist);
        assert_eq!(decision.decision, StopDecisionKind::HaltFailure);
    }

    #[test]
    fn distinct_fail_signatures_continue() {
        let c = contract(10);
        let strategist = SelfCorrectionStrategist::new(None);
        let history = vec![fail("first.rs"), fail("second.rs")];
        let decision = StopHook::decide(KillSwitchMode::Normal, &c, 1, &history, &strategist);
        assert_eq!(decision.decision, StopDecisionKind::Continue);
        assert!(decision.next_fix_strategy.is_some());
    }

    #[test]
    fn single_fail_continues_with_strategy() {
        let c = contract(10);
        let strategist = SelfCorrectionStrategist::new(None);
        let decision = StopHook::decide(KillSwitchMode::Normal, &c, 0, &[fail("a.rs")], &strategist);
        assert_eq!(decision.decision, StopDecisionKind::Continue);
        assert!(decision.next_fix_strategy.is_some());
    }
}
