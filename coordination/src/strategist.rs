//! C7 — Self-Correction Strategist.
//!
//! Maps a [`VerifyResult`] to a [`FixStrategy`] per the signature table in
//! §4.7, and bounds retries against the contract's iteration budget.

use serde::Serialize;

use crate::verifier::{ToolCommand, VerifyResult};

/// Lint rule names the deterministic autofix command is known to resolve.
/// A real deployment would source this from the lint tool's own
/// `--fix`-capable rule list; the core ships a conservative default.
const AUTO_FIXABLE_RULES: &[&str] = &[
    "unused_imports",
    "trailing_whitespace",
    "formatting",
    "missing_semicolon",
    "sort_imports",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FixStrategyAction {
    RunAutofix,
    FixTypes,
    FixTests,
    FixImplementation,
    Escalate,
}

/// §3 "Fix Strategy". Invariants: ESCALATE carries no command or prompt;
/// RUN_AUTOFIX carries a command and retries immediately; FIX_* carries a
/// prompt and retries after an agent rerun.
#[derive(Debug, Clone)]
pub struct FixStrategy {
    pub action: FixStrategyAction,
    pub command: Option<ToolCommand>,
    pub prompt: Option<String>,
    pub retry_immediately: bool,
    pub rationale: String,
}

impl FixStrategy {
    fn escalate(rationale: impl Into<String>) -> Self {
        Self {
            action: FixStrategyAction::Escalate,
            command: None,
            prompt: None,
            retry_immediately: false,
            rationale: rationale.into(),
        }
    }
}

pub struct SelfCorrectionStrategist {
    autofix_command: Option<ToolCommand>,
}

impl SelfCorrectionStrategist {
    pub fn new(autofix_command: Option<ToolCommand>) -> Self {
        Self { autofix_command }
    }

    /// `attempts_so_far` is the iteration count already spent on this task;
    /// once incrementing it would exceed `max_iterations`, the strategist
    /// escalates rather than proposing another retry.
    pub fn analyze(&self, verify_result: &VerifyResult, attempts_so_far: u32, max_iterations: u32) -> FixStrategy {
        if attempts_so_far + 1 > max_iterations {
            return FixStrategy::escalate("iteration budget would be exceeded by another retry");
        }

        if verify_result.has_guardrails {
            return FixStrategy::escalate(format!("guardrail detected: {}", verify_result.reason));
        }

        if verify_result.reason.contains("infrastructure") || verify_result.reason.contains("timeout") {
            return FixStrategy::escalate(verify_result.reason.clone());
        }

        if !verify_result.lint_errors.is_empty() {
            let all_auto_fixable = verify_result
                .lint_errors
                .iter()
                .all(|e| AUTO_FIXABLE_RULES.contains(&e.rule.as_str()));

            if all_auto_fixable {
                if let Some(command) = &self.autofix_command {
                    return FixStrategy {
                        action: FixStrategyAction::RunAutofix,
                        command: Some(command.clone()),
                        prompt: None,
                        retry_immediately: true,
                        rationale: "all lint errors are auto-fixable".to_string(),
                    };
                }
            }

            let prompt = format!(
                "Fix the following lint errors:\n{}",
                verify_result
                    .lint_errors
                    .iter()
                    .map(|e| format!("- {}:{} [{}] {}", e.file, e.line, e.rule, e.message))
                    .collect::<Vec<_>>()
                    .join("\n")
            );
            return FixStrategy {
                action: FixStrategyAction::FixImplementation,
                command: None,
                prompt: Some(prompt),
                retry_immediately: false,
                rationale: "lint errors remain after autofix eligibility check".to_string(),
            };
        }

        if !verify_result.type_errors.is_empty() {
            let prompt = format!(
                "Fix the following type errors:\n{}",
                verify_result
                    .type_errors
                    .iter()
                    .map(|e| format!("- {}:{} {}", e.file, e.line, e.message))
                    .collect::<Vec<_>>()
                    .join("\n")
            );
            return FixStrategy {
                action: FixStrategyAction::FixTypes,
                command: None,
                prompt: Some(prompt),
                retry_immediately: false,
                rationale: "type errors present".to_string(),
            };
        }

        if !verify_result.test_failures.is_empty() {
            let prompt = format!(
                "Fix the following failing tests:\n{}",
                verify_result
                    .test_failures
                    .iter()
                    .map(|f| format!("- {}: {}", f.selector, f.message))
                    .collect::<Vec<_>>()
                    .join("\n")
            );
            return FixStrategy {
                action: FixStrategyAction::FixTests,
                command: None,
                prompt: Some(prompt),
                retry_immediately: false,
                rationale: "test failures present with no lint or type errors".to_string(),
            };
        }

        FixStrategy::escalate("unrecognized verify result composition")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verifier::{LintError, TestFailure, TypeError, Verdict};

    fn base_result() -> VerifyResult {
        VerifyResult {
            status: Verdict::Fail,
            reason: "fail".to_string(),
            lint_errors: Vec::new(),
            type_errors: Vec::new(),
            test_failures: Vec::new(),
            has_guardrails: false,
            guardrail_hits: Vec::new(),
        }
    }

    #[test]
    fn autofixable_lint_yields_run_autofix_with_command() {
        let strategist = SelfCorrectionStrategist::new(Some(ToolCommand::new("rustfmt", ["--check"])));
        let mut result = base_result();
        result.lint_errors.push(LintError {
            file: "a.rs".into(),
            line: 1,
            rule: "formatting".into(),
            message: "bad formatting".into(),
        });
        let strategy = strategist.analyze(&result, 0, 5);
        assert_eq!(strategy.action, FixStrategyAction::RunAutofix);
        assert!(strategy.retry_immediately);
        assert!(strategy.command.is_some());
    }

    #[test]
    fn non_autofixable_lint_yields_fix_implementation() {
        let strategist = SelfCorrectionStrategist::new(Some(ToolCommand::new("rustfmt", ["--check"])));
        let mut result = base_result();
        result.lint_errors.push(LintError {
            file: "a.rs".into(),
            line: 1,
            rule: "complex_logic".into(),
            message: "too complex".into(),
        });
        let strategy = strategist.analyze(&result, 0, 5);
        assert_eq!(strategy.action, FixStrategyAction::FixImplementation);
        assert!(strategy.prompt.is_some());
        assert!(!strategy.retry_immediately);
    }

    #[test]
    fn lint_without_configured_autofix_command_falls_back_to_fix_implementation() {
        let strategist = SelfCorrectionStrategist::new(None);
        let mut result = base_result();
        result.lint_errors.push(LintError {
            file: "a.rs".into(),
            line: 1,
            rule: "formatting".into(),
            message: "bad formatting".into(),
        });
        let strategy = strategist.analyze(&result, 0, 5);
        assert_eq!(strategy.action, FixStrategyAction::FixImplementation);
    }

    #[test]
    fn type_errors_yield_fix_types() {
        let strategist = SelfCorrectionStrategist::new(None);
        let mut result = base_result();
        result.type_errors.push(TypeError {
            file: "a.rs".into(),
            line: 2,
            message: "mismatched types".into(),
        });
        let strategy = strategist.analyze(&result, 0, 5);
        assert_eq!(strategy.action, FixStrategyAction::FixTypes);
    }

    #[test]
    fn test_failures_yield_fix_tests() {
        let strategist = SelfCorrectionStrategist::new(None);
        let mut result = base_result();
        result.test_failures.push(TestFailure {
            selector: "tests::ok".into(),
            message: "assertion failed".into(),
        });
        let strategy = strategist.analyze(&result, 0, 5);
        assert_eq!(strategy.action, FixStrategyAction::FixTests);
    }

    #[test]
    fn guardrails_always_escalate() {
        let strategist = SelfCorrectionStrategist::new(None);
        let mut result = base_result();
        result.has_guardrails = true;
        let strategy = strategist.analyze(&result, 0, 5);
        assert_eq!(strategy.action, FixStrategyAction::Escalate);
        assert!(strategy.command.is_none());
        assert!(strategy.prompt.is_none());
    }

    #[test]
    fn infrastructure_reason_escalates() {
        let strategist = SelfCorrectionStrategist::new(None);
        let mut result = base_result();
        result.reason = "infrastructure: tool crashed".to_string();
        let strategy = strategist.analyze(&result, 0, 5);
        assert_eq!(strategy.action, FixStrategyAction::Escalate);
    }

    #[test]
    fn budget_would_be_exceeded_escalates() {
        let strategist = SelfCorrectionStrategist::new(None);
        let mut result = base_result();
        result.test_failures.push(TestFailure {
            selector: "tests::ok".into(),
            message: "nope".into(),
        });
        let strategy = strategist.analyze(&result, 5, 5);
        assert_eq!(strategy.action, FixStrategyAction::Escalate);
    }

    #[test]
    fn unknown_composition_escalates() {
        let strategist = SelfCorrectionStrategist::new(None);
        let result = base_result();
        let strategy = strategist.analyze(&result, 0, 5);
        assert_eq!(strategy.action, FixStrategyAction::Escalate);
    }
}
