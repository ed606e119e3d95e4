//! C2 — Governance Enforcer.
//!
//! Gates every externally-observable action against the active [`Contract`]
//! and the process-wide [`KillSwitchMode`]. Stateless beyond the contract
//! reference: no approval is ever cached across calls, and the kill-switch
//! is re-read from the environment on every [`GovernanceEnforcer::check`].

use std::collections::HashMap;
use std::env;

use regex::Regex;
use tracing::{debug, warn};

use crate::contracts::Contract;
use crate::error::{PolicyViolation, PolicyViolationKind};

/// Process-wide operator control (§3). Read fresh on every governance
/// check; no caching longer than one iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillSwitchMode {
    Off,
    Safe,
    Normal,
    Paused,
}

pub const KILL_SWITCH_ENV_VAR: &str = "AI_BRAIN_MODE";

impl KillSwitchMode {
    /// Reads the mode from `AI_BRAIN_MODE`, defaulting to `Normal` when unset
    /// (an unset kill-switch must never silently disable the agent).
    pub fn read_from_env() -> Self {
        Self::read_from_env_var(KILL_SWITCH_ENV_VAR)
    }

    pub fn read_from_env_var(var: &str) -> Self {
        match env::var(var).as_deref() {
            Ok("OFF") => Self::Off,
            Ok("SAFE") => Self::Safe,
            Ok("PAUSED") => Self::Paused,
            Ok("NORMAL") => Self::Normal,
            Ok(other) => {
                warn!(value = other, "unrecognized kill-switch value, defaulting to NORMAL");
                Self::Normal
            }
            Err(_) => Self::Normal,
        }
    }
}

/// Context accompanying an action check (§4.2). Only recognized keys are
/// read; extras are ignored.
#[derive(Debug, Clone, Default)]
pub struct ActionContext {
    pub lines_added: u32,
    pub lines_removed: u32,
    pub files_changed: u32,
    pub branch: Option<String>,
    pub path: Option<String>,
}

impl ActionContext {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Read-type actions permitted even under `SAFE` mode.
const READ_ACTIONS: &[&str] = &["read_file", "run_tests", "run_lint", "run_typecheck"];

const GIT_ACTIONS: &[&str] = &["git_commit", "git_push"];

/// Single contract-scoped gate. Construct one per task attempt; it holds no
/// approval state between calls.
pub struct GovernanceEnforcer<'a> {
    contract: &'a Contract,
}

impl<'a> GovernanceEnforcer<'a> {
    pub fn new(contract: &'a Contract) -> Self {
        Self { contract }
    }

    /// Runs the ordered checks from §4.2 and returns `Ok(())` or the first
    /// [`PolicyViolation`] encountered.
    pub fn check(&self, action: &str, context: &ActionContext) -> Result<(), PolicyViolation> {
        let mode = KillSwitchMode::read_from_env();
        debug!(action, ?mode, "governance check");

        match mode {
            KillSwitchMode::Off => {
                return Err(PolicyViolation::new(
                    PolicyViolationKind::KillSwitchOff,
                    action,
                    "kill-switch is OFF",
                ))
            }
            KillSwitchMode::Paused => {
                return Err(PolicyViolation::new(
                    PolicyViolationKind::KillSwitchOff,
                    action,
                    "kill-switch is PAUSED; suspending after current iteration",
                ))
            }
            KillSwitchMode::Safe if !READ_ACTIONS.contains(&action) => {
                return Err(PolicyViolation::new(
                    PolicyViolationKind::KillSwitchOff,
                    action,
                    "kill-switch is SAFE; only read-type actions are permitted",
                ))
            }
            KillSwitchMode::Safe | KillSwitchMode::Normal => {}
        }

        if self.contract.forbidden_actions.contains(action) {
            return Err(PolicyViolation::new(
                PolicyViolationKind::Forbidden,
                action,
                format!("{action} is in forbidden_actions for {}", self.contract.agent_type),
            ));
        }

        if !self.contract.allowed_actions.contains(action) {
            return Err(PolicyViolation::new(
                PolicyViolationKind::NotAllowed,
                action,
                format!("{action} is not in allowed_actions for {}", self.contract.agent_type),
            ));
        }

        if context.lines_added > self.contract.limits.max_lines_added {
            return Err(PolicyViolation::new(
                PolicyViolationKind::LimitExceeded,
                action,
                format!(
                    "lines_added {} exceeds max_lines_added {}",
                    context.lines_added, self.contract.limits.max_lines_added
                ),
            ));
        }
        if context.lines_removed > self.contract.limits.max_lines_removed {
            return Err(PolicyViolation::new(
                PolicyViolationKind::LimitExceeded,
                action,
                format!(
                    "lines_removed {} exceeds max_lines_removed {}",
                    context.lines_removed, self.contract.limits.max_lines_removed
                ),
            ));
        }
        if context.files_changed > self.contract.limits.max_files_changed {
            return Err(PolicyViolation::new(
                PolicyViolationKind::LimitExceeded,
                action,
                format!(
                    "files_changed {} exceeds max_files_changed {}",
                    context.files_changed, self.contract.limits.max_files_changed
                ),
            ));
        }

        if GIT_ACTIONS.contains(&action) {
            if let Some(branch) = &context.branch {
                let re = Regex::new(&self.contract.branch_policy).map_err(|e| {
                    PolicyViolation::new(
                        PolicyViolationKind::BranchMismatch,
                        action,
                        format!("invalid branch_policy regex: {e}"),
                    )
                })?;
                if !re.is_match(branch) {
                    return Err(PolicyViolation::new(
                        PolicyViolationKind::BranchMismatch,
                        action,
                        format!("branch {branch:?} does not match branch_policy {:?}", self.contract.branch_policy),
                    ));
                }
            }
        }

        if matches!(action, "write_file" | "create_file" | "delete_file") {
            if let Some(path) = &context.path {
                if self.path_requires_review(path) {
                    return Err(PolicyViolation::new(
                        PolicyViolationKind::ReviewRequired,
                        action,
                        format!("path {path:?} requires human review"),
                    ));
                }
            }
        }

        Ok(())
    }

    fn path_requires_review(&self, path: &str) -> bool {
        self.contract
            .requires_review
            .iter()
            .any(|glob| glob_matches(glob, path))
    }
}

/// Minimal glob matcher supporting a single trailing `*` or `**` segment,
/// sufficient for the `requires_review` globs described in §6.
fn glob_matches(glob: &str, path: &str) -> bool {
    if let Some(prefix) = glob.strip_suffix("**") {
        return path.starts_with(prefix);
    }
    if let Some(prefix) = glob.strip_suffix('*') {
        return path.starts_with(prefix) && !path[prefix.len()..].contains('/');
    }
    glob == path
}

/// Snapshot-able summary for logging/diagnostics.
pub fn describe_mode(mode: KillSwitchMode) -> &'static str {
    match mode {
        KillSwitchMode::Off => "OFF",
        KillSwitchMode::Safe => "SAFE",
        KillSwitchMode::Normal => "NORMAL",
        KillSwitchMode::Paused => "PAUSED",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn contract() -> Contract {
        Contract {
            agent_type: "bugfix".to_string(),
            limits: crate::contracts::ContractLimits {
                max_iterations: 5,
                max_files_changed: 3,
                max_lines_added: 100,
                max_lines_removed: 100,
            },
            allowed_actions: HashSet::from(["write_file".to_string(), "git_commit".to_string(), "run_tests".to_string()]),
            forbidden_actions: HashSet::from(["git_push".to_string()]),
            branch_policy: "^fix/.*".to_string(),
            requires_review: vec!["secrets/*".to_string()],
        }
    }

    fn with_env<F: FnOnce()>(var: &str, val: &str, f: F) {
        env::set_var(var, val);
        f();
        env::remove_var(var);
    }

    #[test]
    fn forbidden_action_is_rejected() {
        let c = contract();
        with_env(KILL_SWITCH_ENV_VAR, "NORMAL", || {
            let enforcer = GovernanceEnforcer::new(&c);
            let err = enforcer.check("git_push", &ActionContext::new()).unwrap_err();
            assert_eq!(err.kind, PolicyViolationKind::Forbidden);
        });
    }

    #[test]
    fn not_allowed_action_is_rejected() {
        let c = contract();
        with_env(KILL_SWITCH_ENV_VAR, "NORMAL", || {
            let enforcer = GovernanceEnforcer::new(&c);
            let err = enforcer.check("run_build", &ActionContext::new()).unwrap_err();
            assert_eq!(err.kind, PolicyViolationKind::NotAllowed);
        });
    }

    #[test]
    fn allowed_action_within_caps_succeeds() {
        let c = contract();
        with_env(KILL_SWITCH_ENV_VAR, "NORMAL", || {
            let enforcer = GovernanceEnforcer::new(&c);
            let ctx = ActionContext {
                lines_added: 10,
                files_changed: 1,
                path: Some("src/a.rs".to_string()),
                ..Default::default()
            };
            assert!(enforcer.check("write_file", &ctx).is_ok());
        });
    }

    #[test]
    fn exceeding_line_cap_is_rejected() {
        let c = contract();
        with_env(KILL_SWITCH_ENV_VAR, "NORMAL", || {
            let enforcer = GovernanceEnforcer::new(&c);
            let ctx = ActionContext {
                lines_added: 1000,
                ..Default::default()
            };
            let err = enforcer.check("write_file", &ctx).unwrap_err();
            assert_eq!(err.kind, PolicyViolationKind::LimitExceeded);
        });
    }

    #[test]
    fn branch_mismatch_is_rejected() {
        let c = contract();
        with_env(KILL_SWITCH_ENV_VAR, "NORMAL", || {
            let enforcer = GovernanceEnforcer::new(&c);
            let ctx = ActionContext {
                branch: Some("main".to_string()),
                ..Default::default()
            };
            let err = enforcer.check("git_commit", &ctx).unwrap_err();
            assert_eq!(err.kind, PolicyViolationKind::BranchMismatch);
        });
    }

    #[test]
    fn matching_branch_succeeds() {
        let c = contract();
        with_env(KILL_SWITCH_ENV_VAR, "NORMAL", || {
            let enforcer = GovernanceEnforcer::new(&c);
            let ctx = ActionContext {
                branch: Some("fix/bug-001".to_string()),
                ..Default::default()
            };
            assert!(enforcer.check("git_commit", &ctx).is_ok());
        });
    }

    #[test]
    fn review_required_path_is_rejected() {
        let c = contract();
        with_env(KILL_SWITCH_ENV_VAR, "NORMAL", || {
            let enforcer = GovernanceEnforcer::new(&c);
            let ctx = ActionContext {
                path: Some("secrets/token.env".to_string()),
                ..Default::default()
            };
            let err = enforcer.check("write_file", &ctx).unwrap_err();
            assert_eq!(err.kind, PolicyViolationKind::ReviewRequired);
        });
    }

    #[test]
    fn kill_switch_off_rejects_everything() {
        let c = contract();
        with_env(KILL_SWITCH_ENV_VAR, "OFF", || {
            let enforcer = GovernanceEnforcer::new(&c);
            let err = enforcer.check("run_tests", &ActionContext::new()).unwrap_err();
            assert_eq!(err.kind, PolicyViolationKind::KillSwitchOff);
        });
    }

    #[test]
    fn safe_mode_allows_reads_blocks_writes() {
        let c = contract();
        with_env(KILL_SWITCH_ENV_VAR, "SAFE", || {
            let enforcer = GovernanceEnforcer::new(&c);
            assert!(enforcer.check("run_tests", &ActionContext::new()).is_ok());
            let err = enforcer.check("write_file", &ActionContext::new()).unwrap_err();
            assert_eq!(err.kind, PolicyViolationKind::KillSwitchOff);
        });
    }

    #[test]
    fn paused_mode_blocks_everything() {
        let c = contract();
        with_env(KILL_SWITCH_ENV_VAR, "PAUSED", || {
            let enforcer = GovernanceEnforcer::new(&c);
            let err = enforcer.check("run_tests", &ActionContext::new()).unwrap_err();
            assert_eq!(err.kind, PolicyViolationKind::KillSwitchOff);
        });
    }

    #[test]
    fn glob_matcher_handles_star_and_doublestar() {
        assert!(glob_matches("secrets/*", "secrets/a.env"));
        assert!(!glob_matches("secrets/*", "secrets/nested/a.env"));
        assert!(glob_matches("secrets/**", "secrets/nested/a.env"));
        assert!(glob_matches("exact/path.rs", "exact/path.rs"));
    }
}
