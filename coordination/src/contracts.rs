//! C1 — Contract Loader.
//!
//! Loads per-agent-type policy documents (YAML) from a contracts directory
//! and validates them before they ever reach the Governance Enforcer or
//! Stop Hook. Contracts are immutable for the life of one task attempt;
//! reload happens only at Autonomous Loop startup or on explicit operator
//! command (`ContractLoader::reload`).

use std::collections::HashSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ContractError;

/// The closed vocabulary of actions the Governance Enforcer understands.
pub const ACTION_VOCABULARY: &[&str] = &[
    "read_file",
    "write_file",
    "create_file",
    "delete_file",
    "run_tests",
    "run_lint",
    "run_typecheck",
    "git_commit",
    "git_push",
    "run_build",
];

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ContractLimits {
    pub max_iterations: u32,
    pub max_files_changed: u32,
    pub max_lines_added: u32,
    pub max_lines_removed: u32,
}

/// A per-agent-type policy document (§3 "Contract").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contract {
    pub agent_type: String,
    pub limits: ContractLimits,
    pub allowed_actions: HashSet<String>,
    pub forbidden_actions: HashSet<String>,
    pub branch_policy: String,
    pub requires_review: Vec<String>,
}

/// On-disk shape before the agent_type is stamped in from the filename.
#[derive(Debug, Deserialize)]
struct RawContract {
    limits: ContractLimits,
    #[serde(default)]
    allowed_actions: Vec<String>,
    #[serde(default)]
    forbidden_actions: Vec<String>,
    #[serde(default)]
    branch_policy: String,
    #[serde(default)]
    requires_review: Vec<String>,
}

impl Contract {
    /// Validates internal consistency, returning the list of violations
    /// rather than stopping at the first one — mirrors the teacher's
    /// `validate_response` style of reporting every defect at once.
    pub fn validate(&self) -> Vec<String> {
        let mut violations = Vec::new();

        if self.limits.max_iterations == 0 || self.limits.max_iterations > 200 {
            violations.push(format!(
                "max_iterations {} out of range 1..=200",
                self.limits.max_iterations
            ));
        }

        let overlap: Vec<&String> = self
            .allowed_actions
            .intersection(&self.forbidden_actions)
            .collect();
        if !overlap.is_empty() {
            violations.push(format!(
                "allowed_actions and forbidden_actions overlap: {overlap:?}"
            ));
        }

        for action in self.allowed_actions.iter().chain(self.forbidden_actions.iter()) {
            if !ACTION_VOCABULARY.contains(&action.as_str()) {
                violations.push(format!("unknown action {action:?} not in closed vocabulary"));
            }
        }

        if self.branch_policy.is_empty() {
            violations.push("branch_policy must not be empty".to_string());
        } else if regex::Regex::new(&self.branch_policy).is_err() {
            violations.push(format!("branch_policy {:?} is not a valid regex", self.branch_policy));
        }

        violations
    }
}

/// Loads and caches [`Contract`]s from a directory of `{agent_type}.yaml` files.
pub struct ContractLoader {
    dir: PathBuf,
    cache: std::collections::HashMap<String, Contract>,
}

impl ContractLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cache: std::collections::HashMap::new(),
        }
    }

    /// Loads a contract for `agent_type`, using the cache if already loaded
    /// this run. Call [`Self::reload`] to force a re-read from disk.
    pub fn load(&mut self, agent_type: &str) -> Result<&Contract, ContractError> {
        if !self.cache.contains_key(agent_type) {
            let contract = self.read_from_disk(agent_type)?;
            self.cache.insert(agent_type.to_string(), contract);
        }
        Ok(self.cache.get(agent_type).expect("just inserted"))
    }

    /// Drops the cache; the next `load` re-reads from disk. Intended for
    /// explicit operator-triggered reloads, never for mid-task use.
    pub fn reload(&mut self) {
        debug!("contract loader cache cleared");
        self.cache.clear();
    }

    fn read_from_disk(&self, agent_type: &str) -> Result<Contract, ContractError> {
        let path = self.dir.join(format!("{agent_type}.yaml"));
        if !path.exists() {
            return Err(ContractError::NotFound {
                agent_type: agent_type.to_string(),
                dir: self.dir.clone(),
            });
        }
        let raw = std::fs::read_to_string(&path).map_err(|source| ContractError::Io {
            path: path.clone(),
            source,
        })?;
        let parsed: RawContract = serde_yaml::from_str(&raw).map_err(|source| ContractError::Parse {
            path: path.clone(),
            source,
        })?;

        let contract = Contract {
            agent_type: agent_type.to_string(),
            limits: parsed.limits,
            allowed_actions: parsed.allowed_actions.into_iter().collect(),
            forbidden_actions: parsed.forbidden_actions.into_iter().collect(),
            branch_policy: parsed.branch_policy,
            requires_review: parsed.requires_review,
        };

        let violations = contract.validate();
        if !violations.is_empty() {
            warn!(agent_type, ?violations, "contract failed validation");
            return Err(ContractError::Invalid {
                agent_type: agent_type.to_string(),
                violations,
            });
        }

        Ok(contract)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::Path;

    fn write_contract(dir: &Path, agent_type: &str, body: &str) {
        let path = dir.join(format!("{agent_type}.yaml"));
        let mut f = std::fs::File::create(path).unwrap();
        f.write_all(body.as_bytes()).unwrap();
    }

    const VALID_BUGFIX: &str = r#"
limits:
  max_iterations: 5
  max_files_changed: 10
  max_lines_added: 200
  max_lines_removed: 200
allowed_actions: [read_file, write_file, run_tests, run_lint, run_typecheck, git_commit]
forbidden_actions: [git_push, delete_file]
branch_policy: "^fix/.*"
requires_review: []
"#;

    #[test]
    fn loads_valid_contract() {
        let dir = tempfile::tempdir().unwrap();
        write_contract(dir.path(), "bugfix", VALID_BUGFIX);
        let mut loader = ContractLoader::new(dir.path());
        let contract = loader.load("bugfix").unwrap();
        assert_eq!(contract.limits.max_iterations, 5);
        assert!(contract.allowed_actions.contains("run_tests"));
    }

    #[test]
    fn missing_contract_errors() {
        let dir = tempfile::tempdir().unwrap();
        let mut loader = ContractLoader::new(dir.path());
        let err = loader.load("feature").unwrap_err();
        assert!(matches!(err, ContractError::NotFound { .. }));
    }

    #[test]
    fn overlapping_actions_are_invalid() {
        let dir = tempfile::tempdir().unwrap();
        write_contract(
            dir.path(),
            "bugfix",
            r#"
limits: { max_iterations: 5, max_files_changed: 1, max_lines_added: 1, max_lines_removed: 1 }
allowed_actions: [run_tests]
forbidden_actions: [run_tests]
branch_policy: "^fix/.*"
requires_review: []
"#,
        );
        let mut loader = ContractLoader::new(dir.path());
        let err = loader.load("bugfix").unwrap_err();
        match err {
            ContractError::Invalid { violations, .. } => {
                assert!(violations.iter().any(|v| v.contains("overlap")));
            }
            other => panic!("expected Invalid, got {other:?}"),
        }
    }

    #[test]
    fn unknown_action_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        write_contract(
            dir.path(),
            "bugfix",
            r#"
limits: { max_iterations: 5, max_files_changed: 1, max_lines_added: 1, max_lines_removed: 1 }
allowed_actions: [teleport_file]
forbidden_actions: []
branch_policy: "^fix/.*"
requires_review: []
"#,
        );
        let mut loader = ContractLoader::new(dir.path());
        let err = loader.load("bugfix").unwrap_err();
        assert!(matches!(err, ContractError::Invalid { .. }));
    }

    #[test]
    fn out_of_range_iterations_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        write_contract(
            dir.path(),
            "bugfix",
            r#"
limits: { max_iterations: 0, max_files_changed: 1, max_lines_added: 1, max_lines_removed: 1 }
allowed_actions: []
forbidden_actions: []
branch_policy: "^fix/.*"
requires_review: []
"#,
        );
        let mut loader = ContractLoader::new(dir.path());
        let err = loader.load("bugfix").unwrap_err();
        assert!(matches!(err, ContractError::Invalid { .. }));
    }

    #[test]
    fn reload_clears_cache_and_rereads() {
        let dir = tempfile::tempdir().unwrap();
        write_contract(dir.path(), "bugfix", VALID_BUGFIX);
        let mut loader = ContractLoader::new(dir.path());
        loader.load("bugfix").unwrap();
        write_contract(
            dir.path(),
            "bugfix",
            &VALID_BUGFIX.replace("max_iterations: 5", "max_iterations: 9"),
        );
        // without reload, cached value stands
        assert_eq!(loader.load("bugfix").unwrap().limits.max_iterations, 5);
        loader.reload();
        assert_eq!(loader.load("bugfix").unwrap().limits.max_iterations, 9);
    }
}
