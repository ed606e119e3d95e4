//! C5 — Fast Verifier pipeline: lint → typecheck → targeted tests (§4.5).
//!
//! Per-ecosystem tool invocation sits behind [`VerifierAdapter`] (§9,
//! "Verifier adapters") so the core only ever consumes structured
//! diagnostics. [`SubprocessAdapter`] is the default adapter, shelling out
//! to the per-project [`ToolTable`].

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tokio::process::Command;
use tracing::{info, warn};

use crate::error::VerifierInfrastructureError;

use super::guardrails::scan_files;
use super::types::{LintError, TestFailure, Tier, TypeError, Verdict, VerifyResult};

/// One opaque tool invocation (§1: "Project-level lint/typecheck/test tools
/// ... invoked as opaque commands").
#[derive(Debug, Clone)]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

/// Per-project tool table (§9, Open Question 2). The core ships no
/// language opinion; populating defaults is a CLI-layer concern.
#[derive(Debug, Clone, Default)]
pub struct ToolTable {
    pub lint: Option<ToolCommand>,
    pub typecheck: Option<ToolCommand>,
    pub test: Option<ToolCommand>,
}

/// Raw subprocess result before tier-specific parsing.
#[derive(Debug, Clone)]
pub struct RawToolOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl RawToolOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Per-ecosystem tool invocation boundary. A tier with no configured
/// command is treated as vacuously PASS — the core does not assume a
/// default toolchain.
#[async_trait]
pub trait VerifierAdapter: Send + Sync {
    async fn run_lint(
        &self,
        changed_files: &[PathBuf],
        project_root: &Path,
    ) -> Result<Option<RawToolOutput>, VerifierInfrastructureError>;

    async fn run_typecheck(
        &self,
        changed_files: &[PathBuf],
        project_root: &Path,
    ) -> Result<Option<RawToolOutput>, VerifierInfrastructureError>;

    async fn run_tests(
        &self,
        selectors: &[String],
        project_root: &Path,
    ) -> Result<Option<RawToolOutput>, VerifierInfrastructureError>;
}

/// Default adapter: shells out to the configured [`ToolTable`] commands
/// under a per-tier timeout budget.
pub struct SubprocessAdapter {
    pub tools: ToolTable,
}

impl SubprocessAdapter {
    pub fn new(tools: ToolTable) -> Self {
        Self { tools }
    }

    async fn run_command(
        &self,
        cmd: &ToolCommand,
        extra_args: &[String],
        project_root: &Path,
        tier: Tier,
    ) -> Result<RawToolOutput, VerifierInfrastructureError> {
        let mut command = Command::new(&cmd.program);
        command
            .args(&cmd.args)
            .args(extra_args)
            .current_dir(project_root)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let budget = Duration::from_secs(tier.budget_secs());
        let spawned = command.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                VerifierInfrastructureError::CommandMissing {
                    command: cmd.program.clone(),
                }
            } else {
                VerifierInfrastructureError::ToolCrashed { detail: e.to_string() }
            }
        })?;

        let outcome = tokio::time::timeout(budget, spawned.wait_with_output()).await;
        match outcome {
            Ok(Ok(output)) => Ok(RawToolOutput {
                exit_code: output.status.code().unwrap_or(-1),
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            }),
            Ok(Err(e)) => Err(VerifierInfrastructureError::ToolCrashed { detail: e.to_string() }),
            Err(_) => Err(VerifierInfrastructureError::Timeout {
                tier: tier.to_string(),
                budget_secs: tier.budget_secs(),
            }),
        }
    }
}

#[async_trait]
impl VerifierAdapter for SubprocessAdapter {
    async fn run_lint(
        &self,
        changed_files: &[PathBuf],
        project_root: &Path,
    ) -> Result<Option<RawToolOutput>, VerifierInfrastructureError> {
        let Some(cmd) = &self.tools.lint else { return Ok(None) };
        let extra: Vec<String> = changed_files.iter().map(|p| p.display().to_string()).collect();
        self.run_command(cmd, &extra, project_root, Tier::Lint).await.map(Some)
    }

    async fn run_typecheck(
        &self,
        changed_files: &[PathBuf],
        project_root: &Path,
    ) -> Result<Option<RawToolOutput>, VerifierInfrastructureError> {
        let Some(cmd) = &self.tools.typecheck else { return Ok(None) };
        let extra: Vec<String> = changed_files.iter().map(|p| p.display().to_string()).collect();
        self.run_command(cmd, &extra, project_root, Tier::Typecheck).await.map(Some)
    }

    async fn run_tests(
        &self,
        selectors: &[String],
        project_root: &Path,
    ) -> Result<Option<RawToolOutput>, VerifierInfrastructureError> {
        let Some(cmd) = &self.tools.test else { return Ok(None) };
        self.run_command(cmd, selectors, project_root, Tier::Test).await.map(Some)
    }
}

/// Matches `path:line: message` or `path:line:col: message`, the common
/// shape for lint/typecheck tool output.
fn diagnostic_regex() -> Regex {
    Regex::new(r"^(?P<file>[^:\n]+):(?P<line>\d+)(?::\d+)?:\s*(?P<message>.+)$").expect("valid regex")
}

fn parse_lint_errors(output: &RawToolOutput) -> (Vec<LintError>, bool) {
    let re = diagnostic_regex();
    let mut errors = Vec::new();
    let mut any_line_matched = false;
    for line in output.stdout.lines().chain(output.stderr.lines()) {
        if let Some(caps) = re.captures(line) {
            any_line_matched = true;
            let message = caps["message"].to_string();
            let rule = message
                .rsplit_once('[')
                .and_then(|(_, tail)| tail.strip_suffix(']'))
                .unwrap_or("unspecified")
                .to_string();
            errors.push(LintError {
                file: caps["file"].to_string(),
                line: caps["line"].parse().unwrap_or(0),
                rule,
                message,
            });
        }
    }
    (errors, any_line_matched)
}

fn parse_type_errors(output: &RawToolOutput) -> (Vec<TypeError>, bool) {
    let re = diagnostic_regex();
    let mut errors = Vec::new();
    let mut any_line_matched = false;
    for line in output.stdout.lines().chain(output.stderr.lines()) {
        if let Some(caps) = re.captures(line) {
            any_line_matched = true;
            errors.push(TypeError {
                file: caps["file"].to_string(),
                line: caps["line"].parse().unwrap_or(0),
                message: caps["message"].to_string(),
            });
        }
    }
    (errors, any_line_matched)
}

/// Test-failure lines look like `FAILED module::selector - message`.
fn parse_test_failures(output: &RawToolOutput) -> (Vec<TestFailure>, bool) {
    let re = Regex::new(r"^FAILED\s+(?P<selector>\S+)\s*-?\s*(?P<message>.*)$").expect("valid regex");
    let mut failures = Vec::new();
    let mut any_line_matched = false;
    for line in output.stdout.lines().chain(output.stderr.lines()) {
        if let Some(caps) = re.captures(line) {
            any_line_matched = true;
            failures.push(TestFailure {
                selector: caps["selector"].to_string(),
                message: caps["message"].to_string(),
            });
        }
    }
    (failures, any_line_matched)
}

/// Drives the three tiers over a changed-file set, failing fast on the
/// first non-PASS tier (§4.5).
pub struct FastVerifier<A: VerifierAdapter> {
    adapter: A,
}

impl<A: VerifierAdapter> FastVerifier<A> {
    pub fn new(adapter: A) -> Self {
        Self { adapter }
    }

    pub async fn run(
        &self,
        changed_files: &[PathBuf],
        project_root: &Path,
        test_selectors: &[String],
    ) -> VerifyResult {
        if let Some(result) = self.guardrail_scan(changed_files, project_root) {
            return result;
        }

        match self.adapter.run_lint(changed_files, project_root).await {
            Ok(Some(output)) => {
                let (lint_errors, matched) = parse_lint_errors(&output);
                if !output.success() && !matched {
                    warn!("lint tool produced unrecognized output format");
                    return VerifyResult::blocked(format!(
                        "infrastructure: unrecognized lint output: {}",
                        truncate(&output.stdout, &output.stderr)
                    ));
                }
                if !lint_errors.is_empty() {
                    return VerifyResult {
                        status: Verdict::Fail,
                        reason: "lint errors present".to_string(),
                        lint_errors,
                        type_errors: Vec::new(),
                        test_failures: Vec::new(),
                        has_guardrails: false,
                        guardrail_hits: Vec::new(),
                    };
                }
            }
            Ok(None) => info!("no lint command configured, skipping tier"),
            Err(VerifierInfrastructureError::Timeout { tier, budget_secs }) => {
                return VerifyResult {
                    status: Verdict::Fail,
                    reason: format!("timeout: {tier} exceeded {budget_secs}s"),
                    lint_errors: Vec::new(),
                    type_errors: Vec::new(),
                    test_failures: Vec::new(),
                    has_guardrails: false,
                    guardrail_hits: Vec::new(),
                }
            }
            Err(e) => return VerifyResult::blocked(format!("infrastructure: {e}")),
        }

        match self.adapter.run_typecheck(changed_files, project_root).await {
            Ok(Some(output)) => {
                let (type_errors, matched) = parse_type_errors(&output);
                if !output.success() && !matched {
                    return VerifyResult::blocked(format!(
                        "infrastructure: unrecognized typecheck output: {}",
                        truncate(&output.stdout, &output.stderr)
                    ));
                }
                if !type_errors.is_empty() {
                    return VerifyResult {
                        status: Verdict::Fail,
                        reason: "type errors present".to_string(),
                        lint_errors: Vec::new(),
                        type_errors,
                        test_failures: Vec::new(),
                        has_guardrails: false,
                        guardrail_hits: Vec::new(),
                    };
                }
            }
            Ok(None) => info!("no typecheck command configured, skipping tier"),
            Err(VerifierInfrastructureError::Timeout { tier, budget_secs }) => {
                return VerifyResult {
                    status: Verdict::Fail,
                    reason: format!("timeout: {tier} exceeded {budget_secs}s"),
                    lint_errors: Vec::new(),
                    type_errors: Vec::new(),
                    test_failures: Vec::new(),
                    has_guardrails: false,
                    guardrail_hits: Vec::new(),
                }
            }
            Err(e) => return VerifyResult::blocked(format!("infrastructure: {e}")),
        }

        match self.adapter.run_tests(test_selectors, project_root).await {
            Ok(Some(output)) => {
                let (test_failures, matched) = parse_test_failures(&output);
                if !output.success() && !matched {
                    return VerifyResult::blocked(format!(
                        "infrastructure: unrecognized test output: {}",
                        truncate(&output.stdout, &output.stderr)
                    ));
                }
                if !test_failures.is_empty() {
                    return VerifyResult {
                        status: Verdict::Fail,
                        reason: "test failures present".to_string(),
                        lint_errors: Vec::new(),
                        type_errors: Vec::new(),
                        test_failures,
                        has_guardrails: false,
                        guardrail_hits: Vec::new(),
                    };
                }
            }
            Ok(None) => info!("no test command configured, skipping tier"),
            Err(VerifierInfrastructureError::Timeout { tier, budget_secs }) => {
                return VerifyResult {
                    status: Verdict::Fail,
                    reason: format!("timeout: {tier} exceeded {budget_secs}s"),
                    lint_errors: Vec::new(),
                    type_errors: Vec::new(),
                    test_failures: Vec::new(),
                    has_guardrails: false,
                    guardrail_hits: Vec::new(),
                }
            }
            Err(e) => return VerifyResult::blocked(format!("infrastructure: {e}")),
        }

        VerifyResult::pass()
    }

    fn guardrail_scan(&self, changed_files: &[PathBuf], project_root: &Path) -> Option<VerifyResult> {
        let mut contents: Vec<(String, String)> = Vec::new();
        for file in changed_files {
            let full = project_root.join(file);
            if let Ok(text) = std::fs::read_to_string(&full) {
                contents.push((file.display().to_string(), text));
            }
        }
        let borrowed: Vec<(&str, &str)> = contents.iter().map(|(f, t)| (f.as_str(), t.as_str())).collect();
        let hits = scan_files(borrowed);
        if hits.is_empty() {
            return None;
        }
        let reason = format!("guardrail: {}", hits[0].category);
        Some(VerifyResult {
            status: Verdict::Blocked,
            reason,
            lint_errors: Vec::new(),
            type_errors: Vec::new(),
            test_failures: Vec::new(),
            has_guardrails: true,
            guardrail_hits: hits,
        })
    }
}

fn truncate(stdout: &str, stderr: &str) -> String {
    let combined = format!("{stdout}{stderr}");
    combined.chars().take(200).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FakeAdapter {
        lint: Mutex<Option<Result<Option<RawToolOutput>, VerifierInfrastructureError>>>,
        typecheck: Mutex<Option<Result<Option<RawToolOutput>, VerifierInfrastructureError>>>,
        test: Mutex<Option<Result<Option<RawToolOutput>, VerifierInfrastructureError>>>,
    }

    impl FakeAdapter {
        fn all_pass() -> Self {
            Self {
                lint: Mutex::new(Some(Ok(None))),
                typecheck: Mutex::new(Some(Ok(None))),
                test: Mutex::new(Some(Ok(None))),
            }
        }
    }

    fn clean_output() -> RawToolOutput {
        RawToolOutput {
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    #[async_trait]
    impl VerifierAdapter for FakeAdapter {
        async fn run_lint(
            &self,
            _changed_files: &[PathBuf],
            _project_root: &Path,
        ) -> Result<Option<RawToolOutput>, VerifierInfrastructureError> {
            self.lint.lock().unwrap().take().unwrap_or(Ok(Some(clean_output())))
        }
        async fn run_typecheck(
            &self,
            _changed_files: &[PathBuf],
            _project_root: &Path,
        ) -> Result<Option<RawToolOutput>, VerifierInfrastructureError> {
            self.typecheck.lock().unwrap().take().unwrap_or(Ok(Some(clean_output())))
        }
        async fn run_tests(
            &self,
            _selectors: &[String],
            _project_root: &Path,
        ) -> Result<Option<RawToolOutput>, VerifierInfrastructureError> {
            self.test.lock().unwrap().take().unwrap_or(Ok(Some(clean_output())))
        }
    }

    #[tokio::test]
    async fn all_tiers_skipped_yields_pass() {
        let verifier = FastVerifier::new(FakeAdapter::all_pass());
        let result = verifier.run(&[], Path::new("."), &[]).await;
        assert_eq!(result.status, Verdict::Pass);
    }

    #[tokio::test]
    async fn lint_errors_yield_fail_and_skip_later_tiers() {
        let adapter = FakeAdapter {
            lint: Mutex::new(Some(Ok(Some(RawToolOutput {
                exit_code: 1,
                stdout: "src/a.rs:10: unused variable [unused_variables]\n".to_string(),
                stderr: String::new(),
            })))),
            typecheck: Mutex::new(None),
            test: Mutex::new(None),
        };
        let verifier = FastVerifier::new(adapter);
        let result = verifier.run(&[], Path::new("."), &[]).await;
        assert_eq!(result.status, Verdict::Fail);
        assert_eq!(result.lint_errors.len(), 1);
        assert_eq!(result.lint_errors[0].rule, "unused_variables");
    }

    #[tokio::test]
    async fn unrecognized_lint_output_is_blocked() {
        let adapter = FakeAdapter {
            lint: Mutex::new(Some(Ok(Some(RawToolOutput {
                exit_code: 2,
                stdout: "totally unparseable garbage".to_string(),
                stderr: String::new(),
            })))),
            typecheck: Mutex::new(None),
            test: Mutex::new(None),
        };
        let verifier = FastVerifier::new(adapter);
        let result = verifier.run(&[], Path::new("."), &[]).await;
        assert_eq!(result.status, Verdict::Blocked);
    }

    #[tokio::test]
    async fn missing_command_is_blocked_infrastructure() {
        let adapter = FakeAdapter {
            lint: Mutex::new(Some(Err(VerifierInfrastructureError::CommandMissing {
                command: "eslint".to_string(),
            }))),
            typecheck: Mutex::new(None),
            test: Mutex::new(None),
        };
        let verifier = FastVerifier::new(adapter);
        let result = verifier.run(&[], Path::new("."), &[]).await;
        assert_eq!(result.status, Verdict::Blocked);
        assert!(result.reason.contains("infrastructure"));
    }

    #[tokio::test]
    async fn timeout_is_fail_not_blocked() {
        let adapter = FakeAdapter {
            lint: Mutex::new(Some(Err(VerifierInfrastructureError::Timeout {
                tier: "lint".to_string(),
                budget_secs: 5,
            }))),
            typecheck: Mutex::new(None),
            test: Mutex::new(None),
        };
        let verifier = FastVerifier::new(adapter);
        let result = verifier.run(&[], Path::new("."), &[]).await;
        assert_eq!(result.status, Verdict::Fail);
        assert!(result.reason.contains("timeout"));
    }

    #[tokio::test]
    async fn type_errors_surface_when_lint_clean() {
        let adapter = FakeAdapter {
            lint: Mutex::new(Some(Ok(Some(clean_output())))),
            typecheck: Mutex::new(Some(Ok(Some(RawToolOutput {
                exit_code: 1,
                stdout: "src/b.rs:4: mismatched types\n".to_string(),
                stderr: String::new(),
            })))),
            test: Mutex::new(None),
        };
        let verifier = FastVerifier::new(adapter);
        let result = verifier.run(&[], Path::new("."), &[]).await;
        assert_eq!(result.status, Verdict::Fail);
        assert_eq!(result.type_errors.len(), 1);
    }

    #[tokio::test]
    async fn test_failures_surface_when_earlier_tiers_clean() {
        let adapter = FakeAdapter {
            lint: Mutex::new(Some(Ok(Some(clean_output())))),
            typecheck: Mutex::new(Some(Ok(Some(clean_output())))),
            test: Mutex::new(Some(Ok(Some(RawToolOutput {
                exit_code: 1,
                stdout: "FAILED tests::b_test::ok - assertion failed\n".to_string(),
                stderr: String::new(),
            })))),
        };
        let verifier = FastVerifier::new(adapter);
        let result = verifier.run(&[], Path::new("."), &[]).await;
        assert_eq!(result.status, Verdict::Fail);
        assert_eq!(result.test_failures.len(), 1);
        assert_eq!(result.test_failures[0].selector, "tests::b_test::ok");
    }

    #[test]
    fn guardrail_scan_blocks_before_any_tool_runs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.rs"), "#[ignore]\nfn test_x() {}\n").unwrap();
        let verifier = FastVerifier::new(FakeAdapter::all_pass());
        let result = tokio_test_block_on(verifier.run(&[PathBuf::from("a.rs")], dir.path(), &[]));
        assert_eq!(result.status, Verdict::Blocked);
        assert!(result.has_guardrails);
    }

    fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
            .block_on(f)
    }

    #[test]
    fn verdict_composition_dominance() {
        assert_eq!(Verdict::Pass.compose(Verdict::Fail), Verdict::Fail);
        assert_eq!(Verdict::Fail.compose(Verdict::Blocked), Verdict::Blocked);
        assert_eq!(Verdict::Pass.compose(Verdict::Pass), Verdict::Pass);
    }
}
