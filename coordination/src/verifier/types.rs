//! Verify Result data types (§3, §4.5).

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Pass,
    Fail,
    Blocked,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pass => "PASS",
            Self::Fail => "FAIL",
            Self::Blocked => "BLOCKED",
        };
        write!(f, "{s}")
    }
}

impl Verdict {
    /// BLOCKED dominates FAIL dominates PASS (§4.5 composition rule).
    pub fn compose(self, other: Verdict) -> Verdict {
        use Verdict::*;
        match (self, other) {
            (Blocked, _) | (_, Blocked) => Blocked,
            (Fail, _) | (_, Fail) => Fail,
            (Pass, Pass) => Pass,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Lint,
    Typecheck,
    Test,
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Lint => "lint",
            Self::Typecheck => "typecheck",
            Self::Test => "test",
        };
        write!(f, "{s}")
    }
}

impl Tier {
    /// Time budgets from §4.5.
    pub fn budget_secs(self) -> u64 {
        match self {
            Self::Lint => 5,
            Self::Typecheck => 30,
            Self::Test => 60,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LintError {
    pub file: String,
    pub line: u32,
    pub rule: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TypeError {
    pub file: String,
    pub line: u32,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TestFailure {
    pub selector: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GuardrailCategory {
    TestSkipMarker,
    VerificationBypass,
    CommittedSecret,
}

impl std::fmt::Display for GuardrailCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::TestSkipMarker => "test_skip_marker",
            Self::VerificationBypass => "verification_bypass",
            Self::CommittedSecret => "committed_secret",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GuardrailHit {
    pub category: GuardrailCategory,
    pub file: String,
    pub matched_text: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerifyResult {
    pub status: Verdict,
    pub reason: String,
    #[serde(default)]
    pub lint_errors: Vec<LintError>,
    #[serde(default)]
    pub type_errors: Vec<TypeError>,
    #[serde(default)]
    pub test_failures: Vec<TestFailure>,
    pub has_guardrails: bool,
    #[serde(default)]
    pub guardrail_hits: Vec<GuardrailHit>,
}

impl VerifyResult {
    pub fn pass() -> Self {
        Self {
            status: Verdict::Pass,
            reason: "all tiers clean".to_string(),
            lint_errors: Vec::new(),
            type_errors: Vec::new(),
            test_failures: Vec::new(),
            has_guardrails: false,
            guardrail_hits: Vec::new(),
        }
    }

    pub fn blocked(reason: impl Into<String>) -> Self {
        Self {
            status: Verdict::Blocked,
            reason: reason.into(),
            lint_errors: Vec::new(),
            type_errors: Vec::new(),
            test_failures: Vec::new(),
            has_guardrails: false,
            guardrail_hits: Vec::new(),
        }
    }

    /// A coarse signature used by the Stop Hook to detect "same error set
    /// twice in a row" (§4.6, rule 5) without requiring exact message
    /// equality across tool re-runs.
    pub fn failure_signature(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        parts.extend(self.lint_errors.iter().map(|e| format!("lint:{}:{}", e.file, e.rule)));
        parts.extend(self.type_errors.iter().map(|e| format!("type:{}:{}", e.file, e.line)));
        parts.extend(self.test_failures.iter().map(|e| format!("test:{}", e.selector)));
        parts.sort();
        parts.join("|")
    }
}
