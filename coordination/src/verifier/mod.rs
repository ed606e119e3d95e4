//! C5 — Fast Verifier: tri-valued verdict pipeline over changed files
//! (lint → type → targeted tests), §4.5.

mod guardrails;
mod pipeline;
mod types;

pub use guardrails::{scan_files, scan_text};
pub use pipeline::{FastVerifier, RawToolOutput, SubprocessAdapter, ToolCommand, ToolTable, VerifierAdapter};
pub use types::{
    GuardrailCategory, GuardrailHit, LintError, Tier, TestFailure, TypeError, Verdict, VerifyResult,
};
