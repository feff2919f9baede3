//! The verifier's judgement about a worker's output.

use serde::{Deserialize, Serialize};

/// A verifier's pass/fail judgement, with feedback for the next attempt.
#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
pub struct VerifyDecision {
    /// Whether the worker's output satisfies the verifier's criteria.
    pub passed: bool,
    /// The verifier's explanation for its decision.
    pub reasoning: String,
    /// Feedback to append to the worker's prompt on the next attempt, when
    /// `passed` is `false` and attempts remain.
    pub feedback: Option<String>,
}

impl VerifyDecision {
    /// Construct a passing decision.
    pub fn pass(reasoning: impl Into<String>) -> Self {
        VerifyDecision { passed: true, reasoning: reasoning.into(), feedback: None }
    }

    /// Construct a failing decision with feedback for the retry.
    pub fn fail(reasoning: impl Into<String>, feedback: impl Into<String>) -> Self {
        VerifyDecision { passed: false, reasoning: reasoning.into(), feedback: Some(feedback.into()) }
    }
}
