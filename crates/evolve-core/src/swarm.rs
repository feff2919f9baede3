//! Per-unit result types returned by the composition operators.

use serde::{Deserialize, Serialize};

use crate::files::FileMap;
use crate::meta::BaseMeta;
use crate::verify::VerifyDecision;

/// The outcome category of one scheduled unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum SwarmStatus {
    /// The unit produced a usable result.
    Success,
    /// A `filter` predicate rejected the result locally.
    Filtered,
    /// The unit failed (schema validation, verify/retry exhaustion, or an
    /// infrastructural error recovered at the operator boundary).
    Error,
}

/// Bookkeeping attached by the `verify` decorator.
#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
pub struct VerifyInfo {
    /// The final verifier decision.
    pub passed: bool,
    /// The final verifier's reasoning.
    pub reasoning: String,
    /// Total attempts taken, including the first.
    pub attempts: u32,
    /// Metadata for the final verifier unit.
    pub verify_meta: BaseMeta,
}

/// Bookkeeping attached by `best_of`.
#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
pub struct BestOfInfo {
    /// Index of the winning candidate.
    pub winner_index: usize,
    /// The judge's reasoning for the choice.
    pub judge_reasoning: String,
    /// Metadata for the judge unit.
    pub judge_meta: BaseMeta,
}

/// The result of a single `map`/`filter`/`reduce`/`best_of` unit.
#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(bound = "S: Serialize + for<'de2> Deserialize<'de2>")]
pub struct SwarmResult<S> {
    /// Success, filtered, or error.
    pub status: SwarmStatus,
    /// The schema-validated payload, present only on `Success`.
    pub data: Option<S>,
    /// Files collected from the unit's `output/` directory.
    pub files: FileMap,
    /// The sandbox that ran this unit, if one was created.
    pub sandbox_id: Option<String>,
    /// Error message, present only on `Error`.
    pub error: Option<String>,
    /// Raw unparsed output, present on schema validation failure.
    pub raw_data: Option<String>,
    /// Observability metadata for this unit.
    pub meta: BaseMeta,
    /// Present when a `verify` decorator ran.
    pub verify: Option<VerifyInfo>,
    /// Present when this result is the outcome of a `best_of` call.
    pub best_of: Option<BestOfInfo>,
}

impl<S> SwarmResult<S> {
    /// Build a successful result.
    pub fn success(data: S, files: FileMap, sandbox_id: Option<String>, meta: BaseMeta) -> Self {
        SwarmResult {
            status: SwarmStatus::Success,
            data: Some(data),
            files,
            sandbox_id,
            error: None,
            raw_data: None,
            meta,
            verify: None,
            best_of: None,
        }
    }

    /// Build an error result.
    pub fn error(error: impl Into<String>, meta: BaseMeta) -> Self {
        SwarmResult {
            status: SwarmStatus::Error,
            data: None,
            files: FileMap::new(),
            sandbox_id: None,
            error: Some(error.into()),
            raw_data: None,
            meta,
            verify: None,
            best_of: None,
        }
    }

    /// Mark a successful result as filtered out by a `filter` predicate.
    pub fn into_filtered(mut self) -> Self {
        self.status = SwarmStatus::Filtered;
        self
    }

    /// Attach verify bookkeeping, builder-style.
    pub fn with_verify(mut self, info: VerifyInfo) -> Self {
        self.verify = Some(info);
        self
    }

    /// Attach best-of bookkeeping, builder-style.
    pub fn with_best_of(mut self, info: BestOfInfo) -> Self {
        self.best_of = Some(info);
        self
    }

    /// Record the verifier's decision into `VerifyDecision`-shaped feedback,
    /// for building up `VerifyInfo` outside this crate.
    pub fn from_verify_decision(decision: &VerifyDecision, attempts: u32, verify_meta: BaseMeta) -> VerifyInfo {
        VerifyInfo {
            passed: decision.passed,
            reasoning: decision.reasoning.clone(),
            attempts,
            verify_meta,
        }
    }
}

/// A list of per-item results from one `map`/`filter`/`best_of` call, in
/// input order.
#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(bound = "S: Serialize + for<'de2> Deserialize<'de2>")]
pub struct SwarmResultList<S> {
    /// One result per input item, in input order.
    pub results: Vec<SwarmResult<S>>,
}

impl<S> SwarmResultList<S> {
    /// Results whose status is `Success`.
    pub fn success(&self) -> Vec<&SwarmResult<S>> {
        self.results.iter().filter(|r| r.status == SwarmStatus::Success).collect()
    }

    /// Results whose status is `Filtered`.
    pub fn filtered(&self) -> Vec<&SwarmResult<S>> {
        self.results.iter().filter(|r| r.status == SwarmStatus::Filtered).collect()
    }

    /// Results whose status is `Error`.
    pub fn errors(&self) -> Vec<&SwarmResult<S>> {
        self.results.iter().filter(|r| r.status == SwarmStatus::Error).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::{Operation, OperatorRole};

    fn meta() -> BaseMeta {
        BaseMeta::new("abc", Operation::Map, OperatorRole::Worker)
    }

    #[test]
    fn success_then_into_filtered_changes_only_status() {
        let result = SwarmResult::success(1u32, FileMap::new(), None, meta()).into_filtered();
        assert_eq!(result.status, SwarmStatus::Filtered);
        assert_eq!(result.data, Some(1));
    }

    #[test]
    fn partition_helpers_split_by_status() {
        let list = SwarmResultList {
            results: vec![
                SwarmResult::success(1u32, FileMap::new(), None, meta()),
                SwarmResult::success(2u32, FileMap::new(), None, meta()).into_filtered(),
                SwarmResult::error("boom", meta()),
            ],
        };
        assert_eq!(list.success().len(), 1);
        assert_eq!(list.filtered().len(), 1);
        assert_eq!(list.errors().len(), 1);
    }
}
