//! Observability metadata propagated through every unit scheduled by a
//! composition operator.

use serde::{Deserialize, Serialize};

/// Which composition operator produced a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// `map`
    Map,
    /// `filter`
    Filter,
    /// `reduce`
    Reduce,
    /// the `verify` decorator
    Verify,
    /// the `best_of` judge unit
    BestofJudge,
    /// a `best_of` candidate unit
    BestofCandidate,
}

/// The role a single scheduled unit plays within its operator call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum OperatorRole {
    /// A `map`/`filter`/`reduce` worker.
    Worker,
    /// A `verify` decorator unit.
    Verifier,
    /// A `best_of` candidate.
    Candidate,
    /// A `best_of` judge.
    Judge,
}

/// Identifiers shared by every unit scheduled within one operator call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct BaseMeta {
    /// 16 hex character id, identical for every unit of one operator call.
    pub operation_id: String,
    /// Which operator scheduled this unit.
    pub operation: Operation,
    /// This unit's role within the operator call.
    pub role: OperatorRole,
    /// Index of the input item this unit processed, for `map`/`filter`.
    pub item_index: Option<usize>,
    /// Index of the candidate within a `best_of` call.
    pub candidate_index: Option<usize>,
    /// Number of retry-executor attempts that preceded this unit's result.
    pub error_retry: Option<u32>,
    /// Number of verifier rejections that preceded this unit's result.
    pub verify_retry: Option<u32>,
    /// Caller-supplied name for the swarm, if any.
    pub swarm_name: Option<String>,
    /// Caller-supplied name for this particular operator call, if any.
    pub operation_name: Option<String>,
    /// Present when this unit was scheduled as part of a pipeline run.
    pub pipeline_run_id: Option<String>,
    /// This unit's step position within its pipeline, if any.
    pub pipeline_step_index: Option<usize>,
}

impl BaseMeta {
    /// Start a fresh meta for a new operator call, with `operation_id`
    /// minted by the caller (normally `evolve_core::random_hex_id()`).
    pub fn new(operation_id: impl Into<String>, operation: Operation, role: OperatorRole) -> Self {
        BaseMeta {
            operation_id: operation_id.into(),
            operation,
            role,
            item_index: None,
            candidate_index: None,
            error_retry: None,
            verify_retry: None,
            swarm_name: None,
            operation_name: None,
            pipeline_run_id: None,
            pipeline_step_index: None,
        }
    }

    /// Set the input item index, builder-style.
    pub fn with_item_index(mut self, index: usize) -> Self {
        self.item_index = Some(index);
        self
    }

    /// Set the candidate index, builder-style.
    pub fn with_candidate_index(mut self, index: usize) -> Self {
        self.candidate_index = Some(index);
        self
    }

    /// Record how many retry-executor attempts preceded this result.
    pub fn with_error_retry(mut self, count: u32) -> Self {
        self.error_retry = Some(count);
        self
    }

    /// Record how many verifier rejections preceded this result.
    pub fn with_verify_retry(mut self, count: u32) -> Self {
        self.verify_retry = Some(count);
        self
    }

    /// Thread pipeline identifiers through, builder-style.
    pub fn with_pipeline(mut self, pipeline_run_id: impl Into<String>, step_index: usize) -> Self {
        self.pipeline_run_id = Some(pipeline_run_id.into());
        self.pipeline_step_index = Some(step_index);
        self
    }
}

/// A worker unit's metadata: a thin, named alias of [`BaseMeta`].
pub type WorkerMeta = BaseMeta;
/// A verifier unit's metadata.
pub type VerifyMeta = BaseMeta;
/// A `best_of` judge unit's metadata.
pub type JudgeMeta = BaseMeta;
/// A `reduce` unit's metadata.
pub type ReduceMeta = BaseMeta;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_methods_set_expected_fields() {
        let meta = BaseMeta::new("abc123", Operation::Map, OperatorRole::Worker)
            .with_item_index(2)
            .with_error_retry(1)
            .with_pipeline("run-1", 0);
        assert_eq!(meta.item_index, Some(2));
        assert_eq!(meta.error_retry, Some(1));
        assert_eq!(meta.pipeline_run_id.as_deref(), Some("run-1"));
        assert_eq!(meta.pipeline_step_index, Some(0));
    }
}
