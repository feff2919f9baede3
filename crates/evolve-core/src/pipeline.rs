//! Aggregate result of running a `Pipeline` (`evolve-pipeline`) end to end.

use serde::{Deserialize, Serialize};

use crate::swarm::{SwarmResult, SwarmResultList};

/// Summary of one completed pipeline step.
#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
pub struct StepResult {
    /// Step position, zero-based.
    pub index: usize,
    /// The step's operator name (`"map"`, `"filter"`, `"reduce"`).
    pub name: String,
    /// Wall-clock duration of the step.
    pub duration_ms: u64,
    /// Count of successful units.
    pub success_count: usize,
    /// Count of units rejected by a filter predicate.
    pub filtered_count: usize,
    /// Count of failed units.
    pub error_count: usize,
}

/// What a pipeline run produced: the last non-terminal step's per-item
/// results, or (when the chain ends in a terminating `reduce`) that
/// reduce's single result.
#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(bound = "S: Serialize + for<'de2> Deserialize<'de2>")]
pub enum PipelineOutput<S> {
    /// The final step was `map`/`filter`: one result per surviving item.
    Items(SwarmResultList<S>),
    /// The final step was a terminating `reduce`: a single result.
    Reduced(SwarmResult<S>),
}

/// The outcome of a complete `Pipeline::run` call.
#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(bound = "S: Serialize + for<'de2> Deserialize<'de2>")]
pub struct PipelineResult<S> {
    /// 16 hex character id, shared by every unit scheduled in this run.
    pub pipeline_run_id: String,
    /// Per-step summaries, in execution order.
    pub steps: Vec<StepResult>,
    /// Total wall-clock duration across all steps.
    pub total_duration_ms: u64,
    /// The pipeline's final output.
    pub output: PipelineOutput<S>,
}
