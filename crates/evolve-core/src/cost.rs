//! Cost/token attribution records queried from an external accounting
//! system.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Cost attribution for a single run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct RunCost {
    /// The run this record describes, when it was a `run()` (not
    /// `execute_command()`).
    pub run_id: Option<Uuid>,
    /// 1-based position of the run within its session.
    pub index: i64,
    /// Total cost in USD attributed to this run.
    pub cost: f64,
    /// Model identifier used for this run.
    pub model: String,
    /// Number of LLM requests this run made.
    pub requests: u32,
    /// Whether accounting has fully flushed for this run (accounting
    /// systems typically batch with ~60s delay).
    pub is_complete: bool,
    /// Whether this record's request list was truncated by a pagination
    /// cap.
    pub truncated: bool,
}

/// Cost attribution across an entire session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct SessionCost {
    /// Sum of `runs[].cost`. Only meaningful once `is_complete` is `true`.
    pub total_cost: f64,
    /// Per-run cost records, in chronological order.
    pub runs: Vec<RunCost>,
    /// `true` only when every run in `runs` has `is_complete = true`.
    pub is_complete: bool,
    /// Whether `runs` was truncated by a pagination cap.
    pub truncated: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_total_cost_sums_run_costs() {
        let runs = vec![
            RunCost { run_id: None, index: 1, cost: 0.01, model: "m".into(), requests: 1, is_complete: true, truncated: false },
            RunCost { run_id: None, index: 2, cost: 0.02, model: "m".into(), requests: 2, is_complete: true, truncated: false },
        ];
        let total: f64 = runs.iter().map(|r| r.cost).sum();
        let session = SessionCost { total_cost: total, runs, is_complete: true, truncated: false };
        assert!((session.total_cost - 0.03).abs() < 1e-9);
    }
}
