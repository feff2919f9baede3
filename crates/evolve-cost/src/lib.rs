#![warn(missing_docs)]
//! Query contract for run/session cost accounting.
//!
//! The accounting system lives outside this process (a gateway-side
//! ledger); this crate only defines the client seam the Session
//! Controller calls through. No concrete transport is implemented here,
//! mirroring [`evolve_capability`]'s treatment of the sandbox/agent seams.

use async_trait::async_trait;
use evolve_core::{RunCost, SessionCost};
use evolve_error::{EvolveError, Result};
use uuid::Uuid;

/// Selects a single run's cost record by id or by position.
///
/// Exactly one of the two must be set; [`RunLookup::validate`] enforces
/// this before a client implementation is asked to resolve it.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunLookup {
    /// Look up by run id.
    pub run_id: Option<Uuid>,
    /// 1-based position within the session; negative values count from
    /// the end (`-1` is the most recent run).
    pub index: Option<i64>,
}

impl RunLookup {
    /// By id.
    pub fn by_id(run_id: Uuid) -> Self {
        RunLookup { run_id: Some(run_id), index: None }
    }

    /// By position (1-based, negative-from-end).
    pub fn by_index(index: i64) -> Self {
        RunLookup { run_id: None, index: Some(index) }
    }

    /// Reject a lookup specifying both or neither selector.
    pub fn validate(&self) -> Result<()> {
        match (self.run_id, self.index) {
            (Some(_), Some(_)) => Err(EvolveError::MutualExclusion("run_id and index")),
            (None, None) => Err(EvolveError::MutualExclusion("one of run_id or index is required")),
            _ => Ok(()),
        }
    }
}

/// Resolve `index` (1-based, negative-from-end) against a `total` count of
/// runs into a concrete 0-based offset, or `None` if out of range.
pub fn resolve_index(index: i64, total: usize) -> Option<usize> {
    if total == 0 {
        return None;
    }
    if index > 0 {
        let offset = (index - 1) as usize;
        (offset < total).then_some(offset)
    } else if index < 0 {
        let from_end = (-index) as usize;
        (from_end <= total).then_some(total - from_end)
    } else {
        None
    }
}

/// Queries a session's run/token cost accounting.
#[async_trait]
pub trait CostClient: Send + Sync {
    /// Fetch the cost record for one run, by id or 1-based (possibly
    /// negative) index.
    async fn get_run_cost(&self, session_tag: &str, lookup: RunLookup) -> Result<RunCost>;

    /// Fetch the cost record for every run in the session so far.
    async fn get_session_cost(&self, session_tag: &str) -> Result<SessionCost>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_selectors_set_is_mutual_exclusion() {
        let lookup = RunLookup { run_id: Some(Uuid::nil()), index: Some(1) };
        assert!(lookup.validate().is_err());
    }

    #[test]
    fn neither_selector_set_is_mutual_exclusion() {
        assert!(RunLookup::default().validate().is_err());
    }

    #[test]
    fn positive_index_is_one_based() {
        assert_eq!(resolve_index(1, 3), Some(0));
        assert_eq!(resolve_index(3, 3), Some(2));
        assert_eq!(resolve_index(4, 3), None);
    }

    #[test]
    fn negative_index_counts_from_end() {
        assert_eq!(resolve_index(-1, 3), Some(2));
        assert_eq!(resolve_index(-3, 3), Some(0));
        assert_eq!(resolve_index(-4, 3), None);
    }

    #[test]
    fn zero_index_is_invalid() {
        assert_eq!(resolve_index(0, 3), None);
    }
}
