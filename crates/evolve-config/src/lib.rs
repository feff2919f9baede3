#![warn(missing_docs)]
//! Layered, eagerly validated configuration for swarms and composition
//! operators.
//!
//! Conflicting options (most importantly `verify` + `best_of`) are rejected
//! at construction time through [`OperatorOptions::new`], never discovered
//! lazily mid-run.

use evolve_core::AgentType;
use evolve_error::{EvolveError, Result};

/// Configuration for a swarm's shared concurrency bound.
#[derive(Debug, Clone)]
pub struct SwarmConfig {
    /// Maximum concurrent units across every operator scheduled on this
    /// swarm.
    pub permits: usize,
    /// Caller-supplied name, propagated into every unit's
    /// `meta.swarm_name`.
    pub name: Option<String>,
    /// Skills granted to a unit when neither the operator call nor its
    /// `VerifyConfig`/`BestOfConfig` specify any, the lowest tier of the
    /// skills priority chain.
    pub default_skills: Vec<String>,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        SwarmConfig { permits: 4, name: None, default_skills: Vec::new() }
    }
}

impl SwarmConfig {
    /// Validate the configuration, rejecting zero permits.
    pub fn validate(&self) -> Result<()> {
        if self.permits == 0 {
            return Err(EvolveError::Internal("swarm permits must be at least 1".into()));
        }
        Ok(())
    }
}

/// Configuration for the `verify` decorator.
#[derive(Debug, Clone)]
pub struct VerifyConfig {
    /// Maximum attempts, including the first, before the decorator gives up
    /// and surfaces `status = "error"`.
    pub max_attempts: u32,
    /// Agent family the verifier runs under, defaulting to the worker's.
    pub agent: Option<AgentType>,
    /// Skills granted to the verifier.
    pub skills: Vec<String>,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        VerifyConfig { max_attempts: 2, agent: None, skills: Vec::new() }
    }
}

/// Configuration for `best_of`.
#[derive(Debug, Clone)]
pub struct BestOfConfig {
    /// Number of independent candidates to generate.
    pub n: usize,
    /// Criteria the judge uses to pick a winner.
    pub judge_criteria: String,
    /// Agent family the judge runs under, defaulting to the worker's.
    pub judge_agent: Option<AgentType>,
    /// Skills granted to candidates.
    pub skills: Vec<String>,
    /// Skills granted to the judge; resolved with priority
    /// `judge_skills > skills` when both are set.
    pub judge_skills: Vec<String>,
}

impl BestOfConfig {
    /// Validate the configuration, rejecting fewer than two candidates.
    pub fn validate(&self) -> Result<()> {
        if self.n < 2 {
            return Err(EvolveError::Internal("best_of requires at least 2 candidates".into()));
        }
        Ok(())
    }

    /// Resolve the judge's effective skill set: `judge_skills` if
    /// non-empty, else `skills`.
    pub fn effective_judge_skills(&self) -> &[String] {
        if self.judge_skills.is_empty() {
            &self.skills
        } else {
            &self.judge_skills
        }
    }
}

/// The combined, validated option set for one operator call.
///
/// `verify` and `best_of` are mutually exclusive; constructing this with
/// both set fails immediately, before any unit is scheduled.
#[derive(Debug, Clone, Default)]
pub struct OperatorOptions {
    /// Retry policy applied around each worker/candidate attempt.
    pub retry: Option<evolve_retry::RetryConfig>,
    /// Verify decorator configuration.
    pub verify: Option<VerifyConfig>,
    /// `best_of` configuration.
    pub best_of: Option<BestOfConfig>,
    /// Caller-supplied name for this operator call, propagated into
    /// `meta.operation_name`.
    pub operation_name: Option<String>,
    /// Skills granted to this call's workers/candidates, the middle tier
    /// of the skills priority chain (below `best_of.skills`, above the
    /// swarm's `default_skills`).
    pub skills: Vec<String>,
}

impl OperatorOptions {
    /// Build and validate an option set, enforcing the verify/best_of
    /// mutual exclusion.
    pub fn new(
        retry: Option<evolve_retry::RetryConfig>,
        verify: Option<VerifyConfig>,
        best_of: Option<BestOfConfig>,
        operation_name: Option<String>,
    ) -> Result<Self> {
        Self::with_skills(retry, verify, best_of, operation_name, Vec::new())
    }

    /// Build and validate an option set, additionally setting the
    /// operator-level `skills` tier.
    pub fn with_skills(
        retry: Option<evolve_retry::RetryConfig>,
        verify: Option<VerifyConfig>,
        best_of: Option<BestOfConfig>,
        operation_name: Option<String>,
        skills: Vec<String>,
    ) -> Result<Self> {
        if verify.is_some() && best_of.is_some() {
            return Err(EvolveError::MutualExclusion("verify and best_of cannot both be set"));
        }
        if let Some(cfg) = &best_of {
            cfg.validate()?;
        }
        Ok(OperatorOptions { retry, verify, best_of, operation_name, skills })
    }
}

/// Resolve a priority-ordered chain of skill tiers: the first non-empty
/// tier wins, from highest to lowest priority. Matches the
/// `judge_skills > skills > operator skills > swarm default` chain.
pub fn resolve_skills<'a>(tiers: &[&'a [String]]) -> &'a [String] {
    tiers.iter().copied().find(|tier| !tier.is_empty()).unwrap_or(&[])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_and_best_of_together_is_mutual_exclusion() {
        let err = OperatorOptions::new(
            None,
            Some(VerifyConfig::default()),
            Some(BestOfConfig {
                n: 3,
                judge_criteria: "pick the best".into(),
                judge_agent: None,
                skills: Vec::new(),
                judge_skills: Vec::new(),
            }),
            None,
        )
        .unwrap_err();
        assert_eq!(err.kind(), evolve_error::ErrorKind::MutualExclusion);
    }

    #[test]
    fn best_of_with_fewer_than_two_candidates_is_rejected() {
        let cfg = BestOfConfig {
            n: 1,
            judge_criteria: "x".into(),
            judge_agent: None,
            skills: Vec::new(),
            judge_skills: Vec::new(),
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn judge_skills_fall_back_to_candidate_skills() {
        let cfg = BestOfConfig {
            n: 3,
            judge_criteria: "x".into(),
            judge_agent: None,
            skills: vec!["pdf".into()],
            judge_skills: Vec::new(),
        };
        assert_eq!(cfg.effective_judge_skills(), &["pdf".to_string()]);
    }

    #[test]
    fn swarm_config_rejects_zero_permits() {
        let cfg = SwarmConfig { permits: 0, name: None, default_skills: Vec::new() };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn resolve_skills_picks_first_non_empty_tier() {
        let judge: Vec<String> = vec![];
        let candidate = vec!["pdf".to_string()];
        let operator = vec!["dev-browser".to_string()];
        let swarm_default: Vec<String> = vec![];
        let resolved = resolve_skills(&[&judge, &candidate, &operator, &swarm_default]);
        assert_eq!(resolved, &["pdf".to_string()]);
    }

    #[test]
    fn resolve_skills_falls_back_to_swarm_default() {
        let empty: Vec<String> = vec![];
        let swarm_default = vec!["repl".to_string()];
        let resolved = resolve_skills(&[&empty, &empty, &empty, &swarm_default]);
        assert_eq!(resolved, &["repl".to_string()]);
    }
}
