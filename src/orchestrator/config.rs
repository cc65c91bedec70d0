//! Configuration for the orchestration engine.
//!
//! Follows the teacher's `config.rs` philosophy to the letter: a plain,
//! manually-constructed struct with a `Default` impl. No TOML/YAML/file
//! parsing dependency is introduced — callers build an
//! [`OrchestratorConfig`] however they like and pass it to
//! [`crate::orchestrator::orchestrator_engine::Orchestrator::new`].
//!
//! # Example
//!
//! ```rust
//! use aerocouncil::OrchestratorConfig;
//! use std::time::Duration;
//!
//! let config = OrchestratorConfig {
//!     per_agent_deadline: Duration::from_secs(30),
//!     ..OrchestratorConfig::default()
//! };
//! assert_eq!(config.per_agent_deadline, Duration::from_secs(30));
//! ```

use std::time::Duration;

/// Weights used by the Arbitrator's fixed weighted-sum scoring (§4.6 step 5).
/// Illustrative defaults from the specification.
#[derive(Debug, Clone, Copy)]
pub struct ScoringWeights {
    pub passenger_satisfaction: f64,
    pub cost_efficiency: f64,
    pub delay_reduction: f64,
    pub execution_reliability: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            passenger_satisfaction: 0.30,
            cost_efficiency: 0.25,
            delay_reduction: 0.25,
            execution_reliability: 0.20,
        }
    }
}

impl ScoringWeights {
    /// Weighted sum over predicted metrics (§4.6 step 5). Missing metrics
    /// contribute zero.
    pub fn score(&self, metrics: &std::collections::HashMap<String, f64>) -> f64 {
        let get = |key: &str| metrics.get(key).copied().unwrap_or(0.0);
        get("passenger_satisfaction") * self.passenger_satisfaction
            + get("cost_efficiency") * self.cost_efficiency
            + get("delay_reduction") * self.delay_reduction
            + get("execution_reliability") * self.execution_reliability
    }
}

/// Global configuration for one orchestration run (spec.md §6: `{ user_prompt,
/// optional timeouts and weights }`).
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Per-agent deadline (default 60s, §5).
    pub per_agent_deadline: Duration,
    /// Per-phase deadline (default 90s, §5).
    pub per_phase_deadline: Duration,
    /// Top-level wall-clock budget bounding the whole run (§4.7, §5).
    pub global_deadline: Duration,
    /// Scheduler slack tolerated before a deadline overrun is considered a
    /// bug (§8 property 6).
    pub deadline_slack: Duration,
    /// Maximum number of agents permitted to run concurrently within a
    /// phase (§4.4 bounded parallelism).
    pub max_concurrency: usize,
    /// Max tool-call-loop iterations per agent invocation (§4.2).
    pub max_tool_iterations: usize,
    pub scoring_weights: ScoringWeights,
    /// Canonical, declared ordering of agent-ids used wherever arbitration
    /// needs a deterministic iteration order (§4.4).
    pub agent_order: Vec<String>,
    /// Subset of `agent_order` authorized to emit binding constraints (§4.3).
    pub safety_subset: Vec<String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            per_agent_deadline: Duration::from_secs(60),
            per_phase_deadline: Duration::from_secs(90),
            global_deadline: Duration::from_secs(240),
            deadline_slack: Duration::from_millis(500),
            max_concurrency: 8,
            max_tool_iterations: 6,
            scoring_weights: ScoringWeights::default(),
            agent_order: Vec::new(),
            safety_subset: Vec::new(),
        }
    }
}

impl OrchestratorConfig {
    pub fn is_safety_agent(&self, agent_id: &str) -> bool {
        self.safety_subset.iter().any(|id| id == agent_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_deadlines_match_spec() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.per_agent_deadline, Duration::from_secs(60));
        assert_eq!(config.per_phase_deadline, Duration::from_secs(90));
    }

    #[test]
    fn weighted_sum_matches_illustrative_weights() {
        let weights = ScoringWeights::default();
        let mut metrics = std::collections::HashMap::new();
        metrics.insert("passenger_satisfaction".to_string(), 1.0);
        metrics.insert("cost_efficiency".to_string(), 1.0);
        metrics.insert("delay_reduction".to_string(), 1.0);
        metrics.insert("execution_reliability".to_string(), 1.0);
        assert!((weights.score(&metrics) - 1.0).abs() < 1e-9);
    }
}
