//! Constraint Registry (§4.5): captures binding constraints emitted by
//! safety agents in Phase 1 and exposes them to Phase 2 and the Arbitrator.
//!
//! Per §5: "the Constraint Registry is the only mutable shared object...
//! No lock is required beyond a single publication barrier between
//! phases." A `std::sync::RwLock` over a plain `Vec` is enough — there is
//! no concurrent writer contention since all writes happen during Phase 1
//! and all reads happen after it.

use std::collections::HashSet;
use std::sync::RwLock;

use crate::orchestrator::errors::OrchestratorError;
use crate::orchestrator::schema::{BindingConstraint, Severity};

pub struct ConstraintRegistry {
    constraints: RwLock<Vec<BindingConstraint>>,
    safety_subset: HashSet<String>,
}

impl ConstraintRegistry {
    pub fn new(safety_subset: impl IntoIterator<Item = String>) -> Self {
        Self {
            constraints: RwLock::new(Vec::new()),
            safety_subset: safety_subset.into_iter().collect(),
        }
    }

    /// Append `constraints` published by `agent_id`. Rejected outright if
    /// `agent_id` is not in the safety subset (§4.5: "Publication by
    /// non-safety agents is rejected"). Idempotent: a constraint identical
    /// to one already on file (same source, text, and severity) is not
    /// duplicated — constraints are additive and immutable, never
    /// retracted, downgraded, or reordered once published.
    pub fn publish(&self, agent_id: &str, constraints: Vec<BindingConstraint>) -> Result<(), OrchestratorError> {
        if !self.safety_subset.contains(agent_id) {
            return Err(OrchestratorError::Validation(format!(
                "agent '{}' is not in the safety subset and may not publish binding constraints",
                agent_id
            )));
        }
        let mut guard = self.constraints.write().unwrap();
        for constraint in constraints {
            if !guard.contains(&constraint) {
                guard.push(constraint);
            }
        }
        Ok(())
    }

    /// Ordered list of constraints at or above `min_severity`, in
    /// publication order.
    pub fn query(&self, min_severity: Severity) -> Vec<BindingConstraint> {
        self.constraints
            .read()
            .unwrap()
            .iter()
            .filter(|c| c.severity >= min_severity)
            .cloned()
            .collect()
    }

    pub fn any_blocking(&self) -> bool {
        self.constraints.read().unwrap().iter().any(|c| c.severity == Severity::Blocking)
    }

    /// All constraints published so far, in publication order.
    pub fn all(&self) -> Vec<BindingConstraint> {
        self.constraints.read().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constraint(agent: &str, text: &str, severity: Severity) -> BindingConstraint {
        BindingConstraint {
            source_agent: agent.to_string(),
            text: text.to_string(),
            severity,
        }
    }

    #[test]
    fn publication_by_non_safety_agent_is_rejected() {
        let registry = ConstraintRegistry::new(vec!["maintenance".to_string()]);
        let result = registry.publish(
            "customer_service",
            vec![constraint("customer_service", "offer vouchers", Severity::Low)],
        );
        assert!(result.is_err());
        assert!(registry.all().is_empty());
    }

    #[test]
    fn publish_is_idempotent_on_identical_input() {
        let registry = ConstraintRegistry::new(vec!["maintenance".to_string()]);
        let c = constraint("maintenance", "BLOCKING: aircraft not airworthy", Severity::Blocking);
        registry.publish("maintenance", vec![c.clone()]).unwrap();
        registry.publish("maintenance", vec![c]).unwrap();
        assert_eq!(registry.all().len(), 1);
    }

    #[test]
    fn any_blocking_detects_blocking_severity() {
        let registry = ConstraintRegistry::new(vec!["maintenance".to_string()]);
        assert!(!registry.any_blocking());
        registry
            .publish(
                "maintenance",
                vec![constraint("maintenance", "BLOCKING: grounded", Severity::Blocking)],
            )
            .unwrap();
        assert!(registry.any_blocking());
    }

    #[test]
    fn query_filters_by_severity_threshold() {
        let registry = ConstraintRegistry::new(vec!["maintenance".to_string()]);
        registry
            .publish(
                "maintenance",
                vec![
                    constraint("maintenance", "minor delay expected", Severity::Low),
                    constraint("maintenance", "crew duty limit near", Severity::High),
                ],
            )
            .unwrap();
        let high_and_above = registry.query(Severity::High);
        assert_eq!(high_and_above.len(), 1);
        assert_eq!(high_and_above[0].text, "crew duty limit near");
    }
}
