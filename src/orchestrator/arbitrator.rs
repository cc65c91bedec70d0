//! Arbitrator (§4.6): turns a phase-2 [`Collation`] plus the
//! [`ConstraintRegistry`] into a ranked decision.
//!
//! Grounded in the teacher's `council.rs` synthesis step — a final
//! `ModelGateway::complete` call seeded with every agent's recommendation —
//! generalized into the multi-stage compose/reject/score/rank pipeline §4.6
//! specifies. Scoring is the fixed weighted sum from `ScoringWeights`
//! (§4.6 step 5, §9 open question resolved in favor of the weighted sum);
//! the LLM is used only for outcome-metric prediction (step 4), never for
//! the score itself.

use std::collections::HashMap;
use std::sync::Arc;

use crate::orchestrator::config::ScoringWeights;
use crate::orchestrator::constraint_registry::ConstraintRegistry;
use crate::orchestrator::errors::OrchestratorError;
use crate::orchestrator::model_gateway::ModelGateway;
use crate::orchestrator::schema::{Collation, ProposedAction, ScoredScenario, Severity};

const PROPOSAL_SCHEMA: &str = r#"{"actions": [{"description": "string", "affects": ["string", ...], "execution_risk": "number between 0 and 1"}]}"#;

const METRIC_NAMES: [&str; 4] = [
    "passenger_satisfaction",
    "cost_efficiency",
    "delay_reduction",
    "execution_reliability",
];

/// Synthesizes a final, ranked decision from a phase-2 [`Collation`] (§4.6).
pub struct Arbitrator {
    model_gateway: Arc<ModelGateway>,
    scoring_weights: ScoringWeights,
}

impl Arbitrator {
    pub fn new(model_gateway: Arc<ModelGateway>, scoring_weights: ScoringWeights) -> Self {
        Self {
            model_gateway,
            scoring_weights,
        }
    }

    /// Run the full arbitration pipeline (§4.6 steps 1-7) and return scenarios
    /// ranked best-first.
    pub async fn arbitrate(
        &self,
        user_prompt: &str,
        phase_two: &Collation,
        constraint_registry: &ConstraintRegistry,
    ) -> Result<Vec<ScoredScenario>, OrchestratorError> {
        // Step 1: gather candidate actions from every successful response.
        let candidates = self.gather_candidates(phase_two).await?;

        // Step 2: reject any candidate violating a blocking/high constraint.
        let blocking_and_high = constraint_registry.query(Severity::High);
        let (accepted, rejected) = partition_by_constraints(candidates, &blocking_and_high);

        if accepted.is_empty() {
            // Step 7: no scenario survives rejection — synthesize the
            // conservative baseline and rank it first.
            let mut baseline = conservative_baseline(&rejected);
            baseline.rank = 1;
            return Ok(vec![baseline]);
        }

        // Step 3: compose scenarios from non-conflicting subsets.
        let scenario_candidates = compose_scenarios(&accepted);

        // Step 4 + 5: predict metrics via the Model Gateway, score with the
        // fixed weighted sum.
        let mut scenarios = Vec::with_capacity(scenario_candidates.len());
        for actions in scenario_candidates {
            let metrics = self.predict_metrics(user_prompt, &actions).await?;
            let composite_score = self.scoring_weights.score(&metrics);
            let rationale = build_rationale(&actions, &blocking_and_high);
            scenarios.push(ScoredScenario {
                actions,
                constraint_violations: Vec::new(),
                predicted_metrics: metrics,
                composite_score,
                rank: 0,
                rationale,
                is_fallback: false,
            });
        }

        // Step 6: rank by score desc, then fewer actions, then lower risk,
        // then lexicographic agent-id ordering of contributing proposals.
        scenarios.sort_by(|a, b| rank_key(a).cmp(&rank_key(b)));
        for (idx, scenario) in scenarios.iter_mut().enumerate() {
            scenario.rank = idx + 1;
        }

        Ok(scenarios)
    }

    /// Step 1: parse every successful response's prose recommendation into
    /// zero or more [`ProposedAction`]s via `extract` against a proposal schema.
    async fn gather_candidates(&self, phase_two: &Collation) -> Result<Vec<ProposedAction>, OrchestratorError> {
        let mut candidates = Vec::new();
        for response in phase_two.canonical_order() {
            if !response.is_success() {
                continue;
            }
            let extracted = self
                .model_gateway
                .extract("arbitrator", &response.recommendation, PROPOSAL_SCHEMA)
                .await?;
            let actions = extracted
                .get("actions")
                .and_then(serde_json::Value::as_array)
                .cloned()
                .unwrap_or_default();
            for action in actions {
                let description = action
                    .get("description")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                if description.is_empty() {
                    continue;
                }
                let affects = action
                    .get("affects")
                    .and_then(serde_json::Value::as_array)
                    .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
                    .unwrap_or_default();
                let execution_risk = action
                    .get("execution_risk")
                    .and_then(serde_json::Value::as_f64)
                    .unwrap_or(0.3)
                    .clamp(0.0, 1.0);
                candidates.push(ProposedAction {
                    description,
                    affects,
                    source_agent: response.agent_name.clone(),
                    execution_risk,
                });
            }
        }
        Ok(candidates)
    }

    /// Step 4: predict outcome metrics for one candidate scenario, seeded
    /// with the scenario and the original prompt (§4.6 step 4).
    async fn predict_metrics(&self, user_prompt: &str, actions: &[ProposedAction]) -> Result<HashMap<String, f64>, OrchestratorError> {
        let descriptions: Vec<String> = actions.iter().map(|a| format!("- {} (proposed by {})", a.description, a.source_agent)).collect();
        let prompt = format!(
            "Original disruption: {}\n\nCandidate recovery scenario:\n{}\n\n\
             Predict the following outcome metrics, each a number between 0 and 1, \
             where higher is better: passenger_satisfaction, cost_efficiency, \
             delay_reduction, execution_reliability. Respond with ONLY a JSON object \
             mapping each metric name to its number.",
            user_prompt,
            descriptions.join("\n")
        );
        let text = self.model_gateway.complete("arbitrator", &prompt).await?;
        Ok(parse_metrics(&text))
    }
}

/// Split candidates into `(accepted, rejected)` against blocking/high
/// constraints (§4.6 step 2). A constraint "violation" is detected textually:
/// an action whose description or `affects` set mentions a constraint's
/// subject is treated as violating it. This is a conservative heuristic —
/// ambiguous matches are NOT rejected, since over-rejection would silently
/// discard valid recovery options.
fn partition_by_constraints(
    candidates: Vec<ProposedAction>,
    constraints: &[crate::orchestrator::schema::BindingConstraint],
) -> (Vec<ProposedAction>, Vec<(ProposedAction, String)>) {
    let mut accepted = Vec::new();
    let mut rejected = Vec::new();
    for action in candidates {
        let violated = constraints.iter().find(|c| constraint_conflicts(&action, &c.text));
        match violated {
            Some(constraint) => rejected.push((action, constraint.text.clone())),
            None => accepted.push(action),
        }
    }
    (accepted, rejected)
}

fn constraint_conflicts(action: &ProposedAction, constraint_text: &str) -> bool {
    let lowered_constraint = constraint_text.to_lowercase();
    // "BLOCKING: aircraft not airworthy" rejects any action proposing to
    // operate/dispatch the flight rather than ground it.
    if lowered_constraint.contains("not airworthy") || lowered_constraint.contains("grounded") {
        let lowered_action = action.description.to_lowercase();
        return lowered_action.contains("operate the flight")
            || lowered_action.contains("dispatch the aircraft")
            || lowered_action.contains("continue as scheduled");
    }
    false
}

/// Step 3: compose scenarios from non-conflicting subsets of `accepted`
/// candidates. Two actions conflict if their `affects` sets intersect
/// (§4.6 step 3: "two actions both reassigning the same resource conflict").
/// A simple greedy clustering: each maximal conflict-free group becomes one
/// scenario, plus the full accepted set as a single scenario when it is
/// itself conflict-free.
fn compose_scenarios(accepted: &[ProposedAction]) -> Vec<Vec<ProposedAction>> {
    if accepted.is_empty() {
        return Vec::new();
    }

    let mut scenarios: Vec<Vec<ProposedAction>> = Vec::new();

    // Scenario A: every accepted action, if mutually conflict-free.
    if is_conflict_free(accepted) {
        scenarios.push(accepted.to_vec());
    }

    // Scenario per-agent: one scenario containing only the highest-confidence
    // (lowest-risk) action from each distinct `affects` cluster, to offer a
    // minimal alternative alongside the maximal one.
    let mut by_affects: HashMap<Vec<String>, Vec<&ProposedAction>> = HashMap::new();
    for action in accepted {
        let mut key = action.affects.clone();
        key.sort();
        by_affects.entry(key).or_default().push(action);
    }
    let minimal: Vec<ProposedAction> = by_affects
        .values()
        .filter_map(|group| {
            group
                .iter()
                .min_by(|a, b| a.execution_risk.partial_cmp(&b.execution_risk).unwrap())
                .map(|a| (*a).clone())
        })
        .collect();
    if !minimal.is_empty() && is_conflict_free(&minimal) {
        let mut sorted_minimal = minimal;
        sorted_minimal.sort_by(|a, b| a.description.cmp(&b.description));
        if scenarios.first() != Some(&sorted_minimal) {
            scenarios.push(sorted_minimal);
        }
    }

    if scenarios.is_empty() {
        // Nothing is fully conflict-free; fall back to singleton scenarios,
        // one per action, so the arbitrator still has candidates to score.
        scenarios = accepted.iter().map(|a| vec![a.clone()]).collect();
    }

    scenarios
}

fn is_conflict_free(actions: &[ProposedAction]) -> bool {
    for i in 0..actions.len() {
        for j in (i + 1)..actions.len() {
            if actions[i].affects.iter().any(|r| actions[j].affects.contains(r)) && !actions[i].affects.is_empty() {
                return false;
            }
        }
    }
    true
}

/// Step 7: synthesize the conservative baseline ("cancel + full passenger
/// protection") when every candidate was rejected.
fn conservative_baseline(rejected: &[(ProposedAction, String)]) -> ScoredScenario {
    let mut metrics = HashMap::new();
    metrics.insert("passenger_satisfaction".to_string(), 0.6);
    metrics.insert("cost_efficiency".to_string(), 0.3);
    metrics.insert("delay_reduction".to_string(), 0.2);
    metrics.insert("execution_reliability".to_string(), 0.9);

    let action = ProposedAction {
        description: "Cancel the flight and provide full passenger protection (rebooking, accommodation, compensation per policy).".to_string(),
        affects: vec!["flight".to_string()],
        source_agent: "arbitrator".to_string(),
        execution_risk: 0.1,
    };

    let rationale = if rejected.is_empty() {
        "No recovery scenario survived constraint validation; synthesized conservative baseline.".to_string()
    } else {
        format!(
            "All {} candidate action(s) were rejected for violating binding constraints; synthesized conservative baseline as fallback.",
            rejected.len()
        )
    };

    ScoredScenario {
        actions: vec![action],
        constraint_violations: rejected.iter().map(|(_, reason)| reason.clone()).collect(),
        predicted_metrics: metrics,
        composite_score: 0.0,
        rank: 0,
        rationale,
        is_fallback: true,
    }
}

fn build_rationale(actions: &[ProposedAction], constraints: &[crate::orchestrator::schema::BindingConstraint]) -> String {
    let mut rationale = format!(
        "Scenario composed of {} action(s) from {} agent(s).",
        actions.len(),
        {
            let mut agents: Vec<&str> = actions.iter().map(|a| a.source_agent.as_str()).collect();
            agents.sort();
            agents.dedup();
            agents.len()
        }
    );
    if !constraints.is_empty() {
        let referenced: Vec<&str> = constraints
            .iter()
            .filter(|c| actions.iter().all(|a| !constraint_conflicts(a, &c.text)))
            .map(|c| c.source_agent.as_str())
            .collect();
        if !referenced.is_empty() {
            rationale.push_str(&format!(" Honors binding constraints from: {}.", referenced.join(", ")));
        }
    }
    rationale
}

/// Tie-break key for ranking (§4.6 step 6): higher score first, then fewer
/// actions, then lower execution risk, then lexicographic agent ordering.
/// Encoded so that sorting ascending on this tuple yields best-first order.
fn rank_key(scenario: &ScoredScenario) -> (i64, usize, i64, Vec<String>) {
    let neg_score = -(scenario.composite_score * 1_000_000.0) as i64;
    let action_count = scenario.actions.len();
    let avg_risk = if scenario.actions.is_empty() {
        0.0
    } else {
        scenario.actions.iter().map(|a| a.execution_risk).sum::<f64>() / scenario.actions.len() as f64
    };
    let risk_key = (avg_risk * 1_000_000.0) as i64;
    let mut agent_ids: Vec<String> = scenario.actions.iter().map(|a| a.source_agent.clone()).collect();
    agent_ids.sort();
    (neg_score, action_count, risk_key, agent_ids)
}

fn parse_metrics(text: &str) -> HashMap<String, f64> {
    let mut metrics = HashMap::new();
    let parsed: Option<serde_json::Value> = serde_json::from_str(text.trim()).ok().or_else(|| {
        let start = text.find('{')?;
        let end = text.rfind('}')? + 1;
        serde_json::from_str(&text[start..end]).ok()
    });
    if let Some(value) = parsed {
        for name in METRIC_NAMES {
            if let Some(v) = value.get(name).and_then(serde_json::Value::as_f64) {
                metrics.insert(name.to_string(), v.clamp(0.0, 1.0));
            }
        }
    }
    for name in METRIC_NAMES {
        metrics.entry(name.to_string()).or_insert(0.5);
    }
    metrics
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::client_wrapper::{ClientWrapper, Message, Role};
    use crate::orchestrator::event::LoggingEventHandler;
    use crate::orchestrator::schema::{AgentResponse, AgentStatus, BindingConstraint, Phase};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::HashMap as StdHashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    struct ScriptedClient {
        responses: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ClientWrapper for ScriptedClient {
        async fn send_message(&self, _messages: &[Message]) -> Result<Message, Box<dyn std::error::Error + Send + Sync>> {
            let mut responses = self.responses.lock().unwrap();
            let text = responses.remove(0);
            Ok(Message {
                role: Role::Assistant,
                content: Arc::from(text.as_str()),
            })
        }

        fn model_name(&self) -> &str {
            "scripted"
        }
    }

    fn success_response(agent_name: &str, recommendation: &str) -> AgentResponse {
        AgentResponse {
            agent_name: agent_name.to_string(),
            recommendation: recommendation.to_string(),
            confidence: 0.8,
            binding_constraints: Vec::new(),
            reasoning: "ok".to_string(),
            data_sources: Vec::new(),
            extracted_flight_info: None,
            status: AgentStatus::Success,
            duration: Duration::from_millis(100),
            error: None,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn synthesizes_conservative_baseline_when_all_candidates_rejected() {
        let client = Arc::new(ScriptedClient {
            responses: Mutex::new(vec![
                r#"{"actions": [{"description": "continue as scheduled with a delay", "affects": ["flight"], "execution_risk": 0.4}]}"#.to_string(),
            ]),
        });
        let gateway = Arc::new(ModelGateway::new(vec![client], Arc::new(LoggingEventHandler)));
        let arbitrator = Arbitrator::new(gateway, ScoringWeights::default());

        let mut responses = StdHashMap::new();
        responses.insert("maintenance".to_string(), success_response("maintenance", "continue as scheduled"));
        let collation = Collation {
            phase: Phase::Revision,
            responses,
            timestamp: Utc::now(),
            duration: Duration::from_secs(1),
        };

        let registry = ConstraintRegistry::new(vec!["maintenance".to_string()]);
        registry
            .publish(
                "maintenance",
                vec![BindingConstraint {
                    source_agent: "maintenance".to_string(),
                    text: "BLOCKING: aircraft not airworthy".to_string(),
                    severity: Severity::Blocking,
                }],
            )
            .unwrap();

        let scenarios = arbitrator.arbitrate("EY123 had a mechanical failure", &collation, &registry).await.unwrap();
        assert_eq!(scenarios.len(), 1);
        assert!(scenarios[0].is_fallback);
        assert_eq!(scenarios[0].rank, 1);
    }

    #[tokio::test]
    async fn ranks_accepted_scenarios_by_predicted_score() {
        let client = Arc::new(ScriptedClient {
            responses: Mutex::new(vec![
                r#"{"actions": [{"description": "rebook passengers on next available flight", "affects": ["passengers"], "execution_risk": 0.2}]}"#.to_string(),
                r#"{"passenger_satisfaction": 0.9, "cost_efficiency": 0.6, "delay_reduction": 0.7, "execution_reliability": 0.8}"#.to_string(),
            ]),
        });
        let gateway = Arc::new(ModelGateway::new(vec![client], Arc::new(LoggingEventHandler)));
        let arbitrator = Arbitrator::new(gateway, ScoringWeights::default());

        let mut responses = StdHashMap::new();
        responses.insert(
            "customer_service".to_string(),
            success_response("customer_service", "rebook passengers"),
        );
        let collation = Collation {
            phase: Phase::Revision,
            responses,
            timestamp: Utc::now(),
            duration: Duration::from_secs(1),
        };

        let registry = ConstraintRegistry::new(Vec::<String>::new());
        let scenarios = arbitrator.arbitrate("EY123 had a mechanical failure", &collation, &registry).await.unwrap();
        assert_eq!(scenarios.len(), 1);
        assert!(!scenarios[0].is_fallback);
        assert_eq!(scenarios[0].rank, 1);
        assert!(scenarios[0].composite_score > 0.0);
    }
}
