//! Orchestrator (§4.7): the end-to-end controller — phase sequencing,
//! early termination on blocking constraints, audit-trail assembly, and the
//! top-level timeout.
//!
//! Grounded in the teacher's `council.rs::Council::run` top-level
//! sequencing, generalized from "one fixed round" into the three-phase
//! protocol (§2 data flow): Phase 1 fan-out → Constraint Registry
//! population → blocking check → Phase 2 fan-out (revision, seeded with the
//! Phase-1 Collation and the registry) → Arbitrator → audit trail.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{NaiveDate, Utc};

use crate::orchestrator::agent_runtime::AgentRuntime;
use crate::orchestrator::arbitrator::Arbitrator;
use crate::orchestrator::catalogue::AgentCatalogue;
use crate::orchestrator::config::OrchestratorConfig;
use crate::orchestrator::constraint_registry::ConstraintRegistry;
use crate::orchestrator::errors::OrchestratorError;
use crate::orchestrator::event::{EventHandler, OrchestrationEvent};
use crate::orchestrator::model_gateway::ModelGateway;
use crate::orchestrator::phase_executor::PhaseExecutor;
use crate::orchestrator::schema::{AuditTrail, BindingConstraint, DisruptionPayload, Phase, RunStatus, Severity};
use crate::orchestrator::tool_protocol::ToolProtocol;

/// End-to-end controller for one orchestration run (§4.7).
pub struct Orchestrator {
    config: OrchestratorConfig,
    catalogue: AgentCatalogue,
    phase_executor: PhaseExecutor,
    model_gateway: Arc<ModelGateway>,
    event_handler: Arc<dyn EventHandler>,
}

impl Orchestrator {
    /// Construct an Orchestrator. The `ModelGateway`, `AgentCatalogue`, and
    /// `ToolProtocol` are constructed by the caller and injected here — per
    /// §9's "ambient/global state" redesign flag, there is no process-wide
    /// singleton; the Orchestrator owns the lifecycle of everything it hands
    /// down to the Phase Executor and Agent Runtime.
    pub fn new(
        config: OrchestratorConfig,
        catalogue: AgentCatalogue,
        model_gateway: Arc<ModelGateway>,
        tool_protocol: Arc<dyn ToolProtocol>,
        event_handler: Arc<dyn EventHandler>,
    ) -> Self {
        let agent_runtime = Arc::new(AgentRuntime::new(
            model_gateway.clone(),
            tool_protocol,
            event_handler.clone(),
            config.max_tool_iterations,
        ));
        let phase_executor = PhaseExecutor::new(
            agent_runtime,
            event_handler.clone(),
            config.max_concurrency,
            config.per_agent_deadline,
            config.per_phase_deadline,
        );
        Self {
            config,
            catalogue,
            phase_executor,
            model_gateway,
            event_handler,
        }
    }

    /// Run the full three-phase orchestration for `user_prompt` and return
    /// the final audit trail (§4.7, §6).
    ///
    /// The global deadline (§4.7, §5) is enforced per-phase rather than as
    /// one timeout wrapped around the whole sequence: if Phase 1 finishes
    /// within budget but there isn't enough of the global deadline left to
    /// attempt Phase 2, the Phase-1 Collation is still returned inside an
    /// `IncompleteTimeout` audit trail (§8 scenario F: "a partial audit
    /// trail containing only the Phase-1 Collation"), rather than being
    /// discarded by an outer cancellation.
    pub async fn run(&self, user_prompt: &str) -> AuditTrail {
        self.run_with_reference_date(user_prompt, Utc::now().date_naive()).await
    }

    /// Same as [`Orchestrator::run`], but resolves relative dates ("today",
    /// "yesterday", a weekday name — §3) against `reference_date` instead of
    /// the wall-clock date. Lets a caller pin "today" deterministically
    /// (replay, testing, a batch run processing yesterday's disruptions).
    pub async fn run_with_reference_date(&self, user_prompt: &str, reference_date: NaiveDate) -> AuditTrail {
        let run_id = uuid::Uuid::new_v4().to_string();
        let started_at = Instant::now();
        let started_timestamp = Utc::now();

        self.event_handler
            .on_orchestration_event(&OrchestrationEvent::RunStarted {
                run_id: run_id.clone(),
                agent_count: self.catalogue.len(),
            })
            .await;

        let audit_trail = self
            .run_phases(&run_id, user_prompt, reference_date, started_at, started_timestamp)
            .await;

        if audit_trail.status == RunStatus::IncompleteTimeout {
            self.event_handler
                .on_orchestration_event(&OrchestrationEvent::GlobalDeadlineExceeded {
                    run_id: run_id.clone(),
                    elapsed_ms: started_at.elapsed().as_millis(),
                })
                .await;
        }

        self.event_handler
            .on_orchestration_event(&OrchestrationEvent::RunCompleted {
                run_id: run_id.clone(),
                total_duration_ms: audit_trail.total_duration.as_millis(),
                total_tokens: 0,
            })
            .await;

        audit_trail
    }

    /// Remaining slice of `self.config.global_deadline` as of `started_at`.
    fn remaining_budget(&self, started_at: Instant) -> Duration {
        self.config.global_deadline.saturating_sub(started_at.elapsed())
    }

    fn incomplete_timeout_trail(
        &self,
        timestamp: chrono::DateTime<Utc>,
        total_duration: Duration,
        phase_one: Option<crate::orchestrator::schema::Collation>,
        phase_two: Option<crate::orchestrator::schema::Collation>,
        constraints_consulted: Vec<BindingConstraint>,
    ) -> AuditTrail {
        AuditTrail {
            timestamp,
            total_duration,
            phase_one,
            phase_two,
            constraints_consulted,
            ranked_scenarios: Vec::new(),
            selected_scenario: None,
            status: RunStatus::IncompleteTimeout,
            reason: Some(format!(
                "global deadline of {:?} exceeded before the run completed",
                self.config.global_deadline
            )),
        }
    }

    /// The actual phase sequencing. `run_id` is threaded through for
    /// correlated event logging; `started_at`/`started_timestamp` are the
    /// same clock readings [`Orchestrator::run`] took before dispatching
    /// here, so elapsed/remaining-budget accounting is consistent end to
    /// end.
    async fn run_phases(
        &self,
        run_id: &str,
        user_prompt: &str,
        reference_date: NaiveDate,
        started_at: Instant,
        started_timestamp: chrono::DateTime<Utc>,
    ) -> AuditTrail {
        if self.catalogue.is_empty() {
            return self.failed_trail(started_timestamp, started_at.elapsed(), "agent catalogue is empty: programmer error".to_string());
        }

        let agent_ids: &[String] = if self.config.agent_order.is_empty() {
            self.catalogue.agent_ids()
        } else {
            &self.config.agent_order
        };
        let definitions: Vec<_> = agent_ids.iter().filter_map(|id| self.catalogue.get(id).cloned()).collect();
        if definitions.len() != agent_ids.len() {
            return self.failed_trail(started_timestamp, started_at.elapsed(), "unknown agent-id referenced in declared agent ordering".to_string());
        }

        let constraint_registry = Arc::new(ConstraintRegistry::new(self.config.safety_subset.clone()));

        // Phase 1: every agent runs with phase=initial, no peer recommendations.
        // Bounded by whatever is left of the global deadline, not just the
        // per-phase deadline — if even Phase 1 can't fit, nothing survives.
        let phase_one = match tokio::time::timeout(
            self.remaining_budget(started_at),
            self.phase_executor.run_phase(
                run_id,
                Phase::Initial,
                &definitions,
                |_| DisruptionPayload::initial(user_prompt, reference_date),
                constraint_registry.clone(),
                &self.config.safety_subset,
            ),
        )
        .await
        {
            Ok(collation) => collation,
            Err(_) => {
                return self.incomplete_timeout_trail(started_timestamp, started_at.elapsed(), None, None, Vec::new());
            }
        };

        // Populate the Constraint Registry from Phase 1 safety-agent responses.
        for response in phase_one.canonical_order() {
            if !response.is_success() || response.binding_constraints.is_empty() {
                continue;
            }
            if !self.config.is_safety_agent(&response.agent_name) {
                continue;
            }
            let constraints: Vec<BindingConstraint> = response
                .binding_constraints
                .iter()
                .map(|text| BindingConstraint {
                    source_agent: response.agent_name.clone(),
                    text: text.clone(),
                    severity: Severity::sniff_from_text(text),
                })
                .collect();
            if let Err(e) = constraint_registry.publish(&response.agent_name, constraints) {
                log::error!("orchestrator: failed to publish constraints from '{}': {}", response.agent_name, e);
            }
        }

        // Early termination: if any blocking constraint was published, skip
        // Phase 2 and arbitration entirely (§4.7 step 4, §8 property 5).
        if constraint_registry.any_blocking() {
            let blocking: Vec<BindingConstraint> = constraint_registry
                .all()
                .into_iter()
                .filter(|c| c.severity == Severity::Blocking)
                .collect();
            let reason = blocking
                .iter()
                .map(|c| format!("[{}] {}", c.source_agent, c.text))
                .collect::<Vec<_>>()
                .join("; ");

            self.event_handler
                .on_orchestration_event(&OrchestrationEvent::EarlyTerminationBlocked {
                    run_id: run_id.to_string(),
                    source_agent: blocking.first().map(|c| c.source_agent.clone()).unwrap_or_default(),
                    constraint_text: reason.clone(),
                })
                .await;

            return AuditTrail {
                timestamp: started_timestamp,
                total_duration: started_at.elapsed(),
                phase_one: Some(phase_one),
                phase_two: None,
                constraints_consulted: constraint_registry.all(),
                ranked_scenarios: Vec::new(),
                selected_scenario: None,
                status: RunStatus::EarlyTerminationBlocked,
                reason: Some(format!("blocking constraint(s): {}", reason)),
            };
        }

        // Not enough of the global budget survives Phase 1 to even attempt
        // Phase 2: return the Phase-1 Collation alone (§8 scenario F).
        let remaining_after_phase_one = self.remaining_budget(started_at);
        if remaining_after_phase_one.is_zero() {
            return self.incomplete_timeout_trail(
                started_timestamp,
                started_at.elapsed(),
                Some(phase_one),
                None,
                constraint_registry.all(),
            );
        }

        // Phase 2: every agent runs with phase=revision, seeded with the
        // Phase-1 Collation. Agents additionally consult the Constraint
        // Registry inside Agent Runtime's prompt assembly.
        let phase_one_responses = phase_one.responses.clone();
        let phase_two = match tokio::time::timeout(
            remaining_after_phase_one,
            self.phase_executor.run_phase(
                run_id,
                Phase::Revision,
                &definitions,
                move |_| DisruptionPayload::revision(user_prompt, phase_one_responses.clone(), reference_date),
                constraint_registry.clone(),
                &self.config.safety_subset,
            ),
        )
        .await
        {
            Ok(collation) => collation,
            Err(_) => {
                return self.incomplete_timeout_trail(
                    started_timestamp,
                    started_at.elapsed(),
                    Some(phase_one),
                    None,
                    constraint_registry.all(),
                );
            }
        };

        let arbitrator = Arbitrator::new(self.model_gateway.clone(), self.config.scoring_weights);
        let ranked_scenarios = match arbitrator.arbitrate(user_prompt, &phase_two, &constraint_registry).await {
            Ok(scenarios) => scenarios,
            Err(e) => {
                return AuditTrail {
                    timestamp: started_timestamp,
                    total_duration: started_at.elapsed(),
                    phase_one: Some(phase_one),
                    phase_two: Some(phase_two),
                    constraints_consulted: constraint_registry.all(),
                    ranked_scenarios: Vec::new(),
                    selected_scenario: None,
                    status: RunStatus::Failed,
                    reason: Some(format!("arbitration failed: {}", e)),
                };
            }
        };

        let selected_scenario = ranked_scenarios.iter().find(|s| s.rank == 1).cloned();

        AuditTrail {
            timestamp: started_timestamp,
            total_duration: started_at.elapsed(),
            phase_one: Some(phase_one),
            phase_two: Some(phase_two),
            constraints_consulted: constraint_registry.all(),
            ranked_scenarios,
            selected_scenario,
            status: RunStatus::Complete,
            reason: None,
        }
    }

    fn failed_trail(&self, timestamp: chrono::DateTime<Utc>, total_duration: Duration, reason: String) -> AuditTrail {
        AuditTrail {
            timestamp,
            total_duration,
            phase_one: None,
            phase_two: None,
            constraints_consulted: Vec::new(),
            ranked_scenarios: Vec::new(),
            selected_scenario: None,
            status: RunStatus::Failed,
            reason: Some(reason),
        }
    }
}

/// Surfaced for callers that want to construct a fatal error outside of
/// [`Orchestrator::run`] (e.g. validating a catalogue before constructing
/// the Orchestrator at all). Unknown agent-ids and malformed manifests are
/// fatal, propagating out of the orchestration per §7.
pub fn validate_catalogue_or_panic(catalogue: &AgentCatalogue, safety_subset: &[String]) -> Result<(), OrchestratorError> {
    for agent_id in safety_subset {
        if catalogue.get(agent_id).is_none() {
            return Err(OrchestratorError::Fatal(format!(
                "safety subset references unknown agent-id '{}'",
                agent_id
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::catalogue::AgentDefinition;
    use crate::orchestrator::client_wrapper::{ClientWrapper, Message, Role};
    use crate::orchestrator::event::LoggingEventHandler;
    use crate::orchestrator::tool_protocol::{ToolError, ToolMetadata, ToolResult};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct NoOpToolProtocol;

    #[async_trait]
    impl ToolProtocol for NoOpToolProtocol {
        async fn execute(&self, tool_name: &str, _parameters: serde_json::Value) -> Result<ToolResult, Box<dyn std::error::Error + Send + Sync>> {
            Err(Box::new(ToolError::NotFound(tool_name.to_string())))
        }

        async fn list_tools(&self) -> Result<Vec<ToolMetadata>, Box<dyn std::error::Error + Send + Sync>> {
            Ok(Vec::new())
        }

        fn protocol_name(&self) -> &str {
            "noop"
        }
    }

    struct ScriptedClient {
        responses: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ClientWrapper for ScriptedClient {
        async fn send_message(&self, _messages: &[Message]) -> Result<Message, Box<dyn std::error::Error + Send + Sync>> {
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Ok(Message {
                    role: Role::Assistant,
                    content: Arc::from(r#"{"recommendation": "no-op", "confidence": 0.5, "binding_constraints": [], "reasoning": "exhausted script", "data_sources": []}"#),
                });
            }
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

    fn flight_info() -> String {
        r#"{"flight_number": "EY123", "date": "2026-02-03", "disruption_event": "mechanical failure"}"#.to_string()
    }

    fn agent_output(recommendation: &str, constraints: &[&str]) -> String {
        let constraints_json = constraints.iter().map(|c| format!("\"{}\"", c)).collect::<Vec<_>>().join(", ");
        format!(
            r#"{{"recommendation": "{}", "confidence": 0.8, "binding_constraints": [{}], "reasoning": "ok", "data_sources": []}}"#,
            recommendation, constraints_json
        )
    }

    #[tokio::test]
    async fn blocking_constraint_triggers_early_termination() {
        let client = Arc::new(ScriptedClient {
            responses: Mutex::new(vec![flight_info(), agent_output("ground the aircraft", &["BLOCKING: aircraft not airworthy"])]),
        });
        let gateway = Arc::new(ModelGateway::new(vec![client], Arc::new(LoggingEventHandler)));

        let catalogue = AgentCatalogue::new(vec![AgentDefinition {
            agent_id: "maintenance".to_string(),
            system_prompt: "You are the maintenance agent.".to_string(),
            authorized_tools: Vec::new(),
        }]);

        let mut config = OrchestratorConfig::default();
        config.safety_subset = vec!["maintenance".to_string()];
        config.agent_order = vec!["maintenance".to_string()];

        let orchestrator = Orchestrator::new(config, catalogue, gateway, Arc::new(NoOpToolProtocol), Arc::new(LoggingEventHandler));
        let trail = orchestrator.run("Flight EY123 today had a mechanical failure").await;

        assert_eq!(trail.status, RunStatus::EarlyTerminationBlocked);
        assert!(trail.phase_two.is_none());
        assert!(trail.reason.unwrap().contains("not airworthy"));
    }

    #[tokio::test]
    async fn non_blocking_run_produces_complete_status_with_ranked_scenarios() {
        let client = Arc::new(ScriptedClient {
            responses: Mutex::new(vec![
                flight_info(),
                agent_output("rebook passengers on the next flight", &[]),
                flight_info(),
                agent_output("rebook passengers on the next flight", &[]),
                r#"{"actions": [{"description": "rebook passengers on next available flight", "affects": ["passengers"], "execution_risk": 0.2}]}"#.to_string(),
                r#"{"passenger_satisfaction": 0.8, "cost_efficiency": 0.7, "delay_reduction": 0.6, "execution_reliability": 0.8}"#.to_string(),
            ]),
        });
        let gateway = Arc::new(ModelGateway::new(vec![client], Arc::new(LoggingEventHandler)));

        let catalogue = AgentCatalogue::new(vec![AgentDefinition {
            agent_id: "customer_service".to_string(),
            system_prompt: "You are the customer service agent.".to_string(),
            authorized_tools: Vec::new(),
        }]);

        let mut config = OrchestratorConfig::default();
        config.agent_order = vec!["customer_service".to_string()];

        let orchestrator = Orchestrator::new(config, catalogue, gateway, Arc::new(NoOpToolProtocol), Arc::new(LoggingEventHandler));
        let trail = orchestrator.run("Flight EY123 today had a mechanical failure").await;

        assert_eq!(trail.status, RunStatus::Complete);
        assert!(trail.phase_two.is_some());
        assert!(!trail.ranked_scenarios.is_empty());
        assert!(trail.selected_scenario.is_some());
    }

    #[tokio::test]
    async fn empty_catalogue_is_fatal() {
        let client = Arc::new(ScriptedClient { responses: Mutex::new(vec![]) });
        let gateway = Arc::new(ModelGateway::new(vec![client], Arc::new(LoggingEventHandler)));
        let catalogue = AgentCatalogue::default();
        let orchestrator = Orchestrator::new(OrchestratorConfig::default(), catalogue, gateway, Arc::new(NoOpToolProtocol), Arc::new(LoggingEventHandler));
        let trail = orchestrator.run("any prompt").await;
        assert_eq!(trail.status, RunStatus::Failed);
    }

    #[tokio::test]
    async fn global_deadline_below_phase_minimum_yields_incomplete_timeout() {
        let client = Arc::new(ScriptedClient {
            responses: Mutex::new(vec![flight_info(), agent_output("rebook passengers", &[])]),
        });
        let gateway = Arc::new(ModelGateway::new(vec![client], Arc::new(LoggingEventHandler)));

        let catalogue = AgentCatalogue::new(vec![AgentDefinition {
            agent_id: "customer_service".to_string(),
            system_prompt: "You are the customer service agent.".to_string(),
            authorized_tools: Vec::new(),
        }]);

        let mut config = OrchestratorConfig::default();
        config.agent_order = vec!["customer_service".to_string()];
        config.global_deadline = Duration::from_nanos(1);

        let orchestrator = Orchestrator::new(config, catalogue, gateway, Arc::new(NoOpToolProtocol), Arc::new(LoggingEventHandler));
        let trail = orchestrator.run("Flight EY123 today had a mechanical failure").await;

        assert_eq!(trail.status, RunStatus::IncompleteTimeout);
        assert!(trail.phase_one.is_none());
    }

    /// A global deadline that outlives Phase 1 but not Phase 2 must still
    /// surface the completed Phase-1 Collation (§8 scenario F: "a partial
    /// audit trail containing only the Phase-1 Collation"), rather than
    /// discarding it the way a single outer timeout around the whole run
    /// would.
    struct SlowScriptedClient {
        responses: Mutex<Vec<String>>,
        delay: Duration,
    }

    #[async_trait]
    impl ClientWrapper for SlowScriptedClient {
        async fn send_message(&self, _messages: &[Message]) -> Result<Message, Box<dyn std::error::Error + Send + Sync>> {
            tokio::time::sleep(self.delay).await;
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Ok(Message {
                    role: Role::Assistant,
                    content: Arc::from(r#"{"recommendation": "no-op", "confidence": 0.5, "binding_constraints": [], "reasoning": "exhausted script", "data_sources": []}"#),
                });
            }
            let text = responses.remove(0);
            Ok(Message {
                role: Role::Assistant,
                content: Arc::from(text.as_str()),
            })
        }

        fn model_name(&self) -> &str {
            "slow-scripted"
        }
    }

    #[tokio::test]
    async fn global_deadline_exhausted_after_phase_one_preserves_phase_one_collation() {
        let client = Arc::new(SlowScriptedClient {
            responses: Mutex::new(vec![flight_info(), agent_output("rebook passengers", &[])]),
            delay: Duration::from_millis(60),
        });
        let gateway = Arc::new(ModelGateway::new(vec![client], Arc::new(LoggingEventHandler)));

        let catalogue = AgentCatalogue::new(vec![AgentDefinition {
            agent_id: "customer_service".to_string(),
            system_prompt: "You are the customer service agent.".to_string(),
            authorized_tools: Vec::new(),
        }]);

        let mut config = OrchestratorConfig::default();
        config.agent_order = vec!["customer_service".to_string()];
        // Enough budget for Phase 1's two sequential LLM calls (~120ms) to
        // finish, not enough left over for Phase 2's own pair of calls.
        config.global_deadline = Duration::from_millis(150);

        let orchestrator = Orchestrator::new(config, catalogue, gateway, Arc::new(NoOpToolProtocol), Arc::new(LoggingEventHandler));
        let trail = orchestrator.run("Flight EY123 today had a mechanical failure").await;

        assert_eq!(trail.status, RunStatus::IncompleteTimeout);
        assert!(trail.phase_one.is_some());
        assert!(trail.phase_two.is_none());
    }
}
