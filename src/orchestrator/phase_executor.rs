//! Phase Executor (§4.4): runs the N agents of one phase concurrently under
//! a strict budget and collates their responses.
//!
//! Grounded in the teacher's `council.rs::Council::execute_parallel`
//! fan-out-via-`tokio::spawn` pattern, generalized with a
//! [`tokio::sync::Semaphore`] for bounded concurrency and a
//! `tokio::task::JoinSet` so the global phase deadline can abort every
//! still-running agent task at once (§4.4: "on expiry, all still-running
//! agents are cancelled").

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::orchestrator::agent_runtime::AgentRuntime;
use crate::orchestrator::catalogue::AgentDefinition;
use crate::orchestrator::constraint_registry::ConstraintRegistry;
use crate::orchestrator::event::{EventHandler, OrchestrationEvent};
use crate::orchestrator::schema::{AgentResponse, AgentStatus, Collation, DisruptionPayload, Phase};

pub struct PhaseExecutor {
    agent_runtime: Arc<AgentRuntime>,
    event_handler: Arc<dyn EventHandler>,
    max_concurrency: usize,
    per_agent_deadline: Duration,
    per_phase_deadline: Duration,
}

impl PhaseExecutor {
    pub fn new(
        agent_runtime: Arc<AgentRuntime>,
        event_handler: Arc<dyn EventHandler>,
        max_concurrency: usize,
        per_agent_deadline: Duration,
        per_phase_deadline: Duration,
    ) -> Self {
        Self {
            agent_runtime,
            event_handler,
            max_concurrency,
            per_agent_deadline,
            per_phase_deadline,
        }
    }

    /// Run every agent in `definitions` concurrently, each against the
    /// `DisruptionPayload` `payload_for` builds for it, and return the
    /// resulting [`Collation`] once every agent has a terminal response.
    pub async fn run_phase(
        &self,
        run_id: &str,
        phase: Phase,
        definitions: &[AgentDefinition],
        payload_for: impl Fn(&AgentDefinition) -> DisruptionPayload,
        constraint_registry: Arc<ConstraintRegistry>,
        safety_subset: &[String],
    ) -> Collation {
        let phase_started = Instant::now();
        let phase_start_timestamp = Utc::now();

        self.event_handler
            .on_orchestration_event(&OrchestrationEvent::PhaseStarted {
                run_id: run_id.to_string(),
                phase,
                agent_count: definitions.len(),
            })
            .await;

        let semaphore = Arc::new(Semaphore::new(self.max_concurrency.max(1)));
        let mut join_set: JoinSet<(String, AgentResponse)> = JoinSet::new();

        for definition in definitions {
            let definition = definition.clone();
            let payload = payload_for(&definition);
            let agent_runtime = self.agent_runtime.clone();
            let constraint_registry = constraint_registry.clone();
            let semaphore = semaphore.clone();
            let is_safety = safety_subset.iter().any(|id| id == &definition.agent_id);
            let per_agent_deadline = self.per_agent_deadline;
            let agent_id = definition.agent_id.clone();

            join_set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("phase semaphore is never closed");
                let attempt_started = Instant::now();
                let response = tokio::time::timeout(
                    per_agent_deadline,
                    agent_runtime.run(&definition, &payload, &constraint_registry, is_safety),
                )
                .await;
                match response {
                    Ok(response) => (agent_id, response),
                    Err(_) => (agent_id.clone(), timeout_response(&agent_id, attempt_started.elapsed().max(per_agent_deadline))),
                }
            });
        }

        let mut responses: HashMap<String, AgentResponse> = HashMap::new();
        let drain_result = tokio::time::timeout(self.per_phase_deadline, async {
            while let Some(joined) = join_set.join_next().await {
                match joined {
                    Ok((agent_id, response)) => {
                        if !response.is_success() {
                            self.event_handler
                                .on_orchestration_event(&OrchestrationEvent::AgentFailed {
                                    run_id: run_id.to_string(),
                                    agent_id: agent_id.clone(),
                                    phase,
                                    reason: response.error.clone().unwrap_or_else(|| format!("{:?}", response.status)),
                                })
                                .await;
                        }
                        responses.insert(agent_id, response);
                    }
                    Err(join_error) => {
                        log::error!("phase executor: agent task panicked: {}", join_error);
                    }
                }
            }
        })
        .await;

        if drain_result.is_err() {
            join_set.abort_all();
            self.event_handler
                .on_orchestration_event(&OrchestrationEvent::GlobalDeadlineExceeded {
                    run_id: run_id.to_string(),
                    elapsed_ms: phase_started.elapsed().as_millis(),
                })
                .await;
            for definition in definitions {
                responses
                    .entry(definition.agent_id.clone())
                    .or_insert_with(|| timeout_response(&definition.agent_id, self.per_phase_deadline));
            }
        }

        let collation = Collation {
            phase,
            responses,
            timestamp: phase_start_timestamp,
            duration: phase_started.elapsed(),
        };

        let counts = collation.status_counts();
        self.event_handler
            .on_orchestration_event(&OrchestrationEvent::PhaseCompleted {
                run_id: run_id.to_string(),
                phase,
                succeeded: counts.get("success").copied().unwrap_or(0),
                timed_out: counts.get("timeout").copied().unwrap_or(0),
                errored: counts.get("error").copied().unwrap_or(0),
            })
            .await;

        collation
    }
}

fn timeout_response(agent_id: &str, duration: Duration) -> AgentResponse {
    AgentResponse {
        agent_name: agent_id.to_string(),
        recommendation: String::new(),
        confidence: 0.0,
        binding_constraints: Vec::new(),
        reasoning: String::new(),
        data_sources: Vec::new(),
        extracted_flight_info: None,
        status: AgentStatus::Timeout,
        duration,
        error: Some("deadline exceeded".to_string()),
        timestamp: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::client_wrapper::{ClientWrapper, Message, Role};
    use crate::orchestrator::event::LoggingEventHandler;
    use crate::orchestrator::model_gateway::ModelGateway;
    use crate::orchestrator::schema::DisruptionPayload;
    use crate::orchestrator::tool_protocol::{ToolError, ToolMetadata, ToolProtocol, ToolResult};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct ScriptedClient {
        model: String,
        responses: Mutex<Vec<String>>,
        delay: Duration,
    }

    #[async_trait]
    impl ClientWrapper for ScriptedClient {
        async fn send_message(&self, _messages: &[Message]) -> Result<Message, Box<dyn std::error::Error + Send + Sync>> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let mut responses = self.responses.lock().unwrap();
            let text = responses.remove(0);
            Ok(Message {
                role: Role::Assistant,
                content: std::sync::Arc::from(text.as_str()),
            })
        }

        fn model_name(&self) -> &str {
            &self.model
        }
    }

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

    fn flight_info_response() -> String {
        r#"{"flight_number": "EY123", "date": "2026-02-03", "disruption_event": "mechanical failure"}"#.to_string()
    }

    fn agent_output_response(text: &str) -> String {
        format!(
            r#"{{"recommendation": "{}", "confidence": 0.8, "binding_constraints": [], "reasoning": "ok", "data_sources": []}}"#,
            text
        )
    }

    #[tokio::test]
    async fn all_agents_run_concurrently_and_collate() {
        let client_a = Arc::new(ScriptedClient {
            model: "a".to_string(),
            responses: Mutex::new(vec![flight_info_response(), agent_output_response("plan a")]),
            delay: Duration::ZERO,
        });
        let client_b = Arc::new(ScriptedClient {
            model: "b".to_string(),
            responses: Mutex::new(vec![flight_info_response(), agent_output_response("plan b")]),
            delay: Duration::ZERO,
        });

        let gateway_a = Arc::new(ModelGateway::new(vec![client_a], Arc::new(LoggingEventHandler)));
        let runtime_a = Arc::new(AgentRuntime::new(gateway_a, Arc::new(NoOpToolProtocol), Arc::new(LoggingEventHandler), 5));

        // Both agents share one runtime/gateway pairing here for simplicity;
        // production wiring gives each agent its own catalogue entry but the
        // same shared ModelGateway instance.
        let executor = PhaseExecutor::new(runtime_a, Arc::new(LoggingEventHandler), 8, Duration::from_secs(5), Duration::from_secs(10));

        let definitions = vec![
            AgentDefinition {
                agent_id: "agent_a".to_string(),
                system_prompt: "You are agent a.".to_string(),
                authorized_tools: Vec::new(),
            },
            AgentDefinition {
                agent_id: "agent_b".to_string(),
                system_prompt: "You are agent b.".to_string(),
                authorized_tools: Vec::new(),
            },
        ];

        let registry = Arc::new(ConstraintRegistry::new(Vec::<String>::new()));
        let collation = executor
            .run_phase(
                "run-1",
                Phase::Initial,
                &definitions,
                |_| {
                    DisruptionPayload::initial(
                        "EY123 on 2026-02-03 had a mechanical failure",
                        chrono::NaiveDate::from_ymd_opt(2026, 2, 3).unwrap(),
                    )
                },
                registry,
                &[],
            )
            .await;

        assert_eq!(collation.responses.len(), 2);
        let _ = client_b;
    }

    #[tokio::test]
    async fn per_agent_deadline_produces_timeout_status() {
        let slow_client = Arc::new(ScriptedClient {
            model: "slow".to_string(),
            responses: Mutex::new(vec![flight_info_response(), agent_output_response("too slow")]),
            delay: Duration::from_millis(200),
        });
        let gateway = Arc::new(ModelGateway::new(vec![slow_client], Arc::new(LoggingEventHandler)));
        let runtime = Arc::new(AgentRuntime::new(gateway, Arc::new(NoOpToolProtocol), Arc::new(LoggingEventHandler), 5));
        let executor = PhaseExecutor::new(runtime, Arc::new(LoggingEventHandler), 8, Duration::from_millis(10), Duration::from_secs(5));

        let definitions = vec![AgentDefinition {
            agent_id: "slow_agent".to_string(),
            system_prompt: "You are slow.".to_string(),
            authorized_tools: Vec::new(),
        }];

        let registry = Arc::new(ConstraintRegistry::new(Vec::<String>::new()));
        let collation = executor
            .run_phase(
                "run-2",
                Phase::Initial,
                &definitions,
                |_| DisruptionPayload::initial("prompt", chrono::NaiveDate::from_ymd_opt(2026, 2, 3).unwrap()),
                registry,
                &[],
            )
            .await;

        assert_eq!(collation.responses["slow_agent"].status, AgentStatus::Timeout);
    }
}
