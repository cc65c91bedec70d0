//! Agent Runtime (§4.3): executes one agent in one phase and produces an
//! [`AgentResponse`].
//!
//! Deadline enforcement (per-agent timeout) is the Phase Executor's job
//! (§4.4) — it wraps [`AgentRuntime::run`] in `tokio::time::timeout` and
//! synthesizes the `status=timeout` response itself, so this module only
//! distinguishes `success` from `error` (and the truncated-but-successful
//! max-iterations case).

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;

use crate::orchestrator::catalogue::AgentDefinition;
use crate::orchestrator::constraint_registry::ConstraintRegistry;
use crate::orchestrator::errors::OrchestratorError;
use crate::orchestrator::event::{AgentEvent, EventHandler};
use crate::orchestrator::model_gateway::ModelGateway;
use crate::orchestrator::schema::{
    AgentResponse, AgentStatus, DisruptionPayload, FlightInfo, Phase, Severity,
};
use crate::orchestrator::tool_protocol::{ToolProtocol, ToolRegistry};

const FLIGHT_INFO_SCHEMA: &str = r#"{"flight_number": "string, matches EY followed by 3-4 digits", "date": "string, ISO-8601 YYYY-MM-DD", "disruption_event": "string, non-empty description"}"#;

/// Builds the `extract` schema description for `FlightInfo`, anchoring
/// relative-date resolution ("today", "yesterday", "tomorrow", weekday
/// names — §3) to `reference_date` so the model has a deterministic "today"
/// rather than guessing one.
fn flight_info_extraction_schema(reference_date: chrono::NaiveDate) -> String {
    format!(
        "{}\nTreat {} as \"today\". Resolve any relative date in the prompt (\"today\", \"yesterday\", \"tomorrow\", a weekday name) \
         relative to that date before filling in \"date\".",
        FLIGHT_INFO_SCHEMA, reference_date
    )
}

const AGENT_OUTPUT_INSTRUCTION: &str = "When you have finished reasoning and have no more tools to call, respond with ONLY a single JSON object (no prose, no markdown fences) of the form: \
{\"recommendation\": string, \"confidence\": number between 0 and 1, \"binding_constraints\": [string, ...], \"reasoning\": string, \"data_sources\": [string, ...]}. \
\"binding_constraints\" is a list of directives later phases MUST honor; prefix any constraint that must block the whole recovery effort with \"BLOCKING:\". \
\"data_sources\" names every Data Fetcher query you consulted.";

/// Executes one agent, for one phase, against a shared [`ModelGateway`] and
/// [`ToolProtocol`].
pub struct AgentRuntime {
    model_gateway: Arc<ModelGateway>,
    tool_protocol: Arc<dyn ToolProtocol>,
    event_handler: Arc<dyn EventHandler>,
    max_tool_iterations: usize,
}

impl AgentRuntime {
    pub fn new(
        model_gateway: Arc<ModelGateway>,
        tool_protocol: Arc<dyn ToolProtocol>,
        event_handler: Arc<dyn EventHandler>,
        max_tool_iterations: usize,
    ) -> Self {
        Self {
            model_gateway,
            tool_protocol,
            event_handler,
            max_tool_iterations,
        }
    }

    /// Execute `definition` against `payload`, consulting `constraint_registry`
    /// for the compact constraint rendering a revision-phase prompt needs.
    pub async fn run(
        &self,
        definition: &AgentDefinition,
        payload: &DisruptionPayload,
        constraint_registry: &ConstraintRegistry,
        is_safety_agent: bool,
    ) -> AgentResponse {
        let agent_id = definition.agent_id.clone();
        self.event_handler
            .on_agent_event(&AgentEvent::SendStarted {
                agent_id: agent_id.clone(),
                phase: payload.phase,
            })
            .await;

        let started = Instant::now();
        let response = self.run_inner(definition, payload, constraint_registry, is_safety_agent).await;
        let duration = started.elapsed();

        self.event_handler
            .on_agent_event(&AgentEvent::SendCompleted {
                agent_id: agent_id.clone(),
                phase: payload.phase,
                tokens_used: None,
                response_length: response.recommendation.len(),
            })
            .await;

        response
    }

    async fn run_inner(
        &self,
        definition: &AgentDefinition,
        payload: &DisruptionPayload,
        constraint_registry: &ConstraintRegistry,
        is_safety_agent: bool,
    ) -> AgentResponse {
        let agent_id = &definition.agent_id;
        let started = Instant::now();

        let system_prompt = self.assemble_system_prompt(definition, payload, constraint_registry);

        let schema = flight_info_extraction_schema(payload.reference_date);
        let extracted_flight_info = match self
            .model_gateway
            .extract(agent_id, &payload.user_prompt, &schema)
            .await
        {
            Ok(value) => match serde_json::from_value::<FlightInfo>(value) {
                Ok(flight_info) => {
                    let normalized = flight_info.normalized();
                    match normalized.validate() {
                        Ok(()) => Some(normalized),
                        Err(reason) => {
                            return error_response(agent_id, started, format!("FlightInfo validation failed: {}", reason));
                        }
                    }
                }
                Err(e) => {
                    return error_response(agent_id, started, format!("FlightInfo extraction produced an unparseable record: {}", e));
                }
            },
            Err(e) => {
                return error_response(agent_id, started, format!("FlightInfo extraction failed: {}", e));
            }
        };

        let registry = ToolRegistry::new(self.tool_protocol.clone(), definition.authorized_tools.clone());

        let outcome = match self
            .model_gateway
            .tool_call_loop(agent_id, &system_prompt, &registry, &payload.user_prompt, self.max_tool_iterations)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                return error_response(agent_id, started, format!("tool call loop failed: {}", e));
            }
        };

        let data_sources: Vec<String> = {
            let mut names: Vec<String> = outcome.iterations.iter().filter_map(|i| i.tool_name.clone()).collect();
            names.sort();
            names.dedup();
            names
        };

        let mut response = match parse_agent_output(&outcome.final_text) {
            Some(parsed) => AgentResponse {
                agent_name: agent_id.clone(),
                recommendation: parsed.recommendation,
                confidence: parsed.confidence.clamp(0.0, 1.0),
                binding_constraints: parsed.binding_constraints,
                reasoning: parsed.reasoning,
                data_sources,
                extracted_flight_info,
                status: AgentStatus::Success,
                duration: started.elapsed(),
                error: None,
                timestamp: Utc::now(),
            },
            None => AgentResponse {
                agent_name: agent_id.clone(),
                recommendation: outcome.final_text.clone(),
                confidence: 0.5,
                binding_constraints: Vec::new(),
                reasoning: "degraded_parse: model's final response was not valid structured output".to_string(),
                data_sources,
                extracted_flight_info,
                status: AgentStatus::Success,
                duration: started.elapsed(),
                error: None,
                timestamp: Utc::now(),
            },
        };

        if outcome.truncated {
            response
                .reasoning
                .push_str(&format!(" [truncated: reached max_tool_iterations={}]", self.max_tool_iterations));
        }

        if !response.binding_constraints.is_empty() && !is_safety_agent {
            log::warn!(
                "agent '{}' emitted {} binding constraint(s) but is not in the safety subset; dropping",
                agent_id,
                response.binding_constraints.len()
            );
            response.binding_constraints.clear();
        }

        if !response.binding_constraints.is_empty() {
            let max_severity = response
                .binding_constraints
                .iter()
                .map(|c| Severity::sniff_from_text(c))
                .max()
                .unwrap_or(Severity::Medium);
            self.event_handler
                .on_agent_event(&AgentEvent::ConstraintsPublished {
                    agent_id: agent_id.clone(),
                    count: response.binding_constraints.len(),
                    max_severity,
                })
                .await;
        }

        response
    }

    fn assemble_system_prompt(
        &self,
        definition: &AgentDefinition,
        payload: &DisruptionPayload,
        constraint_registry: &ConstraintRegistry,
    ) -> String {
        let mut prompt = definition.system_prompt.clone();
        prompt.push('\n');
        prompt.push_str(AGENT_OUTPUT_INSTRUCTION);

        if payload.phase == Phase::Revision {
            if let Some(peers) = &payload.peer_recommendations {
                prompt.push_str("\n\nPeer recommendations from the prior phase:\n");
                let mut peer_ids: Vec<&String> = peers.keys().collect();
                peer_ids.sort();
                for peer_id in peer_ids {
                    let peer = &peers[peer_id];
                    prompt.push_str(&format!("- {} ({:?}): {}\n", peer_id, peer.status, truncate(&peer.recommendation, 400)));
                }
            }

            let blocking_and_high = constraint_registry.query(Severity::High);
            if !blocking_and_high.is_empty() {
                prompt.push_str("\n\nBinding constraints you MUST honor:\n");
                for constraint in &blocking_and_high {
                    prompt.push_str(&format!("- [{:?}] ({}): {}\n", constraint.severity, constraint.source_agent, constraint.text));
                }
            }
        }

        prompt
    }
}

struct ParsedAgentOutput {
    recommendation: String,
    confidence: f64,
    binding_constraints: Vec<String>,
    reasoning: String,
}

fn parse_agent_output(text: &str) -> Option<ParsedAgentOutput> {
    let value: serde_json::Value = serde_json::from_str(text.trim()).ok().filter(serde_json::Value::is_object)?;
    Some(ParsedAgentOutput {
        recommendation: value.get("recommendation")?.as_str()?.to_string(),
        confidence: value.get("confidence").and_then(serde_json::Value::as_f64).unwrap_or(0.5),
        binding_constraints: value
            .get("binding_constraints")
            .and_then(serde_json::Value::as_array)
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default(),
        reasoning: value
            .get("reasoning")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default()
            .to_string(),
    })
}

fn error_response(agent_id: &str, started: Instant, error: String) -> AgentResponse {
    log::error!("agent '{}' terminated in error: {}", agent_id, error);
    AgentResponse {
        agent_name: agent_id.to_string(),
        recommendation: String::new(),
        confidence: 0.0,
        binding_constraints: Vec::new(),
        reasoning: String::new(),
        data_sources: Vec::new(),
        extracted_flight_info: None,
        status: AgentStatus::Error,
        duration: started.elapsed(),
        error: Some(error),
        timestamp: Utc::now(),
    }
}

fn truncate(text: &str, max_len: usize) -> String {
    if text.len() > max_len {
        format!("{}...", &text[..max_len])
    } else {
        text.to_string()
    }
}
