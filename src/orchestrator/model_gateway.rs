//! Model Gateway: hides LLM provider details behind three primitives —
//! `complete`, `extract`, and `tool_call_loop` (§4.2) — with a uniform
//! model-fallback protocol shared by all three.
//!
//! §9 flags the teacher's per-provider ad-hoc error propagation as a
//! pattern to re-architect: the fallback chain belongs one level below
//! the agent, here, so `extract` callers either get a value or a terminal
//! [`OrchestratorError`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::orchestrator::client_wrapper::{ClientWrapper, Message, Role};
use crate::orchestrator::errors::OrchestratorError;
use crate::orchestrator::event::{AgentEvent, EventHandler};
use crate::orchestrator::tool_protocol::ToolRegistry;

/// Per-iteration metrics for a [`ModelGateway::tool_call_loop`] call (§4.2:
/// "Observable metrics per iteration: iteration index, time in model call,
/// time in tool execution, tool name(s) invoked").
#[derive(Debug, Clone)]
pub struct ToolLoopIteration {
    pub iteration: usize,
    pub model_call_duration: Duration,
    pub tool_execution_duration: Option<Duration>,
    pub tool_name: Option<String>,
}

/// Outcome of a [`ModelGateway::tool_call_loop`] call.
#[derive(Debug, Clone)]
pub struct ToolLoopOutcome {
    pub final_text: String,
    pub truncated: bool,
    pub iterations: Vec<ToolLoopIteration>,
}

/// Uniform LLM invocation over an ordered fallback chain of providers.
pub struct ModelGateway {
    /// `chain[0]` is the designated primary; subsequent entries are tried
    /// in order on throttling errors (§4.2).
    chain: Vec<Arc<dyn ClientWrapper>>,
    event_handler: Arc<dyn EventHandler>,
}

impl ModelGateway {
    pub fn new(chain: Vec<Arc<dyn ClientWrapper>>, event_handler: Arc<dyn EventHandler>) -> Self {
        assert!(!chain.is_empty(), "model gateway requires at least one candidate model");
        Self { chain, event_handler }
    }

    /// Send `messages` through the fallback chain, returning the first
    /// non-throttled result. Propagates any non-throttling error
    /// immediately (§4.2: "On any other error, propagate immediately").
    async fn send_with_fallback(&self, agent_id: &str, messages: &[Message]) -> Result<Message, OrchestratorError> {
        let mut last_throttle: Option<String> = None;
        for (idx, client) in self.chain.iter().enumerate() {
            match client.send_message(messages).await {
                Ok(message) => return Ok(message),
                Err(err) => {
                    let classified = classify(&err);
                    if classified.is_throttled() {
                        let reason = classified.as_reason();
                        if let Some(next) = self.chain.get(idx + 1) {
                            self.event_handler
                                .on_agent_event(&AgentEvent::ModelFallback {
                                    agent_id: agent_id.to_string(),
                                    from_model: client.model_name().to_string(),
                                    to_model: next.model_name().to_string(),
                                    reason: reason.clone(),
                                })
                                .await;
                            log::warn!(
                                "model gateway: {} throttled on '{}', falling back to '{}': {}",
                                agent_id,
                                client.model_name(),
                                next.model_name(),
                                reason
                            );
                        }
                        last_throttle = Some(reason);
                        continue;
                    }
                    return Err(classified);
                }
            }
        }
        Err(OrchestratorError::AllModelsUnavailable(
            last_throttle.unwrap_or_else(|| "no candidate models configured".to_string()),
        ))
    }

    /// `complete(prompt)` — plain text completion (§4.2 primitive 1).
    pub async fn complete(&self, agent_id: &str, prompt: &str) -> Result<String, OrchestratorError> {
        let messages = vec![Message {
            role: Role::User,
            content: Arc::from(prompt),
        }];
        let response = self.send_with_fallback(agent_id, &messages).await?;
        Ok(response.content.to_string())
    }

    /// `extract(prompt, schema)` — structured-output extraction (§4.2
    /// primitive 2). `schema_description` is rendered into the prompt as
    /// an instruction; failures to parse the model's JSON are
    /// [`OrchestratorError::Validation`] and are never retried — "failures
    /// produce a typed error, never a partial record."
    pub async fn extract(
        &self,
        agent_id: &str,
        prompt: &str,
        schema_description: &str,
    ) -> Result<serde_json::Value, OrchestratorError> {
        let augmented = format!(
            "{}\n\nRespond with ONLY a single JSON object matching this schema, no prose:\n{}",
            prompt, schema_description
        );
        let messages = vec![Message {
            role: Role::User,
            content: Arc::from(augmented.as_str()),
        }];
        let response = self.send_with_fallback(agent_id, &messages).await?;
        parse_json_object(&response.content).ok_or_else(|| {
            OrchestratorError::Validation(format!(
                "extract: model response did not contain a valid JSON object: {}",
                truncate_for_log(&response.content)
            ))
        })
    }

    /// `tool_call_loop(system_prompt, tools, user_message, max_iterations)`
    /// (§4.2 primitive 3). The JSON-in-text tool-call convention
    /// (`{"tool_call": {"name": ..., "parameters": {...}}}`) mirrors the
    /// teacher's `council.rs::parse_tool_call`.
    pub async fn tool_call_loop(
        &self,
        agent_id: &str,
        system_prompt: &str,
        tools: &ToolRegistry,
        user_message: &str,
        max_iterations: usize,
    ) -> Result<ToolLoopOutcome, OrchestratorError> {
        let mut system_with_tools = system_prompt.to_string();
        let manifest = tools
            .authorized_tools()
            .await
            .map_err(|e| OrchestratorError::Fatal(format!("tool_call_loop: failed to list tools: {}", e)))?;
        if !manifest.is_empty() {
            system_with_tools.push_str("\n\nYou have access to the following tools:\n");
            for tool in &manifest {
                system_with_tools.push_str(&format!("- {}: {}\n", tool.name, tool.description));
            }
            system_with_tools.push_str(
                "\nTo use a tool, respond with a JSON object in the following format:\n\
                 {\"tool_call\": {\"name\": \"tool_name\", \"parameters\": {...}}}\n\
                 After tool execution, I'll provide the result and you can continue.\n",
            );
        }

        let mut messages = vec![
            Message {
                role: Role::System,
                content: Arc::from(system_with_tools.as_str()),
            },
            Message {
                role: Role::User,
                content: Arc::from(user_message),
            },
        ];

        let mut iterations = Vec::new();
        let mut iteration = 0usize;

        loop {
            iteration += 1;
            self.event_handler
                .on_agent_event(&AgentEvent::LLMCallStarted {
                    agent_id: agent_id.to_string(),
                    iteration,
                })
                .await;

            let call_started = Instant::now();
            let response = self.send_with_fallback(agent_id, &messages).await?;
            let model_call_duration = call_started.elapsed();

            self.event_handler
                .on_agent_event(&AgentEvent::LLMCallCompleted {
                    agent_id: agent_id.to_string(),
                    iteration,
                    tokens_used: None,
                })
                .await;

            let content = response.content.to_string();

            if iteration > max_iterations {
                iterations.push(ToolLoopIteration {
                    iteration,
                    model_call_duration,
                    tool_execution_duration: None,
                    tool_name: None,
                });
                self.event_handler
                    .on_agent_event(&AgentEvent::ToolMaxIterationsReached {
                        agent_id: agent_id.to_string(),
                    })
                    .await;
                return Ok(ToolLoopOutcome {
                    final_text: content,
                    truncated: true,
                    iterations,
                });
            }

            match parse_tool_call(&content) {
                Some((tool_name, parameters)) => {
                    self.event_handler
                        .on_agent_event(&AgentEvent::ToolCallDetected {
                            agent_id: agent_id.to_string(),
                            tool_name: tool_name.clone(),
                            parameters: parameters.clone(),
                            iteration,
                        })
                        .await;

                    if !tools.is_authorized(&tool_name) {
                        self.event_handler
                            .on_agent_event(&AgentEvent::UnauthorizedToolAttempt {
                                agent_id: agent_id.to_string(),
                                tool_name: tool_name.clone(),
                            })
                            .await;
                    }

                    let tool_started = Instant::now();
                    let tool_result = tools.execute(&tool_name, parameters.clone()).await;
                    let tool_execution_duration = tool_started.elapsed();

                    let (success, result_text) = match &tool_result {
                        Ok(result) if result.success => (
                            true,
                            format!(
                                "Tool '{}' executed successfully. Result: {}",
                                tool_name,
                                serde_json::to_string_pretty(&result.output)
                                    .unwrap_or_else(|_| format!("{:?}", result.output))
                            ),
                        ),
                        Ok(result) => (
                            false,
                            format!(
                                "Tool '{}' failed. Error: {}",
                                tool_name,
                                result.error.clone().unwrap_or_else(|| "unknown error".to_string())
                            ),
                        ),
                        Err(e) => (false, format!("Tool '{}' execution error: {}", tool_name, e)),
                    };

                    self.event_handler
                        .on_agent_event(&AgentEvent::ToolExecutionCompleted {
                            agent_id: agent_id.to_string(),
                            tool_name: tool_name.clone(),
                            success,
                            error: if success { None } else { Some(result_text.clone()) },
                            iteration,
                        })
                        .await;

                    iterations.push(ToolLoopIteration {
                        iteration,
                        model_call_duration,
                        tool_execution_duration: Some(tool_execution_duration),
                        tool_name: Some(tool_name),
                    });

                    messages.push(Message {
                        role: Role::Assistant,
                        content: response.content.clone(),
                    });
                    messages.push(Message {
                        role: Role::User,
                        content: Arc::from(result_text.as_str()),
                    });
                }
                None => {
                    iterations.push(ToolLoopIteration {
                        iteration,
                        model_call_duration,
                        tool_execution_duration: None,
                        tool_name: None,
                    });
                    return Ok(ToolLoopOutcome {
                        final_text: content,
                        truncated: false,
                        iterations,
                    });
                }
            }
        }
    }
}

/// Reclassify an opaque `Box<dyn Error>` coming back from a
/// [`ClientWrapper`] into an [`OrchestratorError`]. [`common::classify_provider_error`]
/// already does this for `openai_rust2` errors; this handles the boxed
/// form returned across the trait boundary.
fn classify(err: &(dyn std::error::Error + Send + Sync)) -> OrchestratorError {
    if let Some(found) = err.downcast_ref::<OrchestratorError>() {
        return found.clone();
    }
    let message = err.to_string();
    let lowered = message.to_lowercase();
    if lowered.contains("throttl") || lowered.contains("rate limit") || lowered.contains("429") {
        OrchestratorError::Throttled(message)
    } else {
        OrchestratorError::Fatal(message)
    }
}

/// Parse a `{"tool_call": {"name": ..., "parameters": {...}}}` fragment out
/// of free-form model text via brace matching, the same convention the
/// teacher's `council.rs::parse_tool_call` uses.
fn parse_tool_call(response: &str) -> Option<(String, serde_json::Value)> {
    let start_idx = response.find("{\"tool_call\"")?;
    let chars: Vec<char> = response.chars().collect();
    let mut brace_count = 0;
    let mut end_idx = start_idx;

    for (i, ch) in chars.iter().enumerate().skip(start_idx) {
        if *ch == '{' {
            brace_count += 1;
        } else if *ch == '}' {
            brace_count -= 1;
            if brace_count == 0 {
                end_idx = i + 1;
                break;
            }
        }
    }

    if end_idx <= start_idx {
        return None;
    }

    let json_str: String = chars[start_idx..end_idx].iter().collect();
    let parsed: serde_json::Value = serde_json::from_str(&json_str).ok()?;
    let tool_call_obj = parsed.get("tool_call")?;
    let name = tool_call_obj.get("name")?.as_str()?.to_string();
    let parameters = tool_call_obj.get("parameters")?.clone();
    Some((name, parameters))
}

/// Best-effort extraction of a JSON object from a model response, tolerant
/// of surrounding prose or markdown code fences.
fn parse_json_object(text: &str) -> Option<serde_json::Value> {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(text.trim()) {
        if value.is_object() {
            return Some(value);
        }
    }
    let start = text.find('{')?;
    let chars: Vec<char> = text.chars().collect();
    let mut brace_count = 0;
    let mut end = start;
    for (i, ch) in chars.iter().enumerate().skip(start) {
        if *ch == '{' {
            brace_count += 1;
        } else if *ch == '}' {
            brace_count -= 1;
            if brace_count == 0 {
                end = i + 1;
                break;
            }
        }
    }
    if end <= start {
        return None;
    }
    let candidate: String = chars[start..end].iter().collect();
    serde_json::from_str::<serde_json::Value>(&candidate)
        .ok()
        .filter(|v| v.is_object())
}

fn truncate_for_log(text: &str) -> String {
    if text.len() > 200 {
        format!("{}...", &text[..200])
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::event::LoggingEventHandler;
    use crate::orchestrator::tool_protocol::{ToolError, ToolMetadata, ToolProtocol, ToolResult};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct ScriptedClient {
        model: String,
        responses: Mutex<Vec<Result<String, OrchestratorError>>>,
    }

    #[async_trait]
    impl ClientWrapper for ScriptedClient {
        async fn send_message(
            &self,
            _messages: &[Message],
        ) -> Result<Message, Box<dyn std::error::Error + Send + Sync>> {
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                panic!("scripted client exhausted");
            }
            match responses.remove(0) {
                Ok(text) => Ok(Message {
                    role: Role::Assistant,
                    content: Arc::from(text.as_str()),
                }),
                Err(e) => Err(Box::new(e)),
            }
        }

        fn model_name(&self) -> &str {
            &self.model
        }
    }

    #[tokio::test]
    async fn falls_back_to_secondary_on_throttle() {
        let primary = Arc::new(ScriptedClient {
            model: "primary".to_string(),
            responses: Mutex::new(vec![Err(OrchestratorError::Throttled("429".to_string()))]),
        });
        let secondary = Arc::new(ScriptedClient {
            model: "secondary".to_string(),
            responses: Mutex::new(vec![Ok("fallback result".to_string())]),
        });
        let gateway = ModelGateway::new(vec![primary, secondary], Arc::new(LoggingEventHandler));
        let result = gateway.complete("agent-1", "prompt").await.unwrap();
        assert_eq!(result, "fallback result");
    }

    #[tokio::test]
    async fn does_not_fall_back_on_non_throttle_error() {
        let primary = Arc::new(ScriptedClient {
            model: "primary".to_string(),
            responses: Mutex::new(vec![Err(OrchestratorError::Fatal("boom".to_string()))]),
        });
        let secondary = Arc::new(ScriptedClient {
            model: "secondary".to_string(),
            responses: Mutex::new(vec![Ok("should not be used".to_string())]),
        });
        let gateway = ModelGateway::new(vec![primary, secondary], Arc::new(LoggingEventHandler));
        let result = gateway.complete("agent-1", "prompt").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn all_models_throttled_is_terminal() {
        let primary = Arc::new(ScriptedClient {
            model: "primary".to_string(),
            responses: Mutex::new(vec![Err(OrchestratorError::Throttled("429".to_string()))]),
        });
        let secondary = Arc::new(ScriptedClient {
            model: "secondary".to_string(),
            responses: Mutex::new(vec![Err(OrchestratorError::Throttled("429".to_string()))]),
        });
        let gateway = ModelGateway::new(vec![primary, secondary], Arc::new(LoggingEventHandler));
        let result = gateway.complete("agent-1", "prompt").await;
        assert!(matches!(result, Err(OrchestratorError::AllModelsUnavailable(_))));
    }

    #[tokio::test]
    async fn extract_rejects_non_json_response() {
        let client = Arc::new(ScriptedClient {
            model: "primary".to_string(),
            responses: Mutex::new(vec![Ok("not json at all".to_string())]),
        });
        let gateway = ModelGateway::new(vec![client], Arc::new(LoggingEventHandler));
        let result = gateway.extract("agent-1", "extract this", "{}").await;
        assert!(matches!(result, Err(OrchestratorError::Validation(_))));
    }

    struct CountingToolProtocol {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ToolProtocol for CountingToolProtocol {
        async fn execute(
            &self,
            tool_name: &str,
            _parameters: serde_json::Value,
        ) -> Result<ToolResult, Box<dyn std::error::Error + Send + Sync>> {
            if tool_name == "point_get" {
                self.calls.fetch_add(1, Ordering::SeqCst);
                Ok(ToolResult::success(serde_json::json!({"found": true})))
            } else {
                Err(Box::new(ToolError::NotFound(tool_name.to_string())))
            }
        }

        async fn list_tools(&self) -> Result<Vec<ToolMetadata>, Box<dyn std::error::Error + Send + Sync>> {
            Ok(vec![ToolMetadata::new("point_get", "fetch by key")])
        }

        fn protocol_name(&self) -> &str {
            "counting"
        }
    }

    #[tokio::test]
    async fn tool_call_loop_executes_tool_then_returns_final_text() {
        let client = Arc::new(ScriptedClient {
            model: "primary".to_string(),
            responses: Mutex::new(vec![
                Ok(r#"{"tool_call": {"name": "point_get", "parameters": {"key": "EY123"}}}"#.to_string()),
                Ok("Here is the final answer.".to_string()),
            ]),
        });
        let gateway = ModelGateway::new(vec![client], Arc::new(LoggingEventHandler));
        let protocol = Arc::new(CountingToolProtocol {
            calls: AtomicUsize::new(0),
        });
        let registry = ToolRegistry::new(protocol, vec!["point_get".to_string()]);

        let outcome = gateway
            .tool_call_loop("agent-1", "You are helpful.", &registry, "look up EY123", 5)
            .await
            .unwrap();

        assert!(!outcome.truncated);
        assert_eq!(outcome.final_text, "Here is the final answer.");
        assert_eq!(outcome.iterations.len(), 2);
    }

    #[tokio::test]
    async fn tool_call_loop_truncates_at_max_iterations() {
        let always_tool_call = r#"{"tool_call": {"name": "point_get", "parameters": {"key": "EY123"}}}"#;
        let client = Arc::new(ScriptedClient {
            model: "primary".to_string(),
            responses: Mutex::new(vec![
                Ok(always_tool_call.to_string()),
                Ok(always_tool_call.to_string()),
                Ok("trailing text after hitting the cap".to_string()),
            ]),
        });
        let gateway = ModelGateway::new(vec![client], Arc::new(LoggingEventHandler));
        let protocol = Arc::new(CountingToolProtocol {
            calls: AtomicUsize::new(0),
        });
        let registry = ToolRegistry::new(protocol, vec!["point_get".to_string()]);

        let outcome = gateway
            .tool_call_loop("agent-1", "You are helpful.", &registry, "look up EY123", 2)
            .await
            .unwrap();

        assert!(outcome.truncated);
    }
}
