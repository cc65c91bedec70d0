//! Agent and orchestration event system.
//!
//! A callback-based observability layer. Implement [`EventHandler`] to
//! receive real-time notifications about LLM round-trips, tool calls,
//! model-gateway fallbacks, constraint publication, and phase transitions.
//! Both methods have default no-op implementations, so a handler only
//! overrides what it cares about.

use crate::orchestrator::client_wrapper::TokenUsage;
use crate::orchestrator::schema::{Phase, Severity};
use async_trait::async_trait;

/// Events emitted by an agent during a single [`crate::AgentRuntime::run`] call.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// Fired at the start of an agent invocation.
    SendStarted {
        agent_id: String,
        phase: Phase,
    },

    /// Fired when the invocation returns, successfully or not.
    SendCompleted {
        agent_id: String,
        phase: Phase,
        tokens_used: Option<TokenUsage>,
        response_length: usize,
    },

    /// Fired before each LLM round-trip inside the tool-call loop.
    LLMCallStarted {
        agent_id: String,
        iteration: usize,
    },

    /// Fired after each LLM round-trip completes.
    LLMCallCompleted {
        agent_id: String,
        iteration: usize,
        tokens_used: Option<TokenUsage>,
    },

    /// A tool call was parsed out of the model's response.
    ToolCallDetected {
        agent_id: String,
        tool_name: String,
        parameters: serde_json::Value,
        iteration: usize,
    },

    /// A tool finished executing.
    ToolExecutionCompleted {
        agent_id: String,
        tool_name: String,
        success: bool,
        error: Option<String>,
        iteration: usize,
    },

    /// The agent attempted to invoke a tool it is not authorized to use
    /// (§4.3: "Authorized tool list is enforced ... unauthorized tool
    /// invocation attempts are refused, not silently permitted").
    UnauthorizedToolAttempt {
        agent_id: String,
        tool_name: String,
    },

    /// The tool-call loop hit `max_tool_iterations` without a final answer.
    ToolMaxIterationsReached {
        agent_id: String,
    },

    /// The Model Gateway fell back to the next candidate model after a
    /// throttling error (§4.2).
    ModelFallback {
        agent_id: String,
        from_model: String,
        to_model: String,
        reason: String,
    },

    /// An agent published one or more binding constraints to the registry (§4.3, §4.5).
    ConstraintsPublished {
        agent_id: String,
        count: usize,
        max_severity: Severity,
    },
}

/// Events emitted by the [`crate::Orchestrator`] during a [`crate::Orchestrator::run`] call.
#[derive(Debug, Clone)]
pub enum OrchestrationEvent {
    RunStarted {
        run_id: String,
        agent_count: usize,
    },

    RunCompleted {
        run_id: String,
        total_duration_ms: u128,
        total_tokens: usize,
    },

    PhaseStarted {
        run_id: String,
        phase: Phase,
        agent_count: usize,
    },

    PhaseCompleted {
        run_id: String,
        phase: Phase,
        succeeded: usize,
        timed_out: usize,
        errored: usize,
    },

    /// A blocking constraint was registered and the run is terminating early (§4.5).
    EarlyTerminationBlocked {
        run_id: String,
        source_agent: String,
        constraint_text: String,
    },

    /// An agent failed (error or timeout); the phase continues with the
    /// remaining agents (§4.4: a slow or failing agent must not stall
    /// progress on the rest).
    AgentFailed {
        run_id: String,
        agent_id: String,
        phase: Phase,
        reason: String,
    },

    /// The global deadline was reached before the run completed (§4.7, §8 property 6).
    GlobalDeadlineExceeded {
        run_id: String,
        elapsed_ms: u128,
    },
}

/// Trait for receiving agent and orchestration events. Both methods default
/// to a no-op so a handler only implements what it observes.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn on_agent_event(&self, _event: &AgentEvent) {}
    async fn on_orchestration_event(&self, _event: &OrchestrationEvent) {}
}

/// An [`EventHandler`] that logs every event at `debug` level via the `log`
/// facade. Used as the default handler when the caller supplies none.
pub struct LoggingEventHandler;

#[async_trait]
impl EventHandler for LoggingEventHandler {
    async fn on_agent_event(&self, event: &AgentEvent) {
        log::debug!("agent event: {:?}", event);
    }

    async fn on_orchestration_event(&self, event: &OrchestrationEvent) {
        log::debug!("orchestration event: {:?}", event);
    }
}
