//! Tagged error hierarchy for the orchestration engine.
//!
//! The teacher crate propagates `Box<dyn Error>` and matches on provider error
//! strings at call sites. §9 of the specification flags this explicitly as a
//! pattern to re-architect: "prefer tagged sum types ... over string-matching
//! on provider error messages." [`OrchestratorError`] is that sum type; it is
//! shared by the Data Fetcher, Model Gateway, Agent Runtime, Phase Executor
//! and Orchestrator so that every layer can pattern-match on error *kind*
//! rather than inspecting message text.

use thiserror::Error;

/// Every fallible operation in the orchestration engine returns this error
/// type (or wraps it). Variant names match §9's redesign note verbatim.
#[derive(Debug, Error, Clone)]
pub enum OrchestratorError {
    /// The provider signalled throttling/quota exhaustion. Handled internally
    /// by the Model Gateway's fallback chain; only escapes when every
    /// candidate model is exhausted (see [`OrchestratorError::AllModelsUnavailable`]).
    #[error("throttled: {0}")]
    Throttled(String),

    /// Schema, FlightInfo, or proposal validation failed. Never retried.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A transient failure in an external dependency (store timeout, network
    /// blip). Retried with backoff at the call site before surfacing.
    #[error("transient error: {0}")]
    Transient(String),

    /// A non-retryable, non-validation failure (access denied, quota
    /// exceeded, malformed manifest, programmer error).
    #[error("fatal error: {0}")]
    Fatal(String),

    /// The operation was cancelled by a deadline or an enclosing scope.
    #[error("cancelled")]
    Cancelled,

    /// A tool-calling loop reached `max_iterations` without a final answer;
    /// the last model message is returned as the result alongside this
    /// marker so callers can distinguish a truncated answer from a real one.
    #[error("truncated after reaching max iterations")]
    Truncated,

    /// Every candidate model in the Model Gateway's fallback chain was
    /// exhausted (all either errored or were throttled in turn).
    #[error("all models unavailable: {0}")]
    AllModelsUnavailable(String),

    /// Requested key, index, or agent-id does not exist. Unknown index
    /// names and unknown agent-ids are programmer errors per §4.1/§7 and are
    /// fatal to the orchestration.
    #[error("not found: {0}")]
    NotFound(String),
}

impl OrchestratorError {
    /// True for error kinds the Model Gateway's fallback chain should react
    /// to by trying the next candidate model.
    pub fn is_throttled(&self) -> bool {
        matches!(self, OrchestratorError::Throttled(_))
    }

    /// True for error kinds that represent a terminal, non-retryable failure.
    pub fn is_fatal(&self) -> bool {
        matches!(self, OrchestratorError::Fatal(_) | OrchestratorError::NotFound(_))
    }

    /// Render a short, human-readable reason suitable for `AgentResponse::error`.
    pub fn as_reason(&self) -> String {
        self.to_string()
    }
}

impl From<OrchestratorError> for Box<dyn std::error::Error + Send + Sync> {
    fn from(e: OrchestratorError) -> Self {
        Box::new(e)
    }
}
