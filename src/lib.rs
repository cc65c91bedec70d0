// src/lib.rs

// Import the top-level `orchestrator` module.
pub mod orchestrator;

// Re-exporting key items for easier external access, mirroring the crate-root
// re-export convention the teacher's lib.rs uses.
pub use orchestrator::agent_runtime::AgentRuntime;
pub use orchestrator::arbitrator::Arbitrator;
pub use orchestrator::client_wrapper::{ClientWrapper, Message, Role};
pub use orchestrator::config::OrchestratorConfig;
pub use orchestrator::errors::OrchestratorError;
pub use orchestrator::orchestrator_engine::Orchestrator;
pub use orchestrator::schema::{
    AgentResponse, BindingConstraint, Collation, DisruptionPayload, FlightInfo, Phase,
    ScoredScenario, Severity,
};
