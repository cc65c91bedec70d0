//! Agent catalogue: opaque, startup-loaded agent definitions.
//!
//! §9 flags the teacher's pattern of compiling agent personas and tool
//! bindings directly into Rust source (see `council.rs`'s hardcoded
//! `Agent::new(...)` call sites) as something to re-architect here: prompts
//! and authorized-tool lists are external configuration data, loaded once at
//! startup, never recompiled with agent logic.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::orchestrator::errors::OrchestratorError;

/// One agent's opaque configuration: its system prompt and the Data Fetcher
/// tool operations it may invoke. The orchestrator never inspects or
/// generates prompt text — it is treated as opaque data (§4.3, §9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDefinition {
    pub agent_id: String,
    pub system_prompt: String,
    #[serde(default)]
    pub authorized_tools: Vec<String>,
}

/// The full set of agent definitions for a deployment, keyed by agent id.
#[derive(Debug, Clone, Default)]
pub struct AgentCatalogue {
    agents: HashMap<String, AgentDefinition>,
    /// Preserves declaration order, since §4.4/§4.7 fan-out iterates agents
    /// in a stable order for deterministic tie-breaking (§4.6 step 7).
    order: Vec<String>,
}

impl AgentCatalogue {
    pub fn new(definitions: impl IntoIterator<Item = AgentDefinition>) -> Self {
        let mut agents = HashMap::new();
        let mut order = Vec::new();
        for definition in definitions {
            order.push(definition.agent_id.clone());
            agents.insert(definition.agent_id.clone(), definition);
        }
        Self { agents, order }
    }

    /// Load a catalogue from a JSON array of [`AgentDefinition`]s — the
    /// external configuration format a deployment ships alongside its
    /// binary (§9: "loaded once at startup ... never baked into compiled
    /// agent logic").
    pub fn from_json(raw: &str) -> Result<Self, OrchestratorError> {
        let definitions: Vec<AgentDefinition> =
            serde_json::from_str(raw).map_err(|e| OrchestratorError::Validation(format!("invalid agent catalogue JSON: {}", e)))?;
        if definitions.is_empty() {
            return Err(OrchestratorError::Validation("agent catalogue must define at least one agent".to_string()));
        }
        Ok(Self::new(definitions))
    }

    /// Load a catalogue from a JSON file on disk — the form a deployment
    /// actually ships in, one file alongside the binary.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, OrchestratorError> {
        let raw = std::fs::read_to_string(path.as_ref())
            .map_err(|e| OrchestratorError::Validation(format!("could not read agent catalogue file {}: {}", path.as_ref().display(), e)))?;
        Self::from_json(&raw)
    }

    pub fn get(&self, agent_id: &str) -> Option<&AgentDefinition> {
        self.agents.get(agent_id)
    }

    /// Agent ids in catalogue declaration order.
    pub fn agent_ids(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
