//! Tool protocol abstraction layer.
//!
//! Trimmed from the teacher's multi-protocol (`MCP` / OpenAI-functions /
//! Memory) design down to a single local protocol, since every tool an
//! agent can invoke here is a Data Fetcher operation (§4.1, §4.3) — there
//! is no remote tool server to route to.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::error::Error;
use std::fmt;
use std::sync::Arc;

/// Result of a single tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    pub output: serde_json::Value,
    pub error: Option<String>,
}

impl ToolResult {
    pub fn success(output: serde_json::Value) -> Self {
        Self {
            success: true,
            output,
            error: None,
        }
    }

    pub fn failure(error: String) -> Self {
        Self {
            success: false,
            output: serde_json::Value::Null,
            error: Some(error),
        }
    }
}

/// Type of a tool parameter, used to render human-readable tool manifests
/// inside the system prompt the Model Gateway sees (§4.2: "tool-calling
/// with a supplied tool manifest").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ToolParameterType {
    String,
    Number,
    Object,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolParameter {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ToolParameterType,
    pub description: Option<String>,
    pub required: bool,
}

impl ToolParameter {
    pub fn new(name: impl Into<String>, param_type: ToolParameterType) -> Self {
        Self {
            name: name.into(),
            param_type,
            description: None,
            required: false,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// Metadata describing one invocable tool (one Data Fetcher operation).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolMetadata {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ToolParameter>,
}

impl ToolMetadata {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
        }
    }

    pub fn with_parameter(mut self, param: ToolParameter) -> Self {
        self.parameters.push(param);
        self
    }
}

/// Errors a [`ToolProtocol`] can surface.
#[derive(Debug, Clone)]
pub enum ToolError {
    NotFound(String),
    Unauthorized(String),
    ExecutionFailed(String),
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolError::NotFound(name) => write!(f, "tool not found: {}", name),
            ToolError::Unauthorized(name) => write!(f, "tool not authorized for this agent: {}", name),
            ToolError::ExecutionFailed(msg) => write!(f, "tool execution failed: {}", msg),
        }
    }
}

impl Error for ToolError {}

/// Trait for executing and describing tools. One implementation
/// ([`crate::orchestrator::tool_protocols::DataFetcherToolProtocol`]) backs
/// every agent in this crate.
#[async_trait]
pub trait ToolProtocol: Send + Sync {
    async fn execute(
        &self,
        tool_name: &str,
        parameters: serde_json::Value,
    ) -> Result<ToolResult, Box<dyn Error + Send + Sync>>;

    async fn list_tools(&self) -> Result<Vec<ToolMetadata>, Box<dyn Error + Send + Sync>>;

    fn protocol_name(&self) -> &str;
}

/// Binds a [`ToolProtocol`] to the subset of tool names a single agent is
/// authorized to invoke (§4.3: "Bind this agent's authorized tools ...
/// consulted by the Model Gateway, not by the LLM").
pub struct ToolRegistry {
    protocol: Arc<dyn ToolProtocol>,
    authorized: HashSet<String>,
}

impl ToolRegistry {
    pub fn new(protocol: Arc<dyn ToolProtocol>, authorized: impl IntoIterator<Item = String>) -> Self {
        Self {
            protocol,
            authorized: authorized.into_iter().collect(),
        }
    }

    pub fn is_authorized(&self, tool_name: &str) -> bool {
        self.authorized.contains(tool_name)
    }

    /// Tool manifest restricted to the authorized subset, in declaration order.
    pub async fn authorized_tools(&self) -> Result<Vec<ToolMetadata>, Box<dyn Error + Send + Sync>> {
        let all = self.protocol.list_tools().await?;
        Ok(all
            .into_iter()
            .filter(|t| self.authorized.contains(&t.name))
            .collect())
    }

    /// Execute a tool, refusing unauthorized names outright rather than
    /// forwarding them to the protocol.
    pub async fn execute(
        &self,
        tool_name: &str,
        parameters: serde_json::Value,
    ) -> Result<ToolResult, Box<dyn Error + Send + Sync>> {
        if !self.authorized.contains(tool_name) {
            return Err(Box::new(ToolError::Unauthorized(tool_name.to_string())));
        }
        self.protocol.execute(tool_name, parameters).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubProtocol;

    #[async_trait]
    impl ToolProtocol for StubProtocol {
        async fn execute(
            &self,
            _tool_name: &str,
            _parameters: serde_json::Value,
        ) -> Result<ToolResult, Box<dyn Error + Send + Sync>> {
            Ok(ToolResult::success(serde_json::json!({"ok": true})))
        }

        async fn list_tools(&self) -> Result<Vec<ToolMetadata>, Box<dyn Error + Send + Sync>> {
            Ok(vec![
                ToolMetadata::new("point_get", "fetch by key"),
                ToolMetadata::new("range_query", "fetch by index"),
            ])
        }

        fn protocol_name(&self) -> &str {
            "stub"
        }
    }

    #[tokio::test]
    async fn unauthorized_tool_is_refused() {
        let registry = ToolRegistry::new(Arc::new(StubProtocol), vec!["point_get".to_string()]);
        let result = registry.execute("range_query", serde_json::json!({})).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn authorized_tools_filters_manifest() {
        let registry = ToolRegistry::new(Arc::new(StubProtocol), vec!["point_get".to_string()]);
        let tools = registry.authorized_tools().await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "point_get");
    }
}
