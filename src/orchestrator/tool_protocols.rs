//! Concrete [`crate::orchestrator::tool_protocol::ToolProtocol`] implementation
//! binding the three Data Fetcher operations (§4.1) as LLM-invocable tools.
//!
//! Grounded in the teacher's `tool_protocols.rs::CustomToolProtocol` — a
//! direct-Rust-function adapter — generalized here to wrap a single
//! [`DataFetcher`] instead of an open registry of arbitrary closures, since
//! every tool an agent can call in this crate is one of its three operations.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::orchestrator::data_fetcher::{DataFetcher, SortKeyFilter};
use crate::orchestrator::tool_protocol::{ToolError, ToolMetadata, ToolParameter, ToolParameterType, ToolProtocol, ToolResult};

const POINT_GET: &str = "point_get";
const RANGE_QUERY: &str = "range_query";
const FILTER_SCAN: &str = "filter_scan";

/// Wraps a [`DataFetcher`] as a [`ToolProtocol`], exposing `point_get`,
/// `range_query`, and `filter_scan` by name.
pub struct DataFetcherToolProtocol {
    fetcher: Arc<DataFetcher>,
}

impl DataFetcherToolProtocol {
    pub fn new(fetcher: Arc<DataFetcher>) -> Self {
        Self { fetcher }
    }

    async fn run_point_get(&self, parameters: JsonValue) -> Result<ToolResult, Box<dyn std::error::Error + Send + Sync>> {
        let primary_key = parameters
            .get("primary_key")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| ToolError::ExecutionFailed("point_get requires a 'primary_key' string parameter".to_string()))?;

        match self.fetcher.point_get(primary_key).await {
            Ok(Some(record)) => Ok(ToolResult::success(serde_json::to_value(record).unwrap_or(JsonValue::Null))),
            Ok(None) => Ok(ToolResult::success(JsonValue::Null)),
            Err(e) => Ok(ToolResult::failure(e.to_string())),
        }
    }

    async fn run_range_query(&self, parameters: JsonValue) -> Result<ToolResult, Box<dyn std::error::Error + Send + Sync>> {
        let index_name = parameters
            .get("index_name")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| ToolError::ExecutionFailed("range_query requires an 'index_name' string parameter".to_string()))?;
        let partition_value = parameters
            .get("partition_value")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| ToolError::ExecutionFailed("range_query requires a 'partition_value' string parameter".to_string()))?;

        let sort_filter = match (
            parameters.get("sort_equals").and_then(JsonValue::as_str),
            parameters.get("sort_between_low").and_then(JsonValue::as_str),
            parameters.get("sort_between_high").and_then(JsonValue::as_str),
        ) {
            (Some(equals), _, _) => Some(SortKeyFilter::Equals(equals.to_string())),
            (None, Some(lo), Some(hi)) => Some(SortKeyFilter::Between(lo.to_string(), hi.to_string())),
            _ => None,
        };

        match self.fetcher.range_query(index_name, partition_value, sort_filter.as_ref()).await {
            Ok(records) => Ok(ToolResult::success(serde_json::to_value(records).unwrap_or(JsonValue::Null))),
            Err(e) => Ok(ToolResult::failure(e.to_string())),
        }
    }

    /// `filter_scan` takes a declarative field-equality predicate from the
    /// model (`{"field": "status", "equals": "CANCELLED"}`) rather than an
    /// arbitrary Rust closure, since the predicate must cross the JSON
    /// tool-call boundary (§4.1's `Fn(&RawRecord) -> bool` is a host-side
    /// concept; an LLM can only ever describe a predicate declaratively).
    async fn run_filter_scan(&self, parameters: JsonValue) -> Result<ToolResult, Box<dyn std::error::Error + Send + Sync>> {
        let field = parameters
            .get("field")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| ToolError::ExecutionFailed("filter_scan requires a 'field' string parameter".to_string()))?
            .to_string();
        let expected = parameters
            .get("equals")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| ToolError::ExecutionFailed("filter_scan requires an 'equals' string parameter".to_string()))?
            .to_string();

        let description = format!("{} == {}", field, expected);
        let predicate = move |record: &crate::orchestrator::data_fetcher::RawRecord| -> bool {
            matches!(
                record.get(&field),
                Some(crate::orchestrator::data_fetcher::StoreValue::Text(v)) if v == &expected
            )
        };

        match self.fetcher.filter_scan(&description, &predicate).await {
            Ok(records) => Ok(ToolResult::success(serde_json::to_value(records).unwrap_or(JsonValue::Null))),
            Err(e) => Ok(ToolResult::failure(e.to_string())),
        }
    }
}

#[async_trait]
impl ToolProtocol for DataFetcherToolProtocol {
    async fn execute(
        &self,
        tool_name: &str,
        parameters: JsonValue,
    ) -> Result<ToolResult, Box<dyn std::error::Error + Send + Sync>> {
        match tool_name {
            POINT_GET => self.run_point_get(parameters).await,
            RANGE_QUERY => self.run_range_query(parameters).await,
            FILTER_SCAN => self.run_filter_scan(parameters).await,
            other => Err(Box::new(ToolError::NotFound(other.to_string()))),
        }
    }

    async fn list_tools(&self) -> Result<Vec<ToolMetadata>, Box<dyn std::error::Error + Send + Sync>> {
        Ok(vec![
            ToolMetadata::new(POINT_GET, "Fetch a single record by its primary key. Returns null if not found.")
                .with_parameter(
                    ToolParameter::new("primary_key", ToolParameterType::String)
                        .with_description("the record's primary key")
                        .required(),
                ),
            ToolMetadata::new(RANGE_QUERY, "Fetch records from a named secondary index, scoped to a partition value and optional sort-key filter.")
                .with_parameter(
                    ToolParameter::new("index_name", ToolParameterType::String)
                        .with_description("symbolic index name from the configured registry")
                        .required(),
                )
                .with_parameter(
                    ToolParameter::new("partition_value", ToolParameterType::String)
                        .with_description("value to match against the index's partition key")
                        .required(),
                )
                .with_parameter(ToolParameter::new("sort_equals", ToolParameterType::String).with_description("exact sort-key match"))
                .with_parameter(ToolParameter::new("sort_between_low", ToolParameterType::String).with_description("inclusive lower bound for a sort-key range"))
                .with_parameter(ToolParameter::new("sort_between_high", ToolParameterType::String).with_description("inclusive upper bound for a sort-key range")),
            ToolMetadata::new(FILTER_SCAN, "Scan all records for an exact field-equality match. Expensive; prefer range_query when an index exists.")
                .with_parameter(
                    ToolParameter::new("field", ToolParameterType::String)
                        .with_description("record field name to match")
                        .required(),
                )
                .with_parameter(
                    ToolParameter::new("equals", ToolParameterType::String)
                        .with_description("value the field must equal")
                        .required(),
                ),
        ])
    }

    fn protocol_name(&self) -> &str {
        "data_fetcher"
    }
}
