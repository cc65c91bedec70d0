//! Data Fetcher: a small, typed interface onto the external operational
//! key/value store (§4.1), so agents need no knowledge of storage mechanics.
//!
//! The store itself is an external collaborator (§6) — this module owns
//! only the typed request/response shapes, the index-name registry, the
//! numeric normalization, and the retry policy around it. §9 flags the
//! teacher's ambient/global singleton store client as a pattern to
//! re-architect; here the store is an explicit `Arc<dyn DataStore>`
//! injected by the Orchestrator, mirroring the dependency-injection style
//! already used for [`crate::orchestrator::model_gateway::ModelGateway`].

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;

use crate::orchestrator::errors::OrchestratorError;

/// A single scalar value as returned by the store, before numeric
/// normalization. `Decimal` models the store's arbitrary-precision numeric
/// fields (§6: "Numeric fields may arrive as arbitrary-precision decimals").
#[derive(Debug, Clone)]
pub enum StoreValue {
    Text(String),
    Decimal(Decimal),
    Bool(bool),
    Null,
}

/// A plain record with stable key casing, as guaranteed by §4.1.
pub type RawRecord = HashMap<String, StoreValue>;

/// A record after numeric normalization: every [`StoreValue::Decimal`] has
/// been converted to an `f64` JSON number, ready for prompt assembly or
/// `extract` calls.
pub type NormalizedRecord = HashMap<String, JsonValue>;

/// Convert a raw store record into its normalized, agent-facing form
/// (§4.1: "high-precision decimals returned by the store are converted to
/// floating numbers for downstream use").
pub fn normalize_record(raw: RawRecord) -> NormalizedRecord {
    raw.into_iter()
        .map(|(key, value)| {
            let json_value = match value {
                StoreValue::Text(s) => JsonValue::String(s),
                StoreValue::Decimal(d) => d
                    .to_f64()
                    .map(|f| {
                        serde_json::Number::from_f64(f)
                            .map(JsonValue::Number)
                            .unwrap_or(JsonValue::Null)
                    })
                    .unwrap_or(JsonValue::Null),
                StoreValue::Bool(b) => JsonValue::Bool(b),
                StoreValue::Null => JsonValue::Null,
            };
            (key, json_value)
        })
        .collect()
}

/// A sort-key constraint for an indexed range query.
#[derive(Debug, Clone)]
pub enum SortKeyFilter {
    Equals(String),
    Between(String, String),
}

/// Declares the shape of one named secondary index, drawn from the fixed
/// registry configured at startup (§4.1: "callers identify indexes by
/// symbolic name drawn from a fixed registry of index definitions; unknown
/// names are a programmer error, not a runtime one").
#[derive(Debug, Clone)]
pub struct IndexDefinition {
    pub name: String,
    pub partition_key: String,
    pub sort_key: Option<String>,
}

/// Raw transport to the external key/value store. Implementations talk to
/// whatever store backs a deployment; [`InMemoryStore`] below is the
/// reference implementation used in tests.
#[async_trait]
pub trait DataStore: Send + Sync {
    async fn point_get(&self, primary_key: &str) -> Result<Option<RawRecord>, OrchestratorError>;

    async fn range_query(
        &self,
        index: &IndexDefinition,
        partition_value: &str,
        sort_filter: Option<&SortKeyFilter>,
    ) -> Result<Vec<RawRecord>, OrchestratorError>;

    async fn filter_scan(
        &self,
        predicate_description: &str,
        predicate: &(dyn Fn(&RawRecord) -> bool + Send + Sync),
    ) -> Result<Vec<RawRecord>, OrchestratorError>;
}

/// Retry policy for transient store errors (§4.1: "retried with exponential
/// backoff (initial 30 s, doubling, at most 5 attempts by default)").
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub initial_backoff: Duration,
    pub max_attempts: usize,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(30),
            max_attempts: 5,
        }
    }
}

async fn retry_transient<F, Fut, T>(policy: &RetryPolicy, mut attempt: F) -> Result<T, OrchestratorError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, OrchestratorError>>,
{
    let mut backoff = policy.initial_backoff;
    for attempt_index in 1..=policy.max_attempts {
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(OrchestratorError::Transient(msg)) => {
                if attempt_index == policy.max_attempts {
                    return Err(OrchestratorError::Transient(msg));
                }
                log::warn!(
                    "data fetcher: transient store error (attempt {}/{}): {}",
                    attempt_index,
                    policy.max_attempts,
                    msg
                );
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
            Err(other) => return Err(other),
        }
    }
    unreachable!("loop always returns on the final attempt")
}

/// Typed, retrying facade over a [`DataStore`] (§4.1).
pub struct DataFetcher {
    store: std::sync::Arc<dyn DataStore>,
    indexes: HashMap<String, IndexDefinition>,
    retry_policy: RetryPolicy,
}

impl DataFetcher {
    pub fn new(
        store: std::sync::Arc<dyn DataStore>,
        indexes: impl IntoIterator<Item = IndexDefinition>,
    ) -> Self {
        Self {
            store,
            indexes: indexes.into_iter().map(|d| (d.name.clone(), d)).collect(),
            retry_policy: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Point-get by primary key. Never errors on a missing key — returns `Ok(None)`.
    pub async fn point_get(&self, primary_key: &str) -> Result<Option<NormalizedRecord>, OrchestratorError> {
        let record = retry_transient(&self.retry_policy, || self.store.point_get(primary_key)).await?;
        Ok(record.map(normalize_record))
    }

    /// Indexed range-query against a symbolic index name. Panics if `index_name`
    /// is not in the configured registry — per §4.1 this is a programmer error,
    /// not a runtime one, and must not be silently swallowed as `NotFound`.
    pub async fn range_query(
        &self,
        index_name: &str,
        partition_value: &str,
        sort_filter: Option<&SortKeyFilter>,
    ) -> Result<Vec<NormalizedRecord>, OrchestratorError> {
        let index = self
            .indexes
            .get(index_name)
            .unwrap_or_else(|| panic!("unknown index name '{}': programmer error, not a runtime one", index_name));

        let records = retry_transient(&self.retry_policy, || {
            self.store.range_query(index, partition_value, sort_filter)
        })
        .await?;

        Ok(records.into_iter().map(normalize_record).collect())
    }

    /// Filter-scan. MUST only be used when no index applies (§4.1); logs a
    /// warning every time, since scans are the expensive fallback path.
    pub async fn filter_scan(
        &self,
        predicate_description: &str,
        predicate: &(dyn Fn(&RawRecord) -> bool + Send + Sync),
    ) -> Result<Vec<NormalizedRecord>, OrchestratorError> {
        log::warn!(
            "data fetcher: performing filter-scan ({}); prefer an index when one exists",
            predicate_description
        );
        let records = retry_transient(&self.retry_policy, || {
            self.store.filter_scan(predicate_description, predicate)
        })
        .await?;
        Ok(records.into_iter().map(normalize_record).collect())
    }
}

/// Reference [`DataStore`] backed by an in-process map. Used by tests and
/// as a standalone demo harness; production deployments supply their own
/// `DataStore` implementation against the real operational store.
pub struct InMemoryStore {
    records: std::sync::RwLock<HashMap<String, RawRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            records: std::sync::RwLock::new(HashMap::new()),
        }
    }

    pub fn insert(&self, primary_key: impl Into<String>, record: RawRecord) {
        self.records.write().unwrap().insert(primary_key.into(), record);
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DataStore for InMemoryStore {
    async fn point_get(&self, primary_key: &str) -> Result<Option<RawRecord>, OrchestratorError> {
        Ok(self.records.read().unwrap().get(primary_key).cloned())
    }

    async fn range_query(
        &self,
        index: &IndexDefinition,
        partition_value: &str,
        sort_filter: Option<&SortKeyFilter>,
    ) -> Result<Vec<RawRecord>, OrchestratorError> {
        let records = self.records.read().unwrap();
        let matches = records
            .values()
            .filter(|record| match record.get(&index.partition_key) {
                Some(StoreValue::Text(v)) => v == partition_value,
                _ => false,
            })
            .filter(|record| match (&index.sort_key, sort_filter) {
                (Some(sort_key), Some(SortKeyFilter::Equals(expected))) => {
                    matches!(record.get(sort_key), Some(StoreValue::Text(v)) if v == expected)
                }
                (Some(sort_key), Some(SortKeyFilter::Between(lo, hi))) => match record.get(sort_key) {
                    Some(StoreValue::Text(v)) => v.as_str() >= lo.as_str() && v.as_str() <= hi.as_str(),
                    _ => false,
                },
                _ => true,
            })
            .cloned()
            .collect();
        Ok(matches)
    }

    async fn filter_scan(
        &self,
        _predicate_description: &str,
        predicate: &(dyn Fn(&RawRecord) -> bool + Send + Sync),
    ) -> Result<Vec<RawRecord>, OrchestratorError> {
        let records = self.records.read().unwrap();
        Ok(records.values().filter(|r| predicate(r)).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_index() -> IndexDefinition {
        IndexDefinition {
            name: "flight_by_number".to_string(),
            partition_key: "flight_number".to_string(),
            sort_key: Some("date".to_string()),
        }
    }

    #[tokio::test]
    async fn point_get_on_missing_key_returns_none_not_error() {
        let store = InMemoryStore::new();
        let fetcher = DataFetcher::new(std::sync::Arc::new(store), vec![sample_index()]);
        let result = fetcher.point_get("does-not-exist").await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn decimal_fields_normalize_to_f64() {
        let store = InMemoryStore::new();
        let mut record = HashMap::new();
        record.insert("seats_available".to_string(), StoreValue::Decimal(Decimal::new(425, 1)));
        store.insert("EY123", record);

        let fetcher = DataFetcher::new(std::sync::Arc::new(store), vec![sample_index()]);
        let result = fetcher.point_get("EY123").await.unwrap().unwrap();
        assert_eq!(result.get("seats_available"), Some(&serde_json::json!(42.5)));
    }

    #[tokio::test]
    async fn range_query_filters_by_partition_and_sort_key() {
        let store = InMemoryStore::new();
        let mut record = HashMap::new();
        record.insert("flight_number".to_string(), StoreValue::Text("EY123".to_string()));
        record.insert("date".to_string(), StoreValue::Text("2026-02-03".to_string()));
        store.insert("EY123#2026-02-03", record);

        let fetcher = DataFetcher::new(std::sync::Arc::new(store), vec![sample_index()]);
        let results = fetcher
            .range_query(
                "flight_by_number",
                "EY123",
                Some(&SortKeyFilter::Equals("2026-02-03".to_string())),
            )
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    #[should_panic(expected = "unknown index name")]
    async fn unknown_index_name_panics() {
        let store = InMemoryStore::new();
        let fetcher = DataFetcher::new(std::sync::Arc::new(store), vec![sample_index()]);
        let _ = fetcher.range_query("not_a_real_index", "x", None).await;
    }
}
