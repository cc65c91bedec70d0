//! Shared utilities used across provider client implementations.
//!
//! Mirrors the teacher's `clients/common.rs`: a process-wide pooled
//! [`reqwest::Client`] (kept warm across requests to avoid DNS/TLS churn)
//! plus a `send_and_track` helper that every OpenAI-compatible provider
//! wrapper reuses.

use crate::orchestrator::client_wrapper::TokenUsage;
use crate::orchestrator::errors::OrchestratorError;
use lazy_static::lazy_static;
use openai_rust2 as openai_rust;
use openai_rust::chat;
use std::time::Duration;
use tokio::sync::Mutex;

lazy_static! {
    /// Shared HTTP client with persistent connection pooling.
    static ref SHARED_HTTP_CLIENT: reqwest::Client = {
        reqwest::ClientBuilder::new()
            .pool_idle_timeout(Some(Duration::from_secs(90)))
            .pool_max_idle_per_host(10)
            .tcp_keepalive(Some(Duration::from_secs(60)))
            .timeout(Duration::from_secs(300))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to build shared HTTP client")
    };
}

/// Borrow the lazily initialised shared [`reqwest::Client`].
pub fn get_shared_http_client() -> &'static reqwest::Client {
    &SHARED_HTTP_CLIENT
}

/// Send a chat completion request, persist token usage, and surface the
/// assistant content. Classifies provider failures into
/// [`OrchestratorError::Throttled`] vs. [`OrchestratorError::Fatal`] so the
/// Model Gateway's fallback chain can react without string-matching at the
/// call site (§9 redesign note).
pub async fn send_and_track(
    api: &openai_rust::Client,
    model: &str,
    formatted_msgs: Vec<chat::Message>,
    url_path: Option<String>,
    usage_slot: &Mutex<Option<TokenUsage>>,
) -> Result<String, OrchestratorError> {
    let chat_arguments = chat::ChatArguments::new(model, formatted_msgs);

    let response = api.create_chat(chat_arguments, url_path).await;

    match response {
        Ok(response) => {
            let usage = TokenUsage {
                input_tokens: response.usage.prompt_tokens as usize,
                output_tokens: response.usage.completion_tokens as usize,
                total_tokens: response.usage.total_tokens as usize,
            };
            *usage_slot.lock().await = Some(usage);

            response
                .choices
                .first()
                .map(|c| c.message.content.clone())
                .ok_or_else(|| OrchestratorError::Fatal(format!("{model}: empty choices array")))
        }
        Err(e) => Err(classify_provider_error(model, &e)),
    }
}

/// Inspect a provider error and classify it as throttling vs. a terminal
/// failure. Provider SDKs surface throttling as an HTTP 429 (or a message
/// mentioning "rate limit"/"quota"); everything else is treated as
/// non-transient per §4.2 ("On any other error, propagate immediately").
pub fn classify_provider_error(model: &str, err: &openai_rust::Error) -> OrchestratorError {
    let message = err.to_string();
    let lowered = message.to_lowercase();
    if lowered.contains("429")
        || lowered.contains("rate limit")
        || lowered.contains("ratelimit")
        || lowered.contains("quota")
        || lowered.contains("throttl")
    {
        OrchestratorError::Throttled(format!("{model}: {message}"))
    } else {
        OrchestratorError::Fatal(format!("{model}: {message}"))
    }
}
