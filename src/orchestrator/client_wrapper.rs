//! Shared primitives for provider-agnostic LLM clients.
//!
//! Applications interact with LLM providers through the [`ClientWrapper`]
//! trait and the lightweight [`Message`]/[`Role`]/[`TokenUsage`] types below.
//! The trait abstracts over concrete vendor implementations so the Model
//! Gateway's fallback chain (§4.2) can hold a `Vec<Arc<dyn ClientWrapper>>`
//! without caring which provider backs each entry.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use aerocouncil::{ClientWrapper, Message, Role};
//! use aerocouncil::orchestrator::clients::openai::{Model, OpenAIClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let key = std::env::var("OPEN_AI_SECRET")?;
//!     let client = OpenAIClient::new_with_model_enum(&key, Model::GPT41Nano);
//!
//!     let response = client
//!         .send_message(&[Message {
//!             role: Role::User,
//!             content: Arc::from("Who are you?"),
//!         }])
//!         .await?;
//!
//!     println!("Assistant: {}", response.content);
//!     Ok(())
//! }
//! ```

use async_trait::async_trait;
use std::error::Error;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Represents the possible roles for a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

/// How many tokens were spent on prompt vs. completion.
#[derive(Clone, Debug)]
pub struct TokenUsage {
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub total_tokens: usize,
}

/// A generic message sent to or received from an LLM.
///
/// `content` is stored as `Arc<str>` so histories can be cheaply cloned by
/// the Agent Runtime across tool-call-loop iterations.
#[derive(Clone)]
pub struct Message {
    pub role: Role,
    pub content: Arc<str>,
}

/// Trait defining the interface to interact with various LLM services.
///
/// Streaming and multi-modal generation are out of scope for this crate
/// (there is no UI front door to stream into, §1 Non-goals) so the trait is
/// deliberately narrower than the teacher's: one request/response primitive
/// per provider, used by [`crate::orchestrator::model_gateway::ModelGateway`]
/// to build `complete`, `extract`, and `tool_call_loop` on top.
#[async_trait]
pub trait ClientWrapper: Send + Sync {
    /// Send a full request/response style chat completion.
    async fn send_message(&self, messages: &[Message]) -> Result<Message, Box<dyn Error + Send + Sync>>;

    /// Return the identifier used to select the upstream model (e.g. `"gpt-4.1"`).
    fn model_name(&self) -> &str;

    /// Hook to retrieve usage from the most recent [`ClientWrapper::send_message`] call.
    async fn get_last_usage(&self) -> Option<TokenUsage> {
        if let Some(slot) = self.usage_slot() {
            slot.lock().await.clone()
        } else {
            None
        }
    }

    /// Expose a shared mutable slot where the implementation can persist
    /// token usage. Providers that expose billing information should return
    /// `Some(&Mutex<Option<TokenUsage>>)`.
    fn usage_slot(&self) -> Option<&Mutex<Option<TokenUsage>>> {
        None
    }
}
