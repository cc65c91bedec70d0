//! Google Gemini client wrapper exposing the [`ClientWrapper`] trait.
//!
//! Gemini is accessed through its OpenAI-compatible chat completions
//! endpoint, the same way the teacher wires it up; image generation is
//! dropped (out of scope here).
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use aerocouncil::{ClientWrapper, Message, Role};
//! use aerocouncil::orchestrator::clients::gemini::{GeminiClient, Model};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let key = std::env::var("GEMINI_KEY")?;
//!     let client = GeminiClient::new_with_model_enum(&key, Model::Gemini25Flash);
//!     let reply = client
//!         .send_message(&[Message {
//!             role: Role::User,
//!             content: Arc::<str>::from("What rebooking options exist for EY123?"),
//!         }])
//!         .await?;
//!     println!("{}", reply.content);
//!     Ok(())
//! }
//! ```

use async_trait::async_trait;
use openai_rust2 as openai_rust;
use openai_rust::chat;
use std::error::Error;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::orchestrator::client_wrapper::{ClientWrapper, Message, Role, TokenUsage};
use crate::orchestrator::clients::common::send_and_track;

/// Client wrapper for Google Gemini chat-style endpoints.
pub struct GeminiClient {
    client: openai_rust::Client,
    model: String,
    token_usage: Mutex<Option<TokenUsage>>,
}

/// Gemini model identifiers.
pub enum Model {
    Gemini20Flash,
    Gemini15Flash,
    Gemini15Pro,
    Gemini25Flash,
    Gemini25Pro,
}

pub fn model_to_string(model: Model) -> String {
    match model {
        Model::Gemini20Flash => "gemini-2.0-flash".to_string(),
        Model::Gemini15Flash => "gemini-1.5-flash".to_string(),
        Model::Gemini15Pro => "gemini-1.5-pro".to_string(),
        Model::Gemini25Flash => "gemini-2.5-flash".to_string(),
        Model::Gemini25Pro => "gemini-2.5-pro".to_string(),
    }
}

impl GeminiClient {
    /// Construct a client using the default Gemini base URL and an explicit model name.
    pub fn new_with_model_string(secret_key: &str, model_name: &str) -> Self {
        use crate::orchestrator::clients::common::get_shared_http_client;
        let base_url = "https://generativelanguage.googleapis.com/v1beta";
        GeminiClient {
            client: openai_rust::Client::new_with_client_and_base_url(
                secret_key,
                get_shared_http_client().clone(),
                &format!("{}/", base_url),
            ),
            model: model_name.to_string(),
            token_usage: Mutex::new(None),
        }
    }

    pub fn new_with_model_enum(secret_key: &str, model: Model) -> Self {
        Self::new_with_model_string(secret_key, &model_to_string(model))
    }

    /// `base_url` should not have a trailing slash (e.g.
    /// `"https://generativelanguage.googleapis.com/v1beta"`).
    pub fn new_with_base_url(secret_key: &str, model_name: &str, base_url: &str) -> Self {
        use crate::orchestrator::clients::common::get_shared_http_client;
        let normalized = base_url.trim_end_matches('/');
        GeminiClient {
            client: openai_rust::Client::new_with_client_and_base_url(
                secret_key,
                get_shared_http_client().clone(),
                &format!("{}/", normalized),
            ),
            model: model_name.to_string(),
            token_usage: Mutex::new(None),
        }
    }

    pub fn new_with_base_url_and_model_enum(
        secret_key: &str,
        model: Model,
        base_url: &str,
    ) -> Self {
        Self::new_with_base_url(secret_key, &model_to_string(model), base_url)
    }
}

#[async_trait]
impl ClientWrapper for GeminiClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn send_message(&self, messages: &[Message]) -> Result<Message, Box<dyn Error + Send + Sync>> {
        let mut formatted_messages = Vec::with_capacity(messages.len());
        for msg in messages {
            formatted_messages.push(chat::Message {
                role: match msg.role {
                    Role::System => "system".to_owned(),
                    Role::User => "user".to_owned(),
                    Role::Assistant => "assistant".to_owned(),
                },
                content: msg.content.to_string(),
            });
        }

        let result = send_and_track(
            &self.client,
            &self.model,
            formatted_messages,
            Some("/v1beta/chat/completions".to_string()),
            &self.token_usage,
        )
        .await;

        match result {
            Ok(content) => Ok(Message {
                role: Role::Assistant,
                content: Arc::from(content.as_str()),
            }),
            Err(e) => {
                log::error!("GeminiClient::send_message: {}", e);
                Err(e.into())
            }
        }
    }

    fn usage_slot(&self) -> Option<&Mutex<Option<TokenUsage>>> {
        Some(&self.token_usage)
    }
}
