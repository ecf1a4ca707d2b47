mod nanogpt;
mod vertex;

pub use nanogpt::NanoGptBackend;
pub use vertex::VertexBackend;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Errors surfaced by concrete backends. Upstream failures keep the raw
/// status and body so they are never masked on the way to the caller.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("{backend} returned status {status}: {body}")]
    Api {
        backend: String,
        status: u16,
        body: String,
    },

    #[error("request to {backend} failed: {source}")]
    Network {
        backend: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to decode {backend} response: {detail}")]
    Decode { backend: String, detail: String },

    #[error("{backend} returned a completion with no choices")]
    EmptyCompletion { backend: String },
}

/// Backend tier, used for reporting only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Free,
    Paid,
    Enterprise,
}

/// A single message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
        }
    }
}

/// OpenAI-compatible chat completion request, extended with the gateway's
/// routing fields (`role`, `conversation_id`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub stream: bool,
    /// Task category hint (architect, implementation, ...) used for routing
    /// and prompt optimization.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

/// OpenAI-compatible chat completion response plus the gateway's metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub id: String,
    #[serde(default)]
    pub object: String,
    #[serde(default)]
    pub created: i64,
    pub model: String,
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub usage: TokenUsage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x_proxy_metadata: Option<ProxyMetadata>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    #[serde(default)]
    pub index: u32,
    pub message: ChatMessage,
    #[serde(default)]
    pub finish_reason: String,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

/// Routing/optimization metadata attached to every proxied response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProxyMetadata {
    pub backend: String,
    pub model_selected: String,
    pub original_prompt_length: usize,
    pub optimized_prompt_length: usize,
    pub prompt_engineer_time_ms: u64,
    pub strategy_used: String,
    pub selection_reason: String,
}

/// A model advertised by a backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Model {
    pub id: String,
    #[serde(default)]
    pub object: String,
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub owned_by: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub benchmarks: HashMap<String, f64>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
}

/// Quota snapshot for a backend. Negative limits mean "unmetered".
#[derive(Debug, Clone, Serialize)]
pub struct BackendUsage {
    pub tokens_used: i64,
    pub tokens_remaining: i64,
    pub tokens_limit: i64,
    pub reset_date: Option<DateTime<Utc>>,
}

/// Uniform interface over concrete LLM providers. The router and handlers
/// depend only on this trait, never on a concrete backend type.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Forward a canonical chat request to the provider and convert the
    /// provider response back into the canonical shape.
    async fn chat_completion(&self, request: &ChatRequest) -> Result<ChatResponse, BackendError>;

    async fn list_models(&self) -> Result<Vec<Model>, BackendError>;

    fn name(&self) -> &str;

    fn tier(&self) -> Tier;

    fn has_model(&self, model_id: &str) -> bool;

    fn usage(&self) -> BackendUsage;
}
