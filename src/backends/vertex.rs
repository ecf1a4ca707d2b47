use super::{
    Backend, BackendError, BackendUsage, ChatMessage, ChatRequest, ChatResponse, Choice, Model,
    Tier, TokenUsage,
};
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

const SUPPORTED_MODELS: &[&str] = &[
    "gemini-2.0-flash",
    "gemini-2.5-pro",
    "gemini-1.5-pro",
    "gemini-1.5-flash",
];

/// Vertex AI backend speaking the `generateContent` REST surface.
pub struct VertexBackend {
    project_id: String,
    location: String,
    access_token: String,
    base_url: String,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default, rename = "usageMetadata")]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Content,
    #[serde(default, rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct UsageMetadata {
    #[serde(default, rename = "promptTokenCount")]
    prompt_token_count: u32,
    #[serde(default, rename = "candidatesTokenCount")]
    candidates_token_count: u32,
    #[serde(default, rename = "totalTokenCount")]
    total_token_count: u32,
}

impl VertexBackend {
    pub fn new(project_id: &str, location: &str, access_token: &str) -> Self {
        let base_url = format!("https://{location}-aiplatform.googleapis.com/v1");
        Self::with_base_url(project_id, location, access_token, &base_url)
    }

    /// Override the endpoint, used by tests to point at a local server.
    pub fn with_base_url(
        project_id: &str,
        location: &str,
        access_token: &str,
        base_url: &str,
    ) -> Self {
        Self {
            project_id: project_id.to_string(),
            location: location.to_string(),
            access_token: access_token.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(60))
                .build()
                .unwrap_or_default(),
        }
    }

    /// Map canonical model ids to the versioned ids Vertex publishes.
    fn map_model_name(model: &str) -> &str {
        match model {
            "gemini-2.0-flash" => "gemini-2.0-flash-001",
            "gemini-2.5-pro" => "gemini-2.5-pro-002",
            "gemini-1.5-pro" => "gemini-1.5-pro-001",
            other => other,
        }
    }

    fn build_body(request: &ChatRequest) -> serde_json::Value {
        // Vertex has no system role on this surface; fold system turns in
        // as user turns, preserving order.
        let contents: Vec<serde_json::Value> = request
            .messages
            .iter()
            .map(|msg| {
                let role = match msg.role.as_str() {
                    "assistant" => "model",
                    _ => "user",
                };
                json!({
                    "role": role,
                    "parts": [{"text": msg.content}],
                })
            })
            .collect();

        let mut generation_config = serde_json::Map::new();
        if let Some(t) = request.temperature {
            generation_config.insert("temperature".to_string(), json!(t));
        }
        if let Some(m) = request.max_tokens {
            generation_config.insert("maxOutputTokens".to_string(), json!(m));
        }
        if let Some(p) = request.top_p {
            generation_config.insert("topP".to_string(), json!(p));
        }

        json!({
            "contents": contents,
            "generationConfig": generation_config,
        })
    }
}

#[async_trait]
impl Backend for VertexBackend {
    async fn chat_completion(&self, request: &ChatRequest) -> Result<ChatResponse, BackendError> {
        let model = Self::map_model_name(&request.model);
        let url = format!(
            "{}/projects/{}/locations/{}/publishers/google/models/{}:generateContent",
            self.base_url, self.project_id, self.location, model
        );

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&Self::build_body(request))
            .send()
            .await
            .map_err(|e| BackendError::Network {
                backend: self.name().to_string(),
                source: e,
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(BackendError::Api {
                backend: self.name().to_string(),
                status: status.as_u16(),
                body,
            });
        }

        let generated: GenerateContentResponse =
            resp.json().await.map_err(|e| BackendError::Decode {
                backend: self.name().to_string(),
                detail: e.to_string(),
            })?;

        if generated.candidates.is_empty() {
            return Err(BackendError::EmptyCompletion {
                backend: self.name().to_string(),
            });
        }

        let choices = generated
            .candidates
            .into_iter()
            .enumerate()
            .map(|(i, candidate)| {
                let text = candidate
                    .content
                    .parts
                    .into_iter()
                    .map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("");
                Choice {
                    index: i as u32,
                    message: ChatMessage::new("assistant", text),
                    finish_reason: candidate
                        .finish_reason
                        .unwrap_or_else(|| "stop".to_string())
                        .to_lowercase(),
                }
            })
            .collect();

        let usage = generated
            .usage_metadata
            .map(|u| TokenUsage {
                prompt_tokens: u.prompt_token_count,
                completion_tokens: u.candidates_token_count,
                total_tokens: u.total_token_count,
            })
            .unwrap_or_default();

        Ok(ChatResponse {
            id: format!("vertex-{}", uuid::Uuid::new_v4()),
            object: "chat.completion".to_string(),
            created: Utc::now().timestamp(),
            model: request.model.clone(),
            choices,
            usage,
            x_proxy_metadata: None,
        })
    }

    async fn list_models(&self) -> Result<Vec<Model>, BackendError> {
        let created = Utc::now().timestamp();
        Ok(SUPPORTED_MODELS
            .iter()
            .map(|id| Model {
                id: id.to_string(),
                object: "model".to_string(),
                created,
                owned_by: "google".to_string(),
                benchmarks: Default::default(),
                reason: String::new(),
            })
            .collect())
    }

    fn name(&self) -> &str {
        "vertex"
    }

    fn tier(&self) -> Tier {
        Tier::Enterprise
    }

    fn has_model(&self, model_id: &str) -> bool {
        SUPPORTED_MODELS.contains(&model_id)
    }

    fn usage(&self) -> BackendUsage {
        // Vertex quotas are per-request, not monthly tokens.
        BackendUsage {
            tokens_used: 0,
            tokens_remaining: -1,
            tokens_limit: -1,
            reset_date: None,
        }
    }
}
