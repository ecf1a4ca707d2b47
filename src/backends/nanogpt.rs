use super::{
    Backend, BackendError, BackendUsage, ChatRequest, ChatResponse, Model, Tier,
};
use async_trait::async_trait;
use chrono::{Datelike, TimeZone, Utc};
use serde::Deserialize;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

/// Models known to be served by NanoGPT. "auto" lets the provider pick.
const KNOWN_MODELS: &[&str] = &[
    "claude-3.5-sonnet",
    "claude-3-opus",
    "gpt-4o",
    "gpt-4-turbo",
    "gemini-2.0-flash",
    "gemini-2.5-pro",
    "qwen-2.5-72b",
    "deepseek-chat",
    "auto",
];

/// NanoGPT backend: OpenAI-compatible JSON over HTTP with bearer auth.
pub struct NanoGptBackend {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
    quota: i64,
    used: AtomicI64,
}

#[derive(Deserialize)]
struct ModelList {
    data: Vec<Model>,
}

impl NanoGptBackend {
    pub fn new(api_key: &str, base_url: &str, monthly_quota: i64) -> Self {
        Self {
            api_key: api_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(60))
                .build()
                .unwrap_or_default(),
            quota: monthly_quota,
            used: AtomicI64::new(0),
        }
    }

    fn network_err(&self, source: reqwest::Error) -> BackendError {
        BackendError::Network {
            backend: self.name().to_string(),
            source,
        }
    }
}

#[async_trait]
impl Backend for NanoGptBackend {
    async fn chat_completion(&self, request: &ChatRequest) -> Result<ChatResponse, BackendError> {
        let url = format!("{}/chat/completions", self.base_url);

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| self.network_err(e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(BackendError::Api {
                backend: self.name().to_string(),
                status: status.as_u16(),
                body,
            });
        }

        let chat: ChatResponse = resp.json().await.map_err(|e| BackendError::Decode {
            backend: self.name().to_string(),
            detail: e.to_string(),
        })?;

        if chat.choices.is_empty() {
            return Err(BackendError::EmptyCompletion {
                backend: self.name().to_string(),
            });
        }

        self.used
            .fetch_add(chat.usage.total_tokens as i64, Ordering::Relaxed);

        Ok(chat)
    }

    async fn list_models(&self) -> Result<Vec<Model>, BackendError> {
        let url = format!("{}/models", self.base_url);

        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| self.network_err(e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(BackendError::Api {
                backend: self.name().to_string(),
                status: status.as_u16(),
                body,
            });
        }

        let list: ModelList = resp.json().await.map_err(|e| BackendError::Decode {
            backend: self.name().to_string(),
            detail: e.to_string(),
        })?;

        Ok(list.data)
    }

    fn name(&self) -> &str {
        "nanogpt"
    }

    fn tier(&self) -> Tier {
        Tier::Free
    }

    fn has_model(&self, model_id: &str) -> bool {
        KNOWN_MODELS.contains(&model_id)
    }

    fn usage(&self) -> BackendUsage {
        let used = self.used.load(Ordering::Relaxed);
        let now = Utc::now();
        // Quota resets on the 1st of next month.
        let (year, month) = if now.month() == 12 {
            (now.year() + 1, 1)
        } else {
            (now.year(), now.month() + 1)
        };
        let reset = Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0).single();

        BackendUsage {
            tokens_used: used,
            tokens_remaining: self.quota - used,
            tokens_limit: self.quota,
            reset_date: reset,
        }
    }
}
