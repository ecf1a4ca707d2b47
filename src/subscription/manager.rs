use super::{ModelDefinition, ModelListResponse, SubscriptionSelection};
use std::collections::HashSet;
use std::sync::RwLock;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(120);

/// Cap on how much of an error body gets quoted back in fetch errors.
const ERROR_BODY_LIMIT: usize = 1024;

#[derive(Debug, Error)]
pub enum SubscriptionError {
    #[error("no available subscription models")]
    NoModels,

    #[error("request to subscription API failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("subscription API responded with status {status}: {body}")]
    Api { status: u16, body: String },
}

struct Cache {
    models: Vec<ModelDefinition>,
    last_fetch: Option<Instant>,
}

/// Keeps subscription models cached with a TTL and tracks per-model
/// exhaustion. The exhausted set is monotonic for the process lifetime;
/// subscription slots reset on the provider's schedule, not ours.
pub struct SubscriptionManager {
    base_url: String,
    ttl: Duration,
    client: reqwest::Client,
    cache: RwLock<Cache>,
    exhausted: RwLock<HashSet<String>>,
}

impl SubscriptionManager {
    pub fn new(base_url: &str, ttl_seconds: u64) -> Self {
        let ttl = if ttl_seconds > 0 {
            Duration::from_secs(ttl_seconds)
        } else {
            DEFAULT_CACHE_TTL
        };

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            ttl,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            cache: RwLock::new(Cache {
                models: Vec::new(),
                last_fetch: None,
            }),
            exhausted: RwLock::new(HashSet::new()),
        }
    }

    /// Select the next cached model that supports `role`, is available, and
    /// has not been exhausted. Models are scanned in API order.
    pub async fn next_model(
        &self,
        role: &str,
    ) -> Result<SubscriptionSelection, SubscriptionError> {
        self.ensure_cache().await?;

        let models = {
            let cache = self.cache.read().expect("subscription cache poisoned");
            cache.models.clone()
        };

        for candidate in models {
            if !candidate.supports_role(role) || !candidate.is_available() {
                continue;
            }
            if self.is_exhausted(&candidate.id) {
                continue;
            }
            return Ok(SubscriptionSelection {
                model: candidate,
                role: role.to_string(),
            });
        }

        info!("all subscription models exhausted or unavailable");
        Err(SubscriptionError::NoModels)
    }

    /// Mark a model as consumed so it is not selected again until restart.
    pub fn mark_exhausted(&self, model_id: &str) {
        if model_id.is_empty() {
            return;
        }
        let mut exhausted = self.exhausted.write().expect("exhausted set poisoned");
        if exhausted.insert(model_id.to_string()) {
            info!(model = model_id, "subscription model marked exhausted");
        }
    }

    /// Force an immediate cache refresh.
    pub async fn refresh(&self) -> Result<(), SubscriptionError> {
        info!("manual subscription cache refresh requested");
        self.fetch().await
    }

    fn is_exhausted(&self, model_id: &str) -> bool {
        self.exhausted
            .read()
            .expect("exhausted set poisoned")
            .contains(model_id)
    }

    async fn ensure_cache(&self) -> Result<(), SubscriptionError> {
        let (has_cache, stale) = {
            let cache = self.cache.read().expect("subscription cache poisoned");
            let stale = cache
                .last_fetch
                .map(|t| t.elapsed() >= self.ttl)
                .unwrap_or(true);
            (!cache.models.is_empty(), stale)
        };

        if has_cache && !stale {
            debug!("subscription cache hit");
            return Ok(());
        }

        debug!("subscription cache miss or stale, fetching");
        if let Err(err) = self.fetch().await {
            let cache = self.cache.read().expect("subscription cache poisoned");
            if !cache.models.is_empty() {
                warn!(error = %err, "subscription fetch failed, serving stale cache");
                return Ok(());
            }
            return Err(err);
        }

        Ok(())
    }

    async fn fetch(&self) -> Result<(), SubscriptionError> {
        let url = format!("{}/api/subscription/v1/models", self.base_url);
        let resp = self.client.get(&url).send().await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let body = body.chars().take(ERROR_BODY_LIMIT).collect::<String>();
            return Err(SubscriptionError::Api {
                status: status.as_u16(),
                body: body.trim().to_string(),
            });
        }

        let payload: ModelListResponse = resp.json().await?;

        let count = payload.models.len();
        {
            let mut cache = self.cache.write().expect("subscription cache poisoned");
            cache.models = payload.models;
            cache.last_fetch = Some(Instant::now());
        }

        info!(models = count, "subscription cache refreshed");
        Ok(())
    }
}
