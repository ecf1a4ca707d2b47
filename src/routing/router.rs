use super::{ModelInfo, RankingsStore};
use crate::backends::Backend;
use crate::subscription::SubscriptionManager;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Result of model selection for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSelection {
    pub model_id: String,
    pub backend: String,
    pub reason: String,
    pub fallback: bool,
}

/// Selects the best {model, backend} pair for each role. Consults the
/// subscription tier first, then the static rankings document, and finally
/// lets the backend pick for itself.
pub struct ModelRouter {
    rankings: Arc<RankingsStore>,
    backends: HashMap<String, Arc<dyn Backend>>,
    subscription: Option<Arc<SubscriptionManager>>,
    default_profile: String,
}

impl ModelRouter {
    pub fn new(
        rankings: Arc<RankingsStore>,
        backends: HashMap<String, Arc<dyn Backend>>,
        subscription: Option<Arc<SubscriptionManager>>,
        default_profile: &str,
    ) -> Self {
        Self {
            rankings,
            backends,
            subscription,
            default_profile: default_profile.to_string(),
        }
    }

    /// Choose the model and backend for a role. Never fails: when every tier
    /// comes up empty the "auto" sentinel lets the backend's default apply.
    pub async fn select_for_role(&self, role: &str, profile: &str) -> ModelSelection {
        // Subscription tier first, when configured.
        if let Some(subscription) = &self.subscription {
            match subscription.next_model(role).await {
                Ok(selection) => {
                    let model_id = selection.model.id;
                    let usable = self
                        .backends
                        .get(profile)
                        .map(|b| b.has_model(&model_id))
                        .unwrap_or(false);

                    // Single-use reservation: exhaust immediately so two
                    // concurrent requests cannot claim the same slot. An
                    // unusable model is exhausted too rather than left
                    // cached as falsely available.
                    subscription.mark_exhausted(&model_id);

                    if usable {
                        debug!(
                            model = %model_id,
                            role,
                            profile,
                            "selected subscription model"
                        );
                        return ModelSelection {
                            model_id,
                            backend: profile.to_string(),
                            reason: "subscription model selected".to_string(),
                            fallback: false,
                        };
                    }
                    debug!(
                        model = %model_id,
                        profile,
                        "subscription model not available on backend, marked exhausted"
                    );
                }
                Err(err) => {
                    debug!(role, error = %err, "no subscription model, using rankings");
                }
            }
        }

        let rankings = self.rankings.current();

        // Fall back to the general ranking for unranked roles.
        let role_ranking = rankings.role(role).or_else(|| {
            warn!(role, "no ranking for role, using general");
            rankings.role("general")
        });

        let Some(role_ranking) = role_ranking else {
            return ModelSelection {
                model_id: "auto".to_string(),
                backend: self.default_profile.clone(),
                reason: "no rankings available".to_string(),
                fallback: true,
            };
        };

        // Availability over strict validation: an unknown profile degrades
        // to the default instead of failing the request.
        let (profile, backend) = match self.backends.get(profile) {
            Some(backend) => (profile.to_string(), backend),
            None => {
                warn!(profile, default = %self.default_profile, "unknown profile, using default");
                match self.backends.get(&self.default_profile) {
                    Some(backend) => (self.default_profile.clone(), backend),
                    None => {
                        error!(profile = %self.default_profile, "no backend available for profile");
                        return ModelSelection {
                            model_id: "auto".to_string(),
                            backend: self.default_profile.clone(),
                            reason: "no backend available".to_string(),
                            fallback: true,
                        };
                    }
                }
            }
        };

        if backend.has_model(&role_ranking.primary.model) {
            return ModelSelection {
                model_id: role_ranking.primary.model.clone(),
                backend: profile,
                reason: role_ranking.primary.reason.clone(),
                fallback: false,
            };
        }

        for fallback_model in &role_ranking.fallback {
            if backend.has_model(fallback_model) {
                return ModelSelection {
                    model_id: fallback_model.clone(),
                    backend: profile.clone(),
                    reason: "primary unavailable, using fallback".to_string(),
                    fallback: true,
                };
            }
        }

        if !role_ranking.subscription_alternative.is_empty()
            && backend.has_model(&role_ranking.subscription_alternative)
        {
            return ModelSelection {
                model_id: role_ranking.subscription_alternative.clone(),
                backend: profile,
                reason: "using free tier alternative".to_string(),
                fallback: true,
            };
        }

        ModelSelection {
            model_id: "auto".to_string(),
            backend: profile,
            reason: "no suitable model found, letting backend choose".to_string(),
            fallback: true,
        }
    }

    /// Ranking details for a model, when it is someone's primary.
    pub fn model_info(&self, model_id: &str) -> Option<ModelInfo> {
        let rankings = self.rankings.current();
        rankings
            .roles
            .values()
            .find(|r| r.primary.model == model_id)
            .map(|r| r.primary.clone())
    }

    /// All models ranked for a role, best first.
    pub fn models_for_role(&self, role: &str) -> Vec<String> {
        let rankings = self.rankings.current();
        let Some(ranking) = rankings.role(role) else {
            return Vec::new();
        };

        let mut models = vec![ranking.primary.model.clone()];
        models.extend(ranking.fallback.iter().cloned());
        if !ranking.subscription_alternative.is_empty() {
            models.push(ranking.subscription_alternative.clone());
        }
        models
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{
        Backend, BackendError, BackendUsage, ChatRequest, ChatResponse, Model, Tier,
    };
    use async_trait::async_trait;
    use tempfile::TempDir;

    /// Backend double that knows a fixed set of models.
    struct FakeBackend {
        name: String,
        models: Vec<String>,
    }

    impl FakeBackend {
        fn new(name: &str, models: &[&str]) -> Arc<dyn Backend> {
            Arc::new(Self {
                name: name.to_string(),
                models: models.iter().map(|m| m.to_string()).collect(),
            })
        }
    }

    #[async_trait]
    impl Backend for FakeBackend {
        async fn chat_completion(
            &self,
            _request: &ChatRequest,
        ) -> Result<ChatResponse, BackendError> {
            unimplemented!("not exercised by router tests")
        }

        async fn list_models(&self) -> Result<Vec<Model>, BackendError> {
            Ok(Vec::new())
        }

        fn name(&self) -> &str {
            &self.name
        }

        fn tier(&self) -> Tier {
            Tier::Free
        }

        fn has_model(&self, model_id: &str) -> bool {
            self.models.iter().any(|m| m == model_id)
        }

        fn usage(&self) -> BackendUsage {
            BackendUsage {
                tokens_used: 0,
                tokens_remaining: -1,
                tokens_limit: -1,
                reset_date: None,
            }
        }
    }

    fn store_with(document: &str) -> (TempDir, Arc<RankingsStore>) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rankings.json");
        std::fs::write(&path, document).unwrap();
        let store = Arc::new(RankingsStore::load(&path).unwrap());
        (dir, store)
    }

    fn rankings_document() -> &'static str {
        r#"{
            "roles": {
                "architect": {
                    "primary": {"model": "claude-3.5-sonnet", "reason": "reasoning capabilities"},
                    "fallback": ["gpt-4o", "gemini-2.5-pro"],
                    "subscription_alternative": "qwen-2.5-72b"
                },
                "general": {
                    "primary": {"model": "gpt-4o", "reason": "language understanding"},
                    "fallback": ["deepseek-chat"],
                    "subscription_alternative": ""
                }
            }
        }"#
    }

    #[tokio::test]
    async fn primary_model_selected_when_backend_has_it() {
        let (_dir, store) = store_with(rankings_document());
        let mut backends = HashMap::new();
        backends.insert(
            "nanogpt".to_string(),
            FakeBackend::new("nanogpt", &["claude-3.5-sonnet", "gpt-4o"]),
        );

        let router = ModelRouter::new(store, backends, None, "nanogpt");
        let selection = router.select_for_role("architect", "nanogpt").await;

        assert_eq!(selection.model_id, "claude-3.5-sonnet");
        assert!(!selection.fallback);
        assert_eq!(selection.reason, "reasoning capabilities");
    }

    #[tokio::test]
    async fn fallback_chain_used_when_primary_missing() {
        // Scenario: backend lacks the primary but has fallback[0].
        let (_dir, store) = store_with(rankings_document());
        let mut backends = HashMap::new();
        backends.insert(
            "nanogpt".to_string(),
            FakeBackend::new("nanogpt", &["gpt-4o"]),
        );

        let router = ModelRouter::new(store, backends, None, "nanogpt");
        let selection = router.select_for_role("architect", "nanogpt").await;

        assert_eq!(selection.model_id, "gpt-4o");
        assert!(selection.fallback);
    }

    #[tokio::test]
    async fn subscription_alternative_used_when_chain_exhausted() {
        let (_dir, store) = store_with(rankings_document());
        let mut backends = HashMap::new();
        backends.insert(
            "nanogpt".to_string(),
            FakeBackend::new("nanogpt", &["qwen-2.5-72b"]),
        );

        let router = ModelRouter::new(store, backends, None, "nanogpt");
        let selection = router.select_for_role("architect", "nanogpt").await;

        assert_eq!(selection.model_id, "qwen-2.5-72b");
        assert!(selection.fallback);
        assert_eq!(selection.reason, "using free tier alternative");
    }

    #[tokio::test]
    async fn unranked_role_falls_back_to_general() {
        let (_dir, store) = store_with(rankings_document());
        let mut backends = HashMap::new();
        backends.insert(
            "nanogpt".to_string(),
            FakeBackend::new("nanogpt", &["gpt-4o"]),
        );

        let router = ModelRouter::new(store, backends, None, "nanogpt");
        let selection = router.select_for_role("poetry", "nanogpt").await;

        assert_eq!(selection.model_id, "gpt-4o");
        assert!(!selection.fallback);
    }

    #[tokio::test]
    async fn auto_sentinel_when_no_rankings_exist() {
        let (_dir, store) = store_with(r#"{"roles": {}}"#);
        let mut backends = HashMap::new();
        backends.insert("nanogpt".to_string(), FakeBackend::new("nanogpt", &[]));

        let router = ModelRouter::new(store, backends, None, "nanogpt");
        let selection = router.select_for_role("architect", "nanogpt").await;

        assert_eq!(selection.model_id, "auto");
        assert!(selection.fallback);
    }

    #[tokio::test]
    async fn unknown_profile_degrades_to_default() {
        let (_dir, store) = store_with(rankings_document());
        let mut backends = HashMap::new();
        backends.insert(
            "nanogpt".to_string(),
            FakeBackend::new("nanogpt", &["claude-3.5-sonnet"]),
        );

        let router = ModelRouter::new(store, backends, None, "nanogpt");
        let selection = router.select_for_role("architect", "no-such-profile").await;

        assert_eq!(selection.backend, "nanogpt");
        assert_eq!(selection.model_id, "claude-3.5-sonnet");
    }

    #[tokio::test]
    async fn subscription_model_reserved_exactly_once() {
        // Scenario: the subscription API offers one architect model. The
        // first selection takes it; the second falls through to rankings.
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/subscription/v1/models")
            .with_status(200)
            .with_body(
                r#"{"models": [{"id": "m1", "status": "available", "roles": ["architect"]}]}"#,
            )
            .create_async()
            .await;

        let (_dir, store) = store_with(rankings_document());
        let mut backends = HashMap::new();
        backends.insert(
            "nanogpt".to_string(),
            FakeBackend::new("nanogpt", &["m1", "claude-3.5-sonnet"]),
        );
        let subscription = Arc::new(SubscriptionManager::new(&server.url(), 120));

        let router = ModelRouter::new(store, backends, Some(subscription), "nanogpt");

        let first = router.select_for_role("architect", "nanogpt").await;
        assert_eq!(first.model_id, "m1");
        assert_eq!(first.reason, "subscription model selected");
        assert!(!first.fallback);

        let second = router.select_for_role("architect", "nanogpt").await;
        assert_eq!(second.model_id, "claude-3.5-sonnet");
    }

    #[tokio::test]
    async fn unusable_subscription_model_is_exhausted_anyway() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/subscription/v1/models")
            .with_status(200)
            .with_body(
                r#"{"models": [{"id": "m1", "status": "available", "roles": ["architect"]}]}"#,
            )
            .create_async()
            .await;

        let (_dir, store) = store_with(rankings_document());
        let mut backends = HashMap::new();
        // Backend does not serve m1, so the subscription hit is unusable.
        backends.insert(
            "nanogpt".to_string(),
            FakeBackend::new("nanogpt", &["claude-3.5-sonnet"]),
        );
        let subscription = Arc::new(SubscriptionManager::new(&server.url(), 120));

        let router = ModelRouter::new(
            store,
            backends,
            Some(subscription.clone()),
            "nanogpt",
        );

        let selection = router.select_for_role("architect", "nanogpt").await;
        assert_eq!(selection.model_id, "claude-3.5-sonnet");

        // m1 must not come back on a later call.
        let err = subscription.next_model("architect").await.unwrap_err();
        assert!(matches!(
            err,
            crate::subscription::SubscriptionError::NoModels
        ));
    }

    #[tokio::test]
    async fn subscription_outage_does_not_abort_selection() {
        // Scenario: subscription endpoint down, cache empty. The router
        // proceeds straight to the static rankings.
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/subscription/v1/models")
            .with_status(500)
            .with_body("down")
            .create_async()
            .await;

        let (_dir, store) = store_with(rankings_document());
        let mut backends = HashMap::new();
        backends.insert(
            "nanogpt".to_string(),
            FakeBackend::new("nanogpt", &["claude-3.5-sonnet"]),
        );
        let subscription = Arc::new(SubscriptionManager::new(&server.url(), 120));

        let router = ModelRouter::new(store, backends, Some(subscription), "nanogpt");
        let selection = router.select_for_role("architect", "nanogpt").await;

        assert_eq!(selection.model_id, "claude-3.5-sonnet");
        assert!(!selection.fallback);
    }

    #[test]
    fn models_for_role_lists_all_tiers() {
        let (_dir, store) = store_with(rankings_document());
        let router = ModelRouter::new(store, HashMap::new(), None, "nanogpt");

        let models = router.models_for_role("architect");
        assert_eq!(
            models,
            vec!["claude-3.5-sonnet", "gpt-4o", "gemini-2.5-pro", "qwen-2.5-72b"]
        );
        assert!(router.models_for_role("unknown").is_empty());
    }
}
