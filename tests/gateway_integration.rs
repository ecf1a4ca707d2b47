//! End-to-end tests for the chat pipeline: enrichment, optimization,
//! routing, backend call, metadata, and usage recording, with every HTTP
//! dependency mocked.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use modelgate::api::{routes, ApiError, AppState};
use modelgate::backends::{Backend, ChatMessage, ChatRequest, NanoGptBackend};
use modelgate::context::ContextManager;
use modelgate::prompt::{PromptEngineer, StrategyDb};
use modelgate::research::ResearchSystem;
use modelgate::routing::{ModelRouter, RankingsStore};
use modelgate::storage::UsageTracker;
use modelgate::subscription::SubscriptionManager;
use std::collections::HashMap;
use std::sync::Arc;
use tempfile::TempDir;

const RANKINGS: &str = r#"{
    "updated": "2025-01-01T00:00:00Z",
    "roles": {
        "architect": {
            "primary": {"model": "claude-3.5-sonnet", "reason": "reasoning capabilities"},
            "fallback": ["gpt-4o"],
            "subscription_alternative": "qwen-2.5-72b"
        },
        "general": {
            "primary": {"model": "gpt-4o", "reason": "language understanding"},
            "fallback": ["deepseek-chat"],
            "subscription_alternative": ""
        }
    }
}"#;

const STRATEGIES: &str = r#"
strategies:
  architect:
    system_prompt: "You are an expert software architect."
    techniques: ["Ask for trade-offs"]
    constraints: ["Stay concise"]
"#;

const COMPLETION_BODY: &str = r#"{
    "id": "cmpl-1",
    "object": "chat.completion",
    "created": 1,
    "model": "claude-3.5-sonnet",
    "choices": [{
        "index": 0,
        "message": {"role": "assistant", "content": "here is a design"},
        "finish_reason": "stop"
    }],
    "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
}"#;

struct Fixture {
    _dir: TempDir,
    state: Arc<AppState>,
    usage: UsageTracker,
}

async fn fixture(
    backend_url: &str,
    subscription_url: Option<&str>,
    with_engineer: bool,
) -> Fixture {
    let dir = TempDir::new().unwrap();

    let rankings_path = dir.path().join("rankings.json");
    std::fs::write(&rankings_path, RANKINGS).unwrap();
    let rankings = Arc::new(RankingsStore::load(&rankings_path).unwrap());

    let backend: Arc<dyn Backend> = Arc::new(NanoGptBackend::new("key", backend_url, 60_000));
    let mut backends: HashMap<String, Arc<dyn Backend>> = HashMap::new();
    backends.insert("nanogpt".to_string(), backend.clone());

    let subscription =
        subscription_url.map(|url| Arc::new(SubscriptionManager::new(url, 120)));

    let router = Arc::new(ModelRouter::new(
        rankings.clone(),
        backends.clone(),
        subscription,
        "nanogpt",
    ));

    let engineer = if with_engineer {
        let strategies_path = dir.path().join("strategies.yaml");
        std::fs::write(&strategies_path, STRATEGIES).unwrap();
        let strategies = StrategyDb::load(&strategies_path).unwrap();
        Some(Arc::new(PromptEngineer::new(backend, strategies)))
    } else {
        None
    };

    let usage = UsageTracker::new(dir.path().join("usage.db")).await.unwrap();
    let research = Arc::new(ResearchSystem::new(rankings));

    let state = Arc::new(AppState {
        backends,
        router,
        engineer,
        context: Arc::new(ContextManager::new(HashMap::new())),
        usage: Some(usage.clone()),
        research: Some(research),
        scheduler: None,
        active_profile: "personal".to_string(),
        profiles: HashMap::from([("personal".to_string(), "nanogpt".to_string())]),
    });

    Fixture {
        _dir: dir,
        state,
        usage,
    }
}

fn chat_request(role: Option<&str>) -> ChatRequest {
    ChatRequest {
        model: String::new(),
        messages: vec![ChatMessage::new("user", "design a queue")],
        role: role.map(str::to_string),
        conversation_id: None,
        ..Default::default()
    }
}

#[tokio::test]
async fn chat_routes_optimizes_and_attaches_metadata() {
    let mut server = mockito::Server::new_async().await;
    // Serves both the optimizer call and the main completion.
    server
        .mock("POST", "/chat/completions")
        .with_status(200)
        .with_body(COMPLETION_BODY)
        .expect_at_least(2)
        .create_async()
        .await;

    let fx = fixture(&server.url(), None, true).await;

    let Json(response) = routes::chat_completions(
        State(fx.state.clone()),
        HeaderMap::new(),
        Json(chat_request(Some("architect"))),
    )
    .await
    .unwrap();

    assert_eq!(response.choices[0].message.content, "here is a design");

    let metadata = response.x_proxy_metadata.unwrap();
    assert_eq!(metadata.backend, "nanogpt");
    assert_eq!(metadata.model_selected, "claude-3.5-sonnet");
    assert_eq!(metadata.strategy_used, "architect");
    assert_eq!(metadata.selection_reason, "reasoning capabilities");
    assert!(metadata.optimized_prompt_length > 0);

    // The completed request landed in the usage log.
    assert_eq!(fx.usage.monthly_usage("nanogpt").await.unwrap(), 15);
}

#[tokio::test]
async fn subscription_model_used_once_then_rankings_take_over() {
    let mut backend_server = mockito::Server::new_async().await;
    backend_server
        .mock("POST", "/chat/completions")
        .with_status(200)
        .with_body(COMPLETION_BODY)
        .create_async()
        .await;

    let mut sub_server = mockito::Server::new_async().await;
    sub_server
        .mock("GET", "/api/subscription/v1/models")
        .with_status(200)
        .with_body(
            r#"{"models": [{"id": "qwen-2.5-72b", "status": "available", "roles": ["architect"]}]}"#,
        )
        .create_async()
        .await;

    let fx = fixture(&backend_server.url(), Some(&sub_server.url()), false).await;

    let Json(first) = routes::chat_completions(
        State(fx.state.clone()),
        HeaderMap::new(),
        Json(chat_request(Some("architect"))),
    )
    .await
    .unwrap();
    let metadata = first.x_proxy_metadata.unwrap();
    assert_eq!(metadata.selection_reason, "subscription model selected");

    // The single subscription slot is spent; the second request falls
    // through to the static ranking.
    let Json(second) = routes::chat_completions(
        State(fx.state.clone()),
        HeaderMap::new(),
        Json(chat_request(Some("architect"))),
    )
    .await
    .unwrap();
    let metadata = second.x_proxy_metadata.unwrap();
    assert_eq!(metadata.selection_reason, "reasoning capabilities");
}

#[tokio::test]
async fn subscription_outage_still_serves_the_request() {
    let mut backend_server = mockito::Server::new_async().await;
    backend_server
        .mock("POST", "/chat/completions")
        .with_status(200)
        .with_body(COMPLETION_BODY)
        .create_async()
        .await;

    let mut sub_server = mockito::Server::new_async().await;
    sub_server
        .mock("GET", "/api/subscription/v1/models")
        .with_status(500)
        .with_body("down")
        .create_async()
        .await;

    let fx = fixture(&backend_server.url(), Some(&sub_server.url()), false).await;

    let Json(response) = routes::chat_completions(
        State(fx.state.clone()),
        HeaderMap::new(),
        Json(chat_request(Some("architect"))),
    )
    .await
    .unwrap();

    let metadata = response.x_proxy_metadata.unwrap();
    assert_eq!(metadata.model_selected, "claude-3.5-sonnet");
}

#[tokio::test]
async fn empty_messages_are_rejected() {
    let mut server = mockito::Server::new_async().await;
    let fx = fixture(&server.url(), None, false).await;

    let err = routes::chat_completions(
        State(fx.state.clone()),
        HeaderMap::new(),
        Json(ChatRequest::default()),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, ApiError::BadRequest(_)));
}

#[tokio::test]
async fn backend_failure_surfaces_status_and_body() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/chat/completions")
        .with_status(503)
        .with_body("provider overloaded")
        .create_async()
        .await;

    let fx = fixture(&server.url(), None, false).await;

    let err = routes::chat_completions(
        State(fx.state.clone()),
        HeaderMap::new(),
        Json(chat_request(None)),
    )
    .await
    .unwrap_err();

    match err {
        ApiError::Upstream(message) => {
            assert!(message.contains("503"));
            assert!(message.contains("provider overloaded"));
        }
        other => panic!("expected Upstream error, got {other:?}"),
    }
}

#[tokio::test]
async fn unknown_profile_header_falls_back_to_default() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/chat/completions")
        .with_status(200)
        .with_body(COMPLETION_BODY)
        .create_async()
        .await;

    let fx = fixture(&server.url(), None, false).await;

    let mut headers = HeaderMap::new();
    headers.insert("x-profile", "staging".parse().unwrap());

    let Json(response) = routes::chat_completions(
        State(fx.state.clone()),
        headers,
        Json(chat_request(Some("architect"))),
    )
    .await
    .unwrap();

    assert_eq!(response.x_proxy_metadata.unwrap().backend, "nanogpt");
}
