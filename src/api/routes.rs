use crate::api::{ApiError, AppState};
use crate::backends::{ChatRequest, ChatResponse, Model, ProxyMetadata};
use crate::storage::UsageRecord;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// POST /v1/chat/completions - proxy a chat request to the routed backend
pub async fn chat_completions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(mut request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let started = Instant::now();

    if request.messages.is_empty() {
        return Err(ApiError::BadRequest("messages cannot be empty".to_string()));
    }

    let role = request.role.clone().unwrap_or_default();
    let backend_name = state.resolve_profile(headers.get("x-profile"));

    // Context enrichment is strictly additive; a lookup failure means "no
    // context found", never a failed request.
    request.messages = state
        .context
        .enrich_request(&request.messages, request.conversation_id.as_deref())
        .await;

    // Optimize the latest user turn when a role is present.
    let mut optimized = None;
    if !role.is_empty() {
        if let Some(engineer) = &state.engineer {
            if let Some(idx) = request.messages.iter().rposition(|m| m.role == "user") {
                let result = engineer.optimize(&request.messages[idx].content, &role).await;
                request.messages[idx].content = result.optimized.clone();
                info!(
                    role = %role,
                    strategy = %result.strategy_used,
                    "prompt optimization applied"
                );
                optimized = Some(result);
            }
        }
    }

    let selection = state.router.select_for_role(&role, &backend_name).await;
    info!(
        backend = %selection.backend,
        model = %selection.model_id,
        role = %role,
        reason = %selection.reason,
        "model selected"
    );

    let backend = state
        .backends
        .get(&selection.backend)
        .ok_or_else(|| ApiError::ServiceUnavailable("no backend available".to_string()))?;

    // Let the selection fill the model unless the caller pinned one.
    if request.model.is_empty() || request.model == "auto" {
        request.model = selection.model_id.clone();
    }

    let mut response = backend.chat_completion(&request).await?;

    let mut metadata = ProxyMetadata {
        backend: backend.name().to_string(),
        model_selected: response.model.clone(),
        selection_reason: selection.reason.clone(),
        ..Default::default()
    };
    if let Some(optimized) = &optimized {
        metadata.original_prompt_length = optimized.original.len();
        metadata.optimized_prompt_length = optimized.optimized.len();
        metadata.prompt_engineer_time_ms = optimized.optimization_time.as_millis() as u64;
        metadata.strategy_used = optimized.strategy_used.clone();
    }
    response.x_proxy_metadata = Some(metadata);

    let response_time_ms = started.elapsed().as_millis() as i64;
    if let Some(tracker) = &state.usage {
        let record = UsageRecord {
            timestamp: Utc::now(),
            backend: backend.name().to_string(),
            model: response.model.clone(),
            role: role.clone(),
            conversation_id: request.conversation_id.clone().unwrap_or_default(),
            prompt_tokens: response.usage.prompt_tokens as i64,
            completion_tokens: response.usage.completion_tokens as i64,
            total_tokens: response.usage.total_tokens as i64,
            response_time_ms,
        };
        if let Err(e) = tracker.record_usage(&record).await {
            warn!("failed to record usage: {e:#}");
        }
    }

    // Persist the conversation without holding up the response.
    if let Some(conversation_id) = request.conversation_id.clone() {
        let context = state.context.clone();
        let mut conversation = request.messages.clone();
        conversation.extend(response.choices.iter().map(|c| c.message.clone()));
        tokio::spawn(async move {
            if let Err(e) = context.save_conversation(&conversation_id, &conversation).await {
                warn!("failed to save conversation: {e:#}");
            }
        });
    }

    info!(
        response_time_ms,
        tokens = response.usage.total_tokens,
        "chat request completed"
    );
    Ok(Json(response))
}

/// GET /v1/models - union of every backend's model list
pub async fn list_models(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut all_models: Vec<Model> = Vec::new();

    for backend in state.backends.values() {
        match backend.list_models().await {
            Ok(models) => all_models.extend(models),
            Err(e) => warn!(backend = backend.name(), "failed to list models: {e}"),
        }
    }

    Ok(Json(json!({
        "object": "list",
        "data": all_models,
    })))
}

/// GET /v1/models/:id - details for one model
pub async fn get_model(
    State(state): State<Arc<AppState>>,
    Path(model_id): Path<String>,
) -> Result<Json<Model>, ApiError> {
    for backend in state.backends.values() {
        if !backend.has_model(&model_id) {
            continue;
        }
        if let Ok(models) = backend.list_models().await {
            if let Some(mut model) = models.into_iter().find(|m| m.id == model_id) {
                // Attach ranking context when this model is someone's primary.
                if let Some(info) = state.router.model_info(&model_id) {
                    model.reason = info.reason;
                    model.benchmarks = info.benchmarks;
                }
                return Ok(Json(model));
            }
        }
    }

    Err(ApiError::NotFound("Model not found".to_string()))
}

/// POST /admin/research/trigger - run research in the background
pub async fn trigger_research(
    State(state): State<Arc<AppState>>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let scheduler = state
        .scheduler
        .clone()
        .ok_or_else(|| ApiError::ServiceUnavailable("research system disabled".to_string()))?;

    info!("manual research trigger requested");
    tokio::spawn(async move {
        if let Err(e) = scheduler.trigger_now().await {
            tracing::error!("manual research failed: {e:#}");
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "status": "triggered",
            "message": "Research started in background",
        })),
    ))
}

/// GET /admin/research/status
pub async fn research_status(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let research = state
        .research
        .as_ref()
        .ok_or_else(|| ApiError::ServiceUnavailable("research system disabled".to_string()))?;

    Ok(Json(json!({
        "last_update": research.last_research_date(),
        "status": "active",
        "next_scheduled": crate::research::NEXT_SCHEDULED,
    })))
}

/// POST /admin/research/force-refresh - re-evaluate everything
pub async fn force_refresh(
    State(state): State<Arc<AppState>>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let research = state
        .research
        .clone()
        .ok_or_else(|| ApiError::ServiceUnavailable("research system disabled".to_string()))?;

    info!("force refresh requested");
    tokio::spawn(async move {
        if let Err(e) = research.force_refresh().await {
            tracing::error!("force refresh failed: {e:#}");
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "status": "triggered",
            "message": "Complete refresh started in background (re-evaluating all models)",
        })),
    ))
}

/// GET /status - profile, backend availability, and quota usage
pub async fn status(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let mut backends = serde_json::Map::new();
    for name in ["nanogpt", "vertex"] {
        backends.insert(name.to_string(), json!(state.backends.contains_key(name)));
    }

    let mut body = json!({
        "active_profile": state.active_profile,
        "backends": backends,
    });

    if let Some(backend) = state.backends.get("nanogpt") {
        let usage = backend.usage();
        body["nanogpt_usage"] = json!({
            "tokens_used": usage.tokens_used,
            "tokens_remaining": usage.tokens_remaining,
            "tokens_limit": usage.tokens_limit,
            "reset_date": usage.reset_date,
        });
    }

    Json(body)
}
