pub mod error;
pub mod routes;

use crate::backends::Backend;
use crate::context::ContextManager;
use crate::prompt::PromptEngineer;
use crate::research::{ResearchScheduler, ResearchSystem};
use crate::routing::ModelRouter;
use crate::storage::UsageTracker;
use anyhow::{Context, Result};
use axum::http::header::HeaderValue;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router as AxumRouter};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

pub use error::ApiError;

/// Shared state behind every handler.
pub struct AppState {
    pub backends: HashMap<String, Arc<dyn Backend>>,
    pub router: Arc<ModelRouter>,
    pub engineer: Option<Arc<PromptEngineer>>,
    pub context: Arc<ContextManager>,
    pub usage: Option<UsageTracker>,
    pub research: Option<Arc<ResearchSystem>>,
    pub scheduler: Option<Arc<ResearchScheduler>>,
    pub active_profile: String,
    pub profiles: HashMap<String, String>,
}

impl AppState {
    /// Resolve a deployment profile (header override, else the configured
    /// default) to a backend name. Unknown profiles degrade to the default
    /// profile's backend with a warning.
    pub fn resolve_profile(&self, header: Option<&HeaderValue>) -> String {
        let profile = header
            .and_then(|v| v.to_str().ok())
            .filter(|p| !p.is_empty())
            .unwrap_or(&self.active_profile);

        if let Some(backend) = self.profiles.get(profile) {
            return backend.clone();
        }

        warn!(profile, default = %self.active_profile, "unknown profile, using default");
        self.profiles
            .get(&self.active_profile)
            .cloned()
            .unwrap_or_else(|| "nanogpt".to_string())
    }
}

/// HTTP front door: OpenAI-compatible chat endpoints plus the admin
/// research API.
pub struct ApiServer {
    state: Arc<AppState>,
    host: String,
    port: u16,
}

impl ApiServer {
    pub fn new(state: Arc<AppState>, host: String, port: u16) -> Self {
        Self { state, host, port }
    }

    fn build_routes(&self) -> AxumRouter {
        AxumRouter::new()
            // OpenAI-compatible endpoints
            .route("/v1/chat/completions", post(routes::chat_completions))
            .route("/v1/models", get(routes::list_models))
            .route("/v1/models/:id", get(routes::get_model))
            // Research endpoints
            .route("/admin/research/trigger", post(routes::trigger_research))
            .route("/admin/research/status", get(routes::research_status))
            .route("/admin/research/force-refresh", post(routes::force_refresh))
            // Operational endpoints
            .route("/health", get(health_handler))
            .route("/status", get(routes::status))
            .with_state(self.state.clone())
            .layer(axum::middleware::from_fn(logging_middleware))
    }

    /// Serve until the shutdown future resolves.
    pub async fn start<F>(&self, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let app = self.build_routes();
        let addr = format!("{}:{}", self.host, self.port);

        info!("Starting API on {} (OpenAI-compatible endpoint: /v1)", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .context("Failed to bind server")?;

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
            .context("Server error")?;

        Ok(())
    }
}

/// Health check handler
async fn health_handler() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION"),
            "gateway": "modelgate",
        })),
    )
}

/// Logging middleware
async fn logging_middleware(
    request: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let method = request.method().clone();
    let uri = request.uri().clone();

    let response = next.run(request).await;

    tracing::info!("{} {} -> {}", method, uri, response.status());
    response
}
