pub mod api;
pub mod backends;
pub mod config;
pub mod context;
pub mod mcp;
pub mod prompt;
pub mod research;
pub mod routing;
pub mod storage;
pub mod subscription;

pub use config::Config;

use anyhow::{Context, Result};
use backends::{Backend, NanoGptBackend, VertexBackend};
use std::collections::HashMap;
use std::sync::Arc;

pub async fn run(config: Config) -> Result<()> {
    tracing::info!("Starting ModelGate gateway...");

    // Initialize usage tracking
    let usage = match storage::UsageTracker::new(&config.storage.path).await {
        Ok(tracker) => {
            tracing::info!("Usage tracker initialized: {}", config.storage.path);
            Some(tracker)
        }
        Err(e) => {
            tracing::warn!("Failed to initialize usage tracker: {e:#}");
            None
        }
    };

    // Initialize backends. Missing credentials disable that backend only.
    let mut backend_map: HashMap<String, Arc<dyn Backend>> = HashMap::new();

    if !config.backends.nanogpt.api_key.is_empty() {
        let nanogpt = NanoGptBackend::new(
            &config.backends.nanogpt.api_key,
            &config.backends.nanogpt.base_url,
            config.backends.nanogpt.monthly_quota,
        );
        backend_map.insert("nanogpt".to_string(), Arc::new(nanogpt));
        tracing::info!("NanoGPT backend initialized");
    } else {
        tracing::warn!("NanoGPT API key not set, backend disabled");
    }

    if !config.backends.vertex.project_id.is_empty() {
        let vertex = VertexBackend::new(
            &config.backends.vertex.project_id,
            &config.backends.vertex.location,
            &config.backends.vertex.access_token,
        );
        backend_map.insert("vertex".to_string(), Arc::new(vertex));
        tracing::info!("Vertex AI backend initialized");
    } else {
        tracing::warn!("Vertex project ID not set, backend disabled");
    }

    if backend_map.is_empty() {
        anyhow::bail!("No backends available - configure NanoGPT or Vertex credentials");
    }

    // Prompt engineer rides on the NanoGPT backend as its fast engine.
    let engineer = match backend_map.get("nanogpt") {
        Some(fast_backend) => match prompt::StrategyDb::load(&config.prompt.strategies_path) {
            Ok(strategies) => {
                let engineer = prompt::PromptEngineer::new(fast_backend.clone(), strategies);
                tracing::info!(
                    "Prompt engineer initialized ({} role strategies)",
                    engineer.strategy_count()
                );
                Some(Arc::new(engineer))
            }
            Err(e) => {
                tracing::warn!("Failed to load prompt strategies: {e:#}");
                None
            }
        },
        None => None,
    };

    // Model rankings: shared snapshot, hot-reloaded from disk.
    let rankings = Arc::new(
        routing::RankingsStore::load(&config.routing.rankings_path)
            .context("Failed to load model rankings")?,
    );
    let watcher = routing::RankingsWatcher::new(rankings.clone());
    tokio::spawn(async move {
        if let Err(e) = watcher.run().await {
            tracing::error!("Rankings watcher error: {e:#}");
        }
    });

    // Subscription-first routing when a subscription endpoint is set.
    let subscription_manager = if config.subscription.base_url.is_empty() {
        tracing::info!("Subscription service disabled (no base URL provided)");
        None
    } else {
        tracing::info!(
            "Subscription service initialized: {} (TTL {}s)",
            config.subscription.base_url,
            config.subscription.ttl_seconds
        );
        Some(Arc::new(subscription::SubscriptionManager::new(
            &config.subscription.base_url,
            config.subscription.ttl_seconds,
        )))
    };

    let default_backend = config
        .routing
        .profiles
        .get(&config.routing.active_profile)
        .cloned()
        .unwrap_or_else(|| "nanogpt".to_string());

    let router = Arc::new(routing::ModelRouter::new(
        rankings.clone(),
        backend_map.clone(),
        subscription_manager,
        &default_backend,
    ));
    tracing::info!("Model router initialized");

    // Bridge clients to external tool subprocesses; connect in background.
    let mut bridges: HashMap<String, Arc<mcp::BridgeClient>> = HashMap::new();
    for (name, server) in &config.mcp {
        let client = Arc::new(mcp::BridgeClient::new(
            name,
            &server.command,
            server.args.clone(),
            server.env.clone(),
        ));
        bridges.insert(name.clone(), client.clone());

        tokio::spawn(async move {
            if let Err(e) = client.connect().await {
                tracing::warn!(server = client.server_name(), "bridge connect failed: {e}");
            }
        });
    }

    let context = Arc::new(context::ContextManager::new(bridges.clone()));
    tracing::info!("Context manager initialized");

    // Monthly research pipeline.
    let research = Arc::new(research::ResearchSystem::new(rankings.clone()));
    let scheduler = Arc::new(research::ResearchScheduler::new(research.clone()).await?);
    if let Err(e) = scheduler.start().await {
        tracing::warn!("Failed to start research scheduler: {e:#}");
    }

    let state = Arc::new(api::AppState {
        backends: backend_map,
        router,
        engineer,
        context,
        usage,
        research: Some(research),
        scheduler: Some(scheduler.clone()),
        active_profile: config.routing.active_profile.clone(),
        profiles: config.routing.profiles.clone(),
    });

    let server = api::ApiServer::new(state, config.gateway.host.clone(), config.gateway.port);

    tracing::info!("ModelGate gateway running");
    server
        .start(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
        })
        .await?;

    // Clean up: stop the scheduler and reap every tool subprocess.
    scheduler.shutdown().await;
    for bridge in bridges.values() {
        bridge.close().await;
    }

    tracing::info!("Shut down gracefully");
    Ok(())
}
