use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use notify_debouncer_mini::new_debouncer;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{info, warn};

/// Detailed information about a ranked model.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelInfo {
    pub model: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub benchmarks: HashMap<String, f64>,
}

/// Model preferences for one role.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoleRanking {
    pub primary: ModelInfo,
    #[serde(default)]
    pub fallback: Vec<String>,
    #[serde(default)]
    pub subscription_alternative: String,
}

/// The whole role-to-model mapping, persisted as a single JSON document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelRankings {
    #[serde(default)]
    pub updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub roles: HashMap<String, RoleRanking>,
}

impl ModelRankings {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read rankings file: {}", path.display()))?;
        serde_json::from_str(&data)
            .with_context(|| format!("Failed to parse rankings JSON: {}", path.display()))
    }

    pub fn save<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        self.updated = Some(Utc::now());

        let data = serde_json::to_string_pretty(self).context("Failed to serialize rankings")?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        std::fs::write(path, data)
            .with_context(|| format!("Failed to write rankings file: {}", path.display()))
    }

    pub fn role(&self, role: &str) -> Option<&RoleRanking> {
        self.roles.get(role)
    }

    pub fn update_role(&mut self, role: &str, ranking: RoleRanking) {
        self.roles.insert(role.to_string(), ranking);
        self.updated = Some(Utc::now());
    }

    /// Every model id mentioned anywhere in the document.
    pub fn known_models(&self) -> Vec<String> {
        let mut models = Vec::new();
        for ranking in self.roles.values() {
            models.push(ranking.primary.model.clone());
            models.extend(ranking.fallback.iter().cloned());
            if !ranking.subscription_alternative.is_empty() {
                models.push(ranking.subscription_alternative.clone());
            }
        }
        models
    }
}

/// Shared, read-mostly view of the rankings document. Readers get a complete
/// immutable snapshot; reload swaps the whole Arc so nobody ever observes a
/// partially updated document.
pub struct RankingsStore {
    path: PathBuf,
    inner: RwLock<Arc<ModelRankings>>,
}

impl RankingsStore {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let rankings = ModelRankings::load(&path)?;
        Ok(Self {
            path,
            inner: RwLock::new(Arc::new(rankings)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn current(&self) -> Arc<ModelRankings> {
        self.inner.read().expect("rankings lock poisoned").clone()
    }

    /// Re-read the document from disk and swap it in.
    pub fn reload(&self) -> Result<()> {
        let rankings = ModelRankings::load(&self.path)?;
        let updated = rankings.updated;
        *self.inner.write().expect("rankings lock poisoned") = Arc::new(rankings);
        info!(updated = ?updated, "rankings document reloaded");
        Ok(())
    }
}

/// Debounced file watcher that hot-reloads the rankings document whenever it
/// changes on disk, so new rankings take effect without a restart.
pub struct RankingsWatcher {
    store: Arc<RankingsStore>,
}

impl RankingsWatcher {
    pub fn new(store: Arc<RankingsStore>) -> Self {
        Self { store }
    }

    pub async fn run(&self) -> Result<()> {
        let path = self.store.path().to_path_buf();
        let watch_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        let mut debouncer = new_debouncer(
            Duration::from_millis(250),
            move |res: notify_debouncer_mini::DebounceEventResult| {
                let _ = tx.send(res);
            },
        )
        .context("Failed to create debouncer")?;

        debouncer
            .watcher()
            .watch(&watch_dir, notify::RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch {}", watch_dir.display()))?;

        info!("rankings watcher started (watching: {})", path.display());

        while let Some(event_result) = rx.recv().await {
            match event_result {
                Ok(events) => {
                    let touched = events.iter().any(|e| PathBuf::from(&e.path) == path);
                    if touched {
                        if let Err(e) = self.store.reload() {
                            warn!("failed to reload rankings: {e:#}");
                        }
                    }
                }
                Err(e) => warn!("rankings watcher error: {e}"),
            }
        }

        Ok(())
    }
}
