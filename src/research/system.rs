use super::{BenchmarkScraper, ModelBenchmark, ModelEvaluator, RankedModel};
use crate::routing::{ModelInfo, ModelRankings, RankingsStore, RoleRanking};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

const ROLES: &[&str] = &[
    "architect",
    "implementation",
    "code_review",
    "debugging",
    "testing",
    "documentation",
    "research",
    "general",
];

/// Free/cheap models preferred as subscription alternatives.
const FREE_MODELS: &[&str] = &[
    "gemini-2.0-flash",
    "qwen-2.5-72b",
    "deepseek-chat",
    "qwen-2.5-coder-32b",
];

/// Coordinates the research pipeline: scrape benchmarks, rank models per
/// role, persist the rankings document, and reload the in-memory snapshot so
/// the router picks it up without a restart.
pub struct ResearchSystem {
    scraper: BenchmarkScraper,
    evaluator: ModelEvaluator,
    store: Arc<RankingsStore>,
}

impl ResearchSystem {
    pub fn new(store: Arc<RankingsStore>) -> Self {
        Self {
            scraper: BenchmarkScraper::new(),
            evaluator: ModelEvaluator::new(),
            store,
        }
    }

    #[cfg(test)]
    pub fn with_scraper(store: Arc<RankingsStore>, scraper: BenchmarkScraper) -> Self {
        Self {
            scraper,
            evaluator: ModelEvaluator::new(),
            store,
        }
    }

    /// Run the full research pipeline once.
    pub async fn run_research(&self) -> Result<()> {
        info!("starting model research run");
        let started = Instant::now();

        let benchmarks = self.scraper.fetch_all_benchmarks().await;
        info!(models = benchmarks.len(), "benchmark data fetched");

        let current = self.store.current();
        let new_models = identify_new_models(&current, benchmarks.keys());
        info!(new_models = new_models.len(), "new models identified");

        if new_models.is_empty() {
            info!("no new models found, rankings are up to date");
            return Ok(());
        }

        self.rebuild_rankings((*current).clone(), &benchmarks)
            .await?;

        info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            evaluated = new_models.len(),
            roles = ROLES.len(),
            "research run completed"
        );
        Ok(())
    }

    /// Re-evaluate every model from scratch, ignoring what is already
    /// ranked. The previous document survives on disk if the run fails.
    pub async fn force_refresh(&self) -> Result<()> {
        info!("forcing complete refresh of all rankings");

        let benchmarks = self.scraper.fetch_all_benchmarks().await;
        self.rebuild_rankings(ModelRankings::default(), &benchmarks)
            .await
            .context("force refresh failed")
    }

    /// When the current rankings were last rebuilt.
    pub fn last_research_date(&self) -> Option<DateTime<Utc>> {
        self.store.current().updated
    }

    async fn rebuild_rankings(
        &self,
        mut rankings: ModelRankings,
        benchmarks: &std::collections::HashMap<String, ModelBenchmark>,
    ) -> Result<()> {
        let all_models: Vec<ModelBenchmark> = benchmarks.values().cloned().collect();

        for role in ROLES {
            let ranked = self.evaluator.rank_models_for_role(&all_models, role);
            let Some(primary) = ranked.first() else {
                continue;
            };

            rankings.update_role(
                role,
                RoleRanking {
                    primary: ModelInfo {
                        model: primary.name.clone(),
                        reason: primary.reason.clone(),
                        benchmarks: primary.benchmarks.clone(),
                    },
                    fallback: fallback_models(&ranked, 3),
                    subscription_alternative: subscription_alternative(&ranked),
                },
            );
            info!(role, primary = %primary.name, "role ranking updated");
        }

        rankings.save(self.store.path())?;
        self.store.reload()?;
        Ok(())
    }
}

fn identify_new_models<'a>(
    current: &ModelRankings,
    candidates: impl Iterator<Item = &'a String>,
) -> Vec<String> {
    let known: HashSet<String> = current.known_models().into_iter().collect();
    candidates
        .filter(|name| !known.contains(*name))
        .cloned()
        .collect()
}

/// Top N models after the primary.
fn fallback_models(ranked: &[RankedModel], count: usize) -> Vec<String> {
    ranked
        .iter()
        .skip(1)
        .take(count)
        .map(|m| m.name.clone())
        .collect()
}

/// First ranked model from the free-model preference list, else the last
/// ranked model.
fn subscription_alternative(ranked: &[RankedModel]) -> String {
    for model in ranked {
        if FREE_MODELS.contains(&model.name.as_str()) {
            return model.name.clone();
        }
    }
    ranked.last().map(|m| m.name.clone()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn empty_store() -> (TempDir, Arc<RankingsStore>) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rankings.json");
        std::fs::write(&path, r#"{"roles": {}}"#).unwrap();
        (dir, Arc::new(RankingsStore::load(&path).unwrap()))
    }

    #[tokio::test]
    async fn research_builds_rankings_for_every_role() {
        // Both sources down: the embedded benchmark table drives the run.
        let mut server = mockito::Server::new_async().await;
        server.mock("GET", "/lb").with_status(500).create_async().await;
        server.mock("GET", "/or").with_status(500).create_async().await;

        let (_dir, store) = empty_store();
        let scraper = BenchmarkScraper::with_sources(
            &format!("{}/lb", server.url()),
            &format!("{}/or", server.url()),
        );
        let system = ResearchSystem::with_scraper(store.clone(), scraper);

        system.run_research().await.unwrap();

        let rankings = store.current();
        assert_eq!(rankings.roles.len(), ROLES.len());
        assert!(rankings.updated.is_some());

        let architect = rankings.role("architect").unwrap();
        assert_eq!(architect.primary.model, "claude-3.5-sonnet");
        assert_eq!(architect.fallback.len(), 3);
        assert!(!architect.subscription_alternative.is_empty());
    }

    #[tokio::test]
    async fn run_with_no_new_models_is_a_noop() {
        let mut server = mockito::Server::new_async().await;
        server.mock("GET", "/lb").with_status(500).create_async().await;
        server.mock("GET", "/or").with_status(500).create_async().await;

        // Seed a document that already mentions every embedded model, so
        // the scrape discovers nothing new.
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rankings.json");
        std::fs::write(
            &path,
            r#"{
                "updated": "2025-01-01T00:00:00Z",
                "roles": {
                    "general": {
                        "primary": {"model": "claude-3.5-sonnet", "reason": ""},
                        "fallback": [
                            "claude-3-opus", "gpt-4o", "gemini-2.5-pro",
                            "gemini-2.0-flash", "qwen-2.5-72b", "deepseek-chat",
                            "deepseek-coder-v2"
                        ],
                        "subscription_alternative": ""
                    }
                }
            }"#,
        )
        .unwrap();
        let store = Arc::new(RankingsStore::load(&path).unwrap());

        let scraper = BenchmarkScraper::with_sources(
            &format!("{}/lb", server.url()),
            &format!("{}/or", server.url()),
        );
        let system = ResearchSystem::with_scraper(store.clone(), scraper);

        let before = store.current().updated;
        system.run_research().await.unwrap();
        assert_eq!(store.current().updated, before);
    }

    #[test]
    fn subscription_alternative_prefers_free_models() {
        let ranked = vec![
            RankedModel {
                name: "claude-3.5-sonnet".to_string(),
                score: 90.0,
                reason: String::new(),
                benchmarks: Default::default(),
            },
            RankedModel {
                name: "deepseek-chat".to_string(),
                score: 84.0,
                reason: String::new(),
                benchmarks: Default::default(),
            },
        ];
        assert_eq!(subscription_alternative(&ranked), "deepseek-chat");
    }

    #[test]
    fn fallbacks_skip_the_primary() {
        let ranked: Vec<RankedModel> = ["a", "b", "c", "d", "e"]
            .iter()
            .map(|name| RankedModel {
                name: name.to_string(),
                score: 1.0,
                reason: String::new(),
                benchmarks: Default::default(),
            })
            .collect();

        assert_eq!(fallback_models(&ranked, 3), vec!["b", "c", "d"]);
    }
}
