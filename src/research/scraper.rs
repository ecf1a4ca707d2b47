use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

const HUGGINGFACE_URL: &str = "https://huggingface.co/api/open-llm-leaderboard/v2/results";
const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/models";

/// Capability scores for one model, merged across sources.
#[derive(Debug, Clone)]
pub struct ModelBenchmark {
    pub name: String,
    pub provider: String,
    pub benchmarks: HashMap<String, f64>,
    pub updated: DateTime<Utc>,
}

/// Fetches raw model benchmarks from independent public sources. Individual
/// source failures are logged and skipped; only when every source comes up
/// empty does the embedded table take over, so the router never runs with
/// zero information about known models.
pub struct BenchmarkScraper {
    client: reqwest::Client,
    huggingface_url: String,
    openrouter_url: String,
}

#[derive(Deserialize)]
struct LeaderboardEntry {
    model: String,
    #[serde(default)]
    metrics: HashMap<String, f64>,
}

#[derive(Deserialize)]
struct OpenRouterCatalog {
    #[serde(default)]
    data: Vec<OpenRouterModel>,
}

#[derive(Deserialize)]
struct OpenRouterModel {
    id: String,
    #[serde(default)]
    context_length: Option<u64>,
}

impl Default for BenchmarkScraper {
    fn default() -> Self {
        Self::new()
    }
}

impl BenchmarkScraper {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            huggingface_url: HUGGINGFACE_URL.to_string(),
            openrouter_url: OPENROUTER_URL.to_string(),
        }
    }

    /// Override the source endpoints, used by tests.
    pub fn with_sources(huggingface_url: &str, openrouter_url: &str) -> Self {
        Self {
            huggingface_url: huggingface_url.to_string(),
            openrouter_url: openrouter_url.to_string(),
            ..Self::new()
        }
    }

    /// Query all sources sequentially and merge the results by model name.
    /// Per-metric merge is last-writer-wins; sources earlier in the list are
    /// filled in, later sources overwrite only metrics they also report.
    pub async fn fetch_all_benchmarks(&self) -> HashMap<String, ModelBenchmark> {
        let mut merged: HashMap<String, ModelBenchmark> = HashMap::new();

        let sources: [(&str, _); 2] = [
            ("huggingface", self.fetch_from_huggingface().await),
            ("openrouter", self.fetch_from_openrouter().await),
        ];

        for (source, result) in sources {
            match result {
                Ok(data) => {
                    debug!(source, models = data.len(), "benchmark source fetched");
                    for (model_name, benchmark) in data {
                        match merged.get_mut(&model_name) {
                            Some(existing) => {
                                for (metric, value) in benchmark.benchmarks {
                                    existing.benchmarks.insert(metric, value);
                                }
                                existing.updated = benchmark.updated;
                            }
                            None => {
                                merged.insert(model_name, benchmark);
                            }
                        }
                    }
                }
                Err(err) => {
                    warn!(source, error = %err, "failed to fetch benchmark source, skipping");
                }
            }
        }

        if merged.is_empty() {
            warn!("all benchmark sources failed, using embedded data");
            return embedded_benchmarks();
        }

        merged
    }

    async fn fetch_from_huggingface(&self) -> anyhow::Result<HashMap<String, ModelBenchmark>> {
        let resp = self.client.get(&self.huggingface_url).send().await?;
        if !resp.status().is_success() {
            anyhow::bail!("unexpected status code: {}", resp.status().as_u16());
        }

        let entries: Vec<LeaderboardEntry> = resp.json().await?;
        let now = Utc::now();

        Ok(entries
            .into_iter()
            .filter(|e| !e.metrics.is_empty())
            .map(|e| {
                (
                    e.model.clone(),
                    ModelBenchmark {
                        name: e.model,
                        provider: "huggingface".to_string(),
                        benchmarks: e.metrics,
                        updated: now,
                    },
                )
            })
            .collect())
    }

    /// OpenRouter's catalog carries no scores, but its advertised context
    /// lengths feed the `context` metric the research role weights.
    async fn fetch_from_openrouter(&self) -> anyhow::Result<HashMap<String, ModelBenchmark>> {
        let resp = self.client.get(&self.openrouter_url).send().await?;
        if !resp.status().is_success() {
            anyhow::bail!("unexpected status code: {}", resp.status().as_u16());
        }

        let catalog: OpenRouterCatalog = resp.json().await?;
        let now = Utc::now();

        Ok(catalog
            .data
            .into_iter()
            .filter_map(|m| {
                let context_length = m.context_length?;
                // 2M tokens maps to a score of 100.
                let score = (context_length as f64 / 20_000.0).min(100.0);
                let mut benchmarks = HashMap::new();
                benchmarks.insert("context".to_string(), score);
                Some((
                    m.id.clone(),
                    ModelBenchmark {
                        name: m.id,
                        provider: "openrouter".to_string(),
                        benchmarks,
                        updated: now,
                    },
                ))
            })
            .collect())
    }
}

/// Hand-curated scores shipped with the binary, used when scraping fails.
fn embedded_benchmarks() -> HashMap<String, ModelBenchmark> {
    let now = Utc::now();
    let table: &[(&str, &str, &[(&str, f64)])] = &[
        (
            "claude-3.5-sonnet",
            "anthropic",
            &[
                ("reasoning", 91.9),
                ("math", 85.7),
                ("coding", 92.0),
                ("language", 90.0),
            ],
        ),
        (
            "claude-3-opus",
            "anthropic",
            &[
                ("reasoning", 90.5),
                ("math", 84.9),
                ("coding", 88.0),
                ("language", 92.0),
            ],
        ),
        (
            "gpt-4o",
            "openai",
            &[
                ("reasoning", 88.5),
                ("math", 83.2),
                ("coding", 90.2),
                ("language", 89.0),
            ],
        ),
        (
            "gemini-2.5-pro",
            "google",
            &[
                ("reasoning", 89.0),
                ("math", 84.0),
                ("coding", 87.5),
                ("language", 88.0),
                ("context", 100.0),
            ],
        ),
        (
            "gemini-2.0-flash",
            "google",
            &[
                ("reasoning", 85.0),
                ("math", 80.0),
                ("coding", 84.0),
                ("language", 86.0),
                ("speed", 95.0),
            ],
        ),
        (
            "qwen-2.5-72b",
            "alibaba",
            &[
                ("reasoning", 86.0),
                ("math", 82.5),
                ("coding", 85.0),
                ("language", 84.0),
            ],
        ),
        (
            "deepseek-chat",
            "deepseek",
            &[
                ("reasoning", 84.0),
                ("math", 81.0),
                ("coding", 88.5),
                ("language", 82.0),
            ],
        ),
        (
            "deepseek-coder-v2",
            "deepseek",
            &[("coding", 91.0), ("reasoning", 82.0), ("math", 79.0)],
        ),
    ];

    table
        .iter()
        .map(|(name, provider, metrics)| {
            (
                name.to_string(),
                ModelBenchmark {
                    name: name.to_string(),
                    provider: provider.to_string(),
                    benchmarks: metrics.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
                    updated: now,
                },
            )
        })
        .collect()
}
