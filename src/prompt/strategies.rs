use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

/// Prompt optimization strategy for one role. Loaded once at startup and
/// immutable afterwards.
#[derive(Debug, Clone, Deserialize)]
pub struct Strategy {
    #[serde(default)]
    pub name: String,
    pub system_prompt: String,
    #[serde(default)]
    pub techniques: Vec<String>,
    #[serde(default)]
    pub constraints: Vec<String>,
    #[serde(default)]
    pub examples: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct StrategiesConfig {
    strategies: HashMap<String, Strategy>,
}

/// All prompt strategies, keyed by role.
#[derive(Debug, Clone)]
pub struct StrategyDb {
    strategies: HashMap<String, Strategy>,
}

impl StrategyDb {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read strategies file: {}", path.display()))?;

        let config: StrategiesConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse strategies file: {}", path.display()))?;

        let strategies = config
            .strategies
            .into_iter()
            .map(|(role, mut strategy)| {
                strategy.name = role.clone();
                (role, strategy)
            })
            .collect();

        Ok(Self { strategies })
    }

    pub fn strategy(&self, role: &str) -> Option<&Strategy> {
        self.strategies.get(role)
    }

    pub fn roles(&self) -> Vec<String> {
        self.strategies.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}
