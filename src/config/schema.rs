use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub backends: BackendsConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub subscription: SubscriptionConfig,
    #[serde(default)]
    pub prompt: PromptConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    /// External tool subprocesses, keyed by server name.
    #[serde(default)]
    pub mcp: HashMap<String, McpServerConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendsConfig {
    #[serde(default)]
    pub nanogpt: NanoGptConfig,
    #[serde(default)]
    pub vertex: VertexConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NanoGptConfig {
    /// Empty means the backend is disabled.
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_nanogpt_base_url")]
    pub base_url: String,
    #[serde(default = "default_monthly_quota")]
    pub monthly_quota: i64,
}

impl Default for NanoGptConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_nanogpt_base_url(),
            monthly_quota: default_monthly_quota(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VertexConfig {
    /// Empty means the backend is disabled.
    #[serde(default)]
    pub project_id: String,
    #[serde(default = "default_vertex_location")]
    pub location: String,
    #[serde(default)]
    pub access_token: String,
}

impl Default for VertexConfig {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            location: default_vertex_location(),
            access_token: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    #[serde(default = "default_active_profile")]
    pub active_profile: String,
    /// Deployment profile -> backend name.
    #[serde(default = "default_profiles")]
    pub profiles: HashMap<String, String>,
    #[serde(default = "default_rankings_path")]
    pub rankings_path: String,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            active_profile: default_active_profile(),
            profiles: default_profiles(),
            rankings_path: default_rankings_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionConfig {
    /// Empty disables subscription-first routing.
    #[serde(default)]
    pub base_url: String,
    #[serde(default = "default_subscription_ttl")]
    pub ttl_seconds: u64,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            ttl_seconds: default_subscription_ttl(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptConfig {
    #[serde(default = "default_strategies_path")]
    pub strategies_path: String,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            strategies_path: default_strategies_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_path")]
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

// Default functions
fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8090
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_nanogpt_base_url() -> String {
    "https://nano-gpt.com/api/v1".to_string()
}

fn default_monthly_quota() -> i64 {
    60_000
}

fn default_vertex_location() -> String {
    "us-central1".to_string()
}

fn default_active_profile() -> String {
    "personal".to_string()
}

fn default_profiles() -> HashMap<String, String> {
    HashMap::from([
        ("personal".to_string(), "nanogpt".to_string()),
        ("work".to_string(), "vertex".to_string()),
    ])
}

fn default_rankings_path() -> String {
    "data/model_rankings.json".to_string()
}

fn default_subscription_ttl() -> u64 {
    120
}

fn default_strategies_path() -> String {
    "config/prompt_strategies.yaml".to_string()
}

fn default_storage_path() -> String {
    "~/.modelgate/usage.db".to_string()
}
