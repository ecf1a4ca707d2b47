mod loader;
mod schema;

pub use loader::load_config;
pub use schema::*;

use std::path::PathBuf;

impl Config {
    /// Default config location under the user's home directory.
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".modelgate")
            .join("config.yaml")
    }

    pub fn load<P: AsRef<std::path::Path>>(path: P) -> anyhow::Result<Self> {
        load_config(path)
    }
}
