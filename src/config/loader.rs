use super::Config;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = serde_yaml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    // Perform environment variable substitution
    let config = substitute_env_vars(config);

    // Validate configuration
    validate_config(&config)?;

    Ok(config)
}

/// Replace `${VAR}` values with the environment variable's contents. An
/// unset variable resolves to an empty string, which downstream treats as
/// "not configured".
fn substitute_env_vars(mut config: Config) -> Config {
    substitute(&mut config.backends.nanogpt.api_key);
    substitute(&mut config.backends.vertex.project_id);
    substitute(&mut config.backends.vertex.access_token);
    substitute(&mut config.subscription.base_url);

    for server in config.mcp.values_mut() {
        for value in server.env.values_mut() {
            substitute(value);
        }
    }

    config
}

fn substitute(value: &mut String) {
    if value.starts_with("${") && value.ends_with('}') {
        let var_name = &value[2..value.len() - 1];
        *value = std::env::var(var_name).unwrap_or_default();
    }
}

fn validate_config(config: &Config) -> Result<()> {
    if config.routing.rankings_path.is_empty() {
        anyhow::bail!("routing.rankings_path must be specified");
    }

    if config.storage.path.is_empty() {
        anyhow::bail!("storage.path must be specified");
    }

    // The active profile must resolve to a backend name.
    if !config
        .routing
        .profiles
        .contains_key(&config.routing.active_profile)
    {
        anyhow::bail!(
            "Active profile '{}' has no entry in routing.profiles",
            config.routing.active_profile
        );
    }

    let valid_formats = ["pretty", "compact", "json"];
    if !valid_formats.contains(&config.logging.format.as_str()) {
        anyhow::bail!("Invalid logging format: {}", config.logging.format);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn write_config(contents: &str) -> NamedTempFile {
        let file = NamedTempFile::new().unwrap();
        fs::write(file.path(), contents).unwrap();
        file
    }

    #[test]
    fn minimal_config_gets_defaults() {
        let file = write_config("{}");
        let config = load_config(file.path()).unwrap();

        assert_eq!(config.gateway.port, 8090);
        assert_eq!(config.routing.active_profile, "personal");
        assert_eq!(config.routing.profiles["personal"], "nanogpt");
        assert_eq!(config.subscription.ttl_seconds, 120);
    }

    #[test]
    fn env_vars_are_substituted() {
        std::env::set_var("TEST_MODELGATE_KEY", "secret-key");
        let file = write_config(
            r#"
backends:
  nanogpt:
    api_key: ${TEST_MODELGATE_KEY}
"#,
        );

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.backends.nanogpt.api_key, "secret-key");
        std::env::remove_var("TEST_MODELGATE_KEY");
    }

    #[test]
    fn unset_env_var_becomes_empty() {
        let file = write_config(
            r#"
backends:
  nanogpt:
    api_key: ${TEST_MODELGATE_DOES_NOT_EXIST}
"#,
        );

        let config = load_config(file.path()).unwrap();
        assert!(config.backends.nanogpt.api_key.is_empty());
    }

    #[test]
    fn unknown_active_profile_is_rejected() {
        let file = write_config(
            r#"
routing:
  active_profile: staging
"#,
        );

        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn invalid_log_format_is_rejected() {
        let file = write_config(
            r#"
logging:
  format: xml
"#,
        );

        assert!(load_config(file.path()).is_err());
    }
}
