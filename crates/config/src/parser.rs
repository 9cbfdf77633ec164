use crate::*;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use tracing::{debug, info, instrument};

#[instrument(skip(path))]
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<G6Config> {
    let path = path.as_ref();
    info!("Loading configuration from: {:?}", path);

    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    debug!("Config file content length: {} bytes", content.len());
    parse_config(&content)
}

/// Parse configuration from YAML text, substituting environment variables first
pub fn parse_config(content: &str) -> Result<G6Config> {
    let substituted = substitution::substitute_env_vars(content)?;
    debug!("Environment variable substitution completed");

    let config: G6Config = serde_yaml::from_str(&substituted)
        .with_context(|| "Failed to parse YAML configuration")?;

    info!(
        symbols = ?config.platform.symbols,
        provider = %config.provider.kind,
        "Configuration loaded successfully"
    );
    Ok(config)
}

/// Configuration written by `g6 init`: every section at its default, plus
/// a live provider block whose credentials come from the environment.
#[instrument]
pub fn generate_default_config() -> G6Config {
    let mut config = G6Config::default();
    config.platform.symbols = vec![
        "NIFTY".to_string(),
        "BANKNIFTY".to_string(),
        "FINNIFTY".to_string(),
        "MIDCPNIFTY".to_string(),
    ];
    config.provider.live = Some(LiveProviderConfig {
        base_url: default_live_base_url(),
        api_key: "${KITE_API_KEY}".to_string(),
        access_token: "${KITE_ACCESS_TOKEN}".to_string(),
        requests_per_second: default_requests_per_second(),
        max_retries: default_max_transport_retries(),
        initial_backoff_ms: default_transport_backoff_ms(),
        expiry_weekday: default_expiry_weekday(),
        derivatives_exchange: default_derivatives_exchange(),
    });
    config
}

#[instrument(skip(config))]
pub fn save_config<P: AsRef<Path> + std::fmt::Debug>(config: &G6Config, path: P) -> Result<()> {
    let path = path.as_ref();
    info!("Saving configuration to: {:?}", path);

    let yaml = serde_yaml::to_string(config)
        .with_context(|| "Failed to serialize configuration to YAML")?;

    fs::write(path, yaml)
        .with_context(|| format!("Failed to write config file: {:?}", path))?;

    info!("Configuration saved successfully");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_then_load_default_config() {
        let path = std::env::temp_dir().join(format!("g6_config_{}.yaml", std::process::id()));
        let config = generate_default_config();
        save_config(&config, &path).unwrap();

        let loaded = load_config(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded.platform.symbols, config.platform.symbols);
        assert_eq!(loaded.scheduler.retry_budget, config.scheduler.retry_budget);
        assert_eq!(loaded.provider.strike_steps, config.provider.strike_steps);
    }

    #[test]
    fn test_load_missing_file_fails() {
        let err = load_config("/nonexistent/g6_config.yaml").unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_parse_invalid_yaml_fails() {
        assert!(parse_config("scheduler: [not, a, map").is_err());
    }
}
