//! Tracing subscriber setup for the binary and long-running hosts.

use anyhow::anyhow;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// `RUST_LOG` when set, otherwise the configured level.
pub fn build_env_filter(config: &LoggingConfig) -> anyhow::Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(&config.level)
        .map_err(|e| anyhow!("Invalid tracing filter '{}': {}", config.level, e))
}

/// Install the global fmt subscriber. Fails if one is already installed.
pub fn init_tracing(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter = build_env_filter(config)?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow!("Failed to initialize tracing: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_configured_level_is_used_without_rust_log() {
        std::env::remove_var("RUST_LOG");
        let filter = build_env_filter(&LoggingConfig {
            level: "nostrum_cache=debug".to_string(),
        })
        .unwrap();
        assert_eq!(filter.to_string(), "nostrum_cache=debug");
    }

    #[test]
    #[serial]
    fn test_invalid_level_is_rejected() {
        std::env::remove_var("RUST_LOG");
        let result = build_env_filter(&LoggingConfig {
            level: "nostrum_cache=verbose".to_string(),
        });
        assert!(result.is_err());
    }
}
