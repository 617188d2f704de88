//! Configuration loader with environment variable support

use super::Config;
use crate::error::{RelayError, Result};
use config::{Environment, File};
use std::path::Path;

/// Load configuration from a TOML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let config = config::Config::builder()
        .add_source(File::from(path.as_ref()))
        .build()?;

    let cfg: Config = config.try_deserialize()?;
    validate_config(&cfg)?;
    Ok(cfg)
}

/// Load configuration from a TOML file with environment variable overrides
pub fn load_config_with_env<P: AsRef<Path>>(path: P) -> Result<Config> {
    let config = config::Config::builder()
        .add_source(File::from(path.as_ref()))
        .add_source(
            Environment::with_prefix("CONTEXT_RELAY")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    let cfg: Config = config.try_deserialize()?;
    validate_config(&cfg)?;
    Ok(cfg)
}

/// Validate configuration values
pub fn validate_config(config: &Config) -> Result<()> {
    if config.breaker.failure_threshold == 0 {
        return Err(RelayError::Config(
            "Breaker failure threshold must be greater than 0".to_string(),
        ));
    }

    if config.breaker.half_open_max_attempts == 0 {
        return Err(RelayError::Config(
            "Breaker half-open attempt budget must be greater than 0".to_string(),
        ));
    }

    if config.retry.max_attempts == 0 {
        return Err(RelayError::Config(
            "Retry max attempts must be greater than 0".to_string(),
        ));
    }

    if config.retry.backoff_multiplier < 1.0 {
        return Err(RelayError::Config(format!(
            "Retry backoff multiplier must be >= 1.0, got {}",
            config.retry.backoff_multiplier
        )));
    }

    let total_weight = config.hybrid.text + config.hybrid.vector;
    if (total_weight - 1.0).abs() > 0.01 {
        return Err(RelayError::Config(format!(
            "Hybrid weights must sum to 1.0, got {}",
            total_weight
        )));
    }

    if !(0.0..=1.0).contains(&config.sources.vector.similarity_threshold) {
        return Err(RelayError::Config(format!(
            "Similarity threshold must be within [0, 1], got {}",
            config.sources.vector.similarity_threshold
        )));
    }

    if config.relay.fallback_chunk_words == 0 {
        return Err(RelayError::Config(
            "Fallback chunk size must be greater than 0 words".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_default_config() {
        let config = Config::default();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_bad_weights() {
        let mut config = Config::default();
        config.hybrid.text = 0.5;
        config.hybrid.vector = 0.7;

        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_zero_threshold() {
        let mut config = Config::default();
        config.breaker.failure_threshold = 0;

        assert!(validate_config(&config).is_err());
    }
}
