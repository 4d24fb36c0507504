//! Configuration loading and validation.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::ColloquyConfig;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Load full Colloquy configuration from a YAML file.
pub fn load_config(path: &Path) -> Result<ColloquyConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let config: ColloquyConfig = serde_yaml::from_str(&content)?;
    validate_config(&config)?;
    Ok(config)
}

fn validate_config(config: &ColloquyConfig) -> Result<(), ConfigError> {
    if config.version == 0 {
        return Err(ConfigError::Invalid(
            "version must be greater than 0".to_string(),
        ));
    }

    if config.app.name.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "app.name must not be empty".to_string(),
        ));
    }

    if config.engine.max_stack_depth == 0 {
        return Err(ConfigError::Invalid(
            "engine.max_stack_depth must be > 0".to_string(),
        ));
    }

    if config.engine.max_confirm_retries == 0 {
        return Err(ConfigError::Invalid(
            "engine.max_confirm_retries must be > 0".to_string(),
        ));
    }

    if config.engine.step_ceiling == 0 {
        return Err(ConfigError::Invalid(
            "engine.step_ceiling must be > 0".to_string(),
        ));
    }

    Ok(())
}
