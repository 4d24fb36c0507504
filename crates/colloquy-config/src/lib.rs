//! # Colloquy Config
//!
//! Unified single-file configuration management for Colloquy.
//! A single `colloquy.yaml` configures app metadata, engine limits,
//! and observability settings.

mod loader;

pub use loader::{load_config, ConfigError};

use serde::Deserialize;

/// Top-level configuration schema for Colloquy.
#[derive(Debug, Clone, Deserialize)]
pub struct ColloquyConfig {
    /// Config schema version.
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub app: AppConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

fn default_version() -> u32 {
    1
}

impl Default for ColloquyConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            app: AppConfig::default(),
            engine: EngineConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_app_name")]
    pub name: String,
    #[serde(default = "default_env")]
    pub environment: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            environment: default_env(),
        }
    }
}

fn default_app_name() -> String {
    "colloquy".to_string()
}

fn default_env() -> String {
    "development".to_string()
}

/// Bounds for the dialogue engine. Deliberately configuration, not
/// constants baked into the engine.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Maximum flow stack depth before pushes are rejected.
    #[serde(default = "default_max_stack_depth")]
    pub max_stack_depth: usize,
    /// Unclear confirmation answers tolerated before giving up.
    #[serde(default = "default_max_confirm_retries")]
    pub max_confirm_retries: u32,
    /// Step advancement iterations allowed within one turn.
    #[serde(default = "default_step_ceiling")]
    pub step_ceiling: usize,
    /// Completed-flow history entries kept per conversation.
    #[serde(default = "default_max_completed_history")]
    pub max_completed_history: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_stack_depth: default_max_stack_depth(),
            max_confirm_retries: default_max_confirm_retries(),
            step_ceiling: default_step_ceiling(),
            max_completed_history: default_max_completed_history(),
        }
    }
}

fn default_max_stack_depth() -> usize {
    10
}

fn default_max_confirm_retries() -> u32 {
    3
}

fn default_step_ceiling() -> usize {
    20
}

fn default_max_completed_history() -> usize {
    50
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_file: Option<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
