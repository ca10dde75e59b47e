use std::path::{Path, PathBuf};
use std::time::Duration;

use config as cfg;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::selector::Selector;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Failed to read config: {0}")]
    ReadError(String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Main configuration for the annotator
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct AnnotatorConfig {
    /// Root acquisition, batching and marker bookkeeping
    #[serde(default)]
    pub engine: EngineConfig,

    /// Live region behaviour
    #[serde(default)]
    pub announcer: AnnouncerConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    /// Selector for the subtree the engine observes
    #[serde(default = "default_root_selector")]
    pub root_selector: String,

    /// Delay between probes while the root is absent
    #[serde(default = "default_root_retry_ms")]
    pub root_retry_ms: u64,

    /// Quiet window before a batch of passes runs
    #[serde(default = "default_batch_debounce_ms")]
    pub batch_debounce_ms: u64,

    /// Delay between a secondary action and reading the native menu
    #[serde(default = "default_menu_probe_ms")]
    pub menu_probe_ms: u64,

    /// Attribute name prefixes written by passes; changes to these are ignored
    #[serde(default = "default_owned_attribute_prefixes")]
    pub owned_attribute_prefixes: Vec<String>,

    /// Mirror markers into `data-a11y-<pass>` attributes for debugging
    #[serde(default)]
    pub mirror_markers: bool,

    /// Sweep stale markers every N batches (0 disables)
    #[serde(default = "default_sweep_markers_every")]
    pub sweep_markers_every: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            root_selector: default_root_selector(),
            root_retry_ms: default_root_retry_ms(),
            batch_debounce_ms: default_batch_debounce_ms(),
            menu_probe_ms: default_menu_probe_ms(),
            owned_attribute_prefixes: default_owned_attribute_prefixes(),
            mirror_markers: false,
            sweep_markers_every: default_sweep_markers_every(),
        }
    }
}

impl EngineConfig {
    pub fn root_retry(&self) -> Duration {
        Duration::from_millis(self.root_retry_ms)
    }

    pub fn batch_debounce(&self) -> Duration {
        Duration::from_millis(self.batch_debounce_ms)
    }

    pub fn menu_probe(&self) -> Duration {
        Duration::from_millis(self.menu_probe_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnnouncerConfig {
    /// How long a transient announcement holds the live region
    #[serde(default = "default_transient_timeout_ms")]
    pub transient_timeout_ms: u64,
}

impl Default for AnnouncerConfig {
    fn default() -> Self {
        Self {
            transient_timeout_ms: default_transient_timeout_ms(),
        }
    }
}

impl AnnouncerConfig {
    pub fn transient_timeout(&self) -> Duration {
        Duration::from_millis(self.transient_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "pretty", "json", "compact"
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

fn default_root_selector() -> String {
    "#root".to_string()
}
fn default_root_retry_ms() -> u64 {
    500
}
fn default_batch_debounce_ms() -> u64 {
    250
}
fn default_menu_probe_ms() -> u64 {
    50
}
fn default_owned_attribute_prefixes() -> Vec<String> {
    ["aria-", "role", "tabindex", "data-a11y-"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_sweep_markers_every() -> u32 {
    32
}
fn default_transient_timeout_ms() -> u64 {
    3000
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "pretty".to_string()
}

/// Configuration manager
pub struct ConfigManager {
    config: AnnotatorConfig,
    config_path: Option<PathBuf>,
}

impl ConfigManager {
    /// Load configuration from the default locations and the environment
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::locate_config_file();
        Self::load_with(config_path)
    }

    /// Load configuration from an explicit file, then the environment
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        Self::load_with(Some(path.to_path_buf()))
    }

    fn load_with(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        info!("Loading annotator configuration");
        let config = Self::load_from_sources(config_path.as_deref())?;
        Self::validate_config(&config)?;

        match &config_path {
            Some(path) => info!(path = %path.display(), "Configuration loaded"),
            None => info!("No config file found, using defaults"),
        }
        debug!(
            root = %config.engine.root_selector,
            debounce_ms = config.engine.batch_debounce_ms,
            transient_ms = config.announcer.transient_timeout_ms,
            "Effective engine settings"
        );

        Ok(Self {
            config,
            config_path,
        })
    }

    /// `./.annotator.toml`, then `~/.annotator/config.toml`
    fn locate_config_file() -> Option<PathBuf> {
        let local_config = Path::new(".annotator.toml");
        if local_config.exists() {
            return Some(local_config.to_path_buf());
        }

        let user_config = dirs::home_dir()?.join(".annotator").join("config.toml");
        user_config.exists().then_some(user_config)
    }

    /// Layer an optional TOML file under `ANNOTATOR__SECTION__KEY` variables
    pub fn load_from_sources(path: Option<&Path>) -> Result<AnnotatorConfig, ConfigError> {
        let mut builder = cfg::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                cfg::File::from(path)
                    .format(cfg::FileFormat::Toml)
                    .required(true),
            );
        }
        builder = builder.add_source(
            cfg::Environment::with_prefix("ANNOTATOR")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("engine.owned_attribute_prefixes"),
        );

        builder
            .build()
            .map_err(|e| ConfigError::ReadError(e.to_string()))?
            .try_deserialize()
            .map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    pub fn validate_config(config: &AnnotatorConfig) -> Result<(), ConfigError> {
        Selector::parse(&config.engine.root_selector).map_err(|e| {
            ConfigError::ValidationError(format!("Invalid root selector: {}", e))
        })?;

        for (name, value) in [
            ("engine.root_retry_ms", config.engine.root_retry_ms),
            ("engine.batch_debounce_ms", config.engine.batch_debounce_ms),
            ("engine.menu_probe_ms", config.engine.menu_probe_ms),
            (
                "announcer.transient_timeout_ms",
                config.announcer.transient_timeout_ms,
            ),
        ] {
            if value == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "{} must be greater than zero",
                    name
                )));
            }
        }

        if config
            .engine
            .owned_attribute_prefixes
            .iter()
            .any(|prefix| prefix.trim().is_empty())
        {
            return Err(ConfigError::ValidationError(
                "Owned attribute prefixes must not be empty".to_string(),
            ));
        }

        match config.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                    other
                )))
            }
        }

        match config.logging.format.as_str() {
            "pretty" | "json" | "compact" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid log format: {}. Must be one of: pretty, json, compact",
                    other
                )))
            }
        }

        Ok(())
    }

    pub fn config(&self) -> &AnnotatorConfig {
        &self.config
    }

    pub fn into_config(self) -> AnnotatorConfig {
        self.config
    }

    /// Get the path to the config file that was loaded, if any
    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    /// Create a default config file
    pub fn create_default_config(path: &Path) -> Result<(), ConfigError> {
        let config = AnnotatorConfig::default();
        let toml_str =
            toml::to_string_pretty(&config).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::ReadError(e.to_string()))?;
        }

        std::fs::write(path, toml_str).map_err(|e| ConfigError::ReadError(e.to_string()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AnnotatorConfig::default();
        assert_eq!(config.engine.root_selector, "#root");
        assert_eq!(config.engine.batch_debounce(), Duration::from_millis(250));
        assert_eq!(config.engine.root_retry(), Duration::from_millis(500));
        assert_eq!(config.engine.menu_probe(), Duration::from_millis(50));
        assert_eq!(
            config.announcer.transient_timeout(),
            Duration::from_millis(3000)
        );
        assert!(!config.engine.mirror_markers);
        assert_eq!(config.engine.sweep_markers_every, 32);
    }

    #[test]
    fn test_config_validation() {
        let config = AnnotatorConfig::default();
        assert!(ConfigManager::validate_config(&config).is_ok());

        let mut bad = config.clone();
        bad.engine.root_selector = "#".to_string();
        assert!(ConfigManager::validate_config(&bad).is_err());

        let mut bad = config.clone();
        bad.engine.batch_debounce_ms = 0;
        assert!(ConfigManager::validate_config(&bad).is_err());

        let mut bad = config.clone();
        bad.logging.level = "loud".to_string();
        assert!(ConfigManager::validate_config(&bad).is_err());

        let mut bad = config;
        bad.engine.owned_attribute_prefixes.push(" ".to_string());
        assert!(ConfigManager::validate_config(&bad).is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: AnnotatorConfig = toml::from_str(
            r#"
            [engine]
            batch_debounce_ms = 100
            "#,
        )
        .unwrap();
        assert_eq!(config.engine.batch_debounce_ms, 100);
        assert_eq!(config.engine.root_retry_ms, 500);
        assert_eq!(config.logging, LoggingConfig::default());
    }
}
