//! spanbind Configuration Management
//!
//! Handles configuration from environment variables and TOML files,
//! with defaults that reproduce the baseline evaluation run.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Span location and index correction
    pub locator: LocatorConfig,

    /// Evaluation settings
    pub eval: EvalConfig,

    /// Batch processing
    pub batch: BatchConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(width) = std::env::var("SPANBIND_WINDOW") {
            config.locator.window_half_width = parse_env("SPANBIND_WINDOW", width)?;
        }
        if let Ok(strategy) = std::env::var("SPANBIND_FALLBACK") {
            config.locator.fallback = strategy.parse()?;
        }

        if let Ok(flag) = std::env::var("SPANBIND_REQUIRE_TEXT_MATCH") {
            config.eval.require_text_match = parse_env("SPANBIND_REQUIRE_TEXT_MATCH", flag)?;
        }
        if let Ok(run_id) = std::env::var("SPANBIND_RUN_ID") {
            config.eval.run_id = run_id;
        }

        if let Ok(concurrency) = std::env::var("SPANBIND_CONCURRENCY") {
            let value: usize = parse_env("SPANBIND_CONCURRENCY", concurrency.clone())?;
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    key: "SPANBIND_CONCURRENCY".to_string(),
                    value: concurrency,
                });
            }
            config.batch.concurrency = value;
        }

        // Logging
        if let Ok(level) = std::env::var("LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Ok(flag) = std::env::var("LOG_JSON") {
            config.logging.json_format = parse_env("LOG_JSON", flag)?;
        }

        Ok(config)
    }

    /// Load from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::FileReadError {
            path: path.clone(),
            source: e,
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path,
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Merge with environment variables (env takes precedence)
    pub fn with_env_override(mut self) -> Result<Self, ConfigError> {
        let env_config = Self::from_env()?;

        // Only override if env values differ from defaults
        if env_config.locator.window_half_width != LocatorConfig::default().window_half_width {
            self.locator.window_half_width = env_config.locator.window_half_width;
        }
        if env_config.locator.fallback != LocatorConfig::default().fallback {
            self.locator.fallback = env_config.locator.fallback;
        }
        if env_config.eval.require_text_match {
            self.eval.require_text_match = true;
        }
        if env_config.eval.run_id != EvalConfig::default().run_id {
            self.eval.run_id = env_config.eval.run_id;
        }
        if env_config.batch.concurrency != BatchConfig::default().concurrency {
            self.batch.concurrency = env_config.batch.concurrency;
        }
        if env_config.logging.level != LoggingConfig::default().level {
            self.logging.level = env_config.logging.level;
        }
        if env_config.logging.json_format {
            self.logging.json_format = true;
        }

        Ok(self)
    }

    /// Reject values that would make the pipeline meaningless
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch.concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                key: "batch.concurrency".to_string(),
                value: "0".to_string(),
            });
        }
        if self.eval.run_id.trim().is_empty() {
            return Err(ConfigError::MissingRequired("eval.run_id".to_string()));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: String) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value,
    })
}

/// Span location configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocatorConfig {
    /// Half-width of the search window around a model-reported offset (characters)
    pub window_half_width: usize,

    /// What to do when the mention is not inside the window
    pub fallback: FallbackStrategy,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            window_half_width: 20,
            fallback: FallbackStrategy::WindowThenGlobal,
        }
    }
}

/// Index correction strategy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackStrategy {
    /// Search the window, then the nearest occurrence in the whole document
    #[default]
    WindowThenGlobal,
    /// Search the window only; outside it the mention is unmatched
    WindowOnly,
    /// Skip the window and take the nearest occurrence anywhere
    GlobalOnly,
}

impl std::str::FromStr for FallbackStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "window_then_global" => Ok(Self::WindowThenGlobal),
            "window_only" => Ok(Self::WindowOnly),
            "global_only" => Ok(Self::GlobalOnly),
            _ => Err(ConfigError::InvalidValue {
                key: "SPANBIND_FALLBACK".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for FallbackStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WindowThenGlobal => write!(f, "window_then_global"),
            Self::WindowOnly => write!(f, "window_only"),
            Self::GlobalOnly => write!(f, "global_only"),
        }
    }
}

/// Evaluation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvalConfig {
    /// Identifier written into every report row
    pub run_id: String,

    /// Add the surface text to the exact-match key
    pub require_text_match: bool,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            run_id: "baseline".to_string(),
            require_text_match: false,
        }
    }
}

/// Batch processing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Maximum number of documents processed at once
    pub concurrency: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self { concurrency: 4 }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// JSON format for logs
    pub json_format: bool,

    /// Include file/line in logs
    pub include_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            include_location: false,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.locator.window_half_width, 20);
        assert_eq!(config.locator.fallback, FallbackStrategy::WindowThenGlobal);
        assert_eq!(config.eval.run_id, "baseline");
        assert!(!config.eval.require_text_match);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_fallback_parse() {
        assert_eq!(
            "window-only".parse::<FallbackStrategy>().unwrap(),
            FallbackStrategy::WindowOnly
        );
        assert_eq!(
            "GLOBAL_ONLY".parse::<FallbackStrategy>().unwrap(),
            FallbackStrategy::GlobalOnly
        );
        assert!("nearest".parse::<FallbackStrategy>().is_err());
    }

    #[test]
    fn test_from_file_partial_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[locator]\nwindow_half_width = 35\nfallback = \"global_only\"\n\n[eval]\nrun_id = \"temp01\""
        )
        .unwrap();

        let config = AppConfig::from_file(file.path()).unwrap();
        assert_eq!(config.locator.window_half_width, 35);
        assert_eq!(config.locator.fallback, FallbackStrategy::GlobalOnly);
        assert_eq!(config.eval.run_id, "temp01");
        assert_eq!(config.batch.concurrency, 4);
    }

    #[test]
    fn test_from_file_rejects_zero_concurrency() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[batch]\nconcurrency = 0").unwrap();

        let err = AppConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_from_file_missing() {
        let err = AppConfig::from_file("/nonexistent/spanbind.toml").unwrap_err();
        assert!(matches!(err, ConfigError::FileReadError { .. }));
    }
}
