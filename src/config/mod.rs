#[cfg(test)]
mod tests;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use url::Url;

use crate::corpus::TimeOfDay;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub locale: LocaleConfig,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

/// LLM backend settings for the conversational agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelConfig {
    pub base_url: String,
    pub api_key_env: String,
    pub model: String,
    pub temperature: f32,
    pub max_tool_rounds: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.anthropic.com/v1".to_string(),
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
            model: "claude-haiku-4-5-20251001".to_string(),
            temperature: 0.5,
            max_tool_rounds: 6,
        }
    }
}

/// Embedding provider settings (Ollama-compatible server).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub model: String,
    pub dimension: u32,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            protocol: "http".to_string(),
            host: "localhost".to_string(),
            port: 11434,
            model: "nomic-embed-text:latest".to_string(),
            dimension: 768,
        }
    }
}

/// Result-count defaults and the hard cap applied to all searches.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SearchConfig {
    pub restaurant_results: usize,
    pub dish_results: usize,
    pub max_results: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            restaurant_results: 3,
            dish_results: 5,
            max_results: 10,
        }
    }
}

/// A named time-of-day window, e.g. the lunch period.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct MealWindow {
    pub start: TimeOfDay,
    pub end: TimeOfDay,
}

impl MealWindow {
    #[inline]
    pub fn contains(&self, time: TimeOfDay) -> bool {
        self.start <= time && time < self.end
    }
}

/// Mall-local timezone and meal-period windows used when synthesizing the
/// agent's system turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LocaleConfig {
    pub timezone: String,
    pub breakfast: MealWindow,
    pub lunch: MealWindow,
    pub dinner: MealWindow,
}

impl Default for LocaleConfig {
    fn default() -> Self {
        let window = |start: &str, end: &str| MealWindow {
            start: TimeOfDay::from_str(start).expect("static window start"),
            end: TimeOfDay::from_str(end).expect("static window end"),
        };
        Self {
            timezone: "Europe/Madrid".to_string(),
            breakfast: window("07:00", "11:00"),
            lunch: window("13:00", "16:00"),
            dinner: window("19:00", "22:00"),
        }
    }
}

impl LocaleConfig {
    /// Parse the configured timezone name.
    #[inline]
    pub fn tz(&self) -> Result<chrono_tz::Tz, ConfigError> {
        self.timezone
            .parse()
            .map_err(|_| ConfigError::InvalidTimezone(self.timezone.clone()))
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found or could not be created")]
    DirectoryError,
    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),
    #[error("Invalid port: {0} (must be between 1 and 65535)")]
    InvalidPort(u16),
    #[error("Invalid model name: {0} (cannot be empty)")]
    InvalidModel(String),
    #[error("Invalid protocol: {0} (must be 'http' or 'https')")]
    InvalidProtocol(String),
    #[error("Invalid embedding dimension: {0} (must be between 64 and 4096)")]
    InvalidEmbeddingDimension(u32),
    #[error("Invalid temperature: {0} (must be between 0.0 and 2.0)")]
    InvalidTemperature(f32),
    #[error("Invalid tool round limit: {0} (must be between 1 and 12)")]
    InvalidToolRounds(u32),
    #[error("Invalid result count: {0} (must be between 1 and 50)")]
    InvalidResultCount(usize),
    #[error("Default result count {0} exceeds max_results {1}")]
    DefaultExceedsMax(usize, usize),
    #[error("Unknown timezone: {0}")]
    InvalidTimezone(String),
    #[error("Meal window start {0} is not before end {1}")]
    InvalidMealWindow(TimeOfDay, TimeOfDay),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

/// Default configuration directory for the application.
#[inline]
pub fn get_config_dir() -> Result<PathBuf> {
    let base = dirs::config_dir().ok_or(ConfigError::DirectoryError)?;
    Ok(base.join("mesa-guide"))
}

impl Config {
    #[inline]
    pub fn load<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let config_path = config_dir.as_ref().join("config.toml");

        if !config_path.exists() {
            return Ok(Self {
                model: ModelConfig::default(),
                embedding: EmbeddingConfig::default(),
                search: SearchConfig::default(),
                locale: LocaleConfig::default(),
                base_dir: config_dir.as_ref().to_path_buf(),
            });
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;
        config.base_dir = config_dir.as_ref().to_path_buf();

        config
            .validate()
            .with_context(|| "Configuration validation failed")?;

        Ok(config)
    }

    #[inline]
    pub fn save(&self) -> Result<()> {
        self.validate()
            .context("Configuration validation failed before saving")?;

        fs::create_dir_all(&self.base_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                self.base_dir.display()
            )
        })?;

        let config_path = self.base_dir.join("config.toml");
        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(())
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.model.validate()?;
        self.embedding.validate()?;
        self.search.validate()?;
        self.locale.validate()?;
        Ok(())
    }
}

impl ModelConfig {
    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        Url::parse(&self.base_url).map_err(|_| ConfigError::InvalidUrl(self.base_url.clone()))?;

        if self.model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.model.clone()));
        }

        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::InvalidTemperature(self.temperature));
        }

        if self.max_tool_rounds == 0 || self.max_tool_rounds > 12 {
            return Err(ConfigError::InvalidToolRounds(self.max_tool_rounds));
        }

        Ok(())
    }

    /// Read the backend API key from the configured environment variable.
    #[inline]
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env).ok()
    }
}

impl EmbeddingConfig {
    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.protocol != "http" && self.protocol != "https" {
            return Err(ConfigError::InvalidProtocol(self.protocol.clone()));
        }

        if self.port == 0 {
            return Err(ConfigError::InvalidPort(self.port));
        }

        let url_str = format!("{}://{}:{}", self.protocol, self.host, self.port);
        Url::parse(&url_str).map_err(|_| ConfigError::InvalidUrl(url_str))?;

        if self.model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.model.clone()));
        }

        if !(64..=4096).contains(&self.dimension) {
            return Err(ConfigError::InvalidEmbeddingDimension(self.dimension));
        }

        Ok(())
    }

    #[inline]
    pub fn server_url(&self) -> Result<Url, ConfigError> {
        let url_str = format!("{}://{}:{}", self.protocol, self.host, self.port);
        Url::parse(&url_str).map_err(|_| ConfigError::InvalidUrl(url_str))
    }
}

impl SearchConfig {
    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        for count in [
            self.restaurant_results,
            self.dish_results,
            self.max_results,
        ] {
            if count == 0 || count > 50 {
                return Err(ConfigError::InvalidResultCount(count));
            }
        }

        if self.restaurant_results > self.max_results {
            return Err(ConfigError::DefaultExceedsMax(
                self.restaurant_results,
                self.max_results,
            ));
        }
        if self.dish_results > self.max_results {
            return Err(ConfigError::DefaultExceedsMax(
                self.dish_results,
                self.max_results,
            ));
        }

        Ok(())
    }
}

impl LocaleConfig {
    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.tz()?;

        for window in [&self.breakfast, &self.lunch, &self.dinner] {
            if window.start >= window.end {
                return Err(ConfigError::InvalidMealWindow(window.start, window.end));
            }
        }

        Ok(())
    }
}
