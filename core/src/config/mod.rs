use crate::error::ConfigError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const TINKER_DIR: &str = ".tinker";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReflectionConfig {
    pub enabled: bool,
    /// Critique model. Unset means the main `model`, which the configured
    /// backend is known to serve.
    pub model: Option<String>,
    pub temperature: f64,
    pub max_tokens: Option<u32>,
    pub timeout_secs: u64,
}

impl Default for ReflectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model: None,
            temperature: 0.0,
            max_tokens: Some(256),
            timeout_secs: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ToolsConfig {
    /// Tool output longer than this many characters is truncated.
    pub output_limit: usize,
    pub call_timeout_secs: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            output_limit: 1000,
            call_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    /// Interpreter used for `*.py` server targets.
    pub python: String,
    pub default_target: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            python: "python".to_string(),
            default_target: "server_fun.py".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub provider: Option<String>,
    pub api_key: String,
    pub base_url: Option<String>,
    pub model: String,
    pub temperature: f64,
    pub max_tokens: Option<u32>,
    pub max_steps: usize,
    pub request_timeout_secs: u64,
    pub json_mode_fallback: bool,
    pub persona: Option<String>,
    pub reflection: ReflectionConfig,
    pub tools: ToolsConfig,
    pub server: ServerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            provider: None,
            api_key: String::new(),
            base_url: None,
            model: "llama-3.1-8b-instant".to_string(),
            temperature: 0.2,
            max_tokens: Some(1024),
            max_steps: 6,
            request_timeout_secs: 30,
            json_mode_fallback: true,
            persona: None,
            reflection: ReflectionConfig::default(),
            tools: ToolsConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

pub fn get_tinker_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(TINKER_DIR)
}

pub fn get_config_path() -> PathBuf {
    get_tinker_dir().join("config.toml")
}

impl Config {
    /// Load `path`, or write the defaults there on first run so the user has
    /// a file to edit. A failed write is logged, not fatal.
    pub fn load_or_init(path: &Path) -> Result<Self> {
        if path.exists() {
            return load_config(path);
        }

        let config = Config::default();
        match save_config(&config, path) {
            Ok(()) => info!(path = %path.display(), "wrote default config"),
            Err(e) => warn!(error = %e, "could not write default config"),
        }
        Ok(config)
    }

    pub fn provider_name(&self) -> String {
        self.provider
            .as_deref()
            .unwrap_or("groq")
            .trim()
            .to_lowercase()
    }

    pub fn reflection_model(&self) -> &str {
        self.reflection
            .model
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(self.model.as_str())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_steps == 0 {
            return Err(ConfigError::Invalid("max_steps must be at least 1".into()));
        }
        if self.tools.output_limit == 0 {
            return Err(ConfigError::Invalid(
                "tools.output_limit must be at least 1".into(),
            ));
        }
        if self.request_timeout_secs == 0
            || self.reflection.timeout_secs == 0
            || self.tools.call_timeout_secs == 0
        {
            return Err(ConfigError::Invalid("timeouts must be non-zero".into()));
        }
        if self.model.trim().is_empty() {
            return Err(ConfigError::Invalid("model must not be empty".into()));
        }
        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config from {}", path.display()))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config from {}", path.display()))?;

    config.validate()?;

    Ok(config)
}

pub fn save_config(config: &Config, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let content =
        toml::to_string_pretty(config).with_context(|| "Failed to serialize config to TOML")?;

    std::fs::write(path, content)
        .with_context(|| format!("Failed to write config to {}", path.display()))?;

    Ok(())
}
