//! Configuration management for the relay.
//!
//! Configuration is read from an optional YAML file with environment variable
//! expansion, then overridden by individual environment variables.

use anyhow::{bail, Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration (host, port)
    #[serde(default)]
    pub server: ServerConfig,

    /// Upstream LLM backend
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Call monitor sizing
    #[serde(default)]
    pub monitor: MonitorConfig,

    /// Initial values for runtime settings, keyed by setting name
    #[serde(default)]
    pub settings: HashMap<String, serde_json::Value>,
}

/// Server-specific configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to bind to
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// OpenAI-compatible backend the relay forwards to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Base URL including the version prefix, e.g. `http://localhost:11434/v1`
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Bearer token sent upstream
    #[serde(default = "default_api_key")]
    pub api_key: String,

    /// Whether to verify SSL certificates for upstream requests
    #[serde(default = "default_verify_ssl")]
    pub verify_ssl: bool,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: default_api_key(),
            verify_ssl: default_verify_ssl(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// Call monitor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Maximum number of call records kept in memory
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Broadcast buffer for live monitor events; slow subscribers skip ahead
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            event_buffer: default_event_buffer(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_base_url() -> String {
    "http://localhost:11434/v1".to_string()
}

fn default_api_key() -> String {
    "ollama".to_string()
}

fn default_verify_ssl() -> bool {
    true
}

fn default_request_timeout() -> u64 {
    300
}

fn default_capacity() -> usize {
    1000
}

fn default_event_buffer() -> usize {
    256
}

impl AppConfig {
    /// Load configuration from a YAML file.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use llm_relay::core::config::AppConfig;
    ///
    /// let config = AppConfig::load("config.yaml").expect("Failed to load config");
    /// ```
    pub fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let expanded = expand_env_vars(&content);

        let mut config: AppConfig = if expanded.trim().is_empty() {
            AppConfig::default()
        } else {
            serde_yaml::from_str(&expanded)
                .with_context(|| format!("Failed to parse config file: {}", path))?
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` when it exists, otherwise start from defaults.
    /// Environment overrides apply either way.
    pub fn load_or_default(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            return Self::load(path);
        }

        tracing::info!(path = %path, "Config file not found, using defaults");
        let mut config = AppConfig::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Override fields from environment variables (env vars take precedence).
    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("HOST") {
            self.server.host = host;
        }

        if let Ok(port_str) = std::env::var("PORT") {
            if let Ok(port) = port_str.parse::<u16>() {
                self.server.port = port;
            }
        }

        if let Ok(base_url) = std::env::var("OPENAI_BASE_URL") {
            self.upstream.base_url = base_url;
        }

        if let Ok(api_key) = std::env::var("OPENAI_API_KEY") {
            if !api_key.is_empty() {
                self.upstream.api_key = api_key;
            }
        }

        if let Ok(verify_ssl_str) = std::env::var("VERIFY_SSL") {
            self.upstream.verify_ssl = str_to_bool(&verify_ssl_str);
        }

        if let Ok(timeout_str) = std::env::var("REQUEST_TIMEOUT_SECS") {
            if let Ok(timeout) = timeout_str.parse::<u64>() {
                self.upstream.request_timeout_secs = timeout;
            }
        }

        if let Ok(capacity_str) = std::env::var("MONITOR_CAPACITY") {
            if let Ok(capacity) = capacity_str.parse::<usize>() {
                self.monitor.capacity = capacity;
            }
        }
    }

    /// Reject configurations the relay cannot start with.
    pub fn validate(&self) -> Result<()> {
        if self.monitor.capacity == 0 {
            bail!("monitor.capacity must be at least 1");
        }
        if self.monitor.event_buffer == 0 {
            bail!("monitor.event_buffer must be at least 1");
        }
        if self.server.port == 0 {
            bail!("server.port must not be 0");
        }
        if self.upstream.base_url.trim().is_empty() {
            bail!("upstream.base_url must not be empty");
        }
        Ok(())
    }
}

static ENV_VAR_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\$\{([^}:]+)(?::-?([^}]*))?\}"#).expect("env var pattern is valid")
});

/// Expand environment variables in configuration content.
///
/// Supports patterns: ${VAR}, ${VAR:-default}, ${VAR:default}
fn expand_env_vars(content: &str) -> String {
    ENV_VAR_PATTERN
        .replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default_value = caps.get(2).map(|m| m.as_str()).unwrap_or("");
            std::env::var(var_name).unwrap_or_else(|_| default_value.to_string())
        })
        .to_string()
}

/// Convert string to boolean.
///
/// Accepts: "true", "1", "yes", "on" (case-insensitive)
pub fn str_to_bool(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}
