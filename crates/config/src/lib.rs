//! Configuration loading, validation, and management for MeshBrain.
//!
//! Loads configuration from `~/.meshbrain/config.toml` with environment
//! variable overrides. `${VAR}` references in string values are expanded
//! from the environment. Validates all settings at startup.

use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

/// The root configuration structure.
///
/// Maps directly to `~/.meshbrain/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Generation providers, tried in the listed order
    #[serde(default = "default_providers")]
    pub providers: Vec<ProviderConfig>,

    /// Memory tier configuration
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Request orchestration settings
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// Gateway configuration
    #[serde(default)]
    pub gateway: GatewayConfig,
}

/// Which wire protocol a provider speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// `/chat/completions` with Bearer auth (OpenAI, OpenRouter, Ollama, ...)
    OpenaiCompat,
    /// Azure OpenAI deployments with `api-key` header auth
    AzureOpenai,
    /// Anthropic Messages API
    Anthropic,
}

/// One entry in the provider priority list.
#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Name used in logs, attempt records and health snapshots
    pub name: String,

    pub kind: ProviderKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Environment variable consulted when `api_key` is unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Azure deployment name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment: Option<String>,

    /// Azure API version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,

    /// Hard deadline for one attempt against this provider
    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_provider_timeout() -> u64 {
    30
}
fn default_max_tokens() -> u32 {
    2000
}
fn default_temperature() -> f32 {
    0.7
}

fn default_providers() -> Vec<ProviderConfig> {
    vec![
        ProviderConfig {
            name: "azure".into(),
            kind: ProviderKind::AzureOpenai,
            api_url: Some("${AZURE_OPENAI_ENDPOINT}".into()),
            api_key: None,
            api_key_env: Some("AZURE_OPENAI_KEY".into()),
            model: None,
            deployment: Some("gpt-4o".into()),
            api_version: Some("2024-02-01".into()),
            timeout_secs: 10,
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        },
        ProviderConfig {
            name: "claude".into(),
            kind: ProviderKind::Anthropic,
            api_url: None,
            api_key: None,
            api_key_env: Some("ANTHROPIC_API_KEY".into()),
            model: Some("claude-sonnet-4-20250514".into()),
            deployment: None,
            api_version: None,
            timeout_secs: 40,
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        },
    ]
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("api_url", &self.api_url)
            .field("api_key", &redact(&self.api_key))
            .field("api_key_env", &self.api_key_env)
            .field("model", &self.model)
            .field("deployment", &self.deployment)
            .field("api_version", &self.api_version)
            .field("timeout_secs", &self.timeout_secs)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .finish()
    }
}

impl ProviderConfig {
    /// The per-attempt deadline.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// The API key from the config file, or from `api_key_env`.
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| {
                self.api_key_env
                    .as_deref()
                    .and_then(|var| std::env::var(var).ok())
            })
            .filter(|k| !k.is_empty())
    }
}

/// Which store backs the WARM tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarmBackend {
    Sqlite,
    InMemory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "default_hot_ttl")]
    pub hot_ttl_secs: u64,

    #[serde(default = "default_warm_ttl")]
    pub warm_ttl_secs: u64,

    /// Retention in COLD, counted from arrival (i.e. after `warm_ttl_secs`)
    #[serde(default = "default_cold_ttl")]
    pub cold_ttl_secs: u64,

    /// Ring buffer capacity per user
    #[serde(default = "default_hot_max_turns")]
    pub hot_max_turns: usize,

    #[serde(default = "default_context_token_budget")]
    pub context_token_budget: usize,

    /// WARM turns read when HOT does not fill the budget. Raised to
    /// `context_token_budget / 4` (the most turns the budget can hold)
    /// when that is larger.
    #[serde(default = "default_warm_fetch_limit")]
    pub warm_fetch_limit: usize,

    #[serde(default = "default_warm_backend")]
    pub warm_backend: WarmBackend,

    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: PathBuf,

    #[serde(default = "default_cold_dir")]
    pub cold_dir: PathBuf,

    /// Background sweep period; 0 disables the sweeper
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    #[serde(default = "default_write_queue_capacity")]
    pub write_queue_capacity: usize,

    #[serde(default = "default_write_queue_shards")]
    pub write_queue_shards: usize,

    #[serde(default = "default_write_retry_attempts")]
    pub write_retry_attempts: u32,
}

fn default_hot_ttl() -> u64 {
    30 * 60
}
fn default_warm_ttl() -> u64 {
    7 * 24 * 3600
}
fn default_cold_ttl() -> u64 {
    90 * 24 * 3600
}
fn default_hot_max_turns() -> usize {
    20
}
fn default_context_token_budget() -> usize {
    2000
}
fn default_warm_fetch_limit() -> usize {
    50
}
fn default_warm_backend() -> WarmBackend {
    WarmBackend::Sqlite
}
fn default_sqlite_path() -> PathBuf {
    AppConfig::config_dir().join("memory.db")
}
fn default_cold_dir() -> PathBuf {
    AppConfig::config_dir().join("archive")
}
fn default_sweep_interval() -> u64 {
    300
}
fn default_write_queue_capacity() -> usize {
    256
}
fn default_write_queue_shards() -> usize {
    4
}
fn default_write_retry_attempts() -> u32 {
    3
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            hot_ttl_secs: default_hot_ttl(),
            warm_ttl_secs: default_warm_ttl(),
            cold_ttl_secs: default_cold_ttl(),
            hot_max_turns: default_hot_max_turns(),
            context_token_budget: default_context_token_budget(),
            warm_fetch_limit: default_warm_fetch_limit(),
            warm_backend: default_warm_backend(),
            sqlite_path: default_sqlite_path(),
            cold_dir: default_cold_dir(),
            sweep_interval_secs: default_sweep_interval(),
            write_queue_capacity: default_write_queue_capacity(),
            write_queue_shards: default_write_queue_shards(),
            write_retry_attempts: default_write_retry_attempts(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Outer deadline for context assembly plus routing
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Reply when every provider fails
    #[serde(default = "default_static_response")]
    pub static_response: String,

    /// Reply to greetings when every provider fails
    #[serde(default = "default_greeting_response")]
    pub greeting_response: String,

    /// Reply to status checks when every provider fails
    #[serde(default = "default_status_response")]
    pub status_response: String,

    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

fn default_request_timeout() -> u64 {
    60
}
fn default_static_response() -> String {
    "Sorry, I'm having trouble answering right now. Please try again in a moment.".into()
}
fn default_greeting_response() -> String {
    "Hello! I'm here, but running in limited mode right now. How can I help?".into()
}
fn default_status_response() -> String {
    "I'm online, though my language services are currently degraded.".into()
}
fn default_system_prompt() -> String {
    "You are a helpful assistant.".into()
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout(),
            static_response: default_static_response(),
            greeting_response: default_greeting_response(),
            status_response: default_status_response(),
            system_prompt: default_system_prompt(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,
}

fn default_port() -> u16 {
    8080
}
fn default_host() -> String {
    "127.0.0.1".into()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.meshbrain/config.toml).
    ///
    /// Environment overrides (highest priority):
    /// - `MESHBRAIN_HOST`, `MESHBRAIN_PORT`
    /// - `MESHBRAIN_SQLITE_PATH`, `MESHBRAIN_COLD_DIR`
    /// - `MESHBRAIN_REQUEST_TIMEOUT`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        Self::load_from(&config_path)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
            Self::from_toml_str(&content).map_err(|reason| ConfigError::ParseError {
                path: path.to_path_buf(),
                reason,
            })?
        } else {
            tracing::info!("No config file found at {}, using defaults", path.display());
            Self::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parse TOML, expanding `${VAR}` references before deserializing.
    pub fn from_toml_str(content: &str) -> Result<Self, String> {
        let mut value: toml::Value = toml::from_str(content).map_err(|e| e.to_string())?;
        expand_env_value(&mut value);
        value.try_into::<Self>().map_err(|e| e.to_string())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("MESHBRAIN_HOST") {
            self.gateway.host = host;
        }
        if let Some(port) = env_parse::<u16>("MESHBRAIN_PORT") {
            self.gateway.port = port;
        }
        if let Ok(path) = std::env::var("MESHBRAIN_SQLITE_PATH") {
            self.memory.sqlite_path = PathBuf::from(path);
        }
        if let Ok(dir) = std::env::var("MESHBRAIN_COLD_DIR") {
            self.memory.cold_dir = PathBuf::from(dir);
        }
        if let Some(secs) = env_parse::<u64>("MESHBRAIN_REQUEST_TIMEOUT") {
            self.orchestrator.request_timeout_secs = secs;
        }
        for provider in &mut self.providers {
            if let Some(url) = provider.api_url.as_mut() {
                *url = expand_env(url);
            }
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".meshbrain")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = std::collections::HashSet::new();
        for p in &self.providers {
            if p.name.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "provider name must not be empty".into(),
                ));
            }
            if p.name == "static" {
                return Err(ConfigError::ValidationError(
                    "provider name 'static' is reserved for the fallback response".into(),
                ));
            }
            if !seen.insert(p.name.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate provider name '{}'",
                    p.name
                )));
            }
            if p.timeout_secs == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "provider '{}': timeout_secs must be > 0",
                    p.name
                )));
            }
            if !(0.0..=2.0).contains(&p.temperature) {
                return Err(ConfigError::ValidationError(format!(
                    "provider '{}': temperature must be between 0.0 and 2.0",
                    p.name
                )));
            }
        }

        let m = &self.memory;
        if m.hot_ttl_secs == 0 || m.warm_ttl_secs == 0 || m.cold_ttl_secs == 0 {
            return Err(ConfigError::ValidationError(
                "memory TTLs must be > 0".into(),
            ));
        }
        if m.hot_ttl_secs > m.warm_ttl_secs {
            return Err(ConfigError::ValidationError(
                "hot_ttl_secs must not exceed warm_ttl_secs".into(),
            ));
        }
        if m.hot_max_turns == 0 {
            return Err(ConfigError::ValidationError(
                "hot_max_turns must be > 0".into(),
            ));
        }
        if m.write_queue_capacity == 0 || m.write_queue_shards == 0 {
            return Err(ConfigError::ValidationError(
                "write_queue_capacity and write_queue_shards must be > 0".into(),
            ));
        }
        if self.orchestrator.request_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "request_timeout_secs must be > 0".into(),
            ));
        }
        Ok(())
    }

    /// Generate a default config TOML string (for the `init` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            providers: default_providers(),
            memory: MemoryConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            gateway: GatewayConfig::default(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(var: &str) -> Option<T> {
    let raw = std::env::var(var).ok()?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(var, value = %raw, "Ignoring unparseable environment override");
            None
        }
    }
}

static ENV_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").ok());

/// Replace every `${VAR}` with the variable's value (empty when unset).
pub fn expand_env(input: &str) -> String {
    match ENV_PATTERN.as_ref() {
        Some(re) => re
            .replace_all(input, |caps: &regex_lite::Captures<'_>| {
                std::env::var(&caps[1]).unwrap_or_default()
            })
            .into_owned(),
        None => input.to_string(),
    }
}

fn expand_env_value(value: &mut toml::Value) {
    match value {
        toml::Value::String(s) => {
            if s.contains("${") {
                *s = expand_env(s);
            }
        }
        toml::Value::Array(items) => items.iter_mut().for_each(expand_env_value),
        toml::Value::Table(table) => table.iter_mut().for_each(|(_, v)| expand_env_value(v)),
        _ => {}
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }

    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.providers.len(), 2);
        assert_eq!(config.providers[0].kind, ProviderKind::AzureOpenai);
        assert_eq!(config.providers[0].timeout_secs, 10);
        assert_eq!(config.providers[1].timeout_secs, 40);
        assert_eq!(config.memory.hot_ttl_secs, 1800);
        assert_eq!(config.memory.hot_max_turns, 20);
        assert_eq!(config.gateway.port, 8080);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed = AppConfig::from_toml_str(&toml_str).unwrap();
        assert_eq!(parsed.providers.len(), config.providers.len());
        assert_eq!(parsed.memory.warm_backend, WarmBackend::Sqlite);
        assert_eq!(parsed.gateway.port, config.gateway.port);
    }

    #[test]
    fn provider_order_is_preserved() {
        let toml_str = r#"
[[providers]]
name = "primary"
kind = "openai_compat"
api_url = "http://localhost:11434/v1"
timeout_secs = 2

[[providers]]
name = "secondary"
kind = "anthropic"
timeout_secs = 3
"#;
        let config = AppConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.providers[0].name, "primary");
        assert_eq!(config.providers[0].timeout(), Duration::from_secs(2));
        assert_eq!(config.providers[1].kind, ProviderKind::Anthropic);
        assert_eq!(config.providers[1].max_tokens, 2000);
    }

    #[test]
    fn env_references_are_expanded() {
        // SAFETY: test-only, unique variable name
        unsafe { std::env::set_var("MESHBRAIN_TEST_EXPAND_KEY", "sk-expanded") };
        let toml_str = r#"
[[providers]]
name = "p"
kind = "openai_compat"
api_key = "${MESHBRAIN_TEST_EXPAND_KEY}"
"#;
        let config = AppConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.providers[0].api_key.as_deref(), Some("sk-expanded"));
        assert_eq!(expand_env("${MESHBRAIN_TEST_UNSET_VAR_XYZ}"), "");
        assert_eq!(expand_env("plain"), "plain");
    }

    #[test]
    fn api_key_env_is_consulted() {
        unsafe { std::env::set_var("MESHBRAIN_TEST_KEY_ENV", "sk-env") };
        let mut provider = default_providers().remove(1);
        provider.api_key_env = Some("MESHBRAIN_TEST_KEY_ENV".into());
        assert_eq!(provider.resolved_api_key().as_deref(), Some("sk-env"));

        provider.api_key = Some("sk-inline".into());
        assert_eq!(provider.resolved_api_key().as_deref(), Some("sk-inline"));
    }

    #[test]
    fn duplicate_provider_names_rejected() {
        let mut config = AppConfig::default();
        config.providers[1].name = config.providers[0].name.clone();
        assert!(config.validate().is_err());
    }

    #[test]
    fn reserved_static_name_rejected() {
        let mut config = AppConfig::default();
        config.providers[0].name = "static".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn invalid_temperature_rejected() {
        let mut config = AppConfig::default();
        config.providers[0].temperature = 5.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_timeout_rejected() {
        let mut config = AppConfig::default();
        config.providers[0].timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn hot_ttl_longer_than_warm_rejected() {
        let mut config = AppConfig::default();
        config.memory.hot_ttl_secs = config.memory.warm_ttl_secs + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let result = AppConfig::load_from(Path::new("/nonexistent/config.toml"));
        assert!(result.is_ok());
        assert_eq!(result.unwrap().providers.len(), 2);
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[memory]
hot_ttl_secs = 60
warm_backend = "in_memory"

[orchestrator]
static_response = "offline"
"#,
        )
        .unwrap();
        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.memory.hot_ttl_secs, 60);
        assert_eq!(config.memory.warm_backend, WarmBackend::InMemory);
        assert_eq!(config.orchestrator.static_response, "offline");
        assert_eq!(config.providers.len(), 2);
    }

    #[test]
    fn malformed_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "providers = 42").unwrap();
        match AppConfig::load_from(&path) {
            Err(ConfigError::ParseError { .. }) => {}
            other => panic!("Expected ParseError, got: {other:?}"),
        }
    }

    #[test]
    fn debug_redacts_api_keys() {
        let mut config = AppConfig::default();
        config.providers[0].api_key = Some("sk-very-secret".into());
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-very-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("azure_openai"));
        assert!(toml_str.contains("hot_ttl_secs"));
    }
}
