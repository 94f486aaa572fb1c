
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use url::Url;

pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const DATA_DIR_ENV: &str = "VAULT_LINKS_DATA_DIR";

const MAX_DEBOUNCE_SECONDS: f64 = 600.0;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub vault: VaultConfig,
    #[serde(default)]
    pub ollama: OllamaConfig,
    #[serde(default)]
    pub watcher: WatcherConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub viewer: ViewerConfig,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VaultConfig {
    pub path: Option<PathBuf>,
    pub excluded_paths: Vec<String>,
    pub index_on_start: bool,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            path: None,
            excluded_paths: vec![
                ".obsidian".to_string(),
                ".trash".to_string(),
                ".git".to_string(),
            ],
            index_on_start: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OllamaConfig {
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub embedding_model: String,
    pub chat_model: String,
    pub request_timeout_seconds: u64,
    pub retry_attempts: u32,
    pub max_input_chars: usize,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            protocol: "http".to_string(),
            host: "localhost".to_string(),
            port: 11434,
            embedding_model: "nomic-embed-text".to_string(),
            chat_model: "llama3.2".to_string(),
            request_timeout_seconds: 120,
            retry_attempts: 3,
            max_input_chars: 8000,
        }
    }
}

/// Debounce knobs. Both are honoured; the effective quiet window is the larger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WatcherConfig {
    /// Seconds of quiet before a changed note is processed
    pub debounce_seconds: f64,
    /// Legacy file-watching debounce
    pub watch_debounce_seconds: f64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce_seconds: 5.0,
            watch_debounce_seconds: 2.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AnalysisConfig {
    pub top_k: usize,
    pub min_similarity: f32,
    pub max_candidates: usize,
    /// Append every published explanation to this JSON-lines file
    pub output_file: Option<PathBuf>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            top_k: 10,
            min_similarity: 0.3,
            max_candidates: 5,
            output_file: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ViewerConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "127.0.0.1".to_string(),
            port: 8000,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found or could not be created")]
    DirectoryError,
    #[error("Vault path is not configured (set OBSIDIAN_VAULT_PATH)")]
    MissingVaultPath,
    #[error("Vault path does not exist or is not a directory: {0}")]
    InvalidVaultPath(PathBuf),
    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),
    #[error("Invalid port: {0} (must be between 1 and 65535)")]
    InvalidPort(u16),
    #[error("Invalid model name: {0} (cannot be empty)")]
    InvalidModel(String),
    #[error("Invalid protocol: {0} (must be 'http' or 'https')")]
    InvalidProtocol(String),
    #[error("Invalid request timeout: {0} (must be between 1 and 600 seconds)")]
    InvalidTimeout(u64),
    #[error("Invalid retry attempts: {0} (must be between 1 and 10)")]
    InvalidRetryAttempts(u32),
    #[error("Invalid max input size: {0} (must be between 100 and 1000000 characters)")]
    InvalidMaxInputChars(usize),
    #[error("Invalid debounce: {0} (must be between 0 and 600 seconds)")]
    InvalidDebounce(f64),
    #[error("Invalid top_k: {0} (must be between 1 and 50)")]
    InvalidTopK(usize),
    #[error("Invalid max candidates: {0} (must be between 1 and 50)")]
    InvalidMaxCandidates(usize),
    #[error("Invalid minimum similarity: {0} (must be between -1 and 1)")]
    InvalidMinSimilarity(f32),
    #[error("Invalid exclusion pattern '{0}'")]
    InvalidExclusionPattern(String),
    #[error("Invalid value for {key}: '{value}'")]
    InvalidEnvValue { key: &'static str, value: String },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl Default for Config {
    #[inline]
    fn default() -> Self {
        Self {
            vault: VaultConfig::default(),
            ollama: OllamaConfig::default(),
            watcher: WatcherConfig::default(),
            analysis: AnalysisConfig::default(),
            viewer: ViewerConfig::default(),
            base_dir: PathBuf::new(),
        }
    }
}

impl Config {
    #[inline]
    pub fn config_dir() -> Result<PathBuf, ConfigError> {
        dirs::home_dir()
            .map(|home| home.join(".vault-links"))
            .or_else(|| dirs::data_dir().map(|data| data.join("vault-links")))
            .ok_or(ConfigError::DirectoryError)
    }

    #[inline]
    pub fn load<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let config_path = config_dir.as_ref().join(CONFIG_FILE_NAME);

        if !config_path.exists() {
            return Ok(Self {
                base_dir: config_dir.as_ref().to_path_buf(),
                ..Self::default()
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

    /// Load configuration the way the binary does: defaults, then the config file,
    /// then `.env`, then the process environment.
    #[inline]
    pub fn from_environment() -> Result<Self> {
        if let Ok(path) = dotenv::dotenv() {
            debug!("Loaded environment from {}", path.display());
        }

        let config_dir = match std::env::var(DATA_DIR_ENV) {
            Ok(dir) if !dir.trim().is_empty() => PathBuf::from(dir),
            _ => Self::config_dir().context("Failed to determine config directory")?,
        };

        let mut config = Self::load(&config_dir)?;
        config
            .apply_env_overrides(|key| std::env::var(key).ok())
            .context("Invalid environment configuration")?;
        config
            .validate()
            .context("Configuration validation failed")?;

        Ok(config)
    }

    /// Apply environment-style overrides. `lookup` returns the raw value for a key.
    #[inline]
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(path) = get("OBSIDIAN_VAULT_PATH") {
            self.vault.path = Some(PathBuf::from(path.trim()));
        }
        if let Some(model) = get("EMBEDDING_MODEL") {
            self.ollama.set_embedding_model(model.trim().to_string())?;
        }
        if let Some(model) = get("LLM_MODEL") {
            self.ollama.set_chat_model(model.trim().to_string())?;
        }
        if let Some(host) = get("OLLAMA_HOST") {
            self.ollama.set_endpoint(host.trim())?;
        }
        if let Some(value) = get("DEBOUNCE_SECONDS") {
            self.watcher.debounce_seconds = parse_seconds("DEBOUNCE_SECONDS", &value)?;
        }
        if let Some(value) = get("FILE_WATCH_DEBOUNCE") {
            self.watcher.watch_debounce_seconds = parse_seconds("FILE_WATCH_DEBOUNCE", &value)?;
        }
        if let Some(value) = get("INDEX_ALL_ON_START") {
            self.vault.index_on_start = parse_bool("INDEX_ALL_ON_START", &value)?;
        }
        if let Some(value) = get("START_WEB_VIEWER") {
            self.viewer.enabled = parse_bool("START_WEB_VIEWER", &value)?;
        }
        if let Some(value) = get("EXCLUDED_PATHS") {
            self.vault.excluded_paths = value
                .split(',')
                .map(str::trim)
                .filter(|pattern| !pattern.is_empty())
                .map(ToString::to_string)
                .collect();
        }
        if let Some(value) = get("VIEWER_PORT") {
            let port = value
                .trim()
                .parse::<u16>()
                .map_err(|_| ConfigError::InvalidEnvValue {
                    key: "VIEWER_PORT",
                    value: value.clone(),
                })?;
            if port == 0 {
                return Err(ConfigError::InvalidPort(port));
            }
            self.viewer.port = port;
        }

        Ok(())
    }

    /// Get the base directory for the application
    #[inline]
    pub fn get_base_dir(&self) -> &Path {
        &self.base_dir
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.ollama.validate()?;
        self.watcher.validate()?;
        self.analysis.validate()?;

        if self.viewer.port == 0 {
            return Err(ConfigError::InvalidPort(self.viewer.port));
        }

        for pattern in &self.vault.excluded_paths {
            glob::Pattern::new(pattern)
                .map_err(|_| ConfigError::InvalidExclusionPattern(pattern.clone()))?;
        }

        Ok(())
    }

    #[inline]
    pub fn ollama_url(&self) -> Result<Url, ConfigError> {
        self.ollama.ollama_url()
    }

    /// The vault root as an absolute path with symlinks resolved
    ///
    /// Watcher events carry absolute, resolved paths; note ids and exclusions
    /// are computed relative to this root, so it must be in the same form.
    #[inline]
    pub fn vault_path(&self) -> Result<PathBuf, ConfigError> {
        let path = self
            .vault
            .path
            .as_deref()
            .ok_or(ConfigError::MissingVaultPath)?;
        if !path.is_dir() {
            return Err(ConfigError::InvalidVaultPath(path.to_path_buf()));
        }
        fs::canonicalize(path).map_err(|_| ConfigError::InvalidVaultPath(path.to_path_buf()))
    }

    #[inline]
    pub fn effective_debounce(&self) -> Duration {
        self.watcher.effective_debounce()
    }

    #[inline]
    pub fn config_file_path(&self) -> PathBuf {
        self.get_base_dir().join(CONFIG_FILE_NAME)
    }

    /// Get the path for the vector database directory
    #[inline]
    pub fn vector_database_path(&self) -> PathBuf {
        self.get_base_dir().join("vectors")
    }
}

impl OllamaConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.protocol != "http" && self.protocol != "https" {
            return Err(ConfigError::InvalidProtocol(self.protocol.clone()));
        }

        if self.port == 0 {
            return Err(ConfigError::InvalidPort(self.port));
        }

        self.ollama_url()?;

        if self.embedding_model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.embedding_model.clone()));
        }

        if self.chat_model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.chat_model.clone()));
        }

        if !(1..=600).contains(&self.request_timeout_seconds) {
            return Err(ConfigError::InvalidTimeout(self.request_timeout_seconds));
        }

        if !(1..=10).contains(&self.retry_attempts) {
            return Err(ConfigError::InvalidRetryAttempts(self.retry_attempts));
        }

        if !(100..=1_000_000).contains(&self.max_input_chars) {
            return Err(ConfigError::InvalidMaxInputChars(self.max_input_chars));
        }

        Ok(())
    }

    pub fn ollama_url(&self) -> Result<Url, ConfigError> {
        let url_str = format!("{}://{}:{}", self.protocol, self.host, self.port);
        Url::parse(&url_str).map_err(|_| ConfigError::InvalidUrl(url_str))
    }

    /// Set protocol, host and port from a URL such as `http://localhost:11434`
    pub fn set_endpoint(&mut self, endpoint: &str) -> Result<(), ConfigError> {
        let url = Url::parse(endpoint).map_err(|_| ConfigError::InvalidUrl(endpoint.to_string()))?;
        let host = url
            .host_str()
            .ok_or_else(|| ConfigError::InvalidUrl(endpoint.to_string()))?
            .to_string();
        let port = url
            .port_or_known_default()
            .ok_or_else(|| ConfigError::InvalidUrl(endpoint.to_string()))?;

        self.set_protocol(url.scheme().to_string())?;
        self.set_port(port)?;
        self.host = host;
        Ok(())
    }

    pub fn set_protocol(&mut self, protocol: String) -> Result<(), ConfigError> {
        if protocol != "http" && protocol != "https" {
            return Err(ConfigError::InvalidProtocol(protocol));
        }
        self.protocol = protocol;
        Ok(())
    }

    pub fn set_port(&mut self, port: u16) -> Result<(), ConfigError> {
        if port == 0 {
            return Err(ConfigError::InvalidPort(port));
        }
        self.port = port;
        Ok(())
    }

    pub fn set_embedding_model(&mut self, model: String) -> Result<(), ConfigError> {
        if model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(model));
        }
        self.embedding_model = model;
        Ok(())
    }

    pub fn set_chat_model(&mut self, model: String) -> Result<(), ConfigError> {
        if model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(model));
        }
        self.chat_model = model;
        Ok(())
    }

    #[inline]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

impl WatcherConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for seconds in [self.debounce_seconds, self.watch_debounce_seconds] {
            if !seconds.is_finite() || !(0.0..=MAX_DEBOUNCE_SECONDS).contains(&seconds) {
                return Err(ConfigError::InvalidDebounce(seconds));
            }
        }
        Ok(())
    }

    /// The larger of the two debounce knobs
    #[inline]
    pub fn effective_debounce(&self) -> Duration {
        let seconds = self
            .debounce_seconds
            .max(self.watch_debounce_seconds)
            .clamp(0.0, MAX_DEBOUNCE_SECONDS);
        Duration::from_secs_f64(seconds)
    }
}

impl AnalysisConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=50).contains(&self.top_k) {
            return Err(ConfigError::InvalidTopK(self.top_k));
        }
        if !(1..=50).contains(&self.max_candidates) {
            return Err(ConfigError::InvalidMaxCandidates(self.max_candidates));
        }
        if !self.min_similarity.is_finite() || !(-1.0..=1.0).contains(&self.min_similarity) {
            return Err(ConfigError::InvalidMinSimilarity(self.min_similarity));
        }
        Ok(())
    }
}

fn parse_seconds(key: &'static str, value: &str) -> Result<f64, ConfigError> {
    let seconds = value
        .trim()
        .parse::<f64>()
        .map_err(|_| ConfigError::InvalidEnvValue {
            key,
            value: value.to_string(),
        })?;
    if !seconds.is_finite() || !(0.0..=MAX_DEBOUNCE_SECONDS).contains(&seconds) {
        return Err(ConfigError::InvalidDebounce(seconds));
    }
    Ok(seconds)
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidEnvValue {
            key,
            value: value.to_string(),
        }),
    }
}
