// Configuration management module
// Layers defaults, config.toml, .env and the process environment

pub mod settings;
pub mod show;

pub use settings::{
    AnalysisConfig, Config, ConfigError, OllamaConfig, VaultConfig, ViewerConfig, WatcherConfig,
};
pub use show::show_config;

/// Get the configuration directory path
#[inline]
pub fn get_config_dir() -> Result<std::path::PathBuf, ConfigError> {
    Config::config_dir()
}
