use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, VaultError>;

#[derive(Error, Debug)]
pub enum VaultError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Input text is empty or whitespace only")]
    EmptyInput,

    #[error("Embedding provider error: {0}")]
    EmbeddingProvider(String),

    #[error("Language model provider error: {0}")]
    LanguageModelProvider(String),

    #[error("Vector store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Vector store error: {0}")]
    Store(String),

    #[error("Could not parse analysis response")]
    AnalysisParse { raw: String },

    #[error("Failed to read {}: {source}", path.display())]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl VaultError {
    /// Whether retrying the same operation later may succeed
    #[inline]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::EmbeddingProvider(_) | Self::LanguageModelProvider(_) | Self::Store(_)
        )
    }

    /// Short label used as a structured log field
    #[inline]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::EmptyInput => "empty_input",
            Self::EmbeddingProvider(_) => "embedding_provider",
            Self::LanguageModelProvider(_) => "language_model_provider",
            Self::StoreUnavailable(_) => "store_unavailable",
            Self::Store(_) => "store",
            Self::AnalysisParse { .. } => "analysis_parse",
            Self::FileRead { .. } => "file_read",
            Self::Io(_) => "io",
            Self::Other(_) => "other",
        }
    }
}

impl From<config::ConfigError> for VaultError {
    #[inline]
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

pub mod analyzer;
pub mod commands;
pub mod config;
pub mod database;
pub mod embeddings;
pub mod indexer;
pub mod notes;
pub mod viewer;
pub mod watcher;

#[cfg(test)]
mod testing;
