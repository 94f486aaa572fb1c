// Embeddings module
// Turns note text into fixed-length vectors through an embedding provider

#[cfg(test)]
mod tests;

pub mod ollama;

use async_trait::async_trait;

use crate::notes::truncate_chars;
use crate::{Result, VaultError};

pub use ollama::{ModelInfo, OllamaClient};

/// Converts text into a vector of fixed dimension
///
/// Identical input yields the same vector for the same model. Implementations
/// reject empty input with [`VaultError::EmptyInput`] and report provider
/// failures as [`VaultError::EmbeddingProvider`].
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Validate and cut embedding input
///
/// Whitespace-only text is rejected. Longer text is cut to `max_chars`
/// characters so the same note always produces the same request.
#[inline]
pub fn prepare_input(text: &str, max_chars: usize) -> Result<&str> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(VaultError::EmptyInput);
    }
    Ok(truncate_chars(trimmed, max_chars))
}
