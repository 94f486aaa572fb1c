// Deterministic stand-ins for the model providers and the output sink

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::analyzer::{ChatProvider, ConnectionExplanation};
use crate::embeddings::{Embedder, prepare_input};
use crate::indexer::sink::ConnectionSink;
use crate::{Result, VaultError};

/// Bag-of-words embedder: each lowercase word is hashed into one of
/// `dimension` buckets and the counts are normalized
pub struct HashingEmbedder {
    dimension: usize,
    calls: AtomicUsize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0_f32; self.dimension];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| w.len() > 2)
        {
            let mut hasher = DefaultHasher::new();
            word.to_lowercase().hash(&mut hasher);
            let bucket = (hasher.finish() % self.dimension as u64) as usize;
            vector[bucket] += 1.0;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm == 0.0 {
            vector[0] = 1.0;
        } else {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        vector
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let input = prepare_input(text, 8000)?;
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.vector_for(input))
    }
}

/// Embedder that always fails with a provider error
pub struct FailingEmbedder;

#[async_trait]
impl Embedder for FailingEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(VaultError::EmbeddingProvider("provider offline".to_string()))
    }
}

/// Chat provider returning a canned reply and recording prompts
pub struct FakeChatProvider {
    reply: Option<String>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl FakeChatProvider {
    pub fn replying(reply: &str) -> Self {
        Self {
            reply: Some(reply.to_string()),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Every call fails with a provider error
    pub fn failing() -> Self {
        Self {
            reply: None,
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().expect("prompt lock").clone()
    }
}

#[async_trait]
impl ChatProvider for FakeChatProvider {
    async fn complete(&self, _system: &str, prompt: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts
            .lock()
            .expect("prompt lock")
            .push(prompt.to_string());
        self.reply
            .clone()
            .ok_or_else(|| VaultError::LanguageModelProvider("model offline".to_string()))
    }
}

/// Sink that keeps every published explanation
#[derive(Default)]
pub struct RecordingSink {
    published: Mutex<Vec<ConnectionExplanation>>,
}

impl RecordingSink {
    pub fn published(&self) -> Vec<ConnectionExplanation> {
        self.published.lock().expect("sink lock").clone()
    }
}

#[async_trait]
impl ConnectionSink for RecordingSink {
    async fn publish(&self, explanation: &ConnectionExplanation) -> Result<()> {
        self.published
            .lock()
            .expect("sink lock")
            .push(explanation.clone());
        Ok(())
    }
}
