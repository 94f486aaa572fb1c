// LanceDB vector database module
// Handles vector storage and similarity search for note embeddings


pub mod vector_store;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::notes::Note;

pub use vector_store::{StoredMatch, VectorStore};

/// Embedding record stored in LanceDB, one per note
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    /// Note identity (vault-relative path)
    pub id: String,
    /// The vector embedding; dimension is fixed by the embedding model
    pub vector: Vec<f32>,
    pub metadata: NoteMetadata,
}

/// Metadata stored alongside a note's embedding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteMetadata {
    /// Absolute path of the note file when it was indexed
    pub path: String,
    pub title: String,
    /// Plain text of the note
    pub content: String,
    /// SHA-256 of the raw file, used to skip unchanged files on reindex
    pub content_hash: String,
    /// RFC 3339 modification time of the file
    pub modified_at: String,
    /// RFC 3339 time the embedding was written
    pub indexed_at: String,
}

impl EmbeddingRecord {
    #[inline]
    pub fn from_note(note: &Note, vector: Vec<f32>) -> Self {
        Self {
            id: note.id.clone(),
            vector,
            metadata: NoteMetadata {
                path: note.path.display().to_string(),
                title: note.title.clone(),
                content: note.text.clone(),
                content_hash: note.content_hash.clone(),
                modified_at: note.modified_at.to_rfc3339(),
                indexed_at: Utc::now().to_rfc3339(),
            },
        }
    }
}
