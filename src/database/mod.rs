// Database module
// LanceDB holds one embedding record per note

pub mod lancedb;

pub use self::lancedb::{EmbeddingRecord, NoteMetadata, StoredMatch, VectorStore};
