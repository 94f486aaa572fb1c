// Indexer module
// Coordinates reading, embedding, storing and analyzing notes


pub mod queue;
pub mod sink;

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::analyzer::{Analyzer, SimilarityMatch};
use crate::database::{EmbeddingRecord, VectorStore};
use crate::embeddings::Embedder;
use crate::notes::{
    ExclusionRules, Note, discover_notes, excerpt, is_markdown_file, note_id, read_note,
};
use crate::watcher::{ChangeEvent, ChangeKind};
use crate::{Result, VaultError};

pub use queue::{QueueStats, WorkQueue};
pub use sink::{ConnectionSink, ConsoleSink, JsonLinesSink, MultiSink};

/// Characters of note content shown with a backlink suggestion
pub const BACKLINK_EXCERPT_CHARS: usize = 200;

/// Incremental indexer for one vault
pub struct Indexer {
    root: PathBuf,
    rules: ExclusionRules,
    store: Arc<VectorStore>,
    embedder: Arc<dyn Embedder>,
    analyzer: Analyzer,
    sink: Arc<dyn ConnectionSink>,
    top_k: usize,
}

/// Statistics about a full reindex
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IndexingStats {
    pub files_found: usize,
    pub files_indexed: usize,
    pub files_unchanged: usize,
    pub files_failed: usize,
    /// Records pruned because their file is gone or now empty
    pub files_removed: usize,
}

/// Progress of a full reindex, reported after each file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexProgress {
    pub processed: usize,
    pub total: usize,
    pub path: PathBuf,
}

/// Counters for the change-event worker
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    pub events_processed: usize,
    pub events_failed: usize,
}

/// What handling one change did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    /// Embedded, stored and analyzed; `related` notes were published
    Indexed { related: usize },
    /// The note's record was deleted
    Removed,
    /// A folder went away; `notes` records stored under it were deleted
    FolderRemoved { notes: usize },
    /// Not an eligible note
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReindexOutcome {
    Indexed,
    Unchanged,
    Removed,
}

/// A related note suggested as a link target
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BacklinkSuggestion {
    pub id: String,
    pub path: String,
    pub title: String,
    /// `1 - distance`
    pub relevance: f32,
    pub excerpt: String,
}

impl Indexer {
    #[inline]
    pub fn new(
        root: PathBuf,
        rules: ExclusionRules,
        store: Arc<VectorStore>,
        embedder: Arc<dyn Embedder>,
        analyzer: Analyzer,
        sink: Arc<dyn ConnectionSink>,
        top_k: usize,
    ) -> Self {
        Self {
            root,
            rules,
            store,
            embedder,
            analyzer,
            sink,
            top_k,
        }
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[inline]
    pub fn store(&self) -> &Arc<VectorStore> {
        &self.store
    }

    /// Handle one debounced change
    #[inline]
    pub async fn handle_event(&self, event: &ChangeEvent) -> Result<EventOutcome> {
        debug!("Handling {} for {}", event.kind, event.path.display());
        match event.kind {
            ChangeKind::Deleted => self.remove_note(&event.path).await,
            ChangeKind::Created | ChangeKind::Modified => self.process_note(&event.path).await,
        }
    }

    /// Read, embed, store and analyze a changed note, then publish the explanation
    ///
    /// A file that no longer exists is treated as deleted. A note with no
    /// text is removed from the store and not analyzed.
    #[inline]
    pub async fn process_note(&self, path: &Path) -> Result<EventOutcome> {
        if !self.rules.is_eligible(&self.root, path) {
            debug!("Skipping ineligible path {}", path.display());
            return Ok(EventOutcome::Skipped);
        }

        let note = match read_note(&self.root, path, &self.rules).await {
            Ok(note) => note,
            Err(VaultError::FileRead { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
                debug!("{} vanished before processing, removing", path.display());
                return self.remove_note(path).await;
            }
            Err(e) => return Err(e),
        };

        if note.is_empty() {
            info!("Note {} has no text, removing it from the index", note.id);
            self.store.delete(&note.id).await?;
            return Ok(EventOutcome::Removed);
        }

        let vector = self.embed_and_store(&note).await?;
        let candidates = self.similar_notes(&note.id, &vector).await?;

        let explanation = match self.analyzer.analyze(&note, &candidates).await {
            Ok(explanation) => explanation,
            Err(VaultError::AnalysisParse { raw }) => {
                warn!(
                    note = %note.id,
                    kind = "analysis_parse",
                    "Model reply was not structured, publishing raw text"
                );
                self.analyzer.explain_raw(&note, &candidates, raw)
            }
            Err(e) => return Err(e),
        };

        self.sink.publish(&explanation).await?;
        info!(
            "Indexed {} with {} related notes",
            note.id,
            explanation.related.len()
        );
        Ok(EventOutcome::Indexed {
            related: explanation.related.len(),
        })
    }

    /// Delete the record for a note path
    ///
    /// A path that is not a markdown file is taken to be a removed folder, and
    /// every note stored under it is deleted.
    #[inline]
    pub async fn remove_note(&self, path: &Path) -> Result<EventOutcome> {
        let id = note_id(&self.root, path);
        if !is_markdown_file(path) {
            let removed = self.store.delete_under(&id).await?;
            if !removed.is_empty() {
                info!("Removed {} notes under {} from the index", removed.len(), id);
            }
            return Ok(EventOutcome::FolderRemoved {
                notes: removed.len(),
            });
        }

        self.store.delete(&id).await?;
        info!("Removed {} from the index", id);
        Ok(EventOutcome::Removed)
    }

    async fn embed_and_store(&self, note: &Note) -> Result<Vec<f32>> {
        let vector = self.embedder.embed(&note.text).await?;
        self.store
            .upsert(EmbeddingRecord::from_note(note, vector.clone()))
            .await?;
        Ok(vector)
    }

    async fn similar_notes(&self, id: &str, vector: &[f32]) -> Result<Vec<SimilarityMatch>> {
        let matches = self.store.query(vector, self.top_k + 1).await?;
        let mut candidates = SimilarityMatch::from_stored(id, matches);
        candidates.truncate(self.top_k);
        Ok(candidates)
    }

    /// Index every eligible note in the vault without analysis
    ///
    /// Notes whose stored hash matches the file are skipped unless `force`.
    /// Records for files that no longer exist are pruned. Per-file failures
    /// are counted and logged.
    #[inline]
    pub async fn full_reindex<F>(&self, force: bool, mut progress: F) -> Result<IndexingStats>
    where
        F: FnMut(&IndexProgress) + Send,
    {
        let root = self.root.clone();
        let rules = self.rules.clone();
        let files = tokio::task::spawn_blocking(move || discover_notes(&root, &rules))
            .await
            .map_err(|e| VaultError::Other(anyhow::anyhow!("Vault scan failed: {}", e)))?;

        info!("Full reindex of {} notes (force: {})", files.len(), force);
        let mut stats = IndexingStats {
            files_found: files.len(),
            ..IndexingStats::default()
        };

        let mut live_ids = HashSet::with_capacity(files.len());
        for (index, path) in files.iter().enumerate() {
            let id = note_id(&self.root, path);
            match self.reindex_file(path, force).await {
                Ok(ReindexOutcome::Indexed) => {
                    stats.files_indexed += 1;
                    live_ids.insert(id);
                }
                Ok(ReindexOutcome::Unchanged) => {
                    stats.files_unchanged += 1;
                    live_ids.insert(id);
                }
                Ok(ReindexOutcome::Removed) => stats.files_removed += 1,
                Err(e) => {
                    warn!(note = %id, kind = e.kind(), "Failed to index: {}", e);
                    stats.files_failed += 1;
                    // Keep whatever was stored before
                    live_ids.insert(id);
                }
            }

            progress(&IndexProgress {
                processed: index + 1,
                total: files.len(),
                path: path.clone(),
            });
        }

        for record in self.store.list_all().await? {
            if !live_ids.contains(&record.id) {
                debug!("Pruning {} which is no longer in the vault", record.id);
                self.store.delete(&record.id).await?;
                stats.files_removed += 1;
            }
        }

        if stats.files_indexed > 0 || stats.files_removed > 0 {
            if let Err(e) = self.store.optimize().await {
                warn!(kind = e.kind(), "Failed to optimize vector store: {}", e);
            }
        }

        info!(
            "Reindex finished: {} found, {} indexed, {} unchanged, {} failed, {} removed",
            stats.files_found,
            stats.files_indexed,
            stats.files_unchanged,
            stats.files_failed,
            stats.files_removed
        );
        Ok(stats)
    }

    async fn reindex_file(&self, path: &Path, force: bool) -> Result<ReindexOutcome> {
        let note = read_note(&self.root, path, &self.rules).await?;

        if note.is_empty() {
            if self.store.get(&note.id).await?.is_some() {
                self.store.delete(&note.id).await?;
                return Ok(ReindexOutcome::Removed);
            }
            return Ok(ReindexOutcome::Unchanged);
        }

        if !force {
            if let Some(stored) = self.store.get(&note.id).await? {
                if stored.content_hash == note.content_hash {
                    debug!("{} is unchanged", note.id);
                    return Ok(ReindexOutcome::Unchanged);
                }
            }
        }

        self.embed_and_store(&note).await?;
        Ok(ReindexOutcome::Indexed)
    }

    /// Notes similar to the note at `path`, without calling the language model
    #[inline]
    pub async fn suggest_backlinks(
        &self,
        path: &Path,
        limit: usize,
    ) -> Result<Vec<BacklinkSuggestion>> {
        let note = read_note(&self.root, path, &self.rules).await?;
        let vector = self.embedder.embed(&note.text).await?;
        let matches = self.store.query(&vector, limit + 1).await?;

        Ok(matches
            .into_iter()
            .filter(|m| m.id != note.id)
            .take(limit)
            .map(|m| BacklinkSuggestion {
                excerpt: excerpt(&m.metadata.content, BACKLINK_EXCERPT_CHARS),
                id: m.id,
                path: m.metadata.path,
                title: m.metadata.title,
                relevance: m.similarity,
            })
            .collect())
    }

    /// Drain `queue` one event at a time until `cancel` fires
    ///
    /// An event already being handled runs to completion before the worker
    /// stops. Failures are logged with the note path and error kind.
    #[inline]
    pub async fn run(&self, queue: Arc<WorkQueue>, cancel: CancellationToken) -> WorkerStats {
        let mut stats = WorkerStats::default();
        info!("Indexing worker started");

        loop {
            let event = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                event = queue.pop() => event,
            };

            match self.handle_event(&event).await {
                Ok(outcome) => {
                    debug!("{} handled: {:?}", event.path.display(), outcome);
                    stats.events_processed += 1;
                }
                Err(e) => {
                    stats.events_failed += 1;
                    if e.is_retryable() {
                        warn!(
                            path = %event.path.display(),
                            kind = e.kind(),
                            "Skipping change: {}", e
                        );
                    } else {
                        error!(
                            path = %event.path.display(),
                            kind = e.kind(),
                            "Failed to handle change: {}", e
                        );
                    }
                }
            }
        }

        info!(
            "Indexing worker stopped after {} events ({} failed)",
            stats.events_processed, stats.events_failed
        );
        stats
    }
}
