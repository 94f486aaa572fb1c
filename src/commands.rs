use anyhow::{Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::analyzer::{Analyzer, ChatProvider};
use crate::config::Config;
use crate::database::VectorStore;
use crate::embeddings::{Embedder, OllamaClient};
use crate::indexer::{
    ConnectionSink, ConsoleSink, Indexer, IndexingStats, JsonLinesSink, MultiSink, WorkQueue,
};
use crate::notes::{ExclusionRules, excerpt};
use crate::viewer::{self, ViewerState};
use crate::watcher::{Debouncer, VaultWatcher};

const SEARCH_EXCERPT_CHARS: usize = 160;

/// Long-lived components shared by the commands
struct Services {
    root: PathBuf,
    rules: ExclusionRules,
    store: Arc<VectorStore>,
    ollama: Arc<OllamaClient>,
}

impl Services {
    async fn connect(config: &Config) -> Result<Self> {
        let root = config
            .vault_path()
            .context("A vault is required for this command")?;
        let rules = ExclusionRules::new(&config.vault.excluded_paths)?;
        let store = Arc::new(
            VectorStore::new(config)
                .await
                .context("Failed to initialize vector store")?,
        );
        let ollama = Arc::new(OllamaClient::new(config).context("Failed to create Ollama client")?);

        Ok(Self {
            root,
            rules,
            store,
            ollama,
        })
    }

    fn embedder(&self) -> Arc<dyn Embedder> {
        Arc::clone(&self.ollama) as Arc<dyn Embedder>
    }

    fn indexer(&self, config: &Config, sink: Arc<dyn ConnectionSink>) -> Indexer {
        let analyzer = Analyzer::new(
            Arc::clone(&self.ollama) as Arc<dyn ChatProvider>,
            &config.analysis,
        );
        Indexer::new(
            self.root.clone(),
            self.rules.clone(),
            Arc::clone(&self.store),
            self.embedder(),
            analyzer,
            sink,
            config.analysis.top_k,
        )
    }

    /// Warn, without failing, when Ollama or one of the models is missing
    async fn check_ollama(&self) {
        let client = Arc::clone(&self.ollama);
        match tokio::task::spawn_blocking(move || client.health_check()).await {
            Ok(Ok(())) => {
                info!(
                    "✅ Ollama ready with models {} and {}",
                    self.ollama.embedding_model(),
                    self.ollama.chat_model()
                );
            }
            Ok(Err(e)) => {
                warn!("⚠️  Ollama is not ready: {:#}", e);
                println!(
                    "{} Ollama may not be ready. Indexing and analysis may fail: {:#}",
                    style("Warning:").yellow().bold(),
                    e
                );
            }
            Err(e) => error!("Ollama health check did not complete: {}", e),
        }
    }
}

fn build_sink(config: &Config) -> Arc<dyn ConnectionSink> {
    let mut sink = MultiSink::new().with(Arc::new(ConsoleSink));
    if let Some(path) = &config.analysis.output_file {
        info!("Appending explanations to {}", path.display());
        sink = sink.with(Arc::new(JsonLinesSink::new(path)));
    }
    Arc::new(sink)
}

fn spawn_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("\n📴 Received interrupt signal, shutting down...");
            cancel.cancel();
        }
    });
}

/// Full reindex with a progress bar on an attended terminal
async fn reindex_with_progress(indexer: &Indexer, force: bool) -> Result<IndexingStats> {
    let bar = if console::user_attended_stderr() {
        ProgressBar::new(0).with_style(ProgressStyle::with_template(
            "{spinner} [{bar:40}] {pos}/{len} {wide_msg}",
        )?)
    } else {
        ProgressBar::hidden()
    };

    let stats = indexer
        .full_reindex(force, |progress| {
            bar.set_length(progress.total as u64);
            bar.set_position(progress.processed as u64);
            bar.set_message(progress.path.display().to_string());
        })
        .await
        .context("Full reindex failed")?;
    bar.finish_and_clear();

    Ok(stats)
}

fn print_index_stats(stats: &IndexingStats) {
    println!("{}", style("📚 Vault indexed").bold().green());
    println!("   Notes found: {}", stats.files_found);
    println!("   Indexed: {}", stats.files_indexed);
    println!("   Unchanged: {}", stats.files_unchanged);
    println!("   Removed: {}", stats.files_removed);
    if stats.files_failed > 0 {
        println!("   {} {}", style("Failed:").red(), stats.files_failed);
    }
}

/// Index the whole vault once
#[inline]
pub async fn index_vault(config: &Config, force: bool) -> Result<()> {
    let services = Services::connect(config).await?;
    services.check_ollama().await;

    let indexer = services.indexer(config, build_sink(config));
    let stats = reindex_with_progress(&indexer, force).await?;
    print_index_stats(&stats);
    Ok(())
}

/// Watch the vault and explain connections for every changed note
///
/// Startup order: optional full reindex, optional viewer, then the watcher,
/// debouncer and indexing worker. Ctrl+C stops everything; the note being
/// processed is finished first.
#[inline]
pub async fn watch_vault(config: &Config) -> Result<()> {
    let services = Services::connect(config).await?;
    services.check_ollama().await;

    let indexer = Arc::new(services.indexer(config, build_sink(config)));
    let cancel = CancellationToken::new();
    spawn_ctrl_c(cancel.clone());

    if config.vault.index_on_start {
        println!("🔄 Indexing vault before watching...");
        tokio::select! {
            stats = reindex_with_progress(&indexer, false) => print_index_stats(&stats?),
            () = cancel.cancelled() => return Ok(()),
        }
    }

    let viewer_handle = config.viewer.enabled.then(|| {
        let state = ViewerState {
            store: Arc::clone(&services.store),
            embedder: services.embedder(),
        };
        let host = config.viewer.host.clone();
        let port = config.viewer.port;
        let cancel = cancel.clone();
        println!("🌐 Viewer at http://{}:{}", host, port);
        tokio::spawn(async move {
            if let Err(e) = viewer::serve(state, &host, port, cancel).await {
                error!(kind = e.kind(), "Viewer stopped: {}", e);
            }
        })
    });

    let (watcher, raw_changes) = VaultWatcher::start(&services.root, services.rules.clone())
        .context("Failed to start file watcher")?;
    let queue = Arc::new(WorkQueue::new());

    let debouncer = {
        let queue = Arc::clone(&queue);
        let window = config.effective_debounce();
        info!("Debouncing changes for {:?}", window);
        tokio::spawn(
            Debouncer::new(window).run(raw_changes, cancel.clone(), move |event| queue.push(event)),
        )
    };

    let worker = {
        let indexer = Arc::clone(&indexer);
        let queue = Arc::clone(&queue);
        let cancel = cancel.clone();
        tokio::spawn(async move { indexer.run(queue, cancel).await })
    };

    println!(
        "👀 Watching {} (Press Ctrl+C to stop)",
        style(watcher.root().display()).cyan()
    );
    cancel.cancelled().await;

    if let Err(e) = debouncer.await {
        warn!("Debouncer task failed: {}", e);
    }
    let worker_stats = worker.await.context("Indexing worker panicked")?;
    if let Some(handle) = viewer_handle {
        if let Err(e) = handle.await {
            warn!("Viewer task failed: {}", e);
        }
    }
    drop(watcher);

    let queue_stats = queue.stats();
    println!(
        "✅ Shutdown complete: {} changes handled, {} failed, {} left queued",
        worker_stats.events_processed, worker_stats.events_failed, queue_stats.pending_count
    );
    Ok(())
}

/// Serve the viewer until Ctrl+C
#[inline]
pub async fn serve_viewer(config: &Config) -> Result<()> {
    let store = Arc::new(
        VectorStore::new(config)
            .await
            .context("Failed to initialize vector store")?,
    );
    let ollama = Arc::new(OllamaClient::new(config).context("Failed to create Ollama client")?);
    let state = ViewerState {
        store,
        embedder: ollama as Arc<dyn Embedder>,
    };

    let cancel = CancellationToken::new();
    spawn_ctrl_c(cancel.clone());

    println!(
        "🌐 Viewer at http://{}:{} (Press Ctrl+C to stop)",
        config.viewer.host, config.viewer.port
    );
    viewer::serve(state, &config.viewer.host, config.viewer.port, cancel)
        .await
        .context("Viewer failed")?;
    Ok(())
}

/// Print the notes most similar to a free-text query
#[inline]
pub async fn search_notes(config: &Config, query: &str, limit: usize) -> Result<()> {
    let store = VectorStore::new(config)
        .await
        .context("Failed to initialize vector store")?;
    let ollama = OllamaClient::new(config).context("Failed to create Ollama client")?;

    let vector = ollama
        .embed(query)
        .await
        .context("Failed to embed search query")?;
    let matches = store
        .query(&vector, limit)
        .await
        .context("Vector search failed")?;

    if matches.is_empty() {
        println!("No indexed notes yet. Run 'vault-links index' first.");
        return Ok(());
    }

    println!("{} {}", style("🔍 Results for").bold().cyan(), style(query).bold());
    for (rank, m) in matches.iter().enumerate() {
        println!();
        println!(
            "{}. {} ({}) similarity {}",
            rank + 1,
            style(&m.metadata.title).bold(),
            m.id,
            style(format!("{:.2}", m.similarity)).green()
        );
        println!(
            "   {}",
            excerpt(&m.metadata.content, SEARCH_EXCERPT_CHARS).replace('\n', " ")
        );
    }
    Ok(())
}

/// Resolve a note argument that is absolute or relative to the vault
///
/// The result is canonical when the file exists, matching the vault root.
fn resolve_note_path(root: &Path, path: &Path) -> PathBuf {
    let resolved = if path.is_absolute() || (!root.join(path).exists() && path.exists()) {
        path.to_path_buf()
    } else {
        root.join(path)
    };
    std::fs::canonicalize(&resolved).unwrap_or(resolved)
}

/// Print link suggestions for one note without calling the chat model
#[inline]
pub async fn suggest_links(config: &Config, path: &Path, limit: usize) -> Result<()> {
    let services = Services::connect(config).await?;
    let indexer = services.indexer(config, Arc::new(MultiSink::new()));
    let path = resolve_note_path(&services.root, path);

    let suggestions = indexer
        .suggest_backlinks(&path, limit)
        .await
        .with_context(|| format!("Failed to suggest links for {}", path.display()))?;

    if suggestions.is_empty() {
        println!("No related notes found for {}", path.display());
        return Ok(());
    }

    println!(
        "{} {}",
        style("🔗 Suggested links for").bold().cyan(),
        path.display()
    );
    for suggestion in &suggestions {
        println!();
        println!(
            "   [[{}]] relevance {}",
            style(&suggestion.title).bold(),
            style(format!("{:.2}", suggestion.relevance)).green()
        );
        println!("   {}", suggestion.id);
        println!("   {}", suggestion.excerpt.replace('\n', " "));
    }
    Ok(())
}

/// Show the state of the configuration, the vector store and Ollama
#[inline]
pub async fn show_status(config: &Config) -> Result<()> {
    println!("{}", style("📊 Vault Links Status").bold().cyan());
    println!();

    println!("{}", style("Vault:").bold().yellow());
    match config.vault_path() {
        Ok(path) => println!("   📁 {}", path.display()),
        Err(e) => println!("   ❌ {}", e),
    }
    println!("   ⏱️  Debounce: {:?}", config.effective_debounce());

    println!();
    println!("{}", style("Vector Store:").bold().yellow());
    match VectorStore::new(config).await {
        Ok(store) => {
            match store.count().await {
                Ok(count) => println!("   📄 Notes indexed: {}", count),
                Err(e) => println!("   ❌ Failed to count notes: {}", e),
            }
            if let Some(dimension) = store.dimension().await {
                println!("   📐 Vector dimension: {}", dimension);
            }
            match store.validate_integrity().await {
                Ok(true) => println!("   ✅ Integrity check passed"),
                Ok(false) => println!("   ⚠️  Integrity check found problems"),
                Err(e) => println!("   ❌ Integrity check failed: {}", e),
            }
        }
        Err(e) => println!("   ❌ Unavailable: {}", e),
    }

    println!();
    println!("{}", style("Ollama:").bold().yellow());
    match OllamaClient::new(config) {
        Ok(client) => {
            let embedding_model = client.embedding_model().to_string();
            let chat_model = client.chat_model().to_string();
            let checks = tokio::task::spawn_blocking(move || {
                client.ping().map(|()| client.health_check())
            });
            match checks.await {
                Ok(Ok(Ok(()))) => println!(
                    "   ✅ Connected, models {} and {} available",
                    embedding_model, chat_model
                ),
                Ok(Ok(Err(e))) => println!("   ⚠️  Server reachable, but {:#}", e),
                Ok(Err(e)) => println!("   ❌ Server unreachable: {:#}", e),
                Err(e) => println!("   ❌ Health check did not complete: {}", e),
            }
        }
        Err(e) => println!("   ❌ {:#}", e),
    }

    println!();
    println!("💡 Next Steps:");
    println!("   • Use 'vault-links index' to index the whole vault");
    println!("   • Use 'vault-links watch' to explain new connections as you write");
    println!("   • Use 'vault-links serve' to open the 3D viewer");

    Ok(())
}
