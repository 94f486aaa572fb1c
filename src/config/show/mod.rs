use console::style;

use super::Config;

#[inline]
pub fn show_config(config: &Config) {
    eprintln!("{}", style("📋 Current Configuration").bold().cyan());
    eprintln!();

    eprintln!("{}", style("Vault:").bold().yellow());
    match &config.vault.path {
        Some(path) => eprintln!("  Path: {}", style(path.display()).cyan()),
        None => eprintln!("  Path: {}", style("not set").red()),
    }
    eprintln!(
        "  Excluded: {}",
        style(config.vault.excluded_paths.join(", ")).cyan()
    );
    eprintln!(
        "  Index on start: {}",
        style(config.vault.index_on_start).cyan()
    );

    eprintln!();
    eprintln!("{}", style("Ollama Settings:").bold().yellow());
    match config.ollama_url() {
        Ok(url) => eprintln!("  Ollama URL: {}", style(url).cyan()),
        Err(e) => eprintln!("  Ollama URL: {} ({})", style("Invalid").red(), e),
    }
    eprintln!(
        "  Embedding model: {}",
        style(&config.ollama.embedding_model).cyan()
    );
    eprintln!("  Chat model: {}", style(&config.ollama.chat_model).cyan());
    eprintln!(
        "  Request timeout: {}s",
        style(config.ollama.request_timeout_seconds).cyan()
    );

    eprintln!();
    eprintln!("{}", style("Watcher:").bold().yellow());
    eprintln!(
        "  Debounce: {}s (watch debounce {}s, effective {:?})",
        style(config.watcher.debounce_seconds).cyan(),
        style(config.watcher.watch_debounce_seconds).cyan(),
        config.effective_debounce()
    );

    eprintln!();
    eprintln!("{}", style("Analysis:").bold().yellow());
    eprintln!("  Top k: {}", style(config.analysis.top_k).cyan());
    eprintln!(
        "  Minimum similarity: {}",
        style(config.analysis.min_similarity).cyan()
    );

    eprintln!();
    eprintln!("{}", style("Viewer:").bold().yellow());
    eprintln!(
        "  Enabled: {} ({}:{})",
        style(config.viewer.enabled).cyan(),
        config.viewer.host,
        config.viewer.port
    );

    eprintln!();
    eprintln!(
        "Config file: {}",
        style(config.config_file_path().display()).dim()
    );
}
