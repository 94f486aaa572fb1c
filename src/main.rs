use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use vault_links::commands::{
    index_vault, search_notes, serve_viewer, show_status, suggest_links, watch_vault,
};
use vault_links::config::{Config, show_config};

#[derive(Parser)]
#[command(name = "vault-links")]
#[command(about = "Watches a notes vault and explains how new notes connect to existing ones")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch the vault and analyze every changed note
    Watch,
    /// Index every note in the vault once
    Index {
        /// Re-embed notes even when their content is unchanged
        #[arg(long)]
        force: bool,
    },
    /// Serve the 3D viewer and search API
    Serve,
    /// Find the notes most similar to a query
    Search {
        query: String,
        #[arg(long, short = 'n', default_value_t = 5)]
        limit: usize,
    },
    /// Suggest links for a note without calling the chat model
    Suggest {
        /// Note path, absolute or relative to the vault
        path: PathBuf,
        #[arg(long, short = 'n', default_value_t = 5)]
        limit: usize,
    },
    /// Show the state of the vault, vector store and Ollama
    Status,
    /// Show configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("vault_links=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_environment()?;

    match cli.command {
        Commands::Watch => watch_vault(&config).await?,
        Commands::Index { force } => index_vault(&config, force).await?,
        Commands::Serve => serve_viewer(&config).await?,
        Commands::Search { query, limit } => search_notes(&config, &query, limit).await?,
        Commands::Suggest { path, limit } => suggest_links(&config, &path, limit).await?,
        Commands::Status => show_status(&config).await?,
        Commands::Config { show } => {
            if show {
                show_config(&config);
            } else {
                println!("Configuration file: {}", config.config_file_path().display());
                println!("Environment variables and .env override it.");
                println!("Use 'vault-links config --show' to see the effective settings.");
            }
        }
    }

    Ok(())
}
