//! # KnowledgeCast CLI (`kcast`)
//!
//! ## Usage
//!
//! ```bash
//! kcast --config ./config/kcast.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `kcast serve` | Start the HTTP API server |
//! | `kcast features` | Show which optional subsystems are enabled |
//! | `kcast check` | Validate the configuration and test the embedder |
//!
//! API keys are read from the environment (`GEMINI_API_KEY`,
//! `ASSEMBLYAI_API_KEY`, `FIRECRAWL_API_KEY`, `ZEP_API_KEY`) or a `.env`
//! file in the working directory.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use knowledgecast::config::{self, Capabilities, Credentials};
use knowledgecast::embedding::create_provider;
use knowledgecast::server;

/// KnowledgeCast: chat with your sources and turn them into podcasts.
#[derive(Parser)]
#[command(name = "kcast", version)]
struct Cli {
    /// Path to configuration file (TOML). Defaults apply when it is missing.
    #[arg(long, global = true, default_value = "./config/kcast.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API server.
    ///
    /// Binds to `[server].bind` and evicts sessions older than
    /// `[sessions].max_age_hours`.
    Serve,

    /// Show which credential-gated subsystems are enabled.
    Features,

    /// Validate the configuration and embed a test sentence.
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("knowledgecast=info,tower_http=info")),
        )
        .try_init()
        .ok();

    let cli = Cli::parse();
    let cfg = config::load_or_default(&cli.config)?;

    match cli.command {
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Features => {
            let caps = Capabilities::from_credentials(&Credentials::from_env());
            let state = |on: bool| if on { "enabled" } else { "disabled (missing credential)" };
            println!("audio processing:   {}", state(caps.audio));
            println!("web scraping:       {}", state(caps.scraping));
            println!("generation:         {}", state(caps.generation));
            println!("conversation memory: {}", state(caps.memory));
            println!(
                "speech synthesis:   {}",
                match (&cfg.podcast.tts_url, caps.generation) {
                    (Some(url), true) => format!("enabled ({})", url),
                    (Some(_), false) => "disabled (requires generation)".to_string(),
                    (None, _) => "disabled (podcast.tts_url not set)".to_string(),
                }
            );
        }
        Commands::Check => {
            let embedder = create_provider(&cfg.embedding)?;
            println!("config:    ok");
            println!("embedding: {} ({} dims)", embedder.model_name(), embedder.dims());
            if cfg.embedding.is_enabled() {
                let sample = ["KnowledgeCast embedding check".to_string()];
                let vectors = embedder.embed(&sample).await?;
                println!("embed:     ok ({} values)", vectors.first().map_or(0, Vec::len));
            }
            println!("store:     {} ({})", cfg.store.backend, cfg.store.data_dir.display());
        }
    }

    Ok(())
}
