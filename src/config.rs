//! TOML configuration and credential discovery.
//!
//! Non-secret settings come from a TOML file; API keys come from the
//! environment (optionally seeded from a `.env` file). `API_HOST`,
//! `API_PORT` and `CORS_ORIGINS` override the `[server]` section. Which optional
//! subsystems a process offers is decided once, by [`Capabilities::from_credentials`].

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub podcast: PodcastConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            cors_origins: default_cors_origins(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8000".to_string()
}
fn default_cors_origins() -> Vec<String> {
    vec!["*".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default)]
    pub overlap_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            overlap_tokens: 0,
        }
    }
}

fn default_max_tokens() -> usize {
    256
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,
    #[serde(default = "default_citation_preview_chars")]
    pub citation_preview_chars: usize,
    #[serde(default = "default_podcast_chunk_limit")]
    pub podcast_chunk_limit: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            max_context_chars: default_max_context_chars(),
            citation_preview_chars: default_citation_preview_chars(),
            podcast_chunk_limit: default_podcast_chunk_limit(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_max_context_chars() -> usize {
    12_000
}
fn default_citation_preview_chars() -> usize {
    crate::models::CITATION_PREVIEW_CHARS
}
fn default_podcast_chunk_limit() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for the Ollama provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[cfg(feature = "local-embeddings")]
fn default_provider() -> String {
    "local".to_string()
}
#[cfg(not(feature = "local-embeddings"))]
fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_generation_model")]
    pub model: String,
    #[serde(default = "default_generation_retries")]
    pub max_retries: u32,
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: default_generation_model(),
            max_retries: default_generation_retries(),
            timeout_secs: default_generation_timeout(),
            temperature: default_temperature(),
        }
    }
}

fn default_generation_model() -> String {
    "gemini-2.0-flash".to_string()
}
fn default_generation_retries() -> u32 {
    2
}
fn default_generation_timeout() -> u64 {
    120
}
fn default_temperature() -> f32 {
    0.3
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            data_dir: default_data_dir(),
        }
    }
}

fn default_backend() -> String {
    "memory".to_string()
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionsConfig {
    #[serde(default = "default_max_age_hours")]
    pub max_age_hours: u64,
    /// Seconds between eviction sweeps. `0` disables the sweeper.
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            max_age_hours: default_max_age_hours(),
            cleanup_interval_secs: default_cleanup_interval(),
        }
    }
}

fn default_max_age_hours() -> u64 {
    24
}
fn default_cleanup_interval() -> u64 {
    3600
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    /// Deadline for transcription and scraping calls.
    #[serde(default = "default_ingest_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_ingest_timeout(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

fn default_ingest_timeout() -> u64 {
    600
}
fn default_max_upload_bytes() -> usize {
    200 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct PodcastConfig {
    /// Base URL of an OpenAI-compatible speech endpoint. Audio synthesis
    /// is skipped when unset.
    #[serde(default)]
    pub tts_url: Option<String>,
    #[serde(default = "default_tts_model")]
    pub tts_model: String,
    #[serde(default = "default_voices")]
    pub voices: [String; 2],
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

impl Default for PodcastConfig {
    fn default() -> Self {
        Self {
            tts_url: None,
            tts_model: default_tts_model(),
            voices: default_voices(),
            output_dir: default_output_dir(),
        }
    }
}

fn default_tts_model() -> String {
    "kokoro".to_string()
}
fn default_voices() -> [String; 2] {
    ["af_heart".to_string(), "am_liam".to_string()]
}
fn default_output_dir() -> PathBuf {
    PathBuf::from("./outputs")
}

impl Config {
    /// Configuration with every default applied, used when no file exists.
    pub fn minimal() -> Self {
        Self {
            server: ServerConfig::default(),
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            embedding: EmbeddingConfig::default(),
            generation: GenerationConfig::default(),
            store: StoreConfig::default(),
            sessions: SessionsConfig::default(),
            ingest: IngestConfig::default(),
            podcast: PodcastConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Loads `path` if it exists, otherwise falls back to [`Config::minimal`],
/// then applies the server environment overrides.
pub fn load_or_default(path: &Path) -> Result<Config> {
    let mut config = if path.exists() {
        load_config(path)?
    } else {
        tracing::info!(path = %path.display(), "config file not found, using defaults");
        Config::minimal()
    };
    let _ = dotenvy::dotenv();
    apply_server_env(&mut config.server, non_empty_var)?;
    Ok(config)
}

/// Applies `API_HOST`, `API_PORT` and `CORS_ORIGINS` (comma-separated) from
/// `lookup` on top of the file values.
pub fn apply_server_env<F>(server: &mut ServerConfig, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    let host = lookup("API_HOST");
    let port = lookup("API_PORT");
    if host.is_some() || port.is_some() {
        let (file_host, file_port) = server
            .bind
            .rsplit_once(':')
            .map(|(h, p)| (h.to_string(), p.to_string()))
            .unwrap_or_else(|| (server.bind.clone(), "8000".to_string()));
        let port = match port {
            Some(p) => p
                .trim()
                .parse::<u16>()
                .with_context(|| format!("API_PORT must be a port number, got '{}'", p))?
                .to_string(),
            None => file_port,
        };
        let host = host.map(|h| h.trim().to_string()).unwrap_or(file_host);
        server.bind = format!("{}:{}", host, port);
    }

    if let Some(origins) = lookup("CORS_ORIGINS") {
        let origins: Vec<String> = origins
            .split(',')
            .map(|o| o.trim().to_string())
            .filter(|o| !o.is_empty())
            .collect();
        if !origins.is_empty() {
            server.cors_origins = origins;
        }
    }
    Ok(())
}

pub fn validate(config: &Config) -> Result<()> {
    if config.chunking.max_tokens == 0 {
        anyhow::bail!("chunking.max_tokens must be > 0");
    }
    if config.chunking.overlap_tokens >= config.chunking.max_tokens {
        anyhow::bail!("chunking.overlap_tokens must be < chunking.max_tokens");
    }

    if config.retrieval.top_k < 1 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }
    if config.retrieval.citation_preview_chars == 0
        || config.retrieval.citation_preview_chars > crate::models::CITATION_PREVIEW_CHARS
    {
        anyhow::bail!(
            "retrieval.citation_preview_chars must be in [1, {}]",
            crate::models::CITATION_PREVIEW_CHARS
        );
    }
    if config.retrieval.podcast_chunk_limit < 1 {
        anyhow::bail!("retrieval.podcast_chunk_limit must be >= 1");
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "local" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }
    if matches!(config.embedding.provider.as_str(), "openai" | "ollama") {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    match config.store.backend.as_str() {
        "memory" | "sqlite" => {}
        other => anyhow::bail!("Unknown store backend: '{}'. Must be memory or sqlite.", other),
    }

    if config.ingest.timeout_secs == 0 {
        anyhow::bail!("ingest.timeout_secs must be > 0");
    }

    Ok(())
}

/// API keys for the optional external services.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub gemini: Option<String>,
    pub assemblyai: Option<String>,
    pub firecrawl: Option<String>,
    pub zep: Option<String>,
}

impl Credentials {
    /// Reads credentials from the environment after loading `.env`, if any.
    /// Empty values count as absent.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        Self {
            gemini: non_empty_var("GEMINI_API_KEY"),
            assemblyai: non_empty_var("ASSEMBLYAI_API_KEY"),
            firecrawl: non_empty_var("FIRECRAWL_API_KEY"),
            zep: non_empty_var("ZEP_API_KEY"),
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Which credential-gated subsystems this process offers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct Capabilities {
    pub audio: bool,
    pub scraping: bool,
    pub generation: bool,
    pub memory: bool,
}

impl Capabilities {
    pub fn from_credentials(creds: &Credentials) -> Self {
        Self {
            audio: creds.assemblyai.is_some(),
            scraping: creds.firecrawl.is_some(),
            generation: creds.gemini.is_some(),
            memory: creds.zep.is_some(),
        }
    }
}
