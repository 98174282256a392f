//! Process-wide service handles shared by every session.
//!
//! [`Services`] is built once at startup. Optional handles are present
//! only when the matching credential was found, so sessions pick up exactly
//! the capabilities the process has. Tests build a `Services` by hand with
//! test doubles through the `with_*` methods.

use std::sync::Arc;

use anyhow::Result;

use crate::chunk::ChunkParams;
use crate::config::{Capabilities, Config, Credentials};
use crate::embedding::{create_provider, EmbeddingProvider};
use crate::generation::{GeminiGenerator, Generator};
use crate::memory::{MemoryFactory, ZepMemoryFactory};
use crate::podcast::{HttpSpeechSynthesizer, SpeechSynthesizer};
use crate::producers::{
    AssemblyAiTranscriber, AudioTranscriber, FirecrawlScraper, VideoTranscriber, WebScraper,
    YouTubeTranscriber,
};
use crate::store::{ConfiguredStoreFactory, StoreFactory};

pub struct Services {
    pub config: Arc<Config>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub stores: Arc<dyn StoreFactory>,
    pub generator: Option<Arc<dyn Generator>>,
    pub audio: Option<Arc<dyn AudioTranscriber>>,
    pub video: Option<Arc<dyn VideoTranscriber>>,
    pub scraper: Option<Arc<dyn WebScraper>>,
    pub speech: Option<Arc<dyn SpeechSynthesizer>>,
    pub memory: Option<Arc<dyn MemoryFactory>>,
    capabilities: Capabilities,
}

impl Services {
    /// Services with only the always-on pieces: document ingestion and the
    /// vector store. Every credential-gated subsystem starts disabled.
    pub fn new(
        config: Config,
        embedder: Arc<dyn EmbeddingProvider>,
        stores: Arc<dyn StoreFactory>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            embedder,
            stores,
            generator: None,
            audio: None,
            video: None,
            scraper: None,
            speech: None,
            memory: None,
            capabilities: Capabilities::default(),
        }
    }

    /// Builds the real providers for every capability the credentials allow.
    pub fn from_config(config: Config, credentials: &Credentials) -> Result<Self> {
        let capabilities = Capabilities::from_credentials(credentials);
        let embedder = create_provider(&config.embedding)?;
        let stores: Arc<dyn StoreFactory> =
            Arc::new(ConfiguredStoreFactory::new(config.store.clone()));
        let params = ChunkParams::from(&config.chunking);

        let mut services = Self::new(config, embedder, stores);
        let config = services.config.clone();

        if let (true, Some(key)) = (capabilities.audio, &credentials.assemblyai) {
            let audio: Arc<dyn AudioTranscriber> =
                Arc::new(AssemblyAiTranscriber::new(key.clone(), params)?);
            let video: Arc<dyn VideoTranscriber> =
                Arc::new(YouTubeTranscriber::new(audio.clone()));
            services = services.with_audio(audio, video);
        }

        if let (true, Some(key)) = (capabilities.scraping, &credentials.firecrawl) {
            services = services.with_scraper(Arc::new(FirecrawlScraper::new(key.clone(), params)?));
        }

        if let (true, Some(key)) = (capabilities.generation, &credentials.gemini) {
            let generator = GeminiGenerator::new(key.clone(), &config.generation)?;
            services = services.with_generator(Arc::new(generator));

            // Audio synthesis is optional on top of script generation.
            if let Some(url) = &config.podcast.tts_url {
                match HttpSpeechSynthesizer::new(url, &config.podcast.tts_model, None) {
                    Ok(speech) => services = services.with_speech(Arc::new(speech)),
                    Err(e) => tracing::warn!(error = %e, "speech synthesis unavailable"),
                }
            }
        }

        if let (true, Some(key)) = (capabilities.memory, &credentials.zep) {
            services = services.with_memory(Arc::new(ZepMemoryFactory::new(key.clone())?));
        }

        Ok(services)
    }

    pub fn with_generator(mut self, generator: Arc<dyn Generator>) -> Self {
        self.generator = Some(generator);
        self.capabilities.generation = true;
        self
    }

    pub fn with_audio(
        mut self,
        audio: Arc<dyn AudioTranscriber>,
        video: Arc<dyn VideoTranscriber>,
    ) -> Self {
        self.audio = Some(audio);
        self.video = Some(video);
        self.capabilities.audio = true;
        self
    }

    pub fn with_scraper(mut self, scraper: Arc<dyn WebScraper>) -> Self {
        self.scraper = Some(scraper);
        self.capabilities.scraping = true;
        self
    }

    pub fn with_speech(mut self, speech: Arc<dyn SpeechSynthesizer>) -> Self {
        self.speech = Some(speech);
        self
    }

    pub fn with_memory(mut self, memory: Arc<dyn MemoryFactory>) -> Self {
        self.memory = Some(memory);
        self.capabilities.memory = true;
        self
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// Logs which credential-gated subsystems are on.
    pub fn log_capabilities(&self) {
        let state = |on: bool| if on { "enabled" } else { "disabled" };
        let caps = self.capabilities;
        tracing::info!(
            audio = state(caps.audio),
            scraping = state(caps.scraping),
            generation = state(caps.generation),
            memory = state(caps.memory),
            speech = state(self.speech.is_some()),
            embedding = self.embedder.model_name(),
            "capabilities"
        );
    }
}
