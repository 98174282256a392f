//! One user's working set.
//!
//! A [`Session`] owns its source manifest, a lazily built set of
//! [`SessionComponents`] (vector store, producers, RAG answerer, optional
//! subsystems) and the lock that serializes ingestion. Creating a session
//! touches nothing external; the vector store is opened the first time a
//! caller asks for the components.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};

use anyhow::Result;
use chrono::{DateTime, Utc};
use tokio::sync::{MutexGuard, OnceCell};

use crate::chunk::ChunkParams;
use crate::memory::ConversationMemory;
use crate::models::SourceManifestEntry;
use crate::podcast::{ScriptGenerator, SpeechSynthesizer};
use crate::producers::{AudioTranscriber, DocumentProcessor, VideoTranscriber, WebScraper};
use crate::rag::RagGenerator;
use crate::services::Services;
use crate::store::VectorStore;

/// Handles built on first use. Optional handles are `None` when the
/// process lacks the credential for them.
pub struct SessionComponents {
    pub documents: DocumentProcessor,
    pub store: Arc<dyn VectorStore>,
    pub rag: RagGenerator,
    pub audio: Option<Arc<dyn AudioTranscriber>>,
    pub video: Option<Arc<dyn VideoTranscriber>>,
    pub scraper: Option<Arc<dyn WebScraper>>,
    pub scripts: Option<ScriptGenerator>,
    pub speech: Option<Arc<dyn SpeechSynthesizer>>,
    pub memory: Option<Arc<dyn ConversationMemory>>,
}

/// State guarded by the ingestion lock.
#[derive(Debug, Default)]
pub struct IngestState {
    pub index_created: bool,
}

pub struct Session {
    id: String,
    created_at: DateTime<Utc>,
    services: Arc<Services>,
    sources: RwLock<Vec<SourceManifestEntry>>,
    ingest: tokio::sync::Mutex<IngestState>,
    last_podcast_audio: Mutex<Option<PathBuf>>,
    components: OnceCell<SessionComponents>,
}

impl Session {
    pub fn new(id: impl Into<String>, services: Arc<Services>) -> Self {
        Self {
            id: id.into(),
            created_at: Utc::now(),
            services,
            sources: RwLock::new(Vec::new()),
            ingest: tokio::sync::Mutex::new(IngestState::default()),
            last_podcast_audio: Mutex::new(None),
            components: OnceCell::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn services(&self) -> &Arc<Services> {
        &self.services
    }

    pub fn is_initialized(&self) -> bool {
        self.components.initialized()
    }

    /// Builds the components exactly once, even under concurrent first
    /// access, and returns them.
    pub async fn ensure_initialized(&self) -> Result<&SessionComponents> {
        self.components
            .get_or_try_init(|| self.build_components())
            .await
    }

    async fn build_components(&self) -> Result<SessionComponents> {
        let services = &self.services;
        let config = &services.config;

        let documents = DocumentProcessor::new(ChunkParams::from(&config.chunking));
        let store = services.stores.open(&self.id).await?;
        let rag = RagGenerator::new(
            services.embedder.clone(),
            store.clone(),
            services.generator.clone(),
            &config.retrieval,
        );
        let scripts = services.generator.clone().map(ScriptGenerator::new);
        let speech = scripts.as_ref().and(services.speech.clone());
        let memory = services.memory.as_ref().map(|f| f.bind(&self.id));

        tracing::debug!(
            session_id = %self.id,
            audio = services.audio.is_some(),
            scraping = services.scraper.is_some(),
            generation = scripts.is_some(),
            memory = memory.is_some(),
            "session components initialized"
        );

        Ok(SessionComponents {
            documents,
            store,
            rag,
            audio: services.audio.clone(),
            video: services.video.clone(),
            scraper: services.scraper.clone(),
            scripts,
            speech,
            memory,
        })
    }

    // ============ Source manifest ============

    /// Snapshot of the manifest in insertion order.
    pub fn sources(&self) -> Vec<SourceManifestEntry> {
        self.sources.read().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn source_count(&self) -> usize {
        self.sources.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn find_source(&self, name: &str) -> Option<SourceManifestEntry> {
        self.sources
            .read()
            .ok()
            .and_then(|s| s.iter().find(|e| e.name == name).cloned())
    }

    pub(crate) fn push_source(&self, entry: SourceManifestEntry) {
        if let Ok(mut sources) = self.sources.write() {
            sources.push(entry);
        }
    }

    /// Removes every entry named `name`, keeping the order of the rest.
    pub(crate) fn remove_sources(&self, name: &str) -> usize {
        match self.sources.write() {
            Ok(mut sources) => {
                let before = sources.len();
                sources.retain(|e| e.name != name);
                before - sources.len()
            }
            Err(_) => 0,
        }
    }

    /// Held across check-index, create-index, insert and manifest append.
    pub(crate) async fn lock_ingest(&self) -> MutexGuard<'_, IngestState> {
        self.ingest.lock().await
    }

    // ============ Podcast audio ============

    pub fn last_podcast_audio(&self) -> Option<PathBuf> {
        self.last_podcast_audio.lock().ok().and_then(|p| p.clone())
    }

    /// Records the newest audio file and returns the one it replaced.
    pub(crate) fn set_last_podcast_audio(&self, path: PathBuf) -> Option<PathBuf> {
        self.last_podcast_audio
            .lock()
            .ok()
            .and_then(|mut p| p.replace(path))
    }

    /// Releases the vector store and deletes generated audio. Called when
    /// the session leaves the registry.
    pub async fn release(&self) {
        if let Some(components) = self.components.get() {
            if let Err(e) = components.store.release().await {
                tracing::warn!(session_id = %self.id, error = %e, "failed to release vector store");
            }
        }
        let audio = self.last_podcast_audio.lock().ok().and_then(|mut p| p.take());
        if let Some(path) = audio {
            remove_audio(&path).await;
        }
    }
}

/// Deletes a podcast audio file and its per-podcast directory.
pub(crate) async fn remove_audio(path: &std::path::Path) {
    let dir = path.parent().filter(|d| {
        d.file_name()
            .is_some_and(|n| n.to_string_lossy().starts_with("podcast_"))
    });
    let result = match dir {
        Some(dir) => tokio::fs::remove_dir_all(dir).await,
        None => tokio::fs::remove_file(path).await,
    };
    if let Err(e) = result {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "failed to remove podcast audio");
        }
    }
}
