#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tempfile::TempDir;

use knowledgecast::config::Config;
use knowledgecast::embedding::EmbeddingProvider;
use knowledgecast::generation::Generator;
use knowledgecast::models::{Chunk, EmbeddedChunk, SearchHit};
use knowledgecast::producers::{AudioTranscriber, VideoTranscriber, WebScraper};
use knowledgecast::services::Services;
use knowledgecast::sessions::SessionManager;
use knowledgecast::store::memory::InMemoryStore;
use knowledgecast::store::{ConfiguredStoreFactory, SearchFilter, StoreFactory, VectorStore};

pub const DIMS: usize = 32;

/// Deterministic bag-of-words embedder: identical texts get identical
/// vectors, texts sharing words point in similar directions.
#[derive(Default)]
pub struct HashEmbedder {
    pub calls: AtomicUsize,
}

impl HashEmbedder {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

pub fn hash_vector(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; DIMS];
    for word in text.split_whitespace() {
        let word = word.to_lowercase();
        let digest = Sha256::digest(word.as_bytes());
        v[digest[0] as usize % DIMS] += 1.0;
    }
    if v.iter().all(|x| *x == 0.0) {
        v[0] = 1.0;
    }
    v
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    fn model_name(&self) -> &str {
        "hash"
    }

    fn dims(&self) -> usize {
        DIMS
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|t| hash_vector(t)).collect())
    }
}

/// In-memory store that counts index creations across all sessions.
pub struct CountingStore {
    inner: InMemoryStore,
    creates: Arc<AtomicUsize>,
}

#[async_trait]
impl VectorStore for CountingStore {
    async fn create_index(&self) -> Result<()> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        // Widen the race window between concurrent first ingestions.
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.inner.create_index().await
    }

    async fn has_index(&self) -> Result<bool> {
        self.inner.has_index().await
    }

    async fn insert(&self, chunks: Vec<EmbeddedChunk>) -> Result<usize> {
        self.inner.insert(chunks).await
    }

    async fn search(
        &self,
        vector: &[f32],
        limit: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<SearchHit>> {
        self.inner.search(vector, limit, filter).await
    }

    async fn delete_by_source(&self, source_file: &str) -> Result<usize> {
        self.inner.delete_by_source(source_file).await
    }

    async fn count(&self) -> Result<usize> {
        self.inner.count().await
    }

    async fn release(&self) -> Result<()> {
        self.inner.release().await
    }
}

#[derive(Default)]
pub struct CountingStoreFactory {
    pub creates: Arc<AtomicUsize>,
    stores: dashmap::DashMap<String, Arc<CountingStore>>,
}

impl CountingStoreFactory {
    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn store(&self, session_id: &str) -> Option<Arc<CountingStore>> {
        self.stores.get(session_id).map(|s| s.value().clone())
    }
}

#[async_trait]
impl StoreFactory for CountingStoreFactory {
    async fn open(&self, session_id: &str) -> Result<Arc<dyn VectorStore>> {
        let store = self
            .stores
            .entry(session_id.to_string())
            .or_insert_with(|| {
                Arc::new(CountingStore {
                    inner: InMemoryStore::new(format!("collection_{}", session_id)),
                    creates: self.creates.clone(),
                })
            })
            .clone();
        Ok(store)
    }
}

/// Answers chat prompts with a fixed sentence and podcast prompts with a
/// two-line JSON script.
pub struct CannedGenerator;

pub const CANNED_ANSWER: &str = "The sources say hello [1].";

#[async_trait]
impl Generator for CannedGenerator {
    fn model_name(&self) -> &str {
        "canned"
    }

    async fn generate(&self, system: &str, _prompt: &str) -> Result<String> {
        if system.contains("podcast") {
            Ok(r#"{"script": [
                {"speaker": "Speaker 1", "text": "Welcome to the show."},
                {"speaker": "Speaker 2", "text": "Today we read a test document."}
            ]}"#
            .to_string())
        } else {
            Ok(CANNED_ANSWER.to_string())
        }
    }
}

/// Returns one chunk per URL, failing for any URL containing `fail`.
pub struct FakeScraper;

#[async_trait]
impl WebScraper for FakeScraper {
    async fn scrape(&self, url: &str) -> Result<Vec<Chunk>> {
        if url.contains("fail") {
            anyhow::bail!("scrape of {} returned 500", url);
        }
        Ok(vec![
            Chunk::new(0, format!("Main article text from {}", url)),
            Chunk::new(1, "A second paragraph about the same topic."),
        ])
    }
}

pub struct Harness {
    pub manager: Arc<SessionManager>,
    pub embedder: Arc<HashEmbedder>,
    pub stores: Arc<CountingStoreFactory>,
    pub tmp: TempDir,
}

/// Manager with the hash embedder, counting stores and every optional
/// subsystem except audio, speech and memory.
pub fn harness() -> Harness {
    let tmp = TempDir::new().unwrap();
    let mut config = Config::minimal();
    config.store.data_dir = tmp.path().join("data");
    config.podcast.output_dir = tmp.path().join("outputs");
    config.sessions.cleanup_interval_secs = 0;

    let embedder = Arc::new(HashEmbedder::default());
    let stores = Arc::new(CountingStoreFactory::default());
    let services = Services::new(config, embedder.clone(), stores.clone())
        .with_generator(Arc::new(CannedGenerator))
        .with_scraper(Arc::new(FakeScraper));

    Harness {
        manager: Arc::new(SessionManager::new(Arc::new(services))),
        embedder,
        stores,
        tmp,
    }
}

/// Manager with no generator or scraper configured.
pub fn bare_harness() -> Harness {
    let tmp = TempDir::new().unwrap();
    let mut config = Config::minimal();
    config.store.data_dir = tmp.path().join("data");
    config.podcast.output_dir = tmp.path().join("outputs");

    let embedder = Arc::new(HashEmbedder::default());
    let stores = Arc::new(CountingStoreFactory::default());
    let services = Services::new(config, embedder.clone(), stores.clone());

    Harness {
        manager: Arc::new(SessionManager::new(Arc::new(services))),
        embedder,
        stores,
        tmp,
    }
}

/// Transcriber that never finishes within a one second ingest deadline.
pub struct StalledTranscriber;

#[async_trait]
impl AudioTranscriber for StalledTranscriber {
    async fn transcribe(&self, _filename: &str, _audio: Vec<u8>) -> Result<Vec<Chunk>> {
        tokio::time::sleep(Duration::from_secs(3)).await;
        Ok(vec![Chunk::new(0, "[Speaker A] late transcript")])
    }
}

#[async_trait]
impl VideoTranscriber for StalledTranscriber {
    async fn transcribe_video(&self, _url: &str) -> Result<Vec<Chunk>> {
        tokio::time::sleep(Duration::from_secs(3)).await;
        Ok(vec![Chunk::new(0, "[Speaker A] late transcript")])
    }
}

/// Manager whose transcribers outlive a one second ingest timeout.
pub fn stalled_harness() -> Harness {
    let tmp = TempDir::new().unwrap();
    let mut config = Config::minimal();
    config.store.data_dir = tmp.path().join("data");
    config.podcast.output_dir = tmp.path().join("outputs");
    config.sessions.cleanup_interval_secs = 0;
    config.ingest.timeout_secs = 1;

    let embedder = Arc::new(HashEmbedder::default());
    let stores = Arc::new(CountingStoreFactory::default());
    let stalled = Arc::new(StalledTranscriber);
    let services = Services::new(config, embedder.clone(), stores.clone())
        .with_audio(stalled.clone(), stalled);

    Harness {
        manager: Arc::new(SessionManager::new(Arc::new(services))),
        embedder,
        stores,
        tmp,
    }
}

/// Manager over the SQLite backend rooted at `data_dir`, as a fresh
/// process would build it.
pub fn sqlite_manager(data_dir: &Path) -> Arc<SessionManager> {
    let mut config = Config::minimal();
    config.store.backend = "sqlite".to_string();
    config.store.data_dir = data_dir.to_path_buf();
    config.sessions.cleanup_interval_secs = 0;

    let stores = Arc::new(ConfiguredStoreFactory::new(config.store.clone()));
    let services = Services::new(config, Arc::new(HashEmbedder::default()), stores)
        .with_generator(Arc::new(CannedGenerator));
    Arc::new(SessionManager::new(Arc::new(services)))
}
