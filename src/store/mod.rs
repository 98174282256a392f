//! Per-session vector storage.
//!
//! The [`VectorStore`] trait is the narrow contract the ingestion and
//! retrieval paths need: create the index once, insert embedded chunks,
//! run filtered similarity search, and delete by source. Each session owns
//! exactly one store, opened lazily through a [`StoreFactory`].
//!
//! Backends:
//! - [`memory::InMemoryStore`]: brute-force cosine search behind an `RwLock`.
//! - [`sqlite::SqliteVectorStore`]: one SQLite file per session, vectors as
//!   little-endian f32 BLOBs.

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

use crate::config::StoreConfig;
use crate::models::{EmbeddedChunk, SearchHit};

/// Typed store failures callers may want to match on (via `downcast_ref`).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("index already exists for collection {0}")]
    IndexExists(String),
    #[error("index has not been created for collection {0}")]
    IndexMissing(String),
}

/// Metadata filter applied during search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchFilter {
    /// Only chunks whose `source_file` equals the given name.
    SourceFile(String),
}

impl SearchFilter {
    pub fn matches(&self, source_file: &str) -> bool {
        match self {
            SearchFilter::SourceFile(name) => name == source_file,
        }
    }
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Creates the index. Fails with [`StoreError::IndexExists`] if it
    /// already exists; callers create exactly once per session.
    async fn create_index(&self) -> Result<()>;

    async fn has_index(&self) -> Result<bool>;

    /// Inserts embedded chunks. Fails with [`StoreError::IndexMissing`]
    /// before [`create_index`](VectorStore::create_index). Returns the
    /// number of records written.
    async fn insert(&self, chunks: Vec<EmbeddedChunk>) -> Result<usize>;

    /// Top-`limit` records by cosine similarity, best first.
    async fn search(
        &self,
        vector: &[f32],
        limit: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<SearchHit>>;

    /// Removes every record whose `source_file` equals `source_file`.
    async fn delete_by_source(&self, source_file: &str) -> Result<usize>;

    async fn count(&self) -> Result<usize>;

    /// Releases underlying resources (connections, files). The store must
    /// not be used afterwards.
    async fn release(&self) -> Result<()>;
}

/// Opens the vector store that belongs to a session.
#[async_trait]
pub trait StoreFactory: Send + Sync {
    async fn open(&self, session_id: &str) -> Result<Arc<dyn VectorStore>>;
}

/// Where a session's store lives. Derived only from the session id, so
/// repeated lookups resolve to the same backing store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreLocation {
    pub path: PathBuf,
    pub collection: String,
}

impl StoreLocation {
    pub fn for_session(data_dir: &Path, session_id: &str) -> Self {
        let prefix: String = session_id
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .take(8)
            .collect();
        let digest = format!("{:x}", Sha256::digest(session_id.as_bytes()));
        let key = format!("{}_{}", prefix, &digest[..8]);
        Self {
            path: data_dir.join(format!("vectors_{}.sqlite", key)),
            collection: format!("collection_{}", key),
        }
    }
}

/// Factory driven by the `[store]` config section.
pub struct ConfiguredStoreFactory {
    config: StoreConfig,
}

impl ConfiguredStoreFactory {
    pub fn new(config: StoreConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl StoreFactory for ConfiguredStoreFactory {
    async fn open(&self, session_id: &str) -> Result<Arc<dyn VectorStore>> {
        let location = StoreLocation::for_session(&self.config.data_dir, session_id);
        match self.config.backend.as_str() {
            "memory" => Ok(Arc::new(memory::InMemoryStore::new(location.collection))),
            "sqlite" => Ok(Arc::new(sqlite::SqliteVectorStore::open(location).await?)),
            other => anyhow::bail!("Unknown store backend: {}", other),
        }
    }
}

/// Sorts by descending score and keeps the best `limit`.
pub(crate) fn rank(mut hits: Vec<SearchHit>, limit: usize) -> Vec<SearchHit> {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    hits.truncate(limit);
    hits
}
