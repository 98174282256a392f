//! In-memory [`VectorStore`] implementation.
//!
//! Records live in a `Vec` behind `std::sync::RwLock`. Search is
//! brute-force cosine similarity over every stored vector, which is fine
//! for the size of a single session's corpus.

use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::models::{EmbeddedChunk, SearchHit};

use super::{rank, SearchFilter, StoreError, VectorStore};

/// In-memory store; the default backend.
pub struct InMemoryStore {
    collection: String,
    records: RwLock<Option<Vec<EmbeddedChunk>>>,
}

impl InMemoryStore {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            records: RwLock::new(None),
        }
    }

    fn lock_err() -> anyhow::Error {
        anyhow::anyhow!("in-memory store lock poisoned")
    }
}

#[async_trait]
impl VectorStore for InMemoryStore {
    async fn create_index(&self) -> Result<()> {
        let mut records = self.records.write().map_err(|_| Self::lock_err())?;
        if records.is_some() {
            return Err(StoreError::IndexExists(self.collection.clone()).into());
        }
        *records = Some(Vec::new());
        Ok(())
    }

    async fn has_index(&self) -> Result<bool> {
        Ok(self.records.read().map_err(|_| Self::lock_err())?.is_some())
    }

    async fn insert(&self, chunks: Vec<EmbeddedChunk>) -> Result<usize> {
        let mut guard = self.records.write().map_err(|_| Self::lock_err())?;
        let records = guard
            .as_mut()
            .ok_or_else(|| StoreError::IndexMissing(self.collection.clone()))?;
        let n = chunks.len();
        records.extend(chunks);
        Ok(n)
    }

    async fn search(
        &self,
        vector: &[f32],
        limit: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<SearchHit>> {
        let guard = self.records.read().map_err(|_| Self::lock_err())?;
        let Some(records) = guard.as_ref() else {
            return Ok(Vec::new());
        };
        let hits = records
            .iter()
            .filter(|r| filter.map_or(true, |f| f.matches(&r.source_file)))
            .map(|r| SearchHit {
                chunk_id: r.chunk_id.clone(),
                content: r.content.clone(),
                source_file: r.source_file.clone(),
                chunk_index: r.chunk_index,
                page_number: r.page_number,
                score: cosine_similarity(vector, &r.vector),
            })
            .collect();
        Ok(rank(hits, limit))
    }

    async fn delete_by_source(&self, source_file: &str) -> Result<usize> {
        let mut guard = self.records.write().map_err(|_| Self::lock_err())?;
        let Some(records) = guard.as_mut() else {
            return Ok(0);
        };
        let before = records.len();
        records.retain(|r| r.source_file != source_file);
        Ok(before - records.len())
    }

    async fn count(&self) -> Result<usize> {
        let guard = self.records.read().map_err(|_| Self::lock_err())?;
        Ok(guard.as_ref().map_or(0, Vec::len))
    }

    async fn release(&self) -> Result<()> {
        let mut guard = self.records.write().map_err(|_| Self::lock_err())?;
        *guard = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(source: &str, index: i64, vector: Vec<f32>) -> EmbeddedChunk {
        EmbeddedChunk {
            chunk_id: format!("{}-{}", source, index),
            content: format!("{} chunk {}", source, index),
            source_file: source.to_string(),
            chunk_index: index,
            page_number: None,
            vector,
        }
    }

    #[tokio::test]
    async fn insert_before_create_is_rejected() {
        let store = InMemoryStore::new("c");
        let err = store.insert(vec![record("a", 0, vec![1.0])]).await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<StoreError>(),
            Some(&StoreError::IndexMissing("c".into()))
        );
    }

    #[tokio::test]
    async fn second_create_conflicts() {
        let store = InMemoryStore::new("c");
        store.create_index().await.unwrap();
        let err = store.create_index().await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StoreError>(),
            Some(StoreError::IndexExists(_))
        ));
    }

    #[tokio::test]
    async fn search_ranks_and_filters() {
        let store = InMemoryStore::new("c");
        store.create_index().await.unwrap();
        store
            .insert(vec![
                record("a", 0, vec![1.0, 0.0]),
                record("a", 1, vec![0.7, 0.7]),
                record("b", 0, vec![0.0, 1.0]),
            ])
            .await
            .unwrap();

        let hits = store.search(&[1.0, 0.0], 2, None).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk_id, "a-0");
        assert_eq!(hits[1].chunk_id, "a-1");

        let filter = SearchFilter::SourceFile("b".into());
        let hits = store.search(&[1.0, 0.0], 10, Some(&filter)).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].source_file, "b");
    }

    #[tokio::test]
    async fn delete_by_source_removes_only_matching() {
        let store = InMemoryStore::new("c");
        store.create_index().await.unwrap();
        store
            .insert(vec![record("a", 0, vec![1.0]), record("b", 0, vec![1.0])])
            .await
            .unwrap();
        assert_eq!(store.delete_by_source("a").await.unwrap(), 1);
        assert_eq!(store.count().await.unwrap(), 1);
        assert_eq!(store.delete_by_source("missing").await.unwrap(), 0);
    }
}
