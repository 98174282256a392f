//! SQLite-backed [`VectorStore`] implementation.
//!
//! Each session gets its own database file (see
//! [`StoreLocation`](super::StoreLocation)) holding one table named after
//! the session's collection. Vectors are stored as little-endian f32 BLOBs
//! and ranked in process with cosine similarity.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::str::FromStr;

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::models::{EmbeddedChunk, SearchHit};

use super::{rank, SearchFilter, StoreError, StoreLocation, VectorStore};

pub struct SqliteVectorStore {
    pool: SqlitePool,
    location: StoreLocation,
}

impl SqliteVectorStore {
    pub async fn open(location: StoreLocation) -> Result<Self> {
        if let Some(parent) = location.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        remove_store_files(&location).await?;

        let url = format!("sqlite:{}", location.path.display());
        let options = SqliteConnectOptions::from_str(&url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open {}", location.path.display()))?;

        Ok(Self { pool, location })
    }

    fn table(&self) -> &str {
        // Collection names are generated from [A-Za-z0-9_] only.
        &self.location.collection
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn create_index(&self) -> Result<()> {
        if self.has_index().await? {
            return Err(StoreError::IndexExists(self.location.collection.clone()).into());
        }

        let mut tx = self.pool.begin().await?;
        sqlx::query(&format!(
            r#"
            CREATE TABLE {t} (
                chunk_id    TEXT PRIMARY KEY,
                source_file TEXT NOT NULL,
                chunk_index INTEGER NOT NULL,
                page_number INTEGER,
                content     TEXT NOT NULL,
                vector      BLOB NOT NULL
            )
            "#,
            t = self.table()
        ))
        .execute(&mut *tx)
        .await?;
        sqlx::query(&format!(
            "CREATE INDEX {t}_source ON {t} (source_file)",
            t = self.table()
        ))
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn has_index(&self) -> Result<bool> {
        let found: Option<String> =
            sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?")
                .bind(self.table())
                .fetch_optional(&self.pool)
                .await?;
        Ok(found.is_some())
    }

    async fn insert(&self, chunks: Vec<EmbeddedChunk>) -> Result<usize> {
        if !self.has_index().await? {
            return Err(StoreError::IndexMissing(self.location.collection.clone()).into());
        }

        let sql = format!(
            "INSERT INTO {} (chunk_id, source_file, chunk_index, page_number, content, vector) \
             VALUES (?, ?, ?, ?, ?, ?)",
            self.table()
        );
        let mut tx = self.pool.begin().await?;
        for chunk in &chunks {
            sqlx::query(&sql)
                .bind(&chunk.chunk_id)
                .bind(&chunk.source_file)
                .bind(chunk.chunk_index)
                .bind(chunk.page_number.map(i64::from))
                .bind(&chunk.content)
                .bind(vec_to_blob(&chunk.vector))
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(chunks.len())
    }

    async fn search(
        &self,
        vector: &[f32],
        limit: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<SearchHit>> {
        if !self.has_index().await? {
            return Ok(Vec::new());
        }

        let base = format!(
            "SELECT chunk_id, source_file, chunk_index, page_number, content, vector FROM {}",
            self.table()
        );
        let rows = match filter {
            Some(SearchFilter::SourceFile(name)) => {
                sqlx::query(&format!("{} WHERE source_file = ?", base))
                    .bind(name)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => sqlx::query(&base).fetch_all(&self.pool).await?,
        };

        let hits = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("vector");
                let page: Option<i64> = row.get("page_number");
                SearchHit {
                    chunk_id: row.get("chunk_id"),
                    content: row.get("content"),
                    source_file: row.get("source_file"),
                    chunk_index: row.get("chunk_index"),
                    page_number: page.and_then(|p| u32::try_from(p).ok()),
                    score: cosine_similarity(vector, &blob_to_vec(&blob)),
                }
            })
            .collect();
        Ok(rank(hits, limit))
    }

    async fn delete_by_source(&self, source_file: &str) -> Result<usize> {
        if !self.has_index().await? {
            return Ok(0);
        }
        let result = sqlx::query(&format!("DELETE FROM {} WHERE source_file = ?", self.table()))
            .bind(source_file)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() as usize)
    }

    async fn count(&self) -> Result<usize> {
        if !self.has_index().await? {
            return Ok(0);
        }
        let n: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", self.table()))
            .fetch_one(&self.pool)
            .await?;
        Ok(n as usize)
    }

    async fn release(&self) -> Result<()> {
        self.pool.close().await;
        remove_store_files(&self.location).await
    }
}

/// Deletes the database file and its WAL companions, if present.
async fn remove_store_files(location: &StoreLocation) -> Result<()> {
    for suffix in ["", "-wal", "-shm"] {
        let file = std::path::PathBuf::from(format!("{}{}", location.path.display(), suffix));
        match tokio::fs::remove_file(&file).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e).with_context(|| format!("Failed to remove {}", file.display())),
        }
    }
    Ok(())
}
