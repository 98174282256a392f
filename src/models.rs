//! Core data models used throughout KnowledgeCast.
//!
//! These types represent the chunks, stored records, search hits, citations,
//! and source manifest entries that flow through ingestion and retrieval.

use chrono::Local;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum length, in characters, of a citation's `content` preview.
pub const CITATION_PREVIEW_CHARS: usize = 500;

/// A unit of ingested content.
///
/// Producers create chunks without a source tag; the ingestion coordinator
/// attaches `source_file` exactly once before embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub content: String,
    pub source_file: Option<String>,
    pub chunk_index: i64,
    pub page_number: Option<u32>,
}

impl Chunk {
    pub fn new(chunk_index: i64, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            source_file: None,
            chunk_index,
            page_number: None,
        }
    }

    pub fn with_page(mut self, page: u32) -> Self {
        self.page_number = Some(page);
        self
    }
}

/// A chunk paired with its embedding vector, ready for insertion.
#[derive(Debug, Clone)]
pub struct EmbeddedChunk {
    pub chunk_id: String,
    pub content: String,
    pub source_file: String,
    pub chunk_index: i64,
    pub page_number: Option<u32>,
    pub vector: Vec<f32>,
}

impl EmbeddedChunk {
    /// Consumes a tagged chunk. Returns `None` if the chunk was never tagged.
    pub fn from_chunk(chunk: Chunk, vector: Vec<f32>) -> Option<Self> {
        let source_file = chunk.source_file?;
        Some(Self {
            chunk_id: Uuid::new_v4().to_string(),
            content: chunk.content,
            source_file,
            chunk_index: chunk.chunk_index,
            page_number: chunk.page_number,
            vector,
        })
    }
}

/// A record returned from a vector store similarity search.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub chunk_id: String,
    pub content: String,
    pub source_file: String,
    pub chunk_index: i64,
    pub page_number: Option<u32>,
    pub score: f32,
}

/// Provenance record linking an answer to a retrieved chunk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Citation {
    pub reference: String,
    pub source_file: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_number: Option<u32>,
    pub chunk_id: String,
    pub content: String,
}

impl Citation {
    /// Builds the citation for the `ordinal`-th chunk in a context window.
    /// Content is cut to at most `preview_chars` characters.
    pub fn from_hit(ordinal: usize, hit: &SearchHit, preview_chars: usize) -> Self {
        Self {
            reference: format!("[{}]", ordinal),
            source_file: hit.source_file.clone(),
            page_number: hit.page_number,
            chunk_id: hit.chunk_id.clone(),
            content: truncate_chars(&hit.content, preview_chars),
        }
    }
}

/// Returns the first `max` characters of `s` (char-boundary safe).
pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SourceKind {
    Document,
    Audio,
    YouTube,
    Website,
    Text,
}

/// Session-visible record of one successful ingestion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceManifestEntry {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: SourceKind,
    pub size: String,
    #[serde(rename = "chunks")]
    pub chunk_count: usize,
    pub uploaded_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_id: Option<String>,
}

impl SourceManifestEntry {
    pub fn new(
        name: impl Into<String>,
        kind: SourceKind,
        size: String,
        chunk_count: usize,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            kind,
            size,
            chunk_count,
            uploaded_at: Local::now().format("%Y-%m-%d %H:%M").to_string(),
            url: None,
            video_id: None,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_video_id(mut self, video_id: impl Into<String>) -> Self {
        self.video_id = Some(video_id.into());
        self
    }
}

/// Output of the retrieval-augmented generator.
#[derive(Debug, Clone, Serialize)]
pub struct RagAnswer {
    pub response: String,
    pub sources_used: Vec<Citation>,
}
