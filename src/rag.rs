//! Retrieval-augmented answering.
//!
//! [`RagGenerator::generate_response`] embeds the query, searches the
//! session's vector store, packs the best hits into a bounded context
//! window, and asks the [`Generator`] for an answer. Every chunk that made
//! it into the context window is returned as a [`Citation`].

use std::sync::Arc;
use std::time::Duration;

use crate::config::RetrievalConfig;
use crate::embedding::EmbeddingProvider;
use crate::error::{KcError, Result, UpstreamContext};
use crate::generation::Generator;
use crate::models::{Citation, RagAnswer, SearchHit};
use crate::store::{SearchFilter, VectorStore};

/// Search is read-only, so transient store failures are retried.
const SEARCH_ATTEMPTS: u32 = 3;
const SEARCH_BACKOFF: Duration = Duration::from_millis(200);

const SYSTEM_PROMPT: &str = "You are a research assistant answering questions about the user's \
own sources. Answer using only the numbered context passages. Cite passages inline with their \
reference, for example [1] or [2][3]. If the context does not contain the answer, say so plainly.";

pub struct RagGenerator {
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    generator: Option<Arc<dyn Generator>>,
    top_k: usize,
    max_context_chars: usize,
    preview_chars: usize,
}

impl RagGenerator {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
        generator: Option<Arc<dyn Generator>>,
        retrieval: &RetrievalConfig,
    ) -> Self {
        Self {
            embedder,
            store,
            generator,
            top_k: retrieval.top_k.max(1),
            max_context_chars: retrieval.max_context_chars,
            preview_chars: retrieval.citation_preview_chars,
        }
    }

    /// False when no generation credential is configured.
    pub fn is_available(&self) -> bool {
        self.generator.is_some()
    }

    pub async fn generate_response(&self, query: &str) -> Result<RagAnswer> {
        self.generate_filtered(query, None).await
    }

    pub async fn generate_filtered(
        &self,
        query: &str,
        filter: Option<&SearchFilter>,
    ) -> Result<RagAnswer> {
        let generator = self
            .generator
            .as_ref()
            .ok_or(KcError::FeatureDisabled("Chat"))?;

        let hits = self.retrieve(query, self.top_k, filter).await?;
        let (context, used) = build_context(&hits, self.max_context_chars);

        let prompt = if used.is_empty() {
            format!("Question: {}\n\n(No relevant passages were found.)", query)
        } else {
            format!("Context:\n{}\nQuestion: {}", context, query)
        };

        let response = generator
            .generate(SYSTEM_PROMPT, &prompt)
            .await
            .upstream("generation")?;

        let sources_used = used
            .iter()
            .enumerate()
            .map(|(i, hit)| Citation::from_hit(i + 1, hit, self.preview_chars))
            .collect();

        Ok(RagAnswer {
            response,
            sources_used,
        })
    }

    /// Top-`limit` hits for `query`. When the filter targets a single
    /// source, hits come back in `chunk_index` order so the source reads
    /// in its original sequence.
    pub async fn retrieve(
        &self,
        query: &str,
        limit: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<SearchHit>> {
        let vector = self.embedder.embed_query(query).await.upstream("embedding")?;
        let mut hits = self.search_with_retry(&vector, limit, filter).await?;
        if matches!(filter, Some(SearchFilter::SourceFile(_))) {
            hits.sort_by_key(|h| h.chunk_index);
        }
        tracing::debug!(hits = hits.len(), limit, "retrieved chunks");
        Ok(hits)
    }

    /// All chunks of one source (up to `limit`) in reading order.
    pub async fn retrieve_source(&self, source_name: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let filter = SearchFilter::SourceFile(source_name.to_string());
        self.retrieve(&format!("content from {}", source_name), limit, Some(&filter))
            .await
    }

    async fn search_with_retry(
        &self,
        vector: &[f32],
        limit: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<SearchHit>> {
        let mut attempt = 0;
        loop {
            match self.store.search(vector, limit, filter).await {
                Ok(hits) => return Ok(hits),
                Err(e) if attempt + 1 < SEARCH_ATTEMPTS => {
                    attempt += 1;
                    tracing::warn!(attempt, error = %e, "vector search failed, retrying");
                    tokio::time::sleep(SEARCH_BACKOFF * 2u32.pow(attempt - 1)).await;
                }
                Err(e) => return Err(KcError::upstream("vector store", e)),
            }
        }
    }
}

/// Packs hits into numbered passages until `max_chars` is reached. The
/// first hit is always included, cut down if necessary.
fn build_context(hits: &[SearchHit], max_chars: usize) -> (String, Vec<SearchHit>) {
    let mut context = String::new();
    let mut used = Vec::new();

    for hit in hits {
        let ordinal = used.len() + 1;
        let location = match hit.page_number {
            Some(page) => format!("{}, page {}", hit.source_file, page),
            None => hit.source_file.clone(),
        };
        let header = format!("[{}] ({})\n", ordinal, location);
        let remaining = max_chars.saturating_sub(context.len());

        if header.len() + hit.content.len() + 2 > remaining {
            if used.is_empty() && remaining > header.len() {
                let body = crate::models::truncate_chars(&hit.content, remaining - header.len());
                context.push_str(&header);
                context.push_str(&body);
                context.push_str("\n\n");
                used.push(hit.clone());
            }
            break;
        }

        context.push_str(&header);
        context.push_str(&hit.content);
        context.push_str("\n\n");
        used.push(hit.clone());
    }

    (context, used)
}
