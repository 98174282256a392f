//! Ingestion coordinator.
//!
//! Every source type follows the same contract:
//!
//! 1. Resolve or create the session.
//! 2. Run the type-specific producer (under the ingest timeout).
//! 3. Tag every chunk with the source name.
//! 4. Embed, then create the session's index if it does not exist yet and
//!    insert.
//! 5. Append a [`SourceManifestEntry`] and return it.
//!
//! Steps 4 and 5 share one critical section per session, so concurrent
//! first ingestions create the index exactly once and `chunk_count` always
//! matches what was inserted.
//!
//! URL batches isolate failures per URL; every other source type fails the
//! whole call on the first error.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;

use crate::error::{KcError, Result, UpstreamContext};
use crate::models::{Chunk, EmbeddedChunk, SourceKind, SourceManifestEntry};
use crate::producers::{extract_video_id, is_audio, is_youtube_url};
use crate::session::{Session, SessionComponents};
use crate::sessions::SessionManager;

/// Minimum length of pasted text, in characters.
pub const MIN_TEXT_CHARS: usize = 10;

/// An uploaded file, fully buffered.
#[derive(Debug, Clone)]
pub struct Upload {
    pub filename: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// Result of a single-source ingestion.
#[derive(Debug, Clone)]
pub struct Ingested {
    pub session_id: String,
    pub source: SourceManifestEntry,
}

/// Result of a URL batch: only the URLs that succeeded.
#[derive(Debug, Clone)]
pub struct IngestedBatch {
    pub session_id: String,
    pub sources: Vec<SourceManifestEntry>,
}

// ═══════════════════════════════════════════════════════════════════════
// Per-type procedures
// ═══════════════════════════════════════════════════════════════════════

/// Ingests an uploaded document or audio file.
pub async fn ingest_upload(
    manager: &SessionManager,
    session_id: Option<&str>,
    upload: Upload,
) -> Result<Ingested> {
    let limits = &manager.services().config.ingest;
    if upload.filename.trim().is_empty() {
        return Err(KcError::bad_request("Uploaded file has no name"));
    }
    if upload.bytes.is_empty() {
        return Err(KcError::bad_request("Uploaded file is empty"));
    }
    if upload.bytes.len() > limits.max_upload_bytes {
        return Err(KcError::bad_request(format!(
            "File exceeds the {} byte upload limit",
            limits.max_upload_bytes
        )));
    }

    let session = manager.create(session_id);
    let components = components(&session).await?;
    let Upload {
        filename,
        content_type,
        bytes,
    } = upload;
    let size = format!("{:.1} KB", bytes.len() as f64 / 1024.0);

    let (kind, chunks) = if is_audio(&filename, content_type.as_deref()) {
        let audio = components
            .audio
            .as_ref()
            .ok_or(KcError::FeatureDisabled("Audio processing"))?;
        let chunks = produce(
            manager,
            "transcription",
            &filename,
            audio.transcribe(&filename, bytes),
        )
        .await?;
        (SourceKind::Audio, chunks)
    } else {
        let chunks = produce(
            manager,
            "document processing",
            &filename,
            components
                .documents
                .process_file(&filename, content_type.as_deref(), bytes),
        )
        .await?;
        (SourceKind::Document, chunks)
    };

    if chunks.is_empty() {
        return Err(KcError::bad_request(format!(
            "No text could be extracted from {}",
            filename
        )));
    }

    let name = filename.clone();
    let source = commit_source(&session, components, &name, chunks, move |n| {
        SourceManifestEntry::new(filename, kind, size, n)
    })
    .await?;
    Ok(Ingested {
        session_id: session.id().to_string(),
        source,
    })
}

/// Scrapes and ingests each URL independently. Failed URLs are logged and
/// skipped; the call itself only fails on invalid input or a disabled
/// scraper.
pub async fn ingest_urls(
    manager: &SessionManager,
    session_id: Option<&str>,
    urls: &[String],
) -> Result<IngestedBatch> {
    if urls.iter().all(|u| u.trim().is_empty()) {
        return Err(KcError::bad_request("At least one URL is required"));
    }

    let session = manager.create(session_id);
    let components = components(&session).await?;
    let scraper = components
        .scraper
        .as_ref()
        .ok_or(KcError::FeatureDisabled("Web scraping"))?;

    let mut sources = Vec::new();
    for url in urls.iter().map(|u| u.trim()).filter(|u| !u.is_empty()) {
        let outcome = async {
            let chunks = produce(manager, "scraping", url, scraper.scrape(url)).await?;
            if chunks.is_empty() {
                return Err(KcError::bad_request(format!("No content scraped from {}", url)));
            }
            let name = url.to_string();
            commit_source(&session, components, url, chunks, move |n| {
                let size = format!("{} chunks", n);
                SourceManifestEntry::new(name.clone(), SourceKind::Website, size, n).with_url(name)
            })
            .await
        }
        .await;

        match outcome {
            Ok(entry) => sources.push(entry),
            Err(e) => {
                tracing::warn!(session_id = %session.id(), url, error = %e, "skipping URL");
            }
        }
    }

    Ok(IngestedBatch {
        session_id: session.id().to_string(),
        sources,
    })
}

/// Transcribes and ingests a YouTube video.
pub async fn ingest_youtube(
    manager: &SessionManager,
    session_id: Option<&str>,
    url: &str,
) -> Result<Ingested> {
    let url = url.trim();
    if !is_youtube_url(url) {
        return Err(KcError::bad_request("URL must point to youtube.com or youtu.be"));
    }
    let video_id = extract_video_id(url)
        .ok_or_else(|| KcError::bad_request("Could not find a video id in the URL"))?;

    let session = manager.create(session_id);
    let components = components(&session).await?;
    let video = components
        .video
        .as_ref()
        .ok_or(KcError::FeatureDisabled("YouTube processing"))?;

    let name = format!("YouTube Video {}", video_id);
    let chunks = produce(manager, "transcription", &name, video.transcribe_video(url)).await?;
    if chunks.is_empty() {
        return Err(KcError::bad_request("No transcript extracted from video"));
    }

    let (entry_name, url) = (name.clone(), url.to_string());
    let source = commit_source(&session, components, &name, chunks, move |n| {
        SourceManifestEntry::new(entry_name, SourceKind::YouTube, format!("{} segments", n), n)
            .with_url(url)
            .with_video_id(video_id)
    })
    .await?;
    Ok(Ingested {
        session_id: session.id().to_string(),
        source,
    })
}

/// Ingests pasted text under the name `Text (HH:MM)`.
pub async fn ingest_text(
    manager: &SessionManager,
    session_id: Option<&str>,
    content: &str,
) -> Result<Ingested> {
    let char_count = content.chars().count();
    if content.trim().chars().count() < MIN_TEXT_CHARS {
        return Err(KcError::bad_request(format!(
            "Text must be at least {} characters",
            MIN_TEXT_CHARS
        )));
    }

    let session = manager.create(session_id);
    let components = components(&session).await?;

    let chunks = components.documents.process_text(content);
    if chunks.is_empty() {
        return Err(KcError::bad_request("Text contains nothing to index"));
    }

    let name = format!("Text ({})", Local::now().format("%H:%M"));
    let entry_name = name.clone();
    let source = commit_source(&session, components, &name, chunks, move |n| {
        SourceManifestEntry::new(entry_name, SourceKind::Text, format!("{} chars", char_count), n)
    })
    .await?;
    Ok(Ingested {
        session_id: session.id().to_string(),
        source,
    })
}

// ═══════════════════════════════════════════════════════════════════════
// Manifest operations
// ═══════════════════════════════════════════════════════════════════════

pub fn list_sources(
    manager: &SessionManager,
    session_id: &str,
) -> Result<Vec<SourceManifestEntry>> {
    manager
        .get(session_id)
        .map(|s| s.sources())
        .ok_or(KcError::SessionNotFound)
}

/// Removes every manifest entry named `name` together with its vectors.
/// Returns the number of manifest entries removed.
pub async fn delete_source(
    manager: &SessionManager,
    session_id: &str,
    name: &str,
) -> Result<usize> {
    let session = manager.get(session_id).ok_or(KcError::SessionNotFound)?;
    let _guard = session.lock_ingest().await;

    if session.find_source(name).is_none() {
        return Err(KcError::SourceNotFound(name.to_string()));
    }

    // No components means nothing was ever inserted.
    if session.is_initialized() {
        let components = components(&session).await?;
        let vectors = components
            .store
            .delete_by_source(name)
            .await
            .upstream("vector store")?;
        tracing::debug!(session_id, source = name, vectors, "deleted source vectors");
    }

    let removed = session.remove_sources(name);
    tracing::info!(session_id, source = name, removed, "source deleted");
    Ok(removed)
}

// ═══════════════════════════════════════════════════════════════════════
// Shared steps
// ═══════════════════════════════════════════════════════════════════════

async fn components(session: &Session) -> Result<&SessionComponents> {
    session
        .ensure_initialized()
        .await
        .map_err(|e| KcError::upstream("session initialization", e))
}

/// Runs a producer under the ingest timeout. Producer failures are
/// reported to the client; a timeout commits nothing.
async fn produce<F>(
    manager: &SessionManager,
    stage: &'static str,
    name: &str,
    producer: F,
) -> Result<Vec<Chunk>>
where
    F: Future<Output = anyhow::Result<Vec<Chunk>>>,
{
    let limit = Duration::from_secs(manager.services().config.ingest.timeout_secs);
    match tokio::time::timeout(limit, producer).await {
        Ok(Ok(chunks)) => Ok(chunks),
        Ok(Err(e)) => {
            tracing::warn!(source = name, stage, error = %format!("{:#}", e), "producer failed");
            Err(KcError::bad_request(format!("Could not process {}: {:#}", name, e)))
        }
        Err(_) => {
            tracing::warn!(source = name, stage, ?limit, "producer timed out");
            Err(KcError::Timeout(stage))
        }
    }
}

/// Tags, embeds and inserts `chunks`, then appends the manifest entry
/// built by `entry`. Embedding happens outside the session lock; index
/// creation, insertion and the manifest append happen inside it.
async fn commit_source<E>(
    session: &Arc<Session>,
    components: &SessionComponents,
    name: &str,
    mut chunks: Vec<Chunk>,
    entry: E,
) -> Result<SourceManifestEntry>
where
    E: FnOnce(usize) -> SourceManifestEntry + Send + 'static,
{
    for chunk in &mut chunks {
        chunk.source_file = Some(name.to_string());
    }

    let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
    let vectors = session
        .services()
        .embedder
        .embed(&texts)
        .await
        .upstream("embedding")?;
    if vectors.len() != chunks.len() {
        return Err(KcError::upstream(
            "embedding",
            anyhow::anyhow!("expected {} vectors, got {}", chunks.len(), vectors.len()),
        ));
    }

    let embedded: Vec<EmbeddedChunk> = chunks
        .into_iter()
        .zip(vectors)
        .filter_map(|(chunk, vector)| EmbeddedChunk::from_chunk(chunk, vector))
        .collect();

    // Detached so a dropped request cannot stop between insert and append.
    let session = session.clone();
    let store = components.store.clone();
    let source = name.to_string();
    tokio::spawn(async move {
        let mut state = session.lock_ingest().await;
        if !state.index_created {
            if !store.has_index().await.upstream("vector store")? {
                store.create_index().await.upstream("vector store")?;
                tracing::info!(session_id = %session.id(), "vector index created");
            }
            state.index_created = true;
        }

        let inserted = store.insert(embedded).await.upstream("vector store")?;
        let entry = entry(inserted);
        session.push_source(entry.clone());
        tracing::info!(
            session_id = %session.id(),
            source = %source,
            chunks = inserted,
            "source ingested"
        );
        Ok::<_, KcError>(entry)
    })
    .await
    .map_err(|e| KcError::Internal(anyhow::anyhow!("ingest task failed: {}", e)))?
}
