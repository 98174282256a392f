//! Podcast generation for a single source.
//!
//! Retrieves the source's chunks in reading order, writes a script, and
//! when a speech synthesizer is configured renders audio. Audio is
//! best-effort: a synthesis failure still returns the script.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{KcError, Result, UpstreamContext};
use crate::models::SourceKind;
use crate::podcast::{render_audio, PodcastStyle, ScriptLine};
use crate::session::remove_audio;
use crate::sessions::SessionManager;

fn default_duration() -> String {
    "10 minutes".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct PodcastRequest {
    pub source_name: String,
    #[serde(default)]
    pub style: PodcastStyle,
    #[serde(default = "default_duration")]
    pub duration: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct GeneratedPodcast {
    pub id: String,
    pub total_lines: usize,
    pub estimated_duration: String,
    pub script: Vec<ScriptLine>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
    pub source_name: String,
    pub style: PodcastStyle,
}

pub async fn generate_podcast(
    manager: &SessionManager,
    session_id: Option<&str>,
    request: &PodcastRequest,
) -> Result<GeneratedPodcast> {
    let session_id = session_id
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| KcError::bad_request("Session ID is required"))?;
    let session = manager.get(session_id).ok_or(KcError::SessionNotFound)?;
    let config = &manager.services().config;

    let components = session
        .ensure_initialized()
        .await
        .map_err(|e| KcError::upstream("session initialization", e))?;
    let scripts = components
        .scripts
        .as_ref()
        .ok_or(KcError::FeatureDisabled("Podcast generation"))?;

    let source = session
        .find_source(&request.source_name)
        .ok_or_else(|| KcError::SourceNotFound(request.source_name.clone()))?;

    let hits = components
        .rag
        .retrieve_source(&source.name, config.retrieval.podcast_chunk_limit)
        .await?;
    if hits.is_empty() {
        return Err(KcError::bad_request("No content found for this source"));
    }
    tracing::info!(
        session_id,
        source = %source.name,
        chunks = hits.len(),
        "writing podcast script"
    );

    let written = if source.kind == SourceKind::Website {
        let chunks: Vec<String> = hits.into_iter().map(|h| h.content).collect();
        scripts
            .generate_from_website(&chunks, &source.name, request.style, &request.duration)
            .await
    } else {
        let combined = hits
            .iter()
            .map(|h| h.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        scripts
            .generate_from_text(&combined, &source.name, request.style, &request.duration)
            .await
    };
    let script = written.upstream("generation")?;

    let mut audio_url = None;
    if let Some(speech) = &components.speech {
        let dir = config
            .podcast
            .output_dir
            .join(format!("podcast_{}", Uuid::new_v4().simple()));
        let limit = Duration::from_secs(config.ingest.timeout_secs);
        let rendered = tokio::time::timeout(
            limit,
            render_audio(speech.as_ref(), &script, &config.podcast.voices, &dir),
        )
        .await;

        match rendered {
            Ok(Ok(path)) => {
                if let Some(previous) = session.set_last_podcast_audio(path) {
                    remove_audio(&previous).await;
                }
                audio_url = Some(format!("/api/podcast/audio/{}", session.id()));
            }
            Ok(Err(e)) => {
                tracing::error!(session_id, error = %format!("{:#}", e), "audio generation failed");
                let _ = tokio::fs::remove_dir_all(&dir).await;
            }
            Err(_) => {
                tracing::error!(session_id, ?limit, "audio generation timed out");
                let _ = tokio::fs::remove_dir_all(&dir).await;
            }
        }
    }

    Ok(GeneratedPodcast {
        id: Uuid::new_v4().to_string(),
        total_lines: script.total_lines,
        estimated_duration: script.estimated_duration,
        script: script.script,
        audio_url,
        source_name: source.name,
        style: request.style,
    })
}

/// Path of the session's most recent podcast audio.
pub async fn podcast_audio(manager: &SessionManager, session_id: &str) -> Result<PathBuf> {
    let session = manager.get(session_id).ok_or(KcError::SessionNotFound)?;
    let not_found = || KcError::NotFound("Audio file not found. Generate a podcast first.".into());
    let path = session.last_podcast_audio().ok_or_else(not_found)?;
    if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
        return Err(not_found());
    }
    Ok(path)
}
