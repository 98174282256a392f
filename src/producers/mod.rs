//! Chunk producers.
//!
//! A producer turns one raw source (an uploaded file, an audio recording,
//! a YouTube video, a web page) into an ordered sequence of untagged
//! [`Chunk`](crate::models::Chunk)s. Tagging, embedding and insertion are
//! the ingestion coordinator's job.
//!
//! | Producer | Gate | Backend |
//! |----------|------|---------|
//! | [`DocumentProcessor`] | always | local extraction + chunker |
//! | [`AssemblyAiTranscriber`] | `ASSEMBLYAI_API_KEY` | AssemblyAI REST |
//! | [`YouTubeTranscriber`] | `ASSEMBLYAI_API_KEY` | `yt-dlp` + audio transcriber |
//! | [`FirecrawlScraper`] | `FIRECRAWL_API_KEY` | Firecrawl `/v1/scrape` |

pub mod audio;
pub mod document;
pub mod web;
pub mod youtube;

pub use audio::{AssemblyAiTranscriber, AudioTranscriber};
pub use document::DocumentProcessor;
pub use web::{FirecrawlScraper, WebScraper};
pub use youtube::{extract_video_id, is_youtube_url, VideoTranscriber, YouTubeTranscriber};

/// File extensions treated as audio when the upload has no `audio/*`
/// content type.
const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "m4a", "flac", "ogg", "aac", "webm", "opus"];

/// True when an upload should go to the audio transcriber instead of the
/// document processor.
pub fn is_audio(filename: &str, content_type: Option<&str>) -> bool {
    if content_type.is_some_and(|ct| ct.starts_with("audio/")) {
        return true;
    }
    filename
        .rsplit_once('.')
        .map(|(_, ext)| AUDIO_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}
