//! YouTube transcription.
//!
//! The audio track is downloaded with `yt-dlp` into a temporary directory
//! owned by the call, then handed to the configured [`AudioTranscriber`].
//! The directory is removed when the call returns, on success or failure.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tempfile::TempDir;
use tokio::process::Command;

use super::AudioTranscriber;
use crate::models::Chunk;

#[async_trait]
pub trait VideoTranscriber: Send + Sync {
    async fn transcribe_video(&self, url: &str) -> Result<Vec<Chunk>>;
}

pub struct YouTubeTranscriber {
    audio: Arc<dyn AudioTranscriber>,
    program: String,
}

impl YouTubeTranscriber {
    pub fn new(audio: Arc<dyn AudioTranscriber>) -> Self {
        Self {
            audio,
            program: "yt-dlp".to_string(),
        }
    }

    /// Uses `program` in place of `yt-dlp`.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    async fn download_audio(
        &self,
        url: &str,
        video_id: &str,
        dir: &TempDir,
    ) -> Result<(String, Vec<u8>)> {
        let template = dir.path().join(format!("{}.%(ext)s", video_id));
        let output = Command::new(&self.program)
            .args(["--no-playlist", "-x", "--audio-format", "mp3", "-o"])
            .arg(&template)
            .arg(url)
            .stdin(std::process::Stdio::null())
            // A cancelled ingest must not leave the download running.
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("Failed to execute '{}'. Is it installed?", self.program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("yt-dlp failed: {}", stderr.trim());
        }

        let mut entries = tokio::fs::read_dir(dir.path()).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(video_id) && !name.ends_with(".part") {
                let bytes = tokio::fs::read(entry.path()).await?;
                return Ok((name, bytes));
            }
        }
        bail!("yt-dlp produced no audio file for {}", video_id)
    }
}

#[async_trait]
impl VideoTranscriber for YouTubeTranscriber {
    async fn transcribe_video(&self, url: &str) -> Result<Vec<Chunk>> {
        let video_id = extract_video_id(url)
            .ok_or_else(|| anyhow::anyhow!("Could not extract a video id from {}", url))?;
        let dir = tempfile::Builder::new().prefix("kcast_yt_").tempdir()?;

        tracing::info!(video_id = %video_id, "downloading YouTube audio");
        let (filename, audio) = self.download_audio(url, &video_id, &dir).await?;
        self.audio.transcribe(&filename, audio).await
    }
}

/// Extracts the 11-character video id from the common YouTube URL shapes:
/// `youtube.com/watch?v=`, `youtu.be/`, `youtube.com/embed/` and
/// `youtube.com/shorts/`.
pub fn extract_video_id(raw: &str) -> Option<String> {
    let parsed = url::Url::parse(raw.trim()).ok()?;
    let host = parsed.host_str()?.trim_start_matches("www.").trim_start_matches("m.");

    let candidate = match host {
        "youtu.be" => parsed.path_segments()?.next().map(str::to_string),
        "youtube.com" | "music.youtube.com" => {
            let mut segments = parsed.path_segments()?;
            match segments.next() {
                Some("watch") => parsed
                    .query_pairs()
                    .find(|(k, _)| k == "v")
                    .map(|(_, v)| v.into_owned()),
                Some("embed") | Some("shorts") | Some("live") | Some("v") => {
                    segments.next().map(str::to_string)
                }
                _ => None,
            }
        }
        _ => None,
    }?;

    let valid = candidate.len() == 11
        && candidate
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    valid.then_some(candidate)
}

/// True for URLs that point at youtube.com or youtu.be.
pub fn is_youtube_url(raw: &str) -> bool {
    url::Url::parse(raw.trim())
        .ok()
        .filter(|u| matches!(u.scheme(), "http" | "https"))
        .and_then(|u| u.host_str().map(str::to_string))
        .is_some_and(|host| {
            host == "youtu.be" || host == "youtube.com" || host.ends_with(".youtube.com")
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct NoTranscript;

    #[async_trait]
    impl AudioTranscriber for NoTranscript {
        async fn transcribe(&self, _filename: &str, _audio: Vec<u8>) -> Result<Vec<Chunk>> {
            Ok(Vec::new())
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn download_is_killed_when_the_call_times_out() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = TempDir::new().unwrap();
        let marker = tmp.path().join("finished");
        let script = tmp.path().join("slow-yt-dlp");
        std::fs::write(
            &script,
            format!("#!/bin/sh\nsleep 2\ntouch '{}'\n", marker.display()),
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let transcriber = YouTubeTranscriber::new(Arc::new(NoTranscript))
            .with_program(script.display().to_string());
        let call = transcriber.transcribe_video("https://youtu.be/dQw4w9WgXcQ");
        assert!(tokio::time::timeout(Duration::from_millis(300), call).await.is_err());

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(!marker.exists());
    }

    #[test]
    fn video_id_from_known_shapes() {
        let id = Some("dQw4w9WgXcQ".to_string());
        assert_eq!(extract_video_id("https://www.youtube.com/watch?v=dQw4w9WgXcQ"), id);
        assert_eq!(
            extract_video_id("https://youtube.com/watch?feature=share&v=dQw4w9WgXcQ&t=42"),
            id
        );
        assert_eq!(extract_video_id("https://youtu.be/dQw4w9WgXcQ?si=abc"), id);
        assert_eq!(extract_video_id("https://www.youtube.com/embed/dQw4w9WgXcQ"), id);
        assert_eq!(extract_video_id("https://m.youtube.com/shorts/dQw4w9WgXcQ"), id);
    }

    #[test]
    fn video_id_rejects_other_urls() {
        assert_eq!(extract_video_id("https://vimeo.com/12345"), None);
        assert_eq!(extract_video_id("https://www.youtube.com/channel/UC123"), None);
        assert_eq!(extract_video_id("https://youtu.be/short"), None);
        assert_eq!(extract_video_id("not a url"), None);
    }

    #[test]
    fn youtube_url_check() {
        assert!(is_youtube_url("https://www.youtube.com/watch?v=dQw4w9WgXcQ"));
        assert!(is_youtube_url("http://youtu.be/dQw4w9WgXcQ"));
        assert!(!is_youtube_url("https://notyoutube.com/watch?v=dQw4w9WgXcQ"));
        assert!(!is_youtube_url("ftp://youtube.com/x"));
    }
}
