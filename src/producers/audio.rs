//! Audio transcription through AssemblyAI.
//!
//! Flow: upload the raw bytes (`POST /v2/upload`), request a transcript
//! with speaker labels (`POST /v2/transcript`), then poll
//! `GET /v2/transcript/{id}` until it completes or errors. Utterances are
//! rendered as `[Speaker A] text` lines and grouped into chunks that fit
//! the chunking budget.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

use crate::chunk::ChunkParams;
use crate::models::Chunk;

const DEFAULT_BASE_URL: &str = "https://api.assemblyai.com";
const POLL_INTERVAL: Duration = Duration::from_secs(3);

#[async_trait]
pub trait AudioTranscriber: Send + Sync {
    /// Transcribes an audio file into speaker-turn chunks.
    async fn transcribe(&self, filename: &str, audio: Vec<u8>) -> Result<Vec<Chunk>>;
}

pub struct AssemblyAiTranscriber {
    api_key: String,
    base_url: String,
    params: ChunkParams,
    poll_interval: Duration,
    client: reqwest::Client,
}

impl AssemblyAiTranscriber {
    pub fn new(api_key: impl Into<String>, params: ChunkParams) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;
        Ok(Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            params,
            poll_interval: POLL_INTERVAL,
            client,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    async fn upload(&self, audio: Vec<u8>) -> Result<String> {
        let response = self
            .client
            .post(format!("{}/v2/upload", self.base_url))
            .header("authorization", &self.api_key)
            .header("content-type", "application/octet-stream")
            .body(audio)
            .send()
            .await
            .context("AssemblyAI upload request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("AssemblyAI upload error {}: {}", status, body);
        }
        let body: UploadResponse = response.json().await?;
        Ok(body.upload_url)
    }

    async fn request_transcript(&self, audio_url: &str) -> Result<String> {
        let response = self
            .client
            .post(format!("{}/v2/transcript", self.base_url))
            .header("authorization", &self.api_key)
            .json(&serde_json::json!({
                "audio_url": audio_url,
                "speaker_labels": true,
            }))
            .send()
            .await
            .context("AssemblyAI transcript request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("AssemblyAI transcript error {}: {}", status, body);
        }
        let body: Transcript = response.json().await?;
        Ok(body.id)
    }

    /// Polls until the transcript leaves the queue. The caller bounds the
    /// total wait with its own timeout.
    async fn wait_for(&self, transcript_id: &str) -> Result<Transcript> {
        let url = format!("{}/v2/transcript/{}", self.base_url, transcript_id);
        loop {
            let response = self
                .client
                .get(&url)
                .header("authorization", &self.api_key)
                .send()
                .await
                .context("AssemblyAI poll request failed")?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                bail!("AssemblyAI poll error {}: {}", status, body);
            }

            let transcript: Transcript = response.json().await?;
            match transcript.status.as_str() {
                "completed" => return Ok(transcript),
                "error" => bail!(
                    "Transcription failed: {}",
                    transcript.error.as_deref().unwrap_or("unknown error")
                ),
                other => {
                    tracing::debug!(transcript_id, status = other, "transcript not ready");
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }
    }
}

#[async_trait]
impl AudioTranscriber for AssemblyAiTranscriber {
    async fn transcribe(&self, filename: &str, audio: Vec<u8>) -> Result<Vec<Chunk>> {
        tracing::info!(file = filename, bytes = audio.len(), "uploading audio for transcription");
        let audio_url = self.upload(audio).await?;
        let transcript_id = self.request_transcript(&audio_url).await?;
        let transcript = self.wait_for(&transcript_id).await?;
        let chunks = transcript_chunks(&transcript, self.params);
        tracing::info!(file = filename, chunks = chunks.len(), "transcription complete");
        Ok(chunks)
    }
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    upload_url: String,
}

#[derive(Debug, Deserialize)]
struct Transcript {
    id: String,
    status: String,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    utterances: Option<Vec<Utterance>>,
}

#[derive(Debug, Deserialize)]
struct Utterance {
    speaker: String,
    text: String,
}

/// Groups speaker turns into chunks no larger than the chunk budget. A
/// single oversized turn becomes its own chunk. Falls back to the plain
/// transcript text when diarization returned no utterances.
fn transcript_chunks(transcript: &Transcript, params: ChunkParams) -> Vec<Chunk> {
    let utterances = transcript.utterances.as_deref().unwrap_or_default();
    if utterances.is_empty() {
        return transcript
            .text
            .as_deref()
            .map(|text| crate::chunk::chunk_text(text, params))
            .unwrap_or_default();
    }

    let max_chars = params.max_chars();
    let mut chunks = Vec::new();
    let mut buf = String::new();
    for utterance in utterances {
        let text = utterance.text.trim();
        if text.is_empty() {
            continue;
        }
        let line = format!("[Speaker {}] {}", utterance.speaker, text);
        if !buf.is_empty() && buf.len() + 1 + line.len() > max_chars {
            chunks.push(Chunk::new(chunks.len() as i64, std::mem::take(&mut buf)));
        }
        if !buf.is_empty() {
            buf.push('\n');
        }
        buf.push_str(&line);
    }
    if !buf.is_empty() {
        chunks.push(Chunk::new(chunks.len() as i64, buf));
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(max_tokens: usize) -> ChunkParams {
        ChunkParams {
            max_tokens,
            overlap_tokens: 0,
        }
    }

    #[test]
    fn utterances_become_speaker_lines() {
        let transcript: Transcript = serde_json::from_value(serde_json::json!({
            "id": "t1",
            "status": "completed",
            "utterances": [
                {"speaker": "A", "text": "Welcome to the show."},
                {"speaker": "B", "text": "Thanks for having me."}
            ]
        }))
        .unwrap();
        let chunks = transcript_chunks(&transcript, params(256));
        assert_eq!(chunks.len(), 1);
        assert_eq!(
            chunks[0].content,
            "[Speaker A] Welcome to the show.\n[Speaker B] Thanks for having me."
        );
    }

    #[test]
    fn turns_split_when_budget_exceeded() {
        let transcript: Transcript = serde_json::from_value(serde_json::json!({
            "id": "t1",
            "status": "completed",
            "utterances": [
                {"speaker": "A", "text": "x".repeat(30)},
                {"speaker": "B", "text": "y".repeat(30)},
                {"speaker": "A", "text": "z".repeat(30)}
            ]
        }))
        .unwrap();
        let chunks = transcript_chunks(&transcript, params(12));
        assert_eq!(chunks.len(), 3);
        assert_eq!(
            chunks.iter().map(|c| c.chunk_index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
    }

    #[test]
    fn falls_back_to_plain_text() {
        let transcript: Transcript = serde_json::from_value(serde_json::json!({
            "id": "t1",
            "status": "completed",
            "text": "Just one speaker talking."
        }))
        .unwrap();
        let chunks = transcript_chunks(&transcript, params(256));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, "Just one speaker talking.");
    }
}
