//! Podcast script writing and speech synthesis.
//!
//! [`ScriptGenerator`] asks the [`Generator`] for a two-speaker script in
//! one of four [`PodcastStyle`]s and parses the answer leniently: fenced or
//! bare JSON, or plain `Speaker N: text` lines. [`render_audio`] voices each
//! line through a [`SpeechSynthesizer`] and merges the segments into a
//! single `complete_podcast.wav`.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::generation::Generator;

pub const COMBINED_AUDIO_FILE: &str = "complete_podcast.wav";
const WORDS_PER_MINUTE: usize = 150;
const SPEAKERS: [&str; 2] = ["Speaker 1", "Speaker 2"];
const STYLE_NAMES: &str = "conversational, interview, debate, or educational";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PodcastStyle {
    #[default]
    Conversational,
    Interview,
    Debate,
    Educational,
}

impl PodcastStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            PodcastStyle::Conversational => "conversational",
            PodcastStyle::Interview => "interview",
            PodcastStyle::Debate => "debate",
            PodcastStyle::Educational => "educational",
        }
    }

    fn direction(&self) -> &'static str {
        match self {
            PodcastStyle::Conversational => {
                "Two friendly hosts talk through the material naturally, reacting to each \
                 other and building on each other's points."
            }
            PodcastStyle::Interview => {
                "Speaker 1 is the interviewer asking sharp questions; Speaker 2 is the expert \
                 answering in depth with concrete details."
            }
            PodcastStyle::Debate => {
                "The speakers take opposing positions on the material's key claims and argue \
                 them respectfully, conceding good points."
            }
            PodcastStyle::Educational => {
                "Speaker 1 teaches the material step by step; Speaker 2 is a curious learner \
                 who asks clarifying questions and summarizes."
            }
        }
    }
}

impl FromStr for PodcastStyle {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "conversational" => Ok(Self::Conversational),
            "interview" => Ok(Self::Interview),
            "debate" => Ok(Self::Debate),
            "educational" => Ok(Self::Educational),
            other => Err(format!(
                "Unknown podcast style '{}'. Must be {}.",
                other, STYLE_NAMES
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptLine {
    pub speaker: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PodcastScript {
    pub script: Vec<ScriptLine>,
    pub total_lines: usize,
    pub estimated_duration: String,
    pub source_name: String,
    pub style: PodcastStyle,
}

impl PodcastScript {
    fn new(script: Vec<ScriptLine>, source_name: &str, style: PodcastStyle) -> Self {
        Self {
            total_lines: script.len(),
            estimated_duration: estimate_duration(&script),
            script,
            source_name: source_name.to_string(),
            style,
        }
    }
}

/// Speaking time at 150 words per minute, as `M:SS`.
pub fn estimate_duration(lines: &[ScriptLine]) -> String {
    let words: usize = lines.iter().map(|l| l.text.split_whitespace().count()).sum();
    let seconds = words * 60 / WORDS_PER_MINUTE;
    format!("{}:{:02}", seconds / 60, seconds % 60)
}

// ============ Script generation ============

pub struct ScriptGenerator {
    generator: Arc<dyn Generator>,
}

impl ScriptGenerator {
    pub fn new(generator: Arc<dyn Generator>) -> Self {
        Self { generator }
    }

    /// Script for a document, transcript or pasted text.
    pub async fn generate_from_text(
        &self,
        text: &str,
        source_name: &str,
        style: PodcastStyle,
        duration: &str,
    ) -> Result<PodcastScript> {
        let prompt = format!(
            "Write a podcast script based on the source \"{source}\".\n\
             Style: {style}. {direction}\n\
             Target length: about {duration} of speech.\n\n\
             Source material:\n{text}",
            source = source_name,
            style = style.as_str(),
            direction = style.direction(),
            duration = duration,
            text = text,
        );
        self.run(&prompt, source_name, style).await
    }

    /// Script for scraped web content; the hosts treat it as an article
    /// they read and attribute it to the site.
    pub async fn generate_from_website(
        &self,
        chunks: &[String],
        source_url: &str,
        style: PodcastStyle,
        duration: &str,
    ) -> Result<PodcastScript> {
        let prompt = format!(
            "Write a podcast script discussing the web page at {url}. Mention that the \
             material comes from this site and focus on its main ideas, skipping navigation \
             text or boilerplate.\n\
             Style: {style}. {direction}\n\
             Target length: about {duration} of speech.\n\n\
             Page content:\n{text}",
            url = source_url,
            style = style.as_str(),
            direction = style.direction(),
            duration = duration,
            text = chunks.join("\n\n"),
        );
        self.run(&prompt, source_url, style).await
    }

    async fn run(
        &self,
        prompt: &str,
        source_name: &str,
        style: PodcastStyle,
    ) -> Result<PodcastScript> {
        let system = "You write scripts for two-host audio podcasts. Reply with JSON only, in \
                      the form {\"script\": [{\"speaker\": \"Speaker 1\", \"text\": \"...\"}, \
                      {\"speaker\": \"Speaker 2\", \"text\": \"...\"}]}. Alternate speakers, \
                      use only \"Speaker 1\" and \"Speaker 2\", and write words meant to be \
                      spoken aloud with no stage directions.";
        let raw = self.generator.generate(system, prompt).await?;
        let lines = parse_script(&raw)?;
        Ok(PodcastScript::new(lines, source_name, style))
    }
}

/// Accepts `{"script": [...]}`, a bare array, fenced JSON, or
/// `Speaker N: text` lines. Entries may be `{"speaker", "text"}` objects or
/// single-key `{"Speaker 1": "text"}` maps.
pub fn parse_script(raw: &str) -> Result<Vec<ScriptLine>> {
    let body = strip_fences(raw);

    let lines = match json_payload(body) {
        Some(value) => lines_from_json(&value),
        None => lines_from_text(body),
    };

    let lines: Vec<ScriptLine> = lines
        .into_iter()
        .filter_map(|line| {
            let text = line.text.trim().to_string();
            (!text.is_empty()).then(|| ScriptLine {
                speaker: normalize_speaker(&line.speaker),
                text,
            })
        })
        .collect();

    if lines.is_empty() {
        bail!("Could not parse a podcast script from the model output");
    }
    Ok(lines)
}

fn strip_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.split_once('\n').map_or("", |(_, body)| body);
    rest.rsplit_once("```").map_or(rest, |(body, _)| body).trim()
}

fn json_payload(body: &str) -> Option<serde_json::Value> {
    if let Ok(value) = serde_json::from_str(body) {
        return Some(value);
    }
    // Models sometimes wrap the JSON in prose.
    let start = body.find(['{', '['])?;
    let end = body.rfind(['}', ']'])?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&body[start..=end]).ok()
}

fn lines_from_json(value: &serde_json::Value) -> Vec<ScriptLine> {
    let entries = match value {
        serde_json::Value::Array(items) => items.as_slice(),
        serde_json::Value::Object(map) => match map.get("script").and_then(|s| s.as_array()) {
            Some(items) => items.as_slice(),
            None => return Vec::new(),
        },
        _ => return Vec::new(),
    };

    entries
        .iter()
        .filter_map(|entry| {
            let obj = entry.as_object()?;
            if let (Some(speaker), Some(text)) = (
                obj.get("speaker").and_then(|s| s.as_str()),
                obj.get("text").and_then(|t| t.as_str()),
            ) {
                return Some(ScriptLine {
                    speaker: speaker.to_string(),
                    text: text.to_string(),
                });
            }
            let (speaker, text) = obj.iter().next()?;
            Some(ScriptLine {
                speaker: speaker.clone(),
                text: text.as_str()?.to_string(),
            })
        })
        .collect()
}

fn lines_from_text(body: &str) -> Vec<ScriptLine> {
    body.lines()
        .filter_map(|line| {
            let line = line.trim().trim_start_matches(['*', '-']).trim();
            let (speaker, text) = line.split_once(':')?;
            let speaker = speaker.trim().trim_matches('*').trim();
            speaker
                .to_ascii_lowercase()
                .starts_with("speaker")
                .then(|| ScriptLine {
                    speaker: speaker.to_string(),
                    text: text.trim().trim_start_matches('*').trim().to_string(),
                })
        })
        .collect()
}

/// Maps any label ending in 2 to `Speaker 2`; everything else is `Speaker 1`.
fn normalize_speaker(label: &str) -> String {
    if label.trim().ends_with('2') {
        SPEAKERS[1].to_string()
    } else {
        SPEAKERS[0].to_string()
    }
}

// ============ Speech synthesis ============

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Returns WAV bytes for `text` spoken in `voice`.
    async fn synthesize(&self, text: &str, voice: &str) -> Result<Vec<u8>>;
}

/// OpenAI-compatible `POST /v1/audio/speech` client (works with Kokoro and
/// other local TTS servers).
pub struct HttpSpeechSynthesizer {
    base_url: String,
    model: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpSpeechSynthesizer {
    pub fn new(base_url: &str, model: &str, api_key: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key,
            client,
        })
    }
}

#[async_trait]
impl SpeechSynthesizer for HttpSpeechSynthesizer {
    async fn synthesize(&self, text: &str, voice: &str) -> Result<Vec<u8>> {
        let mut request = self
            .client
            .post(format!("{}/v1/audio/speech", self.base_url))
            .json(&serde_json::json!({
                "model": self.model,
                "input": text,
                "voice": voice,
                "response_format": "wav",
            }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.context("speech request failed")?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("speech API error {}: {}", status, body);
        }
        Ok(response.bytes().await?.to_vec())
    }
}

/// Voices every line and writes `complete_podcast.wav` into `out_dir`.
/// Returns the path of the merged file.
pub async fn render_audio(
    synth: &dyn SpeechSynthesizer,
    script: &PodcastScript,
    voices: &[String; 2],
    out_dir: &Path,
) -> Result<PathBuf> {
    tokio::fs::create_dir_all(out_dir)
        .await
        .with_context(|| format!("Failed to create {}", out_dir.display()))?;

    let mut segments = Vec::with_capacity(script.script.len());
    for (i, line) in script.script.iter().enumerate() {
        let voice = if line.speaker == SPEAKERS[1] { &voices[1] } else { &voices[0] };
        let bytes = synth
            .synthesize(&line.text, voice)
            .await
            .with_context(|| format!("synthesizing line {}", i + 1))?;
        segments.push(bytes);
    }

    let merged = merge_wav(&segments)?;
    let path = out_dir.join(COMBINED_AUDIO_FILE);
    tokio::fs::write(&path, merged)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}

// ============ WAV merge ============

struct WavParts<'a> {
    fmt: &'a [u8],
    data: &'a [u8],
}

fn parse_wav(bytes: &[u8]) -> Result<WavParts<'_>> {
    if bytes.len() < 12 || &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
        bail!("segment is not a RIFF/WAVE file");
    }
    let mut fmt = None;
    let mut data = None;
    let mut pos = 12;
    while pos + 8 <= bytes.len() {
        let id = &bytes[pos..pos + 4];
        let header = [bytes[pos + 4], bytes[pos + 5], bytes[pos + 6], bytes[pos + 7]];
        let size = u32::from_le_bytes(header) as usize;
        let start = pos + 8;
        // Streaming encoders may write 0 or 0xFFFFFFFF as the data size.
        let end = start.saturating_add(size).min(bytes.len());
        match id {
            b"fmt " => fmt = Some(&bytes[start..end]),
            b"data" => data = Some(&bytes[start..end]),
            _ => {}
        }
        if id == b"data" && (size == 0 || size == u32::MAX as usize) {
            data = Some(&bytes[start..]);
            break;
        }
        pos = end + (size & 1);
    }
    match (fmt, data) {
        (Some(fmt), Some(data)) => Ok(WavParts { fmt, data }),
        _ => bail!("WAV segment is missing fmt or data chunk"),
    }
}

/// RIFF payload size: the `WAVE` tag plus the fmt and data chunks with
/// their headers. `None` when it does not fit in 32 bits.
fn riff_size(fmt_len: u32, data_len: u32) -> Option<u32> {
    4u32.checked_add(8)?
        .checked_add(fmt_len)?
        .checked_add(8)?
        .checked_add(data_len)
}

/// Concatenates PCM segments that share one format.
pub fn merge_wav(segments: &[Vec<u8>]) -> Result<Vec<u8>> {
    let parts = segments
        .iter()
        .map(|s| parse_wav(s))
        .collect::<Result<Vec<_>>>()?;
    let Some(first) = parts.first() else {
        bail!("no audio segments to merge");
    };
    if parts.iter().any(|p| p.fmt != first.fmt) {
        bail!("audio segments use different formats");
    }

    let data_len: usize = parts.iter().map(|p| p.data.len()).sum();
    let data_len = u32::try_from(data_len).context("merged audio exceeds WAV size limit")?;
    let fmt_len = u32::try_from(first.fmt.len()).context("fmt chunk exceeds WAV size limit")?;
    let riff_len =
        riff_size(fmt_len, data_len).context("merged audio exceeds WAV size limit")?;

    let mut out = Vec::with_capacity(riff_len as usize + 8);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&riff_len.to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&fmt_len.to_le_bytes());
    out.extend_from_slice(first.fmt);
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    for part in &parts {
        out.extend_from_slice(part.data);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn riff_size_rejects_overflow() {
        assert_eq!(riff_size(16, 100), Some(136));
        assert_eq!(riff_size(16, u32::MAX - 36), Some(u32::MAX));
        assert_eq!(riff_size(16, u32::MAX - 10), None);
    }

    fn wav(samples: &[i16]) -> Vec<u8> {
        let data: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        let mut fmt = Vec::new();
        fmt.extend_from_slice(&1u16.to_le_bytes()); // PCM
        fmt.extend_from_slice(&1u16.to_le_bytes()); // mono
        fmt.extend_from_slice(&24_000u32.to_le_bytes());
        fmt.extend_from_slice(&48_000u32.to_le_bytes());
        fmt.extend_from_slice(&2u16.to_le_bytes());
        fmt.extend_from_slice(&16u16.to_le_bytes());

        let mut out = Vec::new();
        out.extend_from_slice(b"RIFF");
        out.extend_from_slice(&((4 + 8 + fmt.len() + 8 + data.len()) as u32).to_le_bytes());
        out.extend_from_slice(b"WAVE");
        out.extend_from_slice(b"fmt ");
        out.extend_from_slice(&(fmt.len() as u32).to_le_bytes());
        out.extend_from_slice(&fmt);
        out.extend_from_slice(b"data");
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        out.extend_from_slice(&data);
        out
    }

    #[test]
    fn parses_wrapped_json_script() {
        let raw = "```json\n{\"script\": [{\"speaker\": \"Speaker 1\", \"text\": \"Hi there.\"}, \
                   {\"speaker\": \"Speaker 2\", \"text\": \"Hello!\"}]}\n```";
        let lines = parse_script(raw).unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].speaker, "Speaker 2");
        assert_eq!(lines[1].text, "Hello!");
    }

    #[test]
    fn parses_single_key_entries_and_prose() {
        let raw = "Here is your script:\n[{\"Speaker 1\": \"One\"}, {\"Speaker 2\": \"Two\"}]";
        let lines = parse_script(raw).unwrap();
        assert_eq!(
            lines,
            vec![
                ScriptLine { speaker: "Speaker 1".into(), text: "One".into() },
                ScriptLine { speaker: "Speaker 2".into(), text: "Two".into() },
            ]
        );
    }

    #[test]
    fn parses_plain_speaker_lines() {
        let raw = "**Speaker 1:** Welcome back.\nSpeaker 2: Glad to be here.\n(music)";
        let lines = parse_script(raw).unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].text, "Welcome back.");
    }

    #[test]
    fn unparseable_output_is_an_error() {
        assert!(parse_script("I cannot help with that.").is_err());
    }

    #[test]
    fn duration_uses_150_wpm() {
        let lines = vec![ScriptLine {
            speaker: "Speaker 1".into(),
            text: "word ".repeat(300),
        }];
        assert_eq!(estimate_duration(&lines), "2:00");
    }

    #[test]
    fn style_parsing() {
        assert_eq!("Debate".parse::<PodcastStyle>().unwrap(), PodcastStyle::Debate);
        let err = "rant".parse::<PodcastStyle>().unwrap_err();
        assert!(err.starts_with("Unknown podcast style 'rant'."));
        assert!(err.ends_with("Must be conversational, interview, debate, or educational."));
    }

    #[test]
    fn merges_pcm_segments() {
        let merged = merge_wav(&[wav(&[1, 2]), wav(&[3])]).unwrap();
        let parts = parse_wav(&merged).unwrap();
        assert_eq!(parts.data.len(), 6);
        assert_eq!(&parts.data[4..6], &3i16.to_le_bytes());
    }

    #[test]
    fn rejects_non_wav_segment() {
        assert!(merge_wav(&[b"ID3 mp3 data".to_vec()]).is_err());
    }
}
