//! Paragraph-boundary text chunker.
//!
//! Splits extracted text into [`Chunk`]s that respect a `max_tokens` limit.
//! Splitting occurs on paragraph boundaries (`\n\n`) to keep each chunk
//! coherent; oversized paragraphs fall back to line or word boundaries.
//! Chunk indices are contiguous from 0 across all pages of a source.

use crate::models::Chunk;

/// Approximate chars-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

/// Chunking limits in tokens.
#[derive(Debug, Clone, Copy)]
pub struct ChunkParams {
    pub max_tokens: usize,
    pub overlap_tokens: usize,
}

impl ChunkParams {
    pub(crate) fn max_chars(&self) -> usize {
        self.max_tokens.max(1) * CHARS_PER_TOKEN
    }

    fn overlap_chars(&self) -> usize {
        self.overlap_tokens.min(self.max_tokens.saturating_sub(1)) * CHARS_PER_TOKEN
    }
}

impl From<&crate::config::ChunkingConfig> for ChunkParams {
    fn from(cfg: &crate::config::ChunkingConfig) -> Self {
        Self {
            max_tokens: cfg.max_tokens,
            overlap_tokens: cfg.overlap_tokens,
        }
    }
}

/// Split text into chunks. Whitespace-only input yields no chunks.
pub fn chunk_text(text: &str, params: ChunkParams) -> Vec<Chunk> {
    let mut out = Vec::new();
    push_chunks(&mut out, text, None, params);
    out
}

/// Split a paged document, tagging each chunk with its 1-based page number.
pub fn chunk_pages(pages: &[String], params: ChunkParams) -> Vec<Chunk> {
    let mut out = Vec::new();
    for (i, page) in pages.iter().enumerate() {
        push_chunks(&mut out, page, Some(i as u32 + 1), params);
    }
    out
}

fn push_chunks(out: &mut Vec<Chunk>, text: &str, page: Option<u32>, params: ChunkParams) {
    let max_chars = params.max_chars();
    let mut pieces: Vec<String> = Vec::new();
    let mut current_buf = String::new();

    for para in text.split("\n\n") {
        let trimmed = para.trim();
        if trimmed.is_empty() {
            continue;
        }

        let would_be = if current_buf.is_empty() {
            trimmed.len()
        } else {
            current_buf.len() + 2 + trimmed.len()
        };

        if would_be > max_chars && !current_buf.is_empty() {
            pieces.push(std::mem::take(&mut current_buf));
        }

        if trimmed.len() > max_chars {
            hard_split(&mut pieces, trimmed, max_chars);
        } else {
            if !current_buf.is_empty() {
                current_buf.push_str("\n\n");
            }
            current_buf.push_str(trimmed);
        }
    }

    if !current_buf.is_empty() {
        pieces.push(current_buf);
    }

    let overlap = params.overlap_chars();
    let mut prev_tail: Option<String> = None;
    for piece in pieces {
        let content = match prev_tail.take() {
            Some(tail) if overlap > 0 => format!("{} {}", tail, piece),
            _ => piece.clone(),
        };
        if overlap > 0 {
            prev_tail = Some(tail_at_word(&piece, overlap).to_string());
        }
        let mut chunk = Chunk::new(out.len() as i64, content);
        chunk.page_number = page;
        out.push(chunk);
    }
}

/// Splits an oversized paragraph at newline or space boundaries.
fn hard_split(pieces: &mut Vec<String>, text: &str, max_chars: usize) {
    let mut remaining = text;
    while !remaining.is_empty() {
        let mut split_at = remaining.len().min(max_chars);
        while !remaining.is_char_boundary(split_at) {
            split_at -= 1;
        }
        let actual_split = if split_at < remaining.len() {
            remaining[..split_at]
                .rfind('\n')
                .or_else(|| remaining[..split_at].rfind(' '))
                .filter(|pos| *pos > 0)
                .map(|pos| pos + 1)
                .unwrap_or(split_at)
        } else {
            split_at
        };
        // A single char wider than max_chars: take it whole.
        let actual_split = if actual_split == 0 {
            remaining.chars().next().map(char::len_utf8).unwrap_or(1)
        } else {
            actual_split
        };
        let piece = remaining[..actual_split].trim();
        if !piece.is_empty() {
            pieces.push(piece.to_string());
        }
        remaining = &remaining[actual_split..];
    }
}

/// The last `max` bytes of `s`, starting on a word boundary where possible.
fn tail_at_word(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut start = s.len() - max;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    match s[start..].find(' ') {
        Some(pos) if start + pos + 1 < s.len() => &s[start + pos + 1..],
        _ => &s[start..],
    }
}
