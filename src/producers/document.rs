//! Generic document producer: extract text, then chunk on paragraphs.

use anyhow::{Context, Result};

use crate::chunk::{chunk_pages, chunk_text, ChunkParams};
use crate::extract::{extract, DocumentFormat, Extracted};
use crate::models::Chunk;

#[derive(Debug, Clone, Copy)]
pub struct DocumentProcessor {
    params: ChunkParams,
}

impl DocumentProcessor {
    pub fn new(params: ChunkParams) -> Self {
        Self { params }
    }

    /// Extracts and chunks an uploaded file. Extraction is CPU-bound, so it
    /// runs on the blocking pool.
    pub async fn process_file(
        &self,
        filename: &str,
        content_type: Option<&str>,
        bytes: Vec<u8>,
    ) -> Result<Vec<Chunk>> {
        let format = DocumentFormat::detect(filename, content_type)?;
        let params = self.params;
        tokio::task::spawn_blocking(move || -> Result<Vec<Chunk>> {
            Ok(match extract(&bytes, format)? {
                Extracted::Pages(pages) => chunk_pages(&pages, params),
                Extracted::Text(text) => chunk_text(&text, params),
            })
        })
        .await
        .context("document extraction task panicked")?
    }

    /// Chunks text that is already in memory (pasted text, scraped markdown).
    pub fn process_text(&self, text: &str) -> Vec<Chunk> {
        chunk_text(text, self.params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn processor() -> DocumentProcessor {
        DocumentProcessor::new(ChunkParams {
            max_tokens: 16,
            overlap_tokens: 0,
        })
    }

    #[tokio::test]
    async fn plain_text_upload_is_chunked() {
        let body = "First paragraph about rust.\n\nSecond paragraph about tokio.";
        let chunks = processor()
            .process_file("notes.txt", Some("text/plain"), body.as_bytes().to_vec())
            .await
            .unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[1].chunk_index, 1);
        assert!(chunks.iter().all(|c| c.source_file.is_none()));
    }

    #[tokio::test]
    async fn unsupported_format_is_an_error() {
        let err = processor()
            .process_file("archive.rar", Some("application/x-rar"), vec![1, 2, 3])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unsupported"));
    }

    #[test]
    fn blank_text_produces_nothing() {
        assert!(processor().process_text("   \n\n  ").is_empty());
    }
}
