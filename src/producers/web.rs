//! Web page scraping through Firecrawl.

use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Deserialize;

use crate::chunk::{chunk_text, ChunkParams};
use crate::embedding::post_with_retry;
use crate::models::Chunk;

const DEFAULT_BASE_URL: &str = "https://api.firecrawl.dev";
const MAX_RETRIES: u32 = 2;

#[async_trait]
pub trait WebScraper: Send + Sync {
    /// Fetches one page and returns its content as chunks.
    async fn scrape(&self, url: &str) -> Result<Vec<Chunk>>;
}

pub struct FirecrawlScraper {
    api_key: String,
    base_url: String,
    params: ChunkParams,
    client: reqwest::Client,
}

impl FirecrawlScraper {
    pub fn new(api_key: impl Into<String>, params: ChunkParams) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(90))
            .build()?;
        Ok(Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            params,
            client,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl WebScraper for FirecrawlScraper {
    async fn scrape(&self, url: &str) -> Result<Vec<Chunk>> {
        let endpoint = format!("{}/v1/scrape", self.base_url);
        let body = serde_json::json!({
            "url": url,
            "formats": ["markdown"],
            "onlyMainContent": true,
        });

        let json = post_with_retry("Firecrawl", MAX_RETRIES, || {
            self.client
                .post(&endpoint)
                .bearer_auth(&self.api_key)
                .json(&body)
        })
        .await?;

        let markdown = parse_scrape_response(json)?;
        let chunks = chunk_text(&markdown, self.params);
        tracing::debug!(url, chunks = chunks.len(), "scraped page");
        Ok(chunks)
    }
}

#[derive(Debug, Deserialize)]
struct ScrapeResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    data: Option<ScrapeData>,
}

#[derive(Debug, Deserialize)]
struct ScrapeData {
    #[serde(default)]
    markdown: Option<String>,
}

fn parse_scrape_response(json: serde_json::Value) -> Result<String> {
    let response: ScrapeResponse = serde_json::from_value(json)?;
    if !response.success {
        bail!(
            "Firecrawl scrape failed: {}",
            response.error.as_deref().unwrap_or("unknown error")
        );
    }
    response
        .data
        .and_then(|d| d.markdown)
        .filter(|m| !m.trim().is_empty())
        .ok_or_else(|| anyhow::anyhow!("Firecrawl returned no content"))
}
