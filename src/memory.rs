//! Long-term conversation memory.
//!
//! When `ZEP_API_KEY` is set, each session gets a [`ConversationMemory`]
//! bound to its id that records chat turns in Zep. Memory is best-effort:
//! callers log failures as warnings and carry on.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::sync::OnceCell;

const DEFAULT_BASE_URL: &str = "https://api.getzep.com/api/v2";

#[async_trait]
pub trait ConversationMemory: Send + Sync {
    async fn save_turn(&self, query: &str, response: &str) -> Result<()>;
    async fn clear(&self) -> Result<()>;
}

/// Binds a memory handle to one session id.
pub trait MemoryFactory: Send + Sync {
    fn bind(&self, session_id: &str) -> Arc<dyn ConversationMemory>;
}

#[derive(Clone)]
pub struct ZepMemoryFactory {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl ZepMemoryFactory {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            client,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

impl MemoryFactory for ZepMemoryFactory {
    fn bind(&self, session_id: &str) -> Arc<dyn ConversationMemory> {
        Arc::new(ZepMemory {
            session_id: session_id.to_string(),
            api: self.clone(),
            registered: OnceCell::new(),
        })
    }
}

pub struct ZepMemory {
    session_id: String,
    api: ZepMemoryFactory,
    registered: OnceCell<()>,
}

impl ZepMemory {
    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.api
            .client
            .request(method, format!("{}{}", self.api.base_url, path))
            .header("Authorization", format!("Api-Key {}", self.api.api_key))
    }

    /// Creates the Zep session on first use. A 409 means it already exists.
    async fn ensure_registered(&self) -> Result<()> {
        self.registered
            .get_or_try_init(|| async {
                let response = self
                    .request(reqwest::Method::POST, "/sessions")
                    .json(&serde_json::json!({
                        "session_id": self.session_id,
                        "user_id": self.session_id,
                    }))
                    .send()
                    .await
                    .context("Zep session request failed")?;
                let status = response.status();
                if !status.is_success() && status != reqwest::StatusCode::CONFLICT {
                    let body = response.text().await.unwrap_or_default();
                    bail!("Zep session error {}: {}", status, body);
                }
                Ok(())
            })
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl ConversationMemory for ZepMemory {
    async fn save_turn(&self, query: &str, response: &str) -> Result<()> {
        self.ensure_registered().await?;
        let path = format!("/sessions/{}/memory", self.session_id);
        let result = self
            .request(reqwest::Method::POST, &path)
            .json(&serde_json::json!({
                "messages": [
                    { "role_type": "user", "role": "user", "content": query },
                    { "role_type": "assistant", "role": "assistant", "content": response },
                ]
            }))
            .send()
            .await
            .context("Zep memory request failed")?;
        let status = result.status();
        if !status.is_success() {
            let body = result.text().await.unwrap_or_default();
            bail!("Zep memory error {}: {}", status, body);
        }
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let path = format!("/sessions/{}/memory", self.session_id);
        let result = self
            .request(reqwest::Method::DELETE, &path)
            .send()
            .await
            .context("Zep memory request failed")?;
        let status = result.status();
        if !status.is_success() && status != reqwest::StatusCode::NOT_FOUND {
            let body = result.text().await.unwrap_or_default();
            bail!("Zep memory error {}: {}", status, body);
        }
        Ok(())
    }
}
