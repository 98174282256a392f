//! Error taxonomy for the ingestion, chat, and podcast services.
//!
//! Provider and storage plumbing returns [`anyhow::Result`]; the services
//! that sit behind the HTTP routes convert those failures into a [`KcError`]
//! so the server can pick a status code without inspecting message text.
//!
//! | Variant | Class | HTTP |
//! |---------|-------|------|
//! | [`KcError::BadRequest`] | client | 400 |
//! | [`KcError::FeatureDisabled`] | client | 400 |
//! | [`KcError::SessionNotFound`] | not found | 404 |
//! | [`KcError::SourceNotFound`] | not found | 404 |
//! | [`KcError::NotFound`] | not found | 404 |
//! | [`KcError::Timeout`] | upstream | 504 |
//! | [`KcError::Upstream`] | upstream | 500 |
//! | [`KcError::Internal`] | internal | 500 |

use thiserror::Error;

/// Result alias used by the service layer.
pub type Result<T> = std::result::Result<T, KcError>;

#[derive(Debug, Error)]
pub enum KcError {
    /// Missing or invalid input. The message is safe to show to clients.
    #[error("{0}")]
    BadRequest(String),

    /// A credential-gated subsystem is not configured.
    #[error("{0} not available (missing credential)")]
    FeatureDisabled(&'static str),

    #[error("Session not found")]
    SessionNotFound,

    #[error("Source '{0}' not found")]
    SourceNotFound(String),

    #[error("{0}")]
    NotFound(String),

    /// An external call did not finish within its deadline.
    #[error("{0} timed out")]
    Timeout(&'static str),

    /// An external service (embedding, generation, transcription,
    /// scraping, vector store) failed.
    #[error("{service} failed: {source:#}")]
    Upstream {
        service: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl KcError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        KcError::BadRequest(message.into())
    }

    /// Wraps an upstream failure with the name of the service that raised it.
    pub fn upstream(service: &'static str, source: impl Into<anyhow::Error>) -> Self {
        KcError::Upstream {
            service,
            source: source.into(),
        }
    }

    /// True for errors whose message can be returned to an untrusted client.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            KcError::BadRequest(_)
                | KcError::FeatureDisabled(_)
                | KcError::SessionNotFound
                | KcError::SourceNotFound(_)
                | KcError::NotFound(_)
        )
    }
}

/// Extension for tagging `anyhow` results with the upstream service name.
pub trait UpstreamContext<T> {
    fn upstream(self, service: &'static str) -> Result<T>;
}

impl<T, E> UpstreamContext<T> for std::result::Result<T, E>
where
    E: Into<anyhow::Error>,
{
    fn upstream(self, service: &'static str) -> Result<T> {
        self.map_err(|e| KcError::upstream(service, e))
    }
}
