//! Chat over a session's sources.

use uuid::Uuid;

use crate::error::{KcError, Result};
use crate::models::{truncate_chars, RagAnswer, CITATION_PREVIEW_CHARS};
use crate::sessions::SessionManager;

/// Answers `query` from the session's sources.
///
/// Rejects a session without sources before any embedding or search call.
/// Saving the turn to conversation memory is best-effort.
pub async fn chat(manager: &SessionManager, session_id: &str, query: &str) -> Result<RagAnswer> {
    let query = query.trim();
    if query.is_empty() {
        return Err(KcError::bad_request("Query must not be empty"));
    }

    let session = manager.get(session_id).ok_or(KcError::SessionNotFound)?;
    if session.source_count() == 0 {
        return Err(KcError::bad_request(
            "No sources available. Please add sources first.",
        ));
    }

    let components = session
        .ensure_initialized()
        .await
        .map_err(|e| KcError::upstream("session initialization", e))?;
    if !components.rag.is_available() {
        return Err(KcError::FeatureDisabled("Chat"));
    }

    let mut answer = components.rag.generate_response(query).await?;
    tracing::info!(
        session_id,
        citations = answer.sources_used.len(),
        "chat answered"
    );

    if let Some(memory) = &components.memory {
        if let Err(e) = memory.save_turn(query, &answer.response).await {
            tracing::warn!(session_id, error = %e, "failed to save conversation turn");
        }
    }

    for citation in &mut answer.sources_used {
        citation.content = truncate_chars(&citation.content, CITATION_PREVIEW_CHARS);
    }
    Ok(answer)
}

/// Clears conversation memory (best-effort) and hands out a fresh session
/// id. The old session and its sources stay registered until evicted.
pub async fn reset_chat(manager: &SessionManager, session_id: &str) -> Result<String> {
    let session = manager.get(session_id).ok_or(KcError::SessionNotFound)?;

    if session.is_initialized() {
        if let Ok(components) = session.ensure_initialized().await {
            if let Some(memory) = &components.memory {
                if let Err(e) = memory.clear().await {
                    tracing::warn!(session_id, error = %e, "could not clear conversation memory");
                }
            }
        }
    }

    Ok(Uuid::new_v4().to_string())
}
