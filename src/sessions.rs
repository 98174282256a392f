//! Session registry.
//!
//! [`SessionManager`] maps session ids to [`Session`]s in a sharded
//! concurrent map. It is built explicitly and shared through the router
//! state; there is no process-global registry.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use uuid::Uuid;

use crate::services::Services;
use crate::session::Session;

pub struct SessionManager {
    sessions: DashMap<String, Arc<Session>>,
    services: Arc<Services>,
}

impl SessionManager {
    pub fn new(services: Arc<Services>) -> Self {
        Self {
            sessions: DashMap::new(),
            services,
        }
    }

    pub fn services(&self) -> &Arc<Services> {
        &self.services
    }

    /// Returns the session for `session_id`, creating it if unknown. A
    /// missing or blank id gets a fresh UUID.
    pub fn create(&self, session_id: Option<&str>) -> Arc<Session> {
        let id = match session_id.map(str::trim).filter(|s| !s.is_empty()) {
            Some(id) => id.to_string(),
            None => Uuid::new_v4().to_string(),
        };
        self.sessions
            .entry(id.clone())
            .or_insert_with(|| {
                tracing::info!(session_id = %id, "session created");
                Arc::new(Session::new(id.clone(), self.services.clone()))
            })
            .clone()
    }

    /// Looks up a session. Ids are trimmed the same way [`create`](Self::create)
    /// trims them.
    pub fn get(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions.get(session_id.trim()).map(|s| s.value().clone())
    }

    /// Removes the session and releases its resources. Returns whether it
    /// existed.
    pub async fn delete(&self, session_id: &str) -> bool {
        let Some((_, session)) = self.sessions.remove(session_id.trim()) else {
            return false;
        };
        session.release().await;
        tracing::info!(session_id, "session deleted");
        true
    }

    /// Evicts every session at least `max_age` old and returns how many
    /// were removed.
    pub async fn cleanup_old_sessions(&self, max_age: Duration) -> usize {
        let max_age = chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::MAX);
        let now = chrono::Utc::now();

        let expired: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| now - entry.value().created_at() >= max_age)
            .map(|entry| entry.key().clone())
            .collect();

        let mut removed = 0;
        for id in expired {
            // A concurrent delete may have won the race.
            if let Some((_, session)) = self.sessions.remove(&id) {
                session.release().await;
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::info!(removed, remaining = self.sessions.len(), "expired sessions evicted");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Runs [`cleanup_old_sessions`](Self::cleanup_old_sessions) every
    /// `interval`. Returns `None` when `interval` is zero.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        max_age: Duration,
    ) -> Option<tokio::task::JoinHandle<()>> {
        if interval.is_zero() {
            return None;
        }
        let manager = Arc::downgrade(self);
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                manager.cleanup_old_sessions(max_age).await;
            }
        }))
    }
}
