//! Session directory: cached listing of known sessions.
//!
//! The back-end is the source of truth. The listing is cached until a
//! create or delete succeeds, which reloads it. Mutations are never applied
//! optimistically: when the back-end call fails the cached listing is left
//! exactly as it was.

use std::sync::{Arc, RwLock};

use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use kbchat_types::error::ApiError;
use kbchat_types::session::{NewSession, Session};

use crate::backend::ChatBackend;

pub struct SessionDirectory<B: ChatBackend> {
    backend: Arc<B>,
    default_provider: String,
    listing: RwLock<Option<Vec<Session>>>,
    /// Serializes listing writers (reloads and mutations).
    write_lock: Mutex<()>,
}

impl<B: ChatBackend> SessionDirectory<B> {
    pub fn new(backend: Arc<B>, default_provider: impl Into<String>) -> Self {
        Self {
            backend,
            default_provider: default_provider.into(),
            listing: RwLock::new(None),
            write_lock: Mutex::new(()),
        }
    }

    /// Provider used when `create` is called without one.
    pub fn default_provider(&self) -> &str {
        &self.default_provider
    }

    /// Sessions ordered by last activity, most recent first.
    ///
    /// Served from cache when loaded; an empty listing is valid.
    pub async fn list(&self) -> Result<Vec<Session>, ApiError> {
        if let Some(sessions) = self.cached() {
            return Ok(sessions);
        }
        self.reload().await
    }

    /// Force a re-fetch of the listing.
    pub async fn reload(&self) -> Result<Vec<Session>, ApiError> {
        let _guard = self.write_lock.lock().await;
        self.reload_locked().await
    }

    /// Create a session; `provider` falls back to the configured default.
    ///
    /// A missing persona is left for the back-end to resolve to its
    /// system default.
    pub async fn create(
        &self,
        persona_id: Option<Uuid>,
        provider: Option<String>,
    ) -> Result<Session, ApiError> {
        let request = NewSession {
            title: None,
            persona_id,
            llm_provider: provider.unwrap_or_else(|| self.default_provider.clone()),
        };

        let _guard = self.write_lock.lock().await;
        let session = self.backend.create_session(&request).await?;
        info!(session_id = %session.id, provider = %session.llm_provider, "Session created");
        self.reload_after_mutation().await;
        Ok(session)
    }

    /// Delete a session.
    ///
    /// The directory holds no selection; deselecting is the caller's job.
    pub async fn delete(&self, session_id: &Uuid) -> Result<(), ApiError> {
        let _guard = self.write_lock.lock().await;
        self.backend.delete_session(session_id).await?;
        info!(session_id = %session_id, "Session deleted");
        self.reload_after_mutation().await;
        Ok(())
    }

    /// The cached listing, if loaded.
    pub fn cached(&self) -> Option<Vec<Session>> {
        self.listing.read().ok().and_then(|listing| listing.clone())
    }

    /// Whether the cached listing contains `session_id`.
    ///
    /// `None` when no listing is loaded.
    pub fn contains(&self, session_id: &Uuid) -> Option<bool> {
        let listing = self.listing.read().ok()?;
        listing
            .as_ref()
            .map(|sessions| sessions.iter().any(|s| s.id == *session_id))
    }

    /// Drop the cached listing so the next `list` refetches.
    pub fn invalidate(&self) {
        self.store(None);
    }

    async fn reload_locked(&self) -> Result<Vec<Session>, ApiError> {
        let mut sessions = self.backend.list_sessions().await?;
        sessions.sort_by(|a, b| b.last_active_at().cmp(&a.last_active_at()));
        self.store(Some(sessions.clone()));
        Ok(sessions)
    }

    /// A failed reload leaves the listing invalidated rather than stale.
    async fn reload_after_mutation(&self) {
        self.invalidate();
        if let Err(e) = self.reload_locked().await {
            warn!(error = %e, "Session listing reload failed after mutation");
        }
    }

    fn store(&self, sessions: Option<Vec<Session>>) {
        match self.listing.write() {
            Ok(mut listing) => *listing = sessions,
            Err(poisoned) => *poisoned.into_inner() = sessions,
        }
    }
}
