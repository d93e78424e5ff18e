//! Per-session cache of persisted transcripts.
//!
//! The back-end is the only writer of persisted messages, so this cache is
//! read-through: `get` serves the cached copy when there is one, `refresh`
//! always re-fetches. Transient streaming text is never merged in here; the
//! controller composes the two at read time.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, warn};
use uuid::Uuid;

use kbchat_types::error::ApiError;
use kbchat_types::session::SessionDetail;

use crate::backend::ChatBackend;

/// A cached fetch result. `detail == None` records "not found" (or an
/// eviction) so an older in-flight fetch cannot resurrect the entry.
struct Slot {
    detail: Option<SessionDetail>,
    ticket: u64,
}

pub struct SessionDetailCache<B: ChatBackend> {
    backend: Arc<B>,
    entries: DashMap<Uuid, Slot>,
    next_ticket: AtomicU64,
}

impl<B: ChatBackend> SessionDetailCache<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self {
            backend,
            entries: DashMap::new(),
            next_ticket: AtomicU64::new(0),
        }
    }

    /// Cached detail if present, otherwise fetched from the back-end.
    ///
    /// Returns `Ok(None)` when the session is unknown or deleted.
    pub async fn get(&self, session_id: &Uuid) -> Result<Option<SessionDetail>, ApiError> {
        if let Some(detail) = self.cached(session_id) {
            return Ok(Some(detail));
        }
        self.refresh(session_id).await
    }

    /// Re-fetch from the back-end, bypassing the cached copy.
    ///
    /// On failure the last known-good copy stays in place. A response that
    /// arrives after a newer one has already been stored is discarded, and
    /// the newer copy is returned instead.
    pub async fn refresh(&self, session_id: &Uuid) -> Result<Option<SessionDetail>, ApiError> {
        let ticket = self.take_ticket();

        let fetched = match self.backend.get_session_detail(session_id).await {
            Ok(fetched) => fetched,
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "Session detail refresh failed");
                return Err(e);
            }
        };

        match self.entries.entry(*session_id) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().ticket < ticket {
                    occupied.insert(Slot {
                        detail: fetched.clone(),
                        ticket,
                    });
                    Ok(fetched)
                } else {
                    debug!(session_id = %session_id, ticket, "Discarding stale session detail");
                    Ok(occupied.get().detail.clone())
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Slot {
                    detail: fetched.clone(),
                    ticket,
                });
                Ok(fetched)
            }
        }
    }

    /// The cached detail, without touching the back-end.
    pub fn cached(&self, session_id: &Uuid) -> Option<SessionDetail> {
        self.entries
            .get(session_id)
            .and_then(|slot| slot.detail.clone())
    }

    /// Forget a session (e.g., after it was deleted).
    ///
    /// Any fetch already in flight for it is discarded when it lands.
    pub fn evict(&self, session_id: &Uuid) {
        let ticket = self.take_ticket();
        self.entries.insert(
            *session_id,
            Slot {
                detail: None,
                ticket,
            },
        );
    }

    fn take_ticket(&self) -> u64 {
        self.next_ticket.fetch_add(1, Ordering::SeqCst) + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedBackend;
    use kbchat_types::session::MessageRole;
    use std::time::Duration;

    #[tokio::test]
    async fn get_fetches_once_then_serves_cache() {
        let backend = Arc::new(ScriptedBackend::new());
        let session = backend.seed_session("first", 0);
        let cache = SessionDetailCache::new(Arc::clone(&backend));

        let first = cache.get(&session.id).await.unwrap().unwrap();
        let second = cache.get(&session.id).await.unwrap().unwrap();

        assert_eq!(first, second);
        assert_eq!(backend.detail_fetch_count(), 1);
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let backend = Arc::new(ScriptedBackend::new());
        let cache = SessionDetailCache::new(Arc::clone(&backend));

        let missing = cache.get(&Uuid::now_v7()).await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn refresh_bypasses_cache() {
        let backend = Arc::new(ScriptedBackend::new());
        let session = backend.seed_session("s", 0);
        let cache = SessionDetailCache::new(Arc::clone(&backend));

        cache.get(&session.id).await.unwrap();
        backend.persist(session.id, MessageRole::User, "Hello");

        assert!(cache.cached(&session.id).unwrap().messages.is_empty());
        let refreshed = cache.refresh(&session.id).await.unwrap().unwrap();
        assert_eq!(refreshed.messages.len(), 1);
        assert_eq!(cache.cached(&session.id).unwrap().messages.len(), 1);
        assert_eq!(backend.detail_fetch_count(), 2);
    }

    #[tokio::test]
    async fn refresh_twice_is_idempotent() {
        let backend = Arc::new(ScriptedBackend::new());
        let session = backend.seed_session("s", 0);
        backend.persist(session.id, MessageRole::User, "Hello");
        backend.persist(session.id, MessageRole::Assistant, "Hi there");
        let cache = SessionDetailCache::new(Arc::clone(&backend));

        let a = cache.refresh(&session.id).await.unwrap();
        let b = cache.refresh(&session.id).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn failed_refresh_keeps_last_known_good() {
        let backend = Arc::new(ScriptedBackend::new());
        let session = backend.seed_session("s", 0);
        backend.persist(session.id, MessageRole::User, "Hello");
        let cache = SessionDetailCache::new(Arc::clone(&backend));
        cache.refresh(&session.id).await.unwrap();

        backend.fail_details.store(true, Ordering::SeqCst);
        let result = cache.refresh(&session.id).await;

        assert_eq!(result, Err(ApiError::Timeout));
        assert_eq!(cache.cached(&session.id).unwrap().messages.len(), 1);
    }

    #[tokio::test]
    async fn stale_response_does_not_overwrite_newer() {
        let backend = Arc::new(ScriptedBackend::new());
        let session = backend.seed_session("s", 0);
        let cache = Arc::new(SessionDetailCache::new(Arc::clone(&backend)));

        // The first fetch snapshots an empty transcript, then stalls.
        backend.delay_next_detail(Duration::from_millis(100));
        let slow = {
            let cache = Arc::clone(&cache);
            let id = session.id;
            tokio::spawn(async move { cache.refresh(&id).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        backend.persist(session.id, MessageRole::User, "Hello");
        let fresh = cache.refresh(&session.id).await.unwrap().unwrap();
        assert_eq!(fresh.messages.len(), 1);

        let late = slow.await.unwrap().unwrap().unwrap();
        assert_eq!(late.messages.len(), 1);
        assert_eq!(cache.cached(&session.id).unwrap().messages.len(), 1);
    }

    #[tokio::test]
    async fn evict_discards_in_flight_fetch() {
        let backend = Arc::new(ScriptedBackend::new());
        let session = backend.seed_session("s", 0);
        let cache = Arc::new(SessionDetailCache::new(Arc::clone(&backend)));

        backend.delay_next_detail(Duration::from_millis(50));
        let pending = {
            let cache = Arc::clone(&cache);
            let id = session.id;
            tokio::spawn(async move { cache.refresh(&id).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        cache.evict(&session.id);

        let _ = pending.await.unwrap();
        assert!(cache.cached(&session.id).is_none());
    }
}
