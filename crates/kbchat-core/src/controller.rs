//! Conversation controller: the composition root of the session manager.
//!
//! Binds the session directory, the detail cache, and one stream consumer
//! per session into the send/receive protocol:
//!
//! 1. `send` validates eligibility synchronously and claims the session's
//!    consumer (`idle -> sending`).
//! 2. A spawned turn task opens the fragment stream and drives the consumer.
//! 3. On a completed or failed turn, the task refreshes the session's
//!    detail and only then returns the consumer to idle, so the persisted
//!    reply replaces the transient text without a duplicate showing up.
//!
//! Consumers are keyed by session id. Changing the selection never touches
//! another session's turn: background turns keep streaming and still
//! refresh their own session when they end.

use std::sync::{Arc, PoisonError, RwLock};

use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use kbchat_types::config::ClientConfig;
use kbchat_types::error::{ApiError, SendError, SendRejected};
use kbchat_types::session::{Message, Session};
use kbchat_types::stream::{ConversationEvent, StreamPhase, TurnOutcome};

use crate::backend::ChatBackend;
use crate::detail::SessionDetailCache;
use crate::directory::SessionDirectory;
use crate::event::bus::EventBus;
use crate::stream::consumer::{StreamConsumer, TurnGuard};

/// Controller tuning.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub default_provider: String,
    pub event_capacity: usize,
}

impl From<&ClientConfig> for ControllerConfig {
    fn from(config: &ClientConfig) -> Self {
        Self {
            default_provider: config.default_provider.clone(),
            event_capacity: config.event_capacity,
        }
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self::from(&ClientConfig::default())
    }
}

/// What a session looks like right now: the persisted transcript with the
/// in-flight text (if any) to be shown after the last message.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationView {
    pub session_id: Uuid,
    pub messages: Vec<Message>,
    pub streaming_text: Option<String>,
    pub phase: StreamPhase,
    pub failure_notice: Option<String>,
}

/// An accepted turn running in the background.
#[derive(Debug)]
pub struct TurnHandle {
    session_id: Uuid,
    task: JoinHandle<TurnOutcome>,
}

impl TurnHandle {
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Wait for the turn to end and be reconciled.
    pub async fn outcome(self) -> TurnOutcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(e) if e.is_cancelled() => TurnOutcome::Cancelled,
            Err(e) => TurnOutcome::failed(e),
        }
    }
}

struct Inner<B: ChatBackend> {
    backend: Arc<B>,
    directory: SessionDirectory<B>,
    details: SessionDetailCache<B>,
    consumers: DashMap<Uuid, Arc<StreamConsumer>>,
    selection: RwLock<Option<Uuid>>,
    events: EventBus,
}

/// Multi-session streaming conversation controller.
///
/// Cheap to clone; clones share state. Must be used from within a tokio
/// runtime, since each accepted turn runs as a spawned task.
pub struct ConversationController<B: ChatBackend> {
    inner: Arc<Inner<B>>,
}

impl<B: ChatBackend> Clone for ConversationController<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: ChatBackend> ConversationController<B> {
    pub fn new(backend: Arc<B>, config: ControllerConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                directory: SessionDirectory::new(Arc::clone(&backend), config.default_provider),
                details: SessionDetailCache::new(Arc::clone(&backend)),
                backend,
                consumers: DashMap::new(),
                selection: RwLock::new(None),
                events: EventBus::new(config.event_capacity),
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConversationEvent> {
        self.inner.events.subscribe()
    }

    pub fn directory(&self) -> &SessionDirectory<B> {
        &self.inner.directory
    }

    pub fn details(&self) -> &SessionDetailCache<B> {
        &self.inner.details
    }

    // --- Selection ---

    pub fn active_session(&self) -> Option<Uuid> {
        *self
            .inner
            .selection
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Focus a session. Turns in other sessions are unaffected.
    pub fn select_session(&self, session_id: Uuid) {
        self.set_selection(Some(session_id));
    }

    pub fn clear_selection(&self) {
        self.set_selection(None);
    }

    fn set_selection(&self, session_id: Option<Uuid>) {
        {
            let mut selection = self
                .inner
                .selection
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            if *selection == session_id {
                return;
            }
            *selection = session_id;
        }
        self.inner
            .events
            .publish(ConversationEvent::SelectionChanged { session_id });
    }

    // --- Directory ---

    pub async fn list_sessions(&self) -> Result<Vec<Session>, ApiError> {
        self.inner.directory.list().await
    }

    pub async fn reload_sessions(&self) -> Result<Vec<Session>, ApiError> {
        let sessions = self.inner.directory.reload().await?;
        self.publish_directory_changed();
        Ok(sessions)
    }

    /// Create a session and focus it.
    pub async fn create_session(
        &self,
        persona_id: Option<Uuid>,
        provider: Option<String>,
    ) -> Result<Session, ApiError> {
        let session = self.inner.directory.create(persona_id, provider).await?;
        self.publish_directory_changed();
        self.select_session(session.id);
        Ok(session)
    }

    /// Delete a session.
    ///
    /// If it is the active session the selection becomes none. Its
    /// in-flight turn, if any, is cancelled and its cached state forgotten.
    pub async fn delete_session(&self, session_id: &Uuid) -> Result<(), ApiError> {
        self.inner.directory.delete(session_id).await?;

        if self.active_session() == Some(*session_id) {
            self.clear_selection();
        }
        if let Some((_, consumer)) = self.inner.consumers.remove(session_id) {
            consumer.cancel();
        }
        self.inner.details.evict(session_id);
        self.publish_directory_changed();
        Ok(())
    }

    fn publish_directory_changed(&self) {
        if let Some(sessions) = self.inner.directory.cached() {
            self.inner.events.publish(ConversationEvent::DirectoryChanged {
                session_count: sessions.len(),
            });
        }
    }

    // --- Turns ---

    /// Send a message to the active session.
    pub fn send(&self, text: impl Into<String>) -> Result<TurnHandle, SendRejected> {
        let text = text.into();
        match self.active_session() {
            Some(session_id) => self.send_to(session_id, text),
            None => Err(reject(SendError::NoSessionSelected, text)),
        }
    }

    /// Send a message to a specific session.
    ///
    /// Validation happens before anything touches the network: blank
    /// text, a session missing from the loaded listing, and a session that
    /// already has a turn in flight are all rejected, handing the text back.
    pub fn send_to(
        &self,
        session_id: Uuid,
        text: impl Into<String>,
    ) -> Result<TurnHandle, SendRejected> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(reject(SendError::EmptyMessage, text));
        }
        if self.inner.directory.contains(&session_id) == Some(false) {
            return Err(reject(SendError::UnknownSession(session_id), text));
        }

        let consumer = self.consumer(session_id);
        let ticket = match consumer.begin(&text) {
            Ok(ticket) => ticket,
            Err(reason) => return Err(reject(reason, text)),
        };

        let inner = Arc::clone(&self.inner);
        let content = text.trim().to_string();
        let task = tokio::spawn(async move {
            let guard = TurnGuard::new(Arc::clone(&consumer), ticket.clone());
            let stream = inner.backend.send_message_stream(session_id, content);
            let outcome = consumer.drive(&ticket, stream).await;

            if outcome.requires_refresh() {
                match inner.details.refresh(&session_id).await {
                    Ok(detail) => {
                        inner.events.publish(ConversationEvent::DetailRefreshed {
                            session_id,
                            message_count: detail.map_or(0, |d| d.messages.len()),
                        });
                    }
                    Err(e) => {
                        inner.events.publish(ConversationEvent::RefreshFailed {
                            session_id,
                            error: e.to_string(),
                        });
                    }
                }
            }
            consumer.finish(&ticket);
            guard.disarm();

            match &outcome {
                TurnOutcome::Completed { text } => {
                    info!(session_id = %session_id, chars = text.len(), "Turn completed");
                }
                TurnOutcome::Failed { error, .. } => {
                    warn!(session_id = %session_id, error = %error, "Turn failed");
                }
                TurnOutcome::Cancelled => {}
            }
            outcome
        });

        Ok(TurnHandle { session_id, task })
    }

    /// Cancel the active session's in-flight turn.
    pub fn cancel(&self) -> bool {
        self.active_session()
            .is_some_and(|session_id| self.cancel_session(&session_id))
    }

    pub fn cancel_session(&self, session_id: &Uuid) -> bool {
        self.inner
            .consumers
            .get(session_id)
            .is_some_and(|consumer| consumer.cancel())
    }

    fn consumer(&self, session_id: Uuid) -> Arc<StreamConsumer> {
        let consumer = self
            .inner
            .consumers
            .entry(session_id)
            .or_insert_with(|| {
                Arc::new(StreamConsumer::new(session_id, self.inner.events.clone()))
            });
        Arc::clone(consumer.value())
    }

    // --- Read accessors ---

    /// Persisted transcript, fetched if not cached. Empty if unknown.
    pub async fn transcript(&self, session_id: &Uuid) -> Result<Vec<Message>, ApiError> {
        Ok(self
            .inner
            .details
            .get(session_id)
            .await?
            .map(|detail| detail.messages)
            .unwrap_or_default())
    }

    /// Re-fetch a session's transcript from the back-end.
    pub async fn refresh_detail(&self, session_id: &Uuid) -> Result<Vec<Message>, ApiError> {
        let detail = self.inner.details.refresh(session_id).await?;
        let messages = detail.map(|d| d.messages).unwrap_or_default();
        self.inner.events.publish(ConversationEvent::DetailRefreshed {
            session_id: *session_id,
            message_count: messages.len(),
        });
        Ok(messages)
    }

    pub fn cached_transcript(&self, session_id: &Uuid) -> Vec<Message> {
        self.inner
            .details
            .cached(session_id)
            .map(|detail| detail.messages)
            .unwrap_or_default()
    }

    pub fn streaming_text(&self, session_id: &Uuid) -> String {
        self.inner
            .consumers
            .get(session_id)
            .map(|consumer| consumer.accumulated_text())
            .unwrap_or_default()
    }

    pub fn phase(&self, session_id: &Uuid) -> StreamPhase {
        self.inner
            .consumers
            .get(session_id)
            .map_or(StreamPhase::Idle, |consumer| consumer.phase())
    }

    pub fn failure_notice(&self, session_id: &Uuid) -> Option<String> {
        self.inner
            .consumers
            .get(session_id)
            .and_then(|consumer| consumer.failure_notice())
    }

    pub fn last_outcome(&self, session_id: &Uuid) -> Option<TurnOutcome> {
        self.inner
            .consumers
            .get(session_id)
            .and_then(|consumer| consumer.last_outcome())
    }

    /// Compose the cached transcript with the session's transient state.
    pub fn view(&self, session_id: &Uuid) -> ConversationView {
        let snapshot = self
            .inner
            .consumers
            .get(session_id)
            .map(|consumer| (consumer.snapshot(), consumer.failure_notice()));
        let (phase, streaming_text, failure_notice) = match snapshot {
            Some((state, notice)) => {
                let text = (!state.text.is_empty()).then_some(state.text);
                (state.phase, text, notice)
            }
            None => (StreamPhase::Idle, None, None),
        };

        ConversationView {
            session_id: *session_id,
            messages: self.cached_transcript(session_id),
            streaming_text,
            phase,
            failure_notice,
        }
    }
}

fn reject(reason: SendError, text: String) -> SendRejected {
    SendRejected { reason, text }
}
