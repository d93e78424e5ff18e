//! In-memory scripted backend for core tests.
//!
//! Behaves like the real back-end: a send persists the user message
//! immediately and the assistant reply only when the fragment sequence ends
//! normally. Each turn's fragments are fed by the test through an unbounded
//! channel, so tests control interleaving exactly.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use tokio::sync::mpsc;
use uuid::Uuid;

use kbchat_types::error::ApiError;
use kbchat_types::session::{Message, MessageRole, NewSession, Session, SessionDetail};

use crate::backend::{ChatBackend, FragmentStream};

pub(crate) type ScriptSender = mpsc::UnboundedSender<Result<String, ApiError>>;

type Script = mpsc::UnboundedReceiver<Result<String, ApiError>>;

/// Sets a flag when dropped, to observe stream teardown.
struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct Store {
    sessions: Vec<Session>,
    messages: HashMap<Uuid, Vec<Message>>,
}

#[derive(Default)]
pub(crate) struct ScriptedBackend {
    store: Arc<Mutex<Store>>,
    scripts: Mutex<HashMap<Uuid, VecDeque<Script>>>,
    detail_delays: Mutex<VecDeque<Duration>>,
    pub detail_fetches: AtomicUsize,
    pub list_fetches: AtomicUsize,
    pub sends: AtomicUsize,
    pub fail_lists: AtomicBool,
    pub fail_mutations: AtomicBool,
    pub fail_details: AtomicBool,
    pub panic_streams: AtomicBool,
    pub stream_dropped: Arc<AtomicBool>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a session directly, `age_secs` seconds in the past.
    pub fn seed_session(&self, title: &str, age_secs: i64) -> Session {
        let session = Session {
            id: Uuid::now_v7(),
            title: title.to_string(),
            persona_id: None,
            llm_provider: "ollama".to_string(),
            created_at: Utc::now() - ChronoDuration::seconds(age_secs),
            updated_at: None,
        };
        let mut store = self.store.lock().unwrap();
        store.sessions.push(session.clone());
        store.messages.insert(session.id, Vec::new());
        session
    }

    /// Queue the fragment script for the next send to `session_id`.
    ///
    /// Dropping the returned sender ends the sequence normally.
    pub fn script(&self, session_id: Uuid) -> ScriptSender {
        let (tx, rx) = mpsc::unbounded_channel();
        self.scripts
            .lock()
            .unwrap()
            .entry(session_id)
            .or_default()
            .push_back(rx);
        tx
    }

    /// Delay the next detail fetch (after its snapshot is taken).
    pub fn delay_next_detail(&self, delay: Duration) {
        self.detail_delays.lock().unwrap().push_back(delay);
    }

    pub fn persist(&self, session_id: Uuid, role: MessageRole, content: &str) {
        persist_message(&self.store, session_id, role, content);
    }

    pub fn messages(&self, session_id: Uuid) -> Vec<Message> {
        self.store
            .lock()
            .unwrap()
            .messages
            .get(&session_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn detail_fetch_count(&self) -> usize {
        self.detail_fetches.load(Ordering::SeqCst)
    }
}

fn persist_message(store: &Mutex<Store>, session_id: Uuid, role: MessageRole, content: &str) {
    let mut store = store.lock().unwrap();
    if let Some(messages) = store.messages.get_mut(&session_id) {
        messages.push(Message {
            id: Uuid::now_v7(),
            session_id,
            role,
            content: content.to_string(),
            context_chunks: None,
            created_at: Utc::now(),
        });
    }
}

impl ChatBackend for ScriptedBackend {
    async fn list_sessions(&self) -> Result<Vec<Session>, ApiError> {
        self.list_fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail_lists.load(Ordering::SeqCst) {
            return Err(ApiError::Transport("connection refused".to_string()));
        }
        Ok(self.store.lock().unwrap().sessions.clone())
    }

    async fn create_session(&self, request: &NewSession) -> Result<Session, ApiError> {
        if self.fail_mutations.load(Ordering::SeqCst) {
            return Err(ApiError::Transport("connection refused".to_string()));
        }
        let session = Session {
            id: Uuid::now_v7(),
            title: request.title.clone().unwrap_or_else(|| "New Chat".to_string()),
            persona_id: request.persona_id,
            llm_provider: request.llm_provider.clone(),
            created_at: Utc::now(),
            updated_at: None,
        };
        let mut store = self.store.lock().unwrap();
        store.sessions.push(session.clone());
        store.messages.insert(session.id, Vec::new());
        Ok(session)
    }

    async fn delete_session(&self, session_id: &Uuid) -> Result<(), ApiError> {
        if self.fail_mutations.load(Ordering::SeqCst) {
            return Err(ApiError::Transport("connection refused".to_string()));
        }
        let mut store = self.store.lock().unwrap();
        let before = store.sessions.len();
        store.sessions.retain(|s| s.id != *session_id);
        store.messages.remove(session_id);
        if store.sessions.len() == before {
            return Err(ApiError::NotFound);
        }
        Ok(())
    }

    async fn get_session_detail(
        &self,
        session_id: &Uuid,
    ) -> Result<Option<SessionDetail>, ApiError> {
        self.detail_fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail_details.load(Ordering::SeqCst) {
            return Err(ApiError::Timeout);
        }
        let snapshot = {
            let store = self.store.lock().unwrap();
            store
                .sessions
                .iter()
                .find(|s| s.id == *session_id)
                .cloned()
                .map(|session| SessionDetail {
                    messages: store.messages.get(session_id).cloned().unwrap_or_default(),
                    session,
                })
        };
        let delay = self.detail_delays.lock().unwrap().pop_front();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(snapshot)
    }

    fn send_message_stream(&self, session_id: Uuid, content: String) -> FragmentStream {
        self.sends.fetch_add(1, Ordering::SeqCst);
        if self.panic_streams.load(Ordering::SeqCst) {
            return Box::pin(futures_util::stream::poll_fn(
                |_| -> std::task::Poll<Option<Result<String, ApiError>>> {
                    panic!("scripted stream panicked")
                },
            ));
        }
        let script = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&session_id)
            .and_then(VecDeque::pop_front);
        let store = Arc::clone(&self.store);
        let dropped = Arc::clone(&self.stream_dropped);

        Box::pin(async_stream::stream! {
            let _guard = DropFlag(dropped);
            let Some(mut script) = script else {
                yield Err(ApiError::Transport("no scripted stream".to_string()));
                return;
            };

            persist_message(&store, session_id, MessageRole::User, &content);

            let mut reply = String::new();
            while let Some(item) = script.recv().await {
                match item {
                    Ok(fragment) => {
                        reply.push_str(&fragment);
                        yield Ok(fragment);
                    }
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
            }

            persist_message(&store, session_id, MessageRole::Assistant, &reply);
        })
    }
}
