//! ChatBackend trait definition.
//!
//! The session-store and message-send contracts the conversation core
//! consumes. Uses RPITIT for the request/response calls, and
//! `Pin<Box<dyn Stream>>` for the streamed send so the fragment sequence can
//! be moved into a spawned turn task.

use std::pin::Pin;

use futures_util::Stream;
use uuid::Uuid;

use kbchat_types::error::ApiError;
use kbchat_types::session::{NewSession, Session, SessionDetail};

/// Incremental sequence of assistant text fragments for one turn.
///
/// Natural end of the stream means success, an `Err` item means failure.
/// Dropping the stream tears down the underlying transport.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, ApiError>> + Send + 'static>>;

/// Back-end session store plus streaming message send.
///
/// Implementations live in kbchat-infra (e.g., `HttpChatBackend`).
pub trait ChatBackend: Send + Sync + 'static {
    /// List all sessions.
    fn list_sessions(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<Session>, ApiError>> + Send;

    /// Create a session. The back-end assigns id and title.
    fn create_session(
        &self,
        request: &NewSession,
    ) -> impl std::future::Future<Output = Result<Session, ApiError>> + Send;

    /// Delete a session and its messages.
    fn delete_session(
        &self,
        session_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<(), ApiError>> + Send;

    /// Fetch a session with its ordered transcript. `Ok(None)` if unknown.
    fn get_session_detail(
        &self,
        session_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<SessionDetail>, ApiError>> + Send;

    /// Send a user message and stream back the assistant reply.
    ///
    /// The returned stream is lazy: nothing is dispatched until it is polled.
    fn send_message_stream(&self, session_id: Uuid, content: String) -> FragmentStream;
}
