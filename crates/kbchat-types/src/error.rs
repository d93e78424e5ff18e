use thiserror::Error;
use uuid::Uuid;

/// Errors from the back-end or the transport underneath it.
///
/// A transport timeout and a back-end error are handled identically by the
/// stream consumer: both end the turn as failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out")]
    Timeout,

    #[error("backend returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("not found")]
    NotFound,

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("stream error: {0}")]
    Stream(String),

    #[error("stream ended before completion")]
    IncompleteStream,
}

/// Reasons a send is rejected before anything reaches the network.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    #[error("message is empty")]
    EmptyMessage,

    #[error("no session selected")]
    NoSessionSelected,

    #[error("unknown session {0}")]
    UnknownSession(Uuid),

    #[error("a turn is already in progress for session {0}")]
    TurnInProgress(Uuid),
}

/// A rejected send, handing the typed text back to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct SendRejected {
    pub reason: SendError,
    pub text: String,
}

/// Errors loading client configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {message}")]
    Parse { path: String, message: String },
}
