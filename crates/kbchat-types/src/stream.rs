//! Streaming turn phases, outcomes, and the events published while a turn
//! is in flight.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use std::fmt;

/// Notice surfaced in place of the assistant reply when a turn fails.
pub const FAILURE_NOTICE: &str = "Error: Failed to get response";

/// Phase of the per-session stream state machine.
///
/// `Idle -> Sending -> Streaming -> {Completed | Failed | Cancelled} -> Idle`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamPhase {
    #[default]
    Idle,
    Sending,
    Streaming,
    Completed,
    Failed,
    Cancelled,
}

impl StreamPhase {
    /// Whether a turn is dispatched and still consuming fragments.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, StreamPhase::Sending | StreamPhase::Streaming)
    }

    /// Whether the turn has ended but not yet returned to idle.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StreamPhase::Completed | StreamPhase::Failed | StreamPhase::Cancelled
        )
    }
}

impl fmt::Display for StreamPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamPhase::Idle => write!(f, "idle"),
            StreamPhase::Sending => write!(f, "sending"),
            StreamPhase::Streaming => write!(f, "streaming"),
            StreamPhase::Completed => write!(f, "completed"),
            StreamPhase::Failed => write!(f, "failed"),
            StreamPhase::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// How a turn ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum TurnOutcome {
    /// The fragment sequence ended normally. `text` is what was streamed;
    /// the persisted reply comes from the post-turn refresh.
    Completed { text: String },
    /// The sequence raised an error or the transport broke early.
    Failed { notice: String, error: String },
    /// The caller cancelled the turn.
    Cancelled,
}

impl TurnOutcome {
    /// Completed and failed turns both need the transcript re-fetched: the
    /// user message may have persisted even when the reply did not.
    pub fn requires_refresh(&self) -> bool {
        !matches!(self, TurnOutcome::Cancelled)
    }

    pub fn phase(&self) -> StreamPhase {
        match self {
            TurnOutcome::Completed { .. } => StreamPhase::Completed,
            TurnOutcome::Failed { .. } => StreamPhase::Failed,
            TurnOutcome::Cancelled => StreamPhase::Cancelled,
        }
    }

    pub fn failed(error: impl fmt::Display) -> Self {
        TurnOutcome::Failed {
            notice: FAILURE_NOTICE.to_string(),
            error: error.to_string(),
        }
    }
}

/// Events published by the conversation core.
///
/// Events for a single session are published in the order their state
/// changes were applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConversationEvent {
    PhaseChanged {
        session_id: Uuid,
        phase: StreamPhase,
    },
    /// One fragment appended to the session's transient text.
    Fragment { session_id: Uuid, text: String },
    DetailRefreshed {
        session_id: Uuid,
        message_count: usize,
    },
    RefreshFailed { session_id: Uuid, error: String },
    SelectionChanged { session_id: Option<Uuid> },
    DirectoryChanged { session_count: usize },
}

impl ConversationEvent {
    /// Session this event concerns, if any.
    pub fn session_id(&self) -> Option<Uuid> {
        match self {
            ConversationEvent::PhaseChanged { session_id, .. }
            | ConversationEvent::Fragment { session_id, .. }
            | ConversationEvent::DetailRefreshed { session_id, .. }
            | ConversationEvent::RefreshFailed { session_id, .. } => Some(*session_id),
            ConversationEvent::SelectionChanged { session_id } => *session_id,
            ConversationEvent::DirectoryChanged { .. } => None,
        }
    }
}
