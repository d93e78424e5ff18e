//! Stream consumer state machine for a single session.
//!
//! The consumer owns the session's transient stream state: accumulated text
//! and phase. All mutations happen under one lock and publish their event
//! while holding it, so observers never see a half-applied fragment and
//! events for the session arrive in the order the changes were made.
//!
//! Every turn is identified by a [`TurnTicket`]. Once a turn is cancelled
//! its ticket stops being current, and anything the old turn task still
//! tries to apply is dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use kbchat_types::error::{ApiError, SendError};
use kbchat_types::stream::{ConversationEvent, StreamPhase, TurnOutcome};

use crate::backend::FragmentStream;
use crate::event::bus::EventBus;

/// Snapshot of a session's in-flight turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransientStreamState {
    pub session_id: Uuid,
    pub text: String,
    pub phase: StreamPhase,
}

/// Handle identifying one accepted turn.
#[derive(Debug, Clone)]
pub struct TurnTicket {
    id: u64,
    cancellation: CancellationToken,
}

impl TurnTicket {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

/// Returns the session to idle if the turn task unwinds before the turn
/// is reconciled. Disarm it once `finish` has run.
pub struct TurnGuard {
    consumer: Arc<StreamConsumer>,
    ticket: TurnTicket,
    armed: bool,
}

impl TurnGuard {
    pub fn new(consumer: Arc<StreamConsumer>, ticket: TurnTicket) -> Self {
        Self {
            consumer,
            ticket,
            armed: true,
        }
    }

    pub fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        if self.armed {
            self.consumer.abandon(&self.ticket);
        }
    }
}

struct Slot {
    text: String,
    phase: StreamPhase,
    current: Option<TurnTicket>,
    last_outcome: Option<TurnOutcome>,
}

impl Slot {
    fn is_current(&self, ticket: &TurnTicket) -> bool {
        self.current.as_ref().is_some_and(|t| t.id == ticket.id) && !ticket.is_cancelled()
    }
}

pub struct StreamConsumer {
    session_id: Uuid,
    slot: Mutex<Slot>,
    events: EventBus,
    next_turn: AtomicU64,
}

impl StreamConsumer {
    pub fn new(session_id: Uuid, events: EventBus) -> Self {
        Self {
            session_id,
            slot: Mutex::new(Slot {
                text: String::new(),
                phase: StreamPhase::Idle,
                current: None,
                last_outcome: None,
            }),
            events,
            next_turn: AtomicU64::new(0),
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn phase(&self) -> StreamPhase {
        self.lock().phase
    }

    pub fn is_idle(&self) -> bool {
        self.phase() == StreamPhase::Idle
    }

    pub fn accumulated_text(&self) -> String {
        self.lock().text.clone()
    }

    pub fn snapshot(&self) -> TransientStreamState {
        let slot = self.lock();
        TransientStreamState {
            session_id: self.session_id,
            text: slot.text.clone(),
            phase: slot.phase,
        }
    }

    /// How the most recent turn ended. Cleared when the next turn begins.
    pub fn last_outcome(&self) -> Option<TurnOutcome> {
        self.lock().last_outcome.clone()
    }

    /// The failure notice of the most recent turn, if it failed.
    pub fn failure_notice(&self) -> Option<String> {
        match &self.lock().last_outcome {
            Some(TurnOutcome::Failed { notice, .. }) => Some(notice.clone()),
            _ => None,
        }
    }

    /// Claim the session for a new turn: `idle -> sending`.
    ///
    /// Rejects blank text, and any attempt while a turn is in flight or
    /// still reconciling. Rejected attempts change nothing.
    pub fn begin(&self, text: &str) -> Result<TurnTicket, SendError> {
        if text.trim().is_empty() {
            return Err(SendError::EmptyMessage);
        }

        let mut slot = self.lock();
        if slot.phase != StreamPhase::Idle {
            return Err(SendError::TurnInProgress(self.session_id));
        }

        let ticket = TurnTicket {
            id: self.next_turn.fetch_add(1, Ordering::SeqCst) + 1,
            cancellation: CancellationToken::new(),
        };
        slot.text.clear();
        slot.last_outcome = None;
        slot.current = Some(ticket.clone());
        self.set_phase(&mut slot, StreamPhase::Sending);
        debug!(session_id = %self.session_id, turn = ticket.id, "Turn started");
        Ok(ticket)
    }

    /// Consume the fragment sequence for `ticket` until it terminates.
    ///
    /// Fragments are applied strictly in arrival order. The stream is
    /// dropped on return, which tears down the underlying transport.
    pub async fn drive(&self, ticket: &TurnTicket, stream: FragmentStream) -> TurnOutcome {
        let mut stream = stream;
        loop {
            let next = tokio::select! {
                biased;
                _ = ticket.cancellation.cancelled() => {
                    debug!(session_id = %self.session_id, turn = ticket.id, "Turn cancelled; dropping stream");
                    return TurnOutcome::Cancelled;
                }
                next = stream.next() => next,
            };

            match next {
                Some(Ok(fragment)) => {
                    if !self.apply_fragment(ticket, fragment) {
                        return TurnOutcome::Cancelled;
                    }
                }
                Some(Err(e)) => return self.fail(ticket, &e),
                None => return self.complete(ticket),
            }
        }
    }

    /// Return to idle after the turn has been reconciled.
    ///
    /// Clears the transient text. No-op if the turn is no longer current.
    pub fn finish(&self, ticket: &TurnTicket) -> bool {
        let mut slot = self.lock();
        if !slot.is_current(ticket) {
            return false;
        }
        slot.text.clear();
        slot.current = None;
        self.set_phase(&mut slot, StreamPhase::Idle);
        true
    }

    /// Force the turn back to idle after its task died mid-turn.
    ///
    /// An in-flight turn passes through `failed` so the notice is shown; a
    /// turn that already reached a terminal phase just returns to idle.
    pub fn abandon(&self, ticket: &TurnTicket) -> bool {
        let mut slot = self.lock();
        if !slot.is_current(ticket) {
            return false;
        }
        warn!(session_id = %self.session_id, turn = ticket.id, "Turn task aborted; resetting session");
        if slot.phase.is_in_flight() {
            slot.text.clear();
            slot.last_outcome = Some(TurnOutcome::failed("turn task aborted"));
            self.set_phase(&mut slot, StreamPhase::Failed);
        }
        slot.text.clear();
        slot.current = None;
        self.set_phase(&mut slot, StreamPhase::Idle);
        true
    }

    /// Cancel the in-flight turn, if any: `sending | streaming -> idle`.
    ///
    /// Takes effect immediately: no further fragments are applied, even
    /// ones the turn task has already pulled off the stream.
    pub fn cancel(&self) -> bool {
        let mut slot = self.lock();
        if !slot.phase.is_in_flight() {
            return false;
        }
        if let Some(ticket) = slot.current.take() {
            ticket.cancellation.cancel();
            info!(session_id = %self.session_id, turn = ticket.id, "Turn cancelled");
        }
        slot.text.clear();
        slot.last_outcome = Some(TurnOutcome::Cancelled);
        self.set_phase(&mut slot, StreamPhase::Cancelled);
        self.set_phase(&mut slot, StreamPhase::Idle);
        true
    }

    fn apply_fragment(&self, ticket: &TurnTicket, fragment: String) -> bool {
        let mut slot = self.lock();
        if !slot.is_current(ticket) {
            return false;
        }
        if slot.phase == StreamPhase::Sending {
            self.set_phase(&mut slot, StreamPhase::Streaming);
        }
        slot.text.push_str(&fragment);
        self.events.publish(ConversationEvent::Fragment {
            session_id: self.session_id,
            text: fragment,
        });
        true
    }

    /// `streaming -> completed`. The text stays visible until `finish`.
    fn complete(&self, ticket: &TurnTicket) -> TurnOutcome {
        let mut slot = self.lock();
        if !slot.is_current(ticket) {
            return TurnOutcome::Cancelled;
        }
        let outcome = TurnOutcome::Completed {
            text: slot.text.clone(),
        };
        slot.last_outcome = Some(outcome.clone());
        self.set_phase(&mut slot, StreamPhase::Completed);
        outcome
    }

    /// `sending | streaming -> failed`. Partial text is discarded at once.
    fn fail(&self, ticket: &TurnTicket, error: &ApiError) -> TurnOutcome {
        let mut slot = self.lock();
        if !slot.is_current(ticket) {
            return TurnOutcome::Cancelled;
        }
        info!(session_id = %self.session_id, turn = ticket.id, error = %error, "Turn failed");
        let outcome = TurnOutcome::failed(error);
        slot.text.clear();
        slot.last_outcome = Some(outcome.clone());
        self.set_phase(&mut slot, StreamPhase::Failed);
        outcome
    }

    fn set_phase(&self, slot: &mut Slot, phase: StreamPhase) {
        slot.phase = phase;
        self.events.publish(ConversationEvent::PhaseChanged {
            session_id: self.session_id,
            phase,
        });
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
