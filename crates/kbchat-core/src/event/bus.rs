//! Fan-out of [`ConversationEvent`]s from turn tasks to the UI.
//!
//! Every stream consumer publishes while holding its session's slot lock, so
//! a subscriber sees one session's events in exactly the order its state
//! changed, even when several sessions stream at once. Events of different
//! sessions interleave freely.
//!
//! The channel is bounded. A subscriber that falls behind gets
//! `RecvError::Lagged` and loses the oldest events; fragment text it missed
//! is still available from the consumer's accumulated text.

use kbchat_types::stream::ConversationEvent;
use tokio::sync::broadcast;

/// Shared publisher for conversation events. Clones publish into the same
/// channel.
pub struct EventBus {
    sender: broadcast::Sender<ConversationEvent>,
}

impl EventBus {
    /// `capacity` is how many events a slow subscriber may trail by before
    /// it starts lagging. Clamped to at least one.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Receive every event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ConversationEvent> {
        self.sender.subscribe()
    }

    /// Publish to current subscribers. A no-op when nobody listens.
    pub fn publish(&self, event: ConversationEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
