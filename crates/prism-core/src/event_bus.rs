//! EventBus - dispatch events for observers outside a single stream
//!
//! Every event a router run emits is also published here, tagged with its
//! session, so monitors can watch all sessions at once.

use crate::emitter::DispatchEvent;
use serde::Serialize;
use tokio::sync::broadcast;

/// A dispatch event tagged with the session it belongs to
#[derive(Debug, Clone, Serialize)]
pub struct BusEvent {
    /// Session the event was emitted for
    pub session_id: String,
    /// The event
    #[serde(flatten)]
    pub event: DispatchEvent,
}

/// Broadcast bus of [`BusEvent`]s
///
/// A subscriber that falls more than `capacity` events behind gets
/// `RecvError::Lagged` instead of slowing down dispatch.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<BusEvent>,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per subscriber
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Receive every event published from now on
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.sender.subscribe()
    }

    /// Publish an event, returning how many subscribers got it
    pub fn publish(&self, session_id: &str, event: DispatchEvent) -> usize {
        // No receivers is not an error here.
        self.sender
            .send(BusEvent {
                session_id: session_id.to_string(),
                event,
            })
            .unwrap_or(0)
    }

    /// Number of live subscribers
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
