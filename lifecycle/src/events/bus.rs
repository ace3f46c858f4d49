//! Event bus for lifecycle notifications
//!
//! Thin wrapper over a Tokio broadcast channel. Publishing never fails when
//! nobody is listening; slow subscribers lag rather than block the poll loop.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

use super::types::{Generation, LifecycleEvent};

/// Channel capacity for broadcast
const CHANNEL_CAPACITY: usize = 256;

/// Shared reference to EventBus
pub type SharedEventBus = Arc<EventBus>;

/// Broadcast bus for [`LifecycleEvent`]s
pub struct EventBus {
    sender: broadcast::Sender<LifecycleEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Create a shared reference to this event bus
    pub fn shared(self) -> SharedEventBus {
        Arc::new(self)
    }

    /// Publish an event to all subscribers
    pub fn publish(&self, event: LifecycleEvent) {
        let event_type = event.event_type();
        match self.sender.send(event) {
            Ok(count) => debug!(event_type, receivers = count, "Event published"),
            Err(_) => debug!(event_type, "Event published (no receivers)"),
        }
    }

    /// Subscribe to receive events
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.sender.subscribe()
    }

    /// Get the number of current subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiver that only yields events of one session generation
pub struct SessionReceiver {
    receiver: broadcast::Receiver<LifecycleEvent>,
    generation: Generation,
}

impl SessionReceiver {
    pub fn new(receiver: broadcast::Receiver<LifecycleEvent>, generation: Generation) -> Self {
        Self {
            receiver,
            generation,
        }
    }

    /// Receive the next event of this session.
    ///
    /// Lagged events are skipped. Returns `None` when the bus is closed.
    pub async fn recv(&mut self) -> Option<LifecycleEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if event.generation() == self.generation => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "Session receiver lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Receive events until this session's terminal or reset event.
    pub async fn until_terminal(&mut self) -> Option<LifecycleEvent> {
        while let Some(event) = self.recv().await {
            if event.ends_session() {
                return Some(event);
            }
        }
        None
    }
}
