use tokio::sync::broadcast;
use tracing::trace;

use crate::event::Event;

/// The channel capacity for the underlying broadcast queue. Slow or absent
/// subscribers simply miss old events (they are best-effort, per spec.md
/// §4.8) rather than applying back-pressure to producers.
const CHANNEL_CAPACITY: usize = 1024;

/// In-process publish/subscribe bus. Cloning an `EventBus` shares the same
/// underlying channel — every clone publishes to and can subscribe from the
/// same stream.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Publish an event. Fire-and-forget: a publish with zero subscribers is
    /// not an error, and this call never blocks the caller (spec.md §4.8,
    /// §5 "Event publication is non-blocking").
    pub fn publish(&self, event: Event) {
        // `send` only fails when there are no receivers, which is a normal
        // state (e.g. no SSE client connected yet) and not worth logging at
        // more than trace level.
        if self.sender.send(event).is_err() {
            trace!("event published with no active subscribers");
        }
    }

    /// Subscribe to the event stream. Each subscriber gets its own queue of
    /// up to `CHANNEL_CAPACITY` buffered events.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}
