//! # Event System
//!
//! Events that flow from the replication layer to the rest of the engine.
//!
//! ```text
//! NetInstance --trigger_event--> EventChannel --try_recv--> game / UI layer
//! ```

use std::sync::Arc;

/// Sink for engine events.
///
/// The replication layer only ever triggers events; who consumes them is up to
/// the game.
pub trait EventSystem<E>: Send + Sync {
    /// Publishes an event.
    fn trigger_event(&self, event: E);
}

impl<E, S: EventSystem<E> + ?Sized> EventSystem<E> for Arc<S> {
    fn trigger_event(&self, event: E) {
        (**self).trigger_event(event);
    }
}

/// Channel for sending events between engine subsystems.
/// Uses crossbeam for lock-free communication.
pub struct EventChannel<T> {
    sender: crossbeam_channel::Sender<T>,
    receiver: crossbeam_channel::Receiver<T>,
}

impl<T> EventChannel<T> {
    /// Creates a new bounded event channel.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = crossbeam_channel::bounded(capacity);
        Self { sender, receiver }
    }

    /// Creates a new unbounded event channel.
    #[must_use]
    pub fn unbounded() -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded();
        Self { sender, receiver }
    }

    /// Tries to send an event (returns immediately).
    ///
    /// # Errors
    ///
    /// Fails if the channel is full.
    pub fn try_send(&self, event: T) -> Result<(), crossbeam_channel::TrySendError<T>> {
        self.sender.try_send(event)
    }

    /// Tries to receive an event (non-blocking).
    ///
    /// # Errors
    ///
    /// Fails if no event is queued.
    pub fn try_recv(&self) -> Result<T, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Drains every queued event.
    pub fn drain(&self) -> Vec<T> {
        self.receiver.try_iter().collect()
    }

    /// Gets a clone of the sender for another thread.
    #[must_use]
    pub fn sender(&self) -> crossbeam_channel::Sender<T> {
        self.sender.clone()
    }

    /// Gets a clone of the receiver for another thread.
    #[must_use]
    pub fn receiver(&self) -> crossbeam_channel::Receiver<T> {
        self.receiver.clone()
    }
}

impl<T: Send> EventSystem<T> for EventChannel<T> {
    fn trigger_event(&self, event: T) {
        if self.sender.try_send(event).is_err() {
            tracing::warn!("event channel full, dropping event");
        }
    }
}

impl<T> Default for EventChannel<T> {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    enum Ping {
        One,
        Two,
    }

    #[test]
    fn test_trigger_and_drain() {
        let channel = EventChannel::<Ping>::unbounded();
        channel.trigger_event(Ping::One);
        channel.trigger_event(Ping::Two);
        assert_eq!(channel.drain(), vec![Ping::One, Ping::Two]);
        assert!(channel.try_recv().is_err());
    }

    #[test]
    fn test_bounded_channel_drops_when_full() {
        let channel = EventChannel::<Ping>::new(1);
        channel.trigger_event(Ping::One);
        channel.trigger_event(Ping::Two);
        assert_eq!(channel.drain(), vec![Ping::One]);
    }

    #[test]
    fn test_shared_event_system() {
        let channel = Arc::new(EventChannel::<Ping>::unbounded());
        let system: Arc<dyn EventSystem<Ping>> = channel.clone();
        system.trigger_event(Ping::Two);
        assert_eq!(channel.try_recv().unwrap(), Ping::Two);
    }
}
