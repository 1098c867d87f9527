//! Broadcast bus carrying [`LnmtEvent`]s to subscribers.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

use crate::event::LnmtEvent;

/// Default channel capacity for the event bus.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Event bus shared by all subsystems.
///
/// Cloning the bus shares the underlying channel; each subscriber gets an
/// independent cursor. Publishing never blocks.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Arc<LnmtEvent>>,
    capacity: usize,
}

impl EventBus {
    /// Create a bus with default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a bus with the given channel capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender, capacity }
    }

    /// Publish an event to all subscribers.
    ///
    /// Returns the number of receivers the event reached.
    pub fn publish(&self, event: LnmtEvent) -> usize {
        let event = Arc::new(event);
        trace!(event_type = %event.event_type(), "publishing event");
        match self.sender.send(Arc::clone(&event)) {
            Ok(count) => {
                debug!(event_type = %event.event_type(), receivers = count, "event published");
                count
            }
            // No receivers - fine, observations are best-effort
            Err(_) => 0,
        }
    }

    /// Subscribe to all future events.
    #[must_use]
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    /// Current number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// The channel capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving end of the bus.
pub struct EventReceiver {
    receiver: broadcast::Receiver<Arc<LnmtEvent>>,
}

impl EventReceiver {
    /// Receive the next event, skipping over any lag.
    ///
    /// Returns `None` once the bus is closed.
    pub async fn recv(&mut self) -> Option<Arc<LnmtEvent>> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    warn!(skipped = count, "event receiver lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Receive without blocking; `None` when empty or closed.
    pub fn try_recv(&mut self) -> Option<Arc<LnmtEvent>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(count)) => {
                    warn!(skipped = count, "event receiver lagged, events dropped");
                }
                Err(
                    broadcast::error::TryRecvError::Empty | broadcast::error::TryRecvError::Closed,
                ) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offline(mac: &str) -> LnmtEvent {
        LnmtEvent::DeviceOffline {
            mac: mac.parse().unwrap(),
        }
    }

    #[tokio::test]
    async fn test_publish_and_receive() {
        let bus = EventBus::new();
        let mut receiver = bus.subscribe();

        let count = bus.publish(offline("aa:bb:cc:dd:ee:01"));
        assert_eq!(count, 1);

        let event = receiver.recv().await.unwrap();
        assert_eq!(event.event_type(), "device_offline");
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let bus = EventBus::new();
        assert_eq!(bus.publish(offline("aa:bb:cc:dd:ee:01")), 0);
    }

    #[tokio::test]
    async fn test_multiple_subscribers_each_receive() {
        let bus = EventBus::new();
        let mut r1 = bus.subscribe();
        let mut r2 = bus.subscribe();

        assert_eq!(bus.publish(offline("aa:bb:cc:dd:ee:01")), 2);
        assert_eq!(r1.recv().await.unwrap().event_type(), "device_offline");
        assert_eq!(r2.recv().await.unwrap().event_type(), "device_offline");
    }

    #[tokio::test]
    async fn test_try_recv_empty() {
        let bus = EventBus::new();
        let mut receiver = bus.subscribe();
        assert!(receiver.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_clone_shares_channel() {
        let bus = EventBus::new();
        let mut receiver = bus.subscribe();
        let cloned = bus.clone();

        cloned.publish(offline("aa:bb:cc:dd:ee:02"));
        assert!(receiver.recv().await.is_some());
    }
}
