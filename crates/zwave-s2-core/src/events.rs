//! Security events.
//!
//! The manager owns an [`EventBus`] and publishes lifecycle changes to it.
//! Subscribers that fall behind lose the oldest events; the manager never
//! blocks on a slow subscriber.

use tokio::sync::broadcast;

use crate::{NodeId, security_class::SecurityClass};

/// Default number of buffered events per subscriber.
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Lifecycle changes observed by the security manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecurityEvent {
    /// A SPAN was seeded with the peer
    SpanEstablished {
        /// Peer node
        peer: NodeId,
        /// Class whose keys seeded it
        security_class: SecurityClass,
    },

    /// The peer's SPAN was discarded after a failed decryption
    SpanReset {
        /// Peer node
        peer: NodeId,
    },

    /// Temporary keys were derived for the peer
    BootstrapStarted {
        /// Peer node
        peer: NodeId,
    },

    /// Bootstrapping finished and grants were recorded
    BootstrapCompleted {
        /// Peer node
        peer: NodeId,
        /// Classes granted to the peer
        granted: Vec<SecurityClass>,
    },

    /// Bootstrapping was aborted
    BootstrapAborted {
        /// Peer node
        peer: NodeId,
    },

    /// A new multicast group id was assigned
    MulticastGroupCreated {
        /// Group id
        group: u8,
        /// Members
        node_ids: Vec<NodeId>,
        /// Class of the group
        security_class: SecurityClass,
    },
}

/// Fan-out of events to any number of subscribers.
#[derive(Debug, Clone)]
pub struct EventBus<E> {
    sender: broadcast::Sender<E>,
}

impl<E: Clone> EventBus<E> {
    /// Bus buffering `capacity` events per subscriber (at least 1).
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// New subscriber that sees events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<E> {
        self.sender.subscribe()
    }

    /// Publish an event. Returns the number of subscribers reached.
    pub fn publish(&self, event: E) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl<E: Clone> Default for EventBus<E> {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_without_subscribers_is_dropped() {
        let bus = EventBus::default();
        assert_eq!(bus.publish(SecurityEvent::SpanReset { peer: 1 }), 0);
    }

    #[test]
    fn subscribers_see_later_events() {
        let bus = EventBus::default();
        bus.publish(SecurityEvent::SpanReset { peer: 1 });

        let mut rx = bus.subscribe();
        assert_eq!(bus.publish(SecurityEvent::BootstrapStarted { peer: 2 }), 1);

        assert_eq!(rx.try_recv(), Ok(SecurityEvent::BootstrapStarted { peer: 2 }));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn dropped_subscriber_is_not_counted() {
        let bus: EventBus<SecurityEvent> = EventBus::new(4);
        let rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);
        drop(rx);
        assert_eq!(bus.subscriber_count(), 0);
    }
}
