/// Storage change notifications for syngraph.
///
/// The graph storage publishes an event for every observable mutation:
///
/// - `node:add` / `node:remove`
/// - `link:add` / `link:remove`
/// - `change:ports` / `change:state`
///
/// Observers subscribe and receive events over a channel; delivery order is
/// subscription order, and an observer whose receiver has been dropped is
/// pruned on the next emit, so dropping the receiver is all the
/// deregistration a subscriber needs.
use crate::types::{LinkKey, NodeId};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;

/// Unique identifier for an observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(pub u64);

impl std::fmt::Display for ObserverId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "obs-{}", self.0)
    }
}

/// A storage side effect, emitted after the mutation has been applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageEvent {
    /// A node was inserted into the graph.
    NodeAdded(NodeId),
    /// A node was deleted from the graph.
    NodeRemoved(NodeId),
    /// A node's port list changed (add, remove or replace).
    PortsChanged(NodeId),
    /// A node's state object was replaced.
    StateChanged(NodeId),
    /// A link was inserted.
    LinkAdded(LinkKey),
    /// A link was deleted.
    LinkRemoved(LinkKey),
}

/// Hub for storage event subscriptions.
///
/// Observers are held in subscription order, which makes delivery
/// deterministic. Emission never blocks: events go over unbounded channels
/// and observers with a dropped receiver are discarded.
#[derive(Debug)]
pub struct EventHub {
    observers: Mutex<Vec<(ObserverId, mpsc::UnboundedSender<StorageEvent>)>>,
    next_id: AtomicU64,
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHub {
    /// Create a new hub with no observers.
    pub fn new() -> Self {
        Self {
            observers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Subscribe to storage events.
    ///
    /// Returns the observer id and the receiving end of the event channel.
    /// Dropping the receiver deregisters the observer.
    pub fn subscribe(&self) -> (ObserverId, mpsc::UnboundedReceiver<StorageEvent>) {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (tx, rx) = mpsc::unbounded_channel();
        self.observers
            .lock()
            .expect("event hub lock poisoned")
            .push((id, tx));
        (id, rx)
    }

    /// Remove an observer explicitly.
    pub fn unsubscribe(&self, id: ObserverId) {
        self.observers
            .lock()
            .expect("event hub lock poisoned")
            .retain(|(obs, _)| *obs != id);
    }

    /// Number of live observers.
    pub fn observer_count(&self) -> usize {
        self.observers
            .lock()
            .expect("event hub lock poisoned")
            .len()
    }

    /// Deliver an event to every live observer, in subscription order.
    ///
    /// Observers whose receiver has been dropped are pruned here.
    pub fn emit(&self, event: StorageEvent) {
        self.observers
            .lock()
            .expect("event hub lock poisoned")
            .retain(|(_, tx)| tx.send(event.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str) -> NodeId {
        NodeId::from(id)
    }

    #[test]
    fn test_subscribe_and_emit() {
        let hub = EventHub::new();
        let (_id, mut rx) = hub.subscribe();

        hub.emit(StorageEvent::NodeAdded(node("N1")));

        assert_eq!(rx.try_recv().unwrap(), StorageEvent::NodeAdded(node("N1")));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_delivery_in_subscription_order() {
        let hub = EventHub::new();
        let (_a, mut rx_a) = hub.subscribe();
        let (_b, mut rx_b) = hub.subscribe();

        hub.emit(StorageEvent::StateChanged(node("N1")));

        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());
    }

    #[test]
    fn test_unsubscribe() {
        let hub = EventHub::new();
        let (id, mut rx) = hub.subscribe();
        hub.unsubscribe(id);

        hub.emit(StorageEvent::NodeRemoved(node("N1")));
        assert!(rx.try_recv().is_err());
        assert_eq!(hub.observer_count(), 0);
    }

    #[test]
    fn test_dropped_receiver_is_pruned() {
        let hub = EventHub::new();
        let (_id, rx) = hub.subscribe();
        drop(rx);

        assert_eq!(hub.observer_count(), 1);
        hub.emit(StorageEvent::PortsChanged(node("N1")));
        assert_eq!(hub.observer_count(), 0);
    }
}
