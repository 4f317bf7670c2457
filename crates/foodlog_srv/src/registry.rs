//! The registry of open push connections.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::*;

/// Identifies one registered subscriber.
pub type SubscriberId = u64;

pub(crate) type EventSend = tokio::sync::mpsc::UnboundedSender<PushEvent>;
type EventRecv = tokio::sync::mpsc::UnboundedReceiver<PushEvent>;

#[derive(Default)]
pub(crate) struct RegistryInner {
    next_id: SubscriberId,
    pub(crate) subscribers: BTreeMap<SubscriberId, EventSend>,
}

/// Tracks every open push connection.
///
/// The connection count is always the size of the underlying map.
/// Every change to the membership broadcasts
/// [PushEvent::ClientCountChanged] to whoever remains registered.
#[derive(Clone, Default)]
pub struct SubscriberRegistry(pub(crate) Arc<Mutex<RegistryInner>>);

impl SubscriberRegistry {
    /// Admit a new subscriber.
    ///
    /// The new subscriber receives [PushEvent::Connected] first, and then,
    /// along with everyone else, the post-registration count.
    pub fn register(&self) -> Subscription {
        let (send, recv) = tokio::sync::mpsc::unbounded_channel();

        let id = {
            let mut inner = self.0.lock().unwrap();

            let id = inner.next_id;
            inner.next_id += 1;

            // we hold the receiver, this cannot fail
            let _ = send.send(PushEvent::Connected);
            inner.subscribers.insert(id, send);

            let count = inner.subscribers.len();
            inner.broadcast(PushEvent::ClientCountChanged { count });

            id
        };

        tracing::debug!(id, "Subscriber registered");

        Subscription {
            id,
            recv,
            registry: self.clone(),
        }
    }

    /// Remove a subscriber. Unknown or already removed ids are ignored.
    ///
    /// Returns `true` if the subscriber was registered.
    pub fn unregister(&self, id: SubscriberId) -> bool {
        let mut inner = self.0.lock().unwrap();

        if inner.subscribers.remove(&id).is_none() {
            return false;
        }

        let count = inner.subscribers.len();
        inner.broadcast(PushEvent::ClientCountChanged { count });

        drop(inner);

        tracing::debug!(id, "Subscriber unregistered");

        true
    }

    /// The number of currently registered subscribers.
    pub fn count(&self) -> usize {
        self.0.lock().unwrap().subscribers.len()
    }

    /// Drop every subscriber, ending all open push streams.
    ///
    /// No count update is sent, there is nobody left to receive it.
    pub fn close_all(&self) {
        let closed = std::mem::take(&mut self.0.lock().unwrap().subscribers);
        if !closed.is_empty() {
            tracing::debug!(count = closed.len(), "Closed all subscribers");
        }
    }
}

/// A registered subscriber's end of the push channel.
///
/// Dropping it unregisters the subscriber.
pub struct Subscription {
    id: SubscriberId,
    recv: EventRecv,
    registry: SubscriberRegistry,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.registry.unregister(self.id);
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

impl Subscription {
    /// The id this subscription is registered under.
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Wait for the next event. Returns `None` once the registry has
    /// dropped this subscriber.
    pub async fn recv(&mut self) -> Option<PushEvent> {
        self.recv.recv().await
    }

    /// Take the next event if one is already queued.
    pub fn try_recv(&mut self) -> Option<PushEvent> {
        self.recv.try_recv().ok()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn drain(sub: &mut Subscription) -> Vec<PushEvent> {
        std::iter::from_fn(|| sub.try_recv()).collect()
    }

    #[test]
    fn register_unregister_round_trip() {
        let reg = SubscriberRegistry::default();
        let _keep = reg.register();
        let before = reg.count();

        let sub = reg.register();
        assert_eq!(before + 1, reg.count());

        assert!(reg.unregister(sub.id()));
        assert_eq!(before, reg.count());
    }

    #[test]
    fn unregister_is_idempotent() {
        let reg = SubscriberRegistry::default();
        let sub = reg.register();
        let id = sub.id();

        assert!(!reg.unregister(id + 100));
        assert_eq!(1, reg.count());

        assert!(reg.unregister(id));
        assert!(!reg.unregister(id));
        assert_eq!(0, reg.count());

        // the drop impl unregisters again, which is also a no-op
        drop(sub);
        assert_eq!(0, reg.count());
    }

    #[test]
    fn drop_unregisters() {
        let reg = SubscriberRegistry::default();
        let sub = reg.register();
        assert_eq!(1, reg.count());
        drop(sub);
        assert_eq!(0, reg.count());
    }

    #[test]
    fn connected_is_private_count_is_broadcast() {
        let reg = SubscriberRegistry::default();

        let mut a = reg.register();
        let mut b = reg.register();

        assert_eq!(2, reg.count());
        assert_eq!(
            vec![
                PushEvent::Connected,
                PushEvent::ClientCountChanged { count: 1 },
                PushEvent::ClientCountChanged { count: 2 },
            ],
            drain(&mut a),
        );
        assert_eq!(
            vec![
                PushEvent::Connected,
                PushEvent::ClientCountChanged { count: 2 },
            ],
            drain(&mut b),
        );

        drop(b);

        assert_eq!(1, reg.count());
        assert_eq!(
            vec![PushEvent::ClientCountChanged { count: 1 }],
            drain(&mut a),
        );
    }

    #[test]
    fn ids_are_not_reused() {
        let reg = SubscriberRegistry::default();
        let a = reg.register().id();
        let b = reg.register().id();
        assert_ne!(a, b);
    }

    #[test]
    fn close_all_ends_streams() {
        let reg = SubscriberRegistry::default();
        let mut a = reg.register();
        drain(&mut a);

        reg.close_all();
        assert_eq!(0, reg.count());

        let rt = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        assert_eq!(None, rt.block_on(a.recv()));
    }
}
