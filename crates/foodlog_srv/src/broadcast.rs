//! Push events and their delivery to registered subscribers.

use crate::registry::RegistryInner;
use crate::*;

/// An event pushed to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushEvent {
    /// Acknowledges a subscriber's own registration. Never broadcast.
    Connected,

    /// Food entry or category data changed, clients should refetch.
    DataChanged,

    /// The number of open subscribers changed.
    ClientCountChanged {
        /// the count right after the change
        count: usize,
    },
}

impl PushEvent {
    /// The token sent on the wire as the event `data`.
    pub fn token(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::DataChanged => "fetch",
            Self::ClientCountChanged { .. } => "clientUpdate",
        }
    }
}

impl SubscriberRegistry {
    /// Deliver `event` to every registered subscriber.
    ///
    /// Delivery is best-effort. Subscribers whose channel is already closed
    /// are removed, and the remaining subscribers are told the new count.
    pub fn emit(&self, event: PushEvent) {
        self.0.lock().unwrap().broadcast(event);
    }
}

impl RegistryInner {
    pub(crate) fn broadcast(&mut self, mut event: PushEvent) {
        loop {
            let dead = self
                .subscribers
                .iter()
                .filter_map(|(id, send)| send.send(event).err().map(|_| *id))
                .collect::<Vec<_>>();

            if dead.is_empty() {
                return;
            }

            for id in dead {
                self.subscribers.remove(&id);
                tracing::debug!(id, "Pruned closed subscriber");
            }

            // each pass removes at least one subscriber, so this ends
            event = PushEvent::ClientCountChanged {
                count: self.subscribers.len(),
            };
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn drain(sub: &mut Subscription) -> Vec<PushEvent> {
        std::iter::from_fn(|| sub.try_recv()).collect()
    }

    #[test]
    fn wire_tokens() {
        assert_eq!("connected", PushEvent::Connected.token());
        assert_eq!("fetch", PushEvent::DataChanged.token());
        assert_eq!(
            "clientUpdate",
            PushEvent::ClientCountChanged { count: 3 }.token()
        );
    }

    #[test]
    fn emit_reaches_everyone_in_order() {
        let reg = SubscriberRegistry::default();
        let mut a = reg.register();
        let mut b = reg.register();
        drain(&mut a);
        drain(&mut b);

        reg.emit(PushEvent::DataChanged);
        reg.emit(PushEvent::ClientCountChanged { count: 2 });
        reg.emit(PushEvent::DataChanged);

        let expect = vec![
            PushEvent::DataChanged,
            PushEvent::ClientCountChanged { count: 2 },
            PushEvent::DataChanged,
        ];
        assert_eq!(expect, drain(&mut a));
        assert_eq!(expect, drain(&mut b));
    }

    #[test]
    fn emit_with_no_subscribers_is_fine() {
        let reg = SubscriberRegistry::default();
        reg.emit(PushEvent::DataChanged);
        assert_eq!(0, reg.count());
    }

    #[test]
    fn closed_subscriber_is_pruned() {
        let reg = SubscriberRegistry::default();
        let mut a = reg.register();

        // simulate a subscriber whose receiver vanished without the
        // drop impl running
        let (send, recv) = tokio::sync::mpsc::unbounded_channel();
        drop(recv);
        reg.0.lock().unwrap().subscribers.insert(999, send);
        assert_eq!(2, reg.count());
        drain(&mut a);

        reg.emit(PushEvent::DataChanged);

        assert_eq!(1, reg.count());
        assert_eq!(
            vec![
                PushEvent::DataChanged,
                PushEvent::ClientCountChanged { count: 1 },
            ],
            drain(&mut a),
        );
    }
}
