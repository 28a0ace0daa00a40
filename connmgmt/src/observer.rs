// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::packet::KeepaliveMessage;
use crate::{ConnectionKey, MastershipRole, SessionStatus};
use std::sync::mpsc::{channel, Receiver, Sender};

/// Identifies a subscription on a session.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The session status changed.
    StatusChanged {
        from: SessionStatus,
        to: SessionStatus,
    },

    /// The session is about to change its mastership role.
    PreSwitchover { role: MastershipRole },

    /// The session changed its mastership role.
    PostSwitchover {
        from: MastershipRole,
        to: MastershipRole,
    },
}

/// What subscribers receive. `status`, `role` and `message` reflect the
/// session at the moment the event was emitted; `message` is the encoded
/// local keepalive and always agrees with `status` and `role`.
#[derive(Debug, Clone)]
pub struct Notification {
    pub name: String,
    pub key: ConnectionKey,
    pub event: SessionEvent,
    pub status: SessionStatus,
    pub role: MastershipRole,
    pub message: KeepaliveMessage,
}

/// The set of subscribers to a session's events.
#[derive(Default)]
pub struct Subscribers {
    next: u64,
    subscribers: Vec<(SubscriberId, Sender<Notification>)>,
}

impl Subscribers {
    pub fn subscribe(&mut self) -> (SubscriberId, Receiver<Notification>) {
        let (tx, rx) = channel();
        self.next += 1;
        let id = SubscriberId(self.next);
        self.subscribers.push((id, tx));
        (id, rx)
    }

    /// Remove a subscriber. Returns false if it was not subscribed.
    pub fn unsubscribe(&mut self, id: SubscriberId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(i, _)| *i != id);
        self.subscribers.len() != before
    }

    /// Deliver a notification to every subscriber. Subscribers whose receiver
    /// has been dropped are removed.
    pub fn notify(&mut self, n: &Notification) {
        self.subscribers.retain(|(_, tx)| tx.send(n.clone()).is_ok());
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use cm_common::ip;
    use pretty_assertions::assert_eq;

    fn notification() -> Notification {
        Notification {
            name: "a".into(),
            key: ConnectionKey::new(
                ip!("10.0.0.1"),
                5000,
                ip!("10.0.0.2"),
                6000,
            ),
            event: SessionEvent::StatusChanged {
                from: SessionStatus::Down,
                to: SessionStatus::Init,
            },
            status: SessionStatus::Init,
            role: MastershipRole::Backup,
            message: KeepaliveMessage::default(),
        }
    }

    #[test]
    fn subscribe_notify_unsubscribe() {
        let mut subs = Subscribers::default();
        let (a, rx_a) = subs.subscribe();
        let (b, rx_b) = subs.subscribe();
        assert_ne!(a, b);
        assert_eq!(subs.len(), 2);

        subs.notify(&notification());
        assert_eq!(rx_a.try_recv().unwrap().event, notification().event);
        assert_eq!(rx_b.try_recv().unwrap().event, notification().event);

        assert!(subs.unsubscribe(a));
        assert!(!subs.unsubscribe(a));
        subs.notify(&notification());
        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_ok());
    }

    #[test]
    fn dropped_receivers_are_pruned() {
        let mut subs = Subscribers::default();
        let (_, rx) = subs.subscribe();
        drop(rx);
        let (_, _rx) = subs.subscribe();
        subs.notify(&notification());
        assert_eq!(subs.len(), 1);
    }
}
