//! Channel registry: maps session IDs to their outbound queues and tracks
//! which addresses are online.

use std::collections::HashMap;
use std::net::IpAddr;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use tandem_common::SessionId;

use crate::protocol::ServerMessage;

/// Outcome of handing a message to a session's queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// No such session, or no partner to route to.
    NoRecipient,
    /// The session's writer has gone away.
    Closed,
    /// The session's queue is full; the message was not queued.
    Full,
    /// The message could not be encoded.
    Invalid,
}

/// Sending half of a connection's bounded outbound queue.
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    tx: mpsc::Sender<String>,
}

impl ChannelHandle {
    pub fn new(tx: mpsc::Sender<String>) -> Self {
        Self { tx }
    }

    /// Create a handle together with the receiver the transport drains.
    pub fn bounded(capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }

    /// Queue a frame without waiting.
    pub fn deliver(&self, text: String) -> Delivery {
        match self.tx.try_send(text) {
            Ok(()) => Delivery::Delivered,
            Err(TrySendError::Full(_)) => Delivery::Full,
            Err(TrySendError::Closed(_)) => Delivery::Closed,
        }
    }
}

struct Registration {
    channel: ChannelHandle,
    address: IpAddr,
}

/// Live channels keyed by session, plus a reference count per address.
///
/// Not synchronised on its own: the pairing engine owns it under its lock.
#[derive(Default)]
pub struct ChannelRegistry {
    sessions: HashMap<SessionId, Registration>,
    /// address → number of registered sessions from it.
    addresses: HashMap<IpAddr, usize>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a session's channel. Returns false, changing nothing, if the
    /// session is already registered.
    pub fn register(&mut self, id: &SessionId, channel: ChannelHandle, address: IpAddr) -> bool {
        if self.sessions.contains_key(id) {
            warn!(session = %id, "Duplicate channel registration ignored");
            return false;
        }
        self.sessions
            .insert(id.clone(), Registration { channel, address });
        *self.addresses.entry(address).or_insert(0) += 1;
        true
    }

    /// Drop a session's channel. Safe to call for unknown sessions.
    pub fn unregister(&mut self, id: &SessionId, address: IpAddr) {
        let Some(registration) = self.sessions.remove(id) else {
            return;
        };
        if registration.address != address {
            warn!(
                session = %id,
                registered = %registration.address,
                given = %address,
                "Unregister address mismatch, using registered address"
            );
        }
        let address = registration.address;
        if let Some(count) = self.addresses.get_mut(&address) {
            *count -= 1;
            if *count == 0 {
                self.addresses.remove(&address);
            }
        }
    }

    /// Queue `message` for `id`. Never blocks; failures are logged and
    /// reported through the returned [`Delivery`].
    pub fn send(&self, id: &SessionId, message: &ServerMessage) -> Delivery {
        let Some(registration) = self.sessions.get(id) else {
            debug!(session = %id, kind = message.kind(), "Dropping message for unknown session");
            return Delivery::NoRecipient;
        };

        let text = match message.to_text() {
            Ok(text) => text,
            Err(e) => {
                warn!(session = %id, kind = message.kind(), error = %e, "Failed to encode message");
                return Delivery::Invalid;
            }
        };

        let delivery = registration.channel.deliver(text);
        match delivery {
            Delivery::Full => {
                debug!(session = %id, kind = message.kind(), "Outbound queue full")
            }
            Delivery::Closed => {
                debug!(session = %id, kind = message.kind(), "Channel closed, message dropped")
            }
            _ => {}
        }
        delivery
    }

    /// Number of distinct addresses with at least one open channel.
    pub fn online_count(&self) -> usize {
        self.addresses.len()
    }

    /// Address the session registered from.
    pub fn address_of(&self, id: &SessionId) -> Option<IpAddr> {
        self.sessions.get(id).map(|registration| registration.address)
    }

    pub fn is_registered(&self, id: &SessionId) -> bool {
        self.sessions.contains_key(id)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn addr(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    fn waiting() -> ServerMessage {
        ServerMessage::Waiting { online_count: 1 }
    }

    #[test]
    fn register_send_unregister() {
        let mut registry = ChannelRegistry::new();
        let id = SessionId::new();
        let (channel, mut rx) = ChannelHandle::bounded(4);

        assert!(registry.register(&id, channel, addr(1)));
        assert!(registry.is_registered(&id));
        assert_eq!(registry.send(&id, &waiting()), Delivery::Delivered);
        assert_eq!(
            rx.try_recv().unwrap(),
            r#"{"type":"waiting","onlineCount":1}"#
        );

        registry.unregister(&id, addr(1));
        assert!(!registry.is_registered(&id));
        assert_eq!(registry.send(&id, &waiting()), Delivery::NoRecipient);
        assert_eq!(registry.online_count(), 0);
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut registry = ChannelRegistry::new();
        let id = SessionId::new();
        let (first, mut first_rx) = ChannelHandle::bounded(4);
        let (second, mut second_rx) = ChannelHandle::bounded(4);

        assert!(registry.register(&id, first, addr(1)));
        assert!(!registry.register(&id, second, addr(2)));
        assert_eq!(registry.online_count(), 1);

        registry.send(&id, &waiting());
        assert!(first_rx.try_recv().is_ok());
        assert!(second_rx.try_recv().is_err());
    }

    #[test]
    fn unregister_is_idempotent() {
        let mut registry = ChannelRegistry::new();
        let a = SessionId::new();
        let b = SessionId::new();
        let (ca, _ra) = ChannelHandle::bounded(1);
        let (cb, _rb) = ChannelHandle::bounded(1);
        registry.register(&a, ca, addr(1));
        registry.register(&b, cb, addr(1));

        registry.unregister(&a, addr(1));
        registry.unregister(&a, addr(1));
        registry.unregister(&SessionId::new(), addr(1));

        // b still holds the address online
        assert_eq!(registry.online_count(), 1);
        assert_eq!(registry.session_count(), 1);
    }

    #[test]
    fn online_count_is_per_address() {
        let mut registry = ChannelRegistry::new();
        let ids: Vec<SessionId> = (0..3).map(|_| SessionId::new()).collect();
        let mut receivers = Vec::new();

        for (i, id) in ids.iter().enumerate() {
            let (channel, rx) = ChannelHandle::bounded(1);
            receivers.push(rx);
            // Two tabs from 10.0.0.1, one from 10.0.0.2
            let address = if i < 2 { addr(1) } else { addr(2) };
            registry.register(id, channel, address);
        }
        assert_eq!(registry.online_count(), 2);

        registry.unregister(&ids[0], addr(1));
        assert_eq!(registry.online_count(), 2);

        registry.unregister(&ids[1], addr(1));
        assert_eq!(registry.online_count(), 1);
    }

    #[test]
    fn address_of_registered_session() {
        let mut registry = ChannelRegistry::new();
        let id = SessionId::new();
        let (channel, _rx) = ChannelHandle::bounded(1);
        registry.register(&id, channel, addr(7));

        assert_eq!(registry.address_of(&id), Some(addr(7)));
        registry.unregister(&id, addr(7));
        assert_eq!(registry.address_of(&id), None);
    }

    #[test]
    fn unregister_uses_registered_address() {
        let mut registry = ChannelRegistry::new();
        let id = SessionId::new();
        let (channel, _rx) = ChannelHandle::bounded(1);
        registry.register(&id, channel, addr(1));

        registry.unregister(&id, addr(9));
        assert_eq!(registry.online_count(), 0);
    }

    #[test]
    fn full_queue_drops() {
        let mut registry = ChannelRegistry::new();
        let id = SessionId::new();
        let (channel, mut rx) = ChannelHandle::bounded(1);
        registry.register(&id, channel, addr(1));

        assert_eq!(registry.send(&id, &waiting()), Delivery::Delivered);
        assert_eq!(registry.send(&id, &waiting()), Delivery::Full);
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn closed_channel_is_reported() {
        let mut registry = ChannelRegistry::new();
        let id = SessionId::new();
        let (channel, rx) = ChannelHandle::bounded(1);
        registry.register(&id, channel, addr(1));
        drop(rx);

        assert_eq!(registry.send(&id, &waiting()), Delivery::Closed);
    }
}
