//! Pairing & relay engine.
//!
//! Owns the waiting queue, the pair table and the channel registry under a
//! single lock, so every lifecycle event (connect, relay, next, disconnect)
//! is applied as one atomic transition. Outbound messages are queued on the
//! registry's bounded channels while the lock is held; that never waits on
//! network I/O. A session whose queue is full has fallen behind and is
//! disconnected before the lock is released, so a client never misses a
//! state change it was meant to see.
//!
//! ```text
//!   connect ──► Waiting ──(partner arrives)──► Matched
//!                  ▲                              │
//!                  └──────────── next ────────────┤
//!   Idle ◄── partner sent next / disconnected ────┘
//!   Idle ──── next ───► Waiting | Matched
//!   any  ──── disconnect ───► Closed
//! ```

mod state;


pub use state::{PairTable, WaitingQueue};

use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use tandem_common::SessionId;

use crate::protocol::{ClientMessage, ServerMessage, Signal};
use crate::registry::{ChannelHandle, ChannelRegistry, Delivery};

/// Where a session currently sits in the pairing lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Queued for a partner.
    Waiting,
    /// Paired; signals are relayed.
    Matched,
    /// Connected but neither queued nor paired, e.g. after the partner left.
    /// Leaves this state when the client sends `next`.
    Idle,
    /// Not connected.
    Closed,
}

/// Point-in-time counters, served by the health endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStats {
    pub online_count: usize,
    pub sessions: usize,
    pub waiting: usize,
    pub pairs: usize,
}

/// Everything the engine mutates, kept together under one lock.
struct EngineState {
    registry: ChannelRegistry,
    waiting: WaitingQueue,
    pairs: PairTable,
    /// Sessions whose queue overflowed during the current transition.
    lagging: Vec<SessionId>,
}

impl EngineState {
    fn new(registry: ChannelRegistry) -> Self {
        Self {
            registry,
            waiting: WaitingQueue::default(),
            pairs: PairTable::default(),
            lagging: Vec::new(),
        }
    }

    /// Queue `message` for `id`, remembering the session if its queue is full.
    fn emit(&mut self, id: &SessionId, message: &ServerMessage) -> Delivery {
        let delivery = self.registry.send(id, message);
        if delivery == Delivery::Full && !self.lagging.contains(id) {
            self.lagging.push(id.clone());
        }
        delivery
    }

    /// Disconnect every session that could not keep up. Cascades when the
    /// partner of a lagging session is itself full.
    fn drop_lagging(&mut self) {
        while let Some(id) = self.lagging.pop() {
            let Some(address) = self.registry.address_of(&id) else {
                continue;
            };
            warn!(session = %id, peer = %address, "Outbound queue full, disconnecting session");
            self.disconnect(&id, address);
        }
    }

    fn connect(&mut self, id: &SessionId, channel: ChannelHandle, address: IpAddr) -> bool {
        if !self.registry.register(id, channel, address) {
            return false;
        }
        let online_count = self.registry.online_count();
        info!(session = %id, peer = %address, online = online_count, "Session connected");

        self.emit(
            id,
            &ServerMessage::Connected {
                user_id: id.clone(),
                online_count,
            },
        );
        self.attempt_pair(id);
        true
    }

    /// Match `id` with the longest-waiting session, or queue it.
    ///
    /// `id` must be neither queued nor paired. The arriving side always
    /// creates the offer.
    fn attempt_pair(&mut self, id: &SessionId) {
        let online_count = self.registry.online_count();

        let Some(partner) = self.waiting.pop_front() else {
            self.waiting.push_back(id.clone());
            debug!(session = %id, "Session waiting for a partner");
            self.emit(id, &ServerMessage::Waiting { online_count });
            return;
        };

        let linked = self.pairs.link(id.clone(), partner.clone());
        debug_assert!(linked, "queued session {partner} was already paired");
        if !linked {
            warn!(session = %id, partner = %partner, "Refused to pair, partner already paired");
            return;
        }
        info!(session = %id, partner = %partner, "Sessions matched");

        self.emit(
            id,
            &ServerMessage::Matched {
                partner_id: partner.clone(),
                should_create_offer: true,
                online_count,
            },
        );
        self.emit(
            &partner,
            &ServerMessage::Matched {
                partner_id: id.clone(),
                should_create_offer: false,
                online_count,
            },
        );
    }

    fn relay(&mut self, id: &SessionId, signal: Signal) -> Delivery {
        let Some(partner) = self.pairs.partner_of(id).cloned() else {
            debug!(session = %id, kind = signal.kind.as_str(), "No partner, signal dropped");
            return Delivery::NoRecipient;
        };
        debug!(session = %id, partner = %partner, kind = signal.kind.as_str(), "Relaying signal");
        self.emit(&partner, &ServerMessage::relayed(id, signal))
    }

    fn next(&mut self, id: &SessionId) {
        if !self.registry.is_registered(id) {
            debug!(session = %id, "next from unknown session ignored");
            return;
        }
        if self.waiting.contains(id) {
            debug!(session = %id, "next while already waiting ignored");
            return;
        }

        if let Some(partner) = self.pairs.unlink(id) {
            info!(session = %id, partner = %partner, "Session skipped partner");
            let online_count = self.registry.online_count();
            self.emit(&partner, &ServerMessage::PartnerNext { online_count });
        }
        self.attempt_pair(id);
    }

    fn disconnect(&mut self, id: &SessionId, address: IpAddr) {
        self.waiting.remove(id);

        if let Some(partner) = self.pairs.unlink(id) {
            let online_count = self.registry.online_count();
            self.emit(&partner, &ServerMessage::PartnerDisconnected { online_count });
        }

        if self.registry.is_registered(id) {
            self.registry.unregister(id, address);
            info!(
                session = %id,
                peer = %address,
                online = self.registry.online_count(),
                "Session disconnected"
            );
        }
    }

    fn phase(&self, id: &SessionId) -> SessionPhase {
        if !self.registry.is_registered(id) {
            SessionPhase::Closed
        } else if self.waiting.contains(id) {
            SessionPhase::Waiting
        } else if self.pairs.contains(id) {
            SessionPhase::Matched
        } else {
            SessionPhase::Idle
        }
    }

    fn stats(&self) -> EngineStats {
        EngineStats {
            online_count: self.registry.online_count(),
            sessions: self.registry.session_count(),
            waiting: self.waiting.len(),
            pairs: self.pairs.pair_count(),
        }
    }

    /// Queue/pair disjointness, pair symmetry, and no entries for
    /// unregistered sessions.
    pub(crate) fn check_invariants(&self) -> Result<(), String> {
        let mut seen = HashSet::new();
        for id in self.waiting.iter() {
            if !seen.insert(id) {
                return Err(format!("{id} queued twice"));
            }
            if self.pairs.contains(id) {
                return Err(format!("{id} is both waiting and paired"));
            }
            if !self.registry.is_registered(id) {
                return Err(format!("{id} is waiting but not registered"));
            }
        }
        for (a, b) in self.pairs.iter() {
            if a == b {
                return Err(format!("{a} is paired with itself"));
            }
            if self.pairs.partner_of(b) != Some(a) {
                return Err(format!("pair {a} -> {b} has no mirror"));
            }
            if !self.registry.is_registered(a) {
                return Err(format!("{a} is paired but not registered"));
            }
        }
        Ok(())
    }
}

/// Handle to the shared engine. Cloning is cheap; all clones drive the
/// same state.
#[derive(Clone)]
pub struct PairingEngine {
    state: Arc<Mutex<EngineState>>,
}

impl PairingEngine {
    pub fn new(registry: ChannelRegistry) -> Self {
        Self {
            state: Arc::new(Mutex::new(EngineState::new(registry))),
        }
    }

    async fn transition<R>(&self, apply: impl FnOnce(&mut EngineState) -> R) -> R {
        let mut state = self.state.lock().await;
        let result = apply(&mut *state);
        state.drop_lagging();
        debug_assert_eq!(state.check_invariants(), Ok(()));
        result
    }

    /// Register a new session, greet it with `connected`, then pair or
    /// queue it. Returns false if the ID was already registered.
    pub async fn connect(&self, id: &SessionId, channel: ChannelHandle, address: IpAddr) -> bool {
        self.transition(|state| state.connect(id, channel, address))
            .await
    }

    /// Parse one inbound text frame and act on it.
    pub async fn handle_text(&self, id: &SessionId, text: &str) {
        match ClientMessage::parse(text) {
            ClientMessage::Next => self.next(id).await,
            ClientMessage::Unknown => {
                debug!(session = %id, "Ignoring unrecognised message");
            }
            message => {
                if let Some(signal) = message.into_signal() {
                    self.relay(id, signal).await;
                }
            }
        }
    }

    /// Forward a signal to the sender's partner, stamped with `from`.
    /// Dropped silently when there is no partner or its channel is gone;
    /// a partner with a full queue is disconnected.
    pub async fn relay(&self, id: &SessionId, signal: Signal) -> Delivery {
        self.transition(|state| state.relay(id, signal)).await
    }

    /// Leave the current partner (who is told `partner-next` and left idle)
    /// and look for a new one.
    pub async fn next(&self, id: &SessionId) {
        self.transition(|state| state.next(id)).await
    }

    /// Purge the session from the queue, the pair table and the registry.
    /// A former partner is told `partner-disconnected` and left idle.
    pub async fn disconnect(&self, id: &SessionId, address: IpAddr) {
        self.transition(|state| state.disconnect(id, address))
            .await
    }

    pub async fn phase(&self, id: &SessionId) -> SessionPhase {
        self.state.lock().await.phase(id)
    }

    pub async fn partner_of(&self, id: &SessionId) -> Option<SessionId> {
        self.state.lock().await.pairs.partner_of(id).cloned()
    }

    /// Queued sessions, head first.
    pub async fn waiting_ids(&self) -> Vec<SessionId> {
        self.state.lock().await.waiting.iter().cloned().collect()
    }

    pub async fn stats(&self) -> EngineStats {
        self.state.lock().await.stats()
    }

    #[cfg(test)]
    pub(crate) async fn check_invariants(&self) -> Result<(), String> {
        self.state.lock().await.check_invariants()
    }
}
