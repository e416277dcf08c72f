//! Waiting queue and pair table.

use std::collections::{HashMap, VecDeque};

use tandem_common::SessionId;

/// FIFO of unmatched sessions. Holds each session at most once.
#[derive(Debug, Default)]
pub struct WaitingQueue {
    order: VecDeque<SessionId>,
}

impl WaitingQueue {
    /// Append to the tail. Returns false if `id` is already queued.
    pub fn push_back(&mut self, id: SessionId) -> bool {
        if self.contains(&id) {
            return false;
        }
        self.order.push_back(id);
        true
    }

    pub fn pop_front(&mut self) -> Option<SessionId> {
        self.order.pop_front()
    }

    /// Remove `id` wherever it sits. Returns whether it was queued.
    pub fn remove(&mut self, id: &SessionId) -> bool {
        let before = self.order.len();
        self.order.retain(|queued| queued != id);
        self.order.len() != before
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.order.iter().any(|queued| queued == id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SessionId> {
        self.order.iter()
    }
}

/// Symmetric session → partner map. Entries exist in mirrored pairs.
#[derive(Debug, Default)]
pub struct PairTable {
    partners: HashMap<SessionId, SessionId>,
}

impl PairTable {
    /// Pair `a` with `b`. Refuses self-pairs and sessions already paired.
    pub fn link(&mut self, a: SessionId, b: SessionId) -> bool {
        if a == b || self.partners.contains_key(&a) || self.partners.contains_key(&b) {
            return false;
        }
        self.partners.insert(a.clone(), b.clone());
        self.partners.insert(b, a);
        true
    }

    /// Dissolve the pair containing `id`, returning the former partner.
    pub fn unlink(&mut self, id: &SessionId) -> Option<SessionId> {
        let partner = self.partners.remove(id)?;
        self.partners.remove(&partner);
        Some(partner)
    }

    pub fn partner_of(&self, id: &SessionId) -> Option<&SessionId> {
        self.partners.get(id)
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.partners.contains_key(id)
    }

    /// Number of pairs (half the number of entries).
    pub fn pair_count(&self) -> usize {
        self.partners.len() / 2
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SessionId, &SessionId)> {
        self.partners.iter()
    }
}
