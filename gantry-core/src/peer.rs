//! Peer table.
//!
//! Tracks every peer connection by identity together with its link handle
//! and its outbound queue. The table is owned by a single task (the socket
//! reactor); holding `&mut PeerTable` is what makes lookups and iteration
//! snapshot-consistent, so a removed identity is simply not found.
//!
//! `L` is the live connection handle. The routing core never looks inside it.

use bytes::Bytes;
use hashbrown::{HashMap, HashSet};
use std::collections::VecDeque;

use crate::error::{GantryError, Result};
use crate::identity::{IdentityGenerator, PeerIdentity};

/// Per-peer connection state. Only the lifecycle manager moves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Connecting,
    Active,
    Draining,
    Closed,
}

/// One peer connection and its outbound queue.
#[derive(Debug)]
pub struct Peer<L> {
    identity: PeerIdentity,
    link: L,
    state: PeerState,
    queue: VecDeque<Vec<Bytes>>,
    queued_frames: usize,
    in_flight_frames: usize,
}

impl<L> Peer<L> {
    fn new(identity: PeerIdentity, link: L) -> Self {
        Self {
            identity,
            link,
            state: PeerState::Connecting,
            queue: VecDeque::new(),
            queued_frames: 0,
            in_flight_frames: 0,
        }
    }

    pub fn identity(&self) -> &PeerIdentity {
        &self.identity
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    pub fn state(&self) -> PeerState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: PeerState) {
        self.state = state;
    }

    /// Frames accepted but not yet confirmed written (queued plus in flight).
    pub fn pending_frames(&self) -> usize {
        self.queued_frames + self.in_flight_frames
    }

    /// Nothing queued and nothing in flight.
    pub fn is_idle(&self) -> bool {
        self.pending_frames() == 0
    }

    pub(crate) fn push_message(&mut self, frames: Vec<Bytes>) {
        self.queued_frames += frames.len();
        self.queue.push_back(frames);
    }

    /// Move the whole queue into flight.
    ///
    /// Returns `None` while a previous batch is still being written, so at
    /// most one batch per peer is outstanding.
    pub fn take_batch(&mut self) -> Option<Vec<Vec<Bytes>>> {
        if self.in_flight_frames > 0 || self.queue.is_empty() {
            return None;
        }
        self.in_flight_frames = self.queued_frames;
        self.queued_frames = 0;
        Some(self.queue.drain(..).collect())
    }

    /// The outstanding batch reached the transport.
    pub fn complete_flush(&mut self) {
        self.in_flight_frames = 0;
    }

    /// Discard everything queued; returns the number of dropped frames.
    pub fn discard_queue(&mut self) -> usize {
        let dropped = self.pending_frames();
        self.queue.clear();
        self.queued_frames = 0;
        self.in_flight_frames = 0;
        dropped
    }

    pub fn into_link(self) -> L {
        self.link
    }
}

/// Identity-keyed table of live peers.
pub struct PeerTable<L> {
    peers: HashMap<PeerIdentity, Peer<L>>,
    // Active peers in activation order; the round-robin cursor indexes this.
    active: Vec<PeerIdentity>,
    // Generated identities already handed out; never reissued.
    retired: HashSet<PeerIdentity>,
    generator: IdentityGenerator,
}

impl<L> PeerTable<L> {
    pub fn new(generator: IdentityGenerator) -> Self {
        Self {
            peers: HashMap::new(),
            active: Vec::new(),
            retired: HashSet::new(),
            generator,
        }
    }

    /// Insert a peer in `Connecting` state.
    ///
    /// Without a supplied identity one is generated, skipping live and
    /// retired identities, up to the generator's retry bound.
    pub fn register(&mut self, identity: Option<PeerIdentity>, link: L) -> Result<&mut Peer<L>> {
        let identity = match identity {
            Some(id) => {
                if self.peers.contains_key(&id) {
                    return Err(GantryError::IdentityInUse(id));
                }
                id
            }
            None => {
                let peers = &self.peers;
                let retired = &self.retired;
                let id = self
                    .generator
                    .generate(|c| peers.contains_key(c) || retired.contains(c))?;
                self.retired.insert(id.clone());
                id
            }
        };

        tracing::trace!(identity = %identity, "peer registered");
        Ok(self
            .peers
            .entry(identity.clone())
            .or_insert_with(|| Peer::new(identity, link)))
    }

    /// Live peer by identity (any state but `Closed`).
    pub fn lookup(&self, identity: &PeerIdentity) -> Option<&Peer<L>> {
        self.peers.get(identity)
    }

    pub fn lookup_mut(&mut self, identity: &PeerIdentity) -> Option<&mut Peer<L>> {
        self.peers.get_mut(identity)
    }

    /// Active peer by identity; Connecting or Draining peers are not routable.
    pub fn lookup_active_mut(&mut self, identity: &PeerIdentity) -> Option<&mut Peer<L>> {
        self.peers
            .get_mut(identity)
            .filter(|p| p.state == PeerState::Active)
    }

    /// Remove a peer, marking it `Closed`.
    pub fn remove(&mut self, identity: &PeerIdentity) -> Option<Peer<L>> {
        let mut peer = self.peers.remove(identity)?;
        self.deactivate(identity);
        peer.set_state(PeerState::Closed);
        Some(peer)
    }

    pub fn contains(&self, identity: &PeerIdentity) -> bool {
        self.peers.contains_key(identity)
    }

    /// Active peers in rotation order.
    pub fn iter_active(&self) -> impl Iterator<Item = &Peer<L>> + '_ {
        self.active.iter().filter_map(|id| self.peers.get(id))
    }

    /// All live peers regardless of state.
    pub fn iter(&self) -> impl Iterator<Item = &Peer<L>> + '_ {
        self.peers.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Peer<L>> + '_ {
        self.peers.values_mut()
    }

    pub fn identities(&self) -> Vec<PeerIdentity> {
        self.peers.keys().cloned().collect()
    }

    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    /// Identity at `index` of the rotation order.
    pub fn active_at(&self, index: usize) -> Option<&PeerIdentity> {
        self.active.get(index)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub(crate) fn activate(&mut self, identity: &PeerIdentity) -> bool {
        match self.peers.get_mut(identity) {
            Some(peer) if peer.state == PeerState::Connecting => {
                peer.set_state(PeerState::Active);
                self.active.push(identity.clone());
                true
            }
            _ => false,
        }
    }

    pub(crate) fn set_draining(&mut self, identity: &PeerIdentity) {
        if let Some(peer) = self.peers.get_mut(identity) {
            peer.set_state(PeerState::Draining);
        }
        self.deactivate(identity);
    }

    fn deactivate(&mut self, identity: &PeerIdentity) {
        if let Some(pos) = self.active.iter().position(|x| x == identity) {
            self.active.remove(pos);
        }
    }
}

impl<L> std::fmt::Debug for PeerTable<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerTable")
            .field("peers", &self.peers.len())
            .field("active", &self.active)
            .field("retired", &self.retired.len())
            .finish()
    }
}
