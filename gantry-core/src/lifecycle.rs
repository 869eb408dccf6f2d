//! Connection lifecycle.
//!
//! Drives every peer through `Connecting -> Active -> Draining -> Closed`
//! and is the only writer of `PeerState`. A completed handshake registers
//! the peer, resolves identity conflicts (handover or rejection) and queues
//! the probe when enabled.

use bytes::Bytes;

use crate::error::{GantryError, Result};
use crate::identity::PeerIdentity;
use crate::options::SocketOptions;
use crate::peer::{Peer, PeerState, PeerTable};
use crate::socket_type::SocketType;

/// What a completed handshake produced.
#[derive(Debug)]
pub struct Connected<L> {
    pub identity: PeerIdentity,
    /// Prior holder of the identity, evicted by handover. Dropping its link
    /// force-closes the old connection.
    pub evicted: Option<Peer<L>>,
    /// A zero-length probe message was queued for the new peer.
    pub probed: bool,
}

#[derive(Debug, Clone)]
pub struct ConnectionLifecycle {
    socket_type: SocketType,
    handover: bool,
    probe: bool,
}

impl ConnectionLifecycle {
    pub fn new(socket_type: SocketType, options: &SocketOptions) -> Self {
        Self {
            socket_type,
            handover: options.router_handover,
            probe: options.probe_router,
        }
    }

    /// Pick up option changes made after construction.
    pub fn reconfigure(&mut self, options: &SocketOptions) {
        self.handover = options.router_handover;
        self.probe = options.probe_router;
    }

    /// Handshake completed: register the peer and make it Active.
    ///
    /// `announced` is the identity the peer sent in its READY. It is only
    /// honoured by ROUTER sockets; an empty one means "generate".
    pub fn on_connected<L>(
        &self,
        table: &mut PeerTable<L>,
        announced: Option<Bytes>,
        link: L,
    ) -> Result<Connected<L>> {
        let supplied = match announced {
            Some(id) if !id.is_empty() && self.socket_type.exposes_identities() => {
                SocketOptions::validate_router_identity(&id)
                    .map_err(|e| GantryError::protocol(format!("announced identity: {e}")))?;
                Some(PeerIdentity::new(id))
            }
            _ => None,
        };

        let mut evicted = None;
        if let Some(id) = &supplied {
            if table.contains(id) {
                if !self.handover {
                    tracing::debug!(identity = %id, "rejecting duplicate identity");
                    return Err(GantryError::IdentityInUse(id.clone()));
                }
                evicted = table.remove(id);
                if let Some(old) = evicted.as_mut() {
                    let dropped = old.discard_queue();
                    tracing::debug!(identity = %id, dropped, "handover evicted prior peer");
                }
            }
        }

        let peer = table.register(supplied, link)?;
        let identity = peer.identity().clone();
        table.activate(&identity);

        let mut probed = false;
        if self.probe {
            if let Some(peer) = table.lookup_mut(&identity) {
                peer.push_message(vec![Bytes::new()]);
                probed = true;
            }
        }

        tracing::debug!(identity = %identity, probed, "peer active");
        Ok(Connected {
            identity,
            evicted,
            probed,
        })
    }

    /// Transport went away: the peer is Closed and its queue discarded.
    pub fn on_disconnected<L>(
        &self,
        table: &mut PeerTable<L>,
        identity: &PeerIdentity,
    ) -> Option<Peer<L>> {
        let mut peer = table.remove(identity)?;
        let dropped = peer.discard_queue();
        tracing::debug!(identity = %identity, dropped, "peer closed");
        Some(peer)
    }

    /// Socket close requested: every live peer starts draining.
    pub fn begin_drain<L>(&self, table: &mut PeerTable<L>) -> usize {
        let ids = table.identities();
        for id in &ids {
            table.set_draining(id);
        }
        ids.len()
    }

    /// Remove draining peers whose queues are flushed.
    pub fn take_drained<L>(&self, table: &mut PeerTable<L>) -> Vec<Peer<L>> {
        let done: Vec<PeerIdentity> = table
            .iter()
            .filter(|p| p.state() == PeerState::Draining && p.is_idle())
            .map(|p| p.identity().clone())
            .collect();
        done.iter().filter_map(|id| table.remove(id)).collect()
    }

    /// Linger expired: close everything, discarding what is left.
    pub fn close_all<L>(&self, table: &mut PeerTable<L>) -> Vec<Peer<L>> {
        table
            .identities()
            .iter()
            .filter_map(|id| self.on_disconnected(table, id))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::{FlowController, SendOutcome, SendPolicy};
    use crate::identity::IdentityGenerator;
    use crate::router::{OutboundRouter, RoutingMode};

    fn table() -> PeerTable<&'static str> {
        PeerTable::new(IdentityGenerator::new(4, 16))
    }

    fn router(opts: &SocketOptions) -> ConnectionLifecycle {
        ConnectionLifecycle::new(SocketType::Router, opts)
    }

    #[test]
    fn connect_activates_peer() {
        let mut t = table();
        let lc = router(&SocketOptions::default());
        let c = lc.on_connected(&mut t, None, "link").unwrap();
        assert!(c.identity.is_generated());
        assert!(!c.probed);
        assert_eq!(t.lookup(&c.identity).unwrap().state(), PeerState::Active);
        assert!(t.lookup(&c.identity).unwrap().is_idle());
    }

    #[test]
    fn probe_queues_empty_message() {
        let mut t = table();
        let lc = router(&SocketOptions::default().with_probe_router(true));
        let c = lc
            .on_connected(&mut t, Some(Bytes::from_static(b"w1")), "link")
            .unwrap();
        assert!(c.probed);
        let peer = t.lookup_mut(&c.identity).unwrap();
        assert_eq!(peer.take_batch().unwrap(), vec![vec![Bytes::new()]]);
    }

    #[test]
    fn duplicate_identity_without_handover_is_rejected() {
        let mut t = table();
        let lc = router(&SocketOptions::default());
        let id = Bytes::from_static(b"same");
        lc.on_connected(&mut t, Some(id.clone()), "first").unwrap();

        let err = lc.on_connected(&mut t, Some(id), "second").unwrap_err();
        assert!(matches!(err, GantryError::IdentityInUse(_)));
        let kept = t.lookup(&PeerIdentity::from_static(b"same")).unwrap();
        assert_eq!(*kept.link(), "first");
    }

    #[test]
    fn handover_evicts_prior_peer() {
        let mut t = table();
        let lc = router(&SocketOptions::default().with_router_handover(true));
        let id = Bytes::from_static(b"same");
        lc.on_connected(&mut t, Some(id.clone()), "first").unwrap();

        let c = lc.on_connected(&mut t, Some(id), "second").unwrap();
        let old = c.evicted.expect("prior peer evicted");
        assert_eq!(old.state(), PeerState::Closed);
        assert_eq!(old.into_link(), "first");
        assert_eq!(*t.lookup(&c.identity).unwrap().link(), "second");
        assert_eq!(t.active_len(), 1);
    }

    #[test]
    fn dealer_ignores_announced_identity() {
        let mut t = table();
        let lc = ConnectionLifecycle::new(SocketType::Dealer, &SocketOptions::default());
        let c = lc
            .on_connected(&mut t, Some(Bytes::from_static(b"router-1")), "link")
            .unwrap();
        assert!(c.identity.is_generated());
    }

    #[test]
    fn reserved_announced_identity_is_a_protocol_violation() {
        let mut t = table();
        let lc = router(&SocketOptions::default());
        let err = lc
            .on_connected(&mut t, Some(Bytes::from_static(b"\x00abc")), "link")
            .unwrap_err();
        assert!(matches!(err, GantryError::ProtocolViolation(_)));
        assert!(t.is_empty());
    }

    #[test]
    fn disconnect_drops_only_that_queue() {
        let mut t = table();
        let lc = router(&SocketOptions::default());
        let flow = FlowController::new(100);
        let mut r = OutboundRouter::new(RoutingMode::Identity);
        let policy = SendPolicy::default();

        let a = lc.on_connected(&mut t, Some(Bytes::from_static(b"a")), "a").unwrap().identity;
        let b = lc.on_connected(&mut t, Some(Bytes::from_static(b"b")), "b").unwrap().identity;
        for id in [&a, &b] {
            let msg = vec![id.clone().into_bytes(), Bytes::from_static(b"x")];
            assert!(matches!(r.route(&mut t, &flow, msg, policy), SendOutcome::Queued { .. }));
        }

        let gone = lc.on_disconnected(&mut t, &a).unwrap();
        assert_eq!(gone.state(), PeerState::Closed);
        assert!(gone.is_idle());
        assert_eq!(t.lookup(&b).unwrap().pending_frames(), 1);

        // The departed identity is now unroutable.
        let msg = vec![a.into_bytes(), Bytes::from_static(b"y")];
        let out = r.route(&mut t, &flow, msg, SendPolicy { mandatory: true, non_blocking: false });
        assert!(matches!(out, SendOutcome::Rejected(GantryError::HostUnreachable(_))));
    }

    #[test]
    fn drain_waits_for_flush() {
        let mut t = table();
        let lc = router(&SocketOptions::default().with_probe_router(true));
        let busy = lc.on_connected(&mut t, None, "busy").unwrap().identity;
        let idle = {
            let lc = router(&SocketOptions::default());
            lc.on_connected(&mut t, None, "idle").unwrap().identity
        };

        assert_eq!(lc.begin_drain(&mut t), 2);
        assert_eq!(t.active_len(), 0);

        let drained = lc.take_drained(&mut t);
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].identity(), &idle);

        let peer = t.lookup_mut(&busy).unwrap();
        assert_eq!(peer.state(), PeerState::Draining);
        peer.take_batch();
        peer.complete_flush();
        assert_eq!(lc.take_drained(&mut t).len(), 1);
        assert!(t.is_empty());
    }

    #[test]
    fn close_all_discards_queues() {
        let mut t = table();
        let lc = router(&SocketOptions::default().with_probe_router(true));
        lc.on_connected(&mut t, None, "a").unwrap();
        lc.on_connected(&mut t, None, "b").unwrap();
        lc.begin_drain(&mut t);
        let closed = lc.close_all(&mut t);
        assert_eq!(closed.len(), 2);
        assert!(closed.iter().all(|p| p.state() == PeerState::Closed && p.is_idle()));
        assert!(t.is_empty());
    }
}
