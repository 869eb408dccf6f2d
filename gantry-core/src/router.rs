//! Outbound routing.
//!
//! Resolves the destination of an application message and hands the body to
//! the flow controller:
//! - ROUTER: frame 0 is the destination identity and is stripped
//! - DEALER: round-robin over Active peers, skipping peers without capacity
//!
//! The round-robin cursor lives here, not in the peer table, so rotation can
//! be tested without any transport.

use bytes::Bytes;

use crate::error::GantryError;
use crate::flow::{FlowController, SendOutcome, SendPolicy};
use crate::identity::PeerIdentity;
use crate::peer::PeerTable;
use crate::socket_type::SocketType;

/// How the destination is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingMode {
    /// Frame 0 names the destination
    Identity,
    /// Next Active peer with capacity
    RoundRobin,
}

impl From<SocketType> for RoutingMode {
    fn from(ty: SocketType) -> Self {
        match ty {
            SocketType::Router => Self::Identity,
            SocketType::Dealer => Self::RoundRobin,
        }
    }
}

#[derive(Debug)]
pub struct OutboundRouter {
    mode: RoutingMode,
    cursor: usize,
}

impl OutboundRouter {
    pub fn new(mode: RoutingMode) -> Self {
        Self { mode, cursor: 0 }
    }

    pub fn mode(&self) -> RoutingMode {
        self.mode
    }

    /// Route one message.
    ///
    /// A `Park` outcome carries the message exactly as it was passed in
    /// (identity frame included) so it can be routed again later.
    pub fn route<L>(
        &mut self,
        table: &mut PeerTable<L>,
        flow: &FlowController,
        message: Vec<Bytes>,
        policy: SendPolicy,
    ) -> SendOutcome {
        match self.mode {
            RoutingMode::Identity => route_by_identity(table, flow, message, policy),
            RoutingMode::RoundRobin => self.route_round_robin(table, flow, message, policy),
        }
    }

    fn route_round_robin<L>(
        &mut self,
        table: &mut PeerTable<L>,
        flow: &FlowController,
        message: Vec<Bytes>,
        policy: SendPolicy,
    ) -> SendOutcome {
        if message.is_empty() {
            return SendOutcome::Rejected(GantryError::invalid_message("empty message"));
        }
        let n = table.active_len();
        if n == 0 {
            return flow.unroutable(GantryError::NoAvailablePeer, policy);
        }

        // The cursor may point past the end after removals; modulo skips
        // the departed peer without error.
        for step in 0..n {
            let idx = (self.cursor + step) % n;
            let Some(id) = table.active_at(idx).cloned() else {
                continue;
            };
            let Some(peer) = table.lookup_active_mut(&id) else {
                continue;
            };
            if flow.has_capacity(peer, message.len()) {
                self.cursor = (idx + 1) % n;
                return flow.enqueue(peer, message, policy);
            }
        }

        flow.full(message, policy)
    }
}

fn route_by_identity<L>(
    table: &mut PeerTable<L>,
    flow: &FlowController,
    mut message: Vec<Bytes>,
    policy: SendPolicy,
) -> SendOutcome {
    if message.len() < 2 {
        return SendOutcome::Rejected(GantryError::invalid_message(
            "ROUTER messages need an identity frame and at least one body frame",
        ));
    }
    let identity = PeerIdentity::new(message.remove(0));

    let Some(peer) = table.lookup_active_mut(&identity) else {
        return flow.unroutable(GantryError::HostUnreachable(identity), policy);
    };

    match flow.enqueue(peer, message, policy) {
        SendOutcome::Park(mut body) => {
            body.insert(0, identity.into_bytes());
            SendOutcome::Park(body)
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::DropReason;
    use crate::identity::IdentityGenerator;

    const MANDATORY: SendPolicy = SendPolicy {
        mandatory: true,
        non_blocking: false,
    };

    fn b(s: &'static str) -> Bytes {
        Bytes::from_static(s.as_bytes())
    }

    fn table_with(ids: &[&'static [u8]]) -> PeerTable<()> {
        let mut t = PeerTable::new(IdentityGenerator::new(4, 8));
        for id in ids {
            let id = PeerIdentity::from_static(*id);
            t.register(Some(id.clone()), ()).unwrap();
            t.activate(&id);
        }
        t
    }

    fn queued_to(outcome: SendOutcome) -> PeerIdentity {
        match outcome {
            SendOutcome::Queued { peer } => peer,
            other => panic!("expected queued, got {other:?}"),
        }
    }

    #[test]
    fn identity_routing_strips_envelope() {
        let mut t = table_with(&[b"w1"]);
        let flow = FlowController::new(10);
        let mut r = OutboundRouter::new(RoutingMode::Identity);

        let to = queued_to(r.route(&mut t, &flow, vec![b("w1"), b("hi"), b("")], MANDATORY));
        assert_eq!(to, PeerIdentity::from_static(b"w1"));

        let peer = t.lookup_mut(&to).unwrap();
        assert_eq!(peer.take_batch().unwrap(), vec![vec![b("hi"), b("")]]);
    }

    #[test]
    fn unknown_identity() {
        let mut t = table_with(&[b"w1"]);
        let flow = FlowController::new(10);
        let mut r = OutboundRouter::new(RoutingMode::Identity);

        let out = r.route(&mut t, &flow, vec![b("ghost"), b("x")], SendPolicy::default());
        assert!(matches!(out, SendOutcome::Dropped(DropReason::Unroutable)));

        let out = r.route(&mut t, &flow, vec![b("ghost"), b("x")], MANDATORY);
        match out {
            SendOutcome::Rejected(GantryError::HostUnreachable(id)) => {
                assert_eq!(id, PeerIdentity::from_static(b"ghost"));
            }
            other => panic!("expected HostUnreachable, got {other:?}"),
        }
    }

    #[test]
    fn router_message_needs_body() {
        let mut t = table_with(&[b"w1"]);
        let flow = FlowController::new(10);
        let mut r = OutboundRouter::new(RoutingMode::Identity);
        let out = r.route(&mut t, &flow, vec![b("w1")], MANDATORY);
        assert!(matches!(out, SendOutcome::Rejected(GantryError::InvalidMessage(_))));
    }

    #[test]
    fn parked_router_message_keeps_identity() {
        let mut t = table_with(&[b"w1"]);
        let flow = FlowController::new(1);
        let mut r = OutboundRouter::new(RoutingMode::Identity);
        r.route(&mut t, &flow, vec![b("w1"), b("a")], MANDATORY);
        match r.route(&mut t, &flow, vec![b("w1"), b("b")], MANDATORY) {
            SendOutcome::Park(msg) => assert_eq!(msg, vec![b("w1"), b("b")]),
            other => panic!("expected park, got {other:?}"),
        }
    }

    #[test]
    fn round_robin_rotates() {
        let mut t = table_with(&[b"a", b"b", b"c"]);
        let flow = FlowController::new(0);
        let mut r = OutboundRouter::new(RoutingMode::RoundRobin);

        let order: Vec<_> = (0..6)
            .map(|_| queued_to(r.route(&mut t, &flow, vec![b("m")], MANDATORY)))
            .collect();
        let expected: Vec<PeerIdentity> = [b"a", b"b", b"c", b"a", b"b", b"c"]
            .iter()
            .map(|id| PeerIdentity::from_static(*id))
            .collect();
        assert_eq!(order, expected);
    }

    #[test]
    fn round_robin_skips_removed_and_full_peers() {
        let mut t = table_with(&[b"a", b"b", b"c"]);
        let flow = FlowController::new(1);
        let mut r = OutboundRouter::new(RoutingMode::RoundRobin);

        // a gets one frame and is now full.
        queued_to(r.route(&mut t, &flow, vec![b("1")], MANDATORY));
        // b leaves mid-rotation.
        t.remove(&PeerIdentity::from_static(b"b"));

        let to = queued_to(r.route(&mut t, &flow, vec![b("2")], MANDATORY));
        assert_eq!(to, PeerIdentity::from_static(b"c"));

        // Everyone is full now.
        assert!(matches!(
            r.route(&mut t, &flow, vec![b("3")], MANDATORY),
            SendOutcome::Park(_)
        ));
    }

    #[test]
    fn round_robin_without_peers() {
        let mut t = table_with(&[]);
        let flow = FlowController::new(10);
        let mut r = OutboundRouter::new(RoutingMode::RoundRobin);

        let out = r.route(&mut t, &flow, vec![b("m")], MANDATORY);
        assert!(matches!(out, SendOutcome::Rejected(GantryError::NoAvailablePeer)));
        let out = r.route(&mut t, &flow, vec![b("m")], SendPolicy::default());
        assert!(matches!(out, SendOutcome::Dropped(DropReason::Unroutable)));
    }
}
