//! Flow control.
//!
//! Enforces the per-peer high-water mark on queued-but-unsent frames and
//! decides what happens to a message that cannot be queued:
//!
//! | mandatory | queue full                          | unroutable        |
//! |-----------|-------------------------------------|-------------------|
//! | false     | drop, report success                | drop, report success |
//! | true      | park (blocking) / `ResourceUnavailable` | `HostUnreachable` / `NoAvailablePeer` |
//!
//! The mark counts frames handed to the writer until it confirms them, and
//! the writer only confirms after the runtime has polled for I/O. A blocking
//! send that finds the queue full is therefore parked under either policy;
//! without `mandatory` the waiter bounds the wait and drops the message if
//! the queue is still full when it gives up.

use bytes::Bytes;

use crate::error::GantryError;
use crate::identity::PeerIdentity;
use crate::peer::Peer;

/// Effective delivery policy of one send.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendPolicy {
    pub mandatory: bool,
    pub non_blocking: bool,
}

/// Why a message was silently discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    Unroutable,
    QueueFull,
}

/// Result of routing one message.
#[derive(Debug)]
pub enum SendOutcome {
    /// Queued on the peer's outbound queue.
    Queued { peer: PeerIdentity },
    /// Discarded; the send still reports success.
    Dropped(DropReason),
    /// The caller must wait for queue space; carries the original message.
    Park(Vec<Bytes>),
    /// The send fails with this error.
    Rejected(GantryError),
}

impl SendOutcome {
    /// Whether the send call reports success now.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Queued { .. } | Self::Dropped(_))
    }
}

/// High-water-mark enforcement.
#[derive(Debug, Clone, Copy)]
pub struct FlowController {
    hwm: usize,
}

impl FlowController {
    /// `hwm` is in frames; `0` disables the limit.
    pub const fn new(hwm: usize) -> Self {
        Self { hwm }
    }

    pub const fn hwm(&self) -> usize {
        self.hwm
    }

    pub fn set_hwm(&mut self, hwm: usize) {
        self.hwm = hwm;
    }

    /// Whether `frames` more frames fit under the mark.
    ///
    /// An empty queue always admits, so a message larger than the mark can
    /// still be sent on its own.
    pub fn has_capacity<L>(&self, peer: &Peer<L>, frames: usize) -> bool {
        let pending = peer.pending_frames();
        self.hwm == 0 || pending == 0 || pending + frames <= self.hwm
    }

    /// Queue `frames` on `peer`, or apply the full-queue policy.
    pub fn enqueue<L>(
        &self,
        peer: &mut Peer<L>,
        frames: Vec<Bytes>,
        policy: SendPolicy,
    ) -> SendOutcome {
        if self.has_capacity(peer, frames.len()) {
            peer.push_message(frames);
            return SendOutcome::Queued {
                peer: peer.identity().clone(),
            };
        }
        tracing::trace!(
            identity = %peer.identity(),
            pending = peer.pending_frames(),
            hwm = self.hwm,
            "peer queue at high-water mark"
        );
        self.full(frames, policy)
    }

    /// Full-queue row of the policy matrix.
    pub fn full(&self, message: Vec<Bytes>, policy: SendPolicy) -> SendOutcome {
        match (policy.non_blocking, policy.mandatory) {
            (false, _) => SendOutcome::Park(message),
            (true, false) => SendOutcome::Dropped(DropReason::QueueFull),
            (true, true) => SendOutcome::Rejected(GantryError::ResourceUnavailable),
        }
    }

    /// Unroutable row of the policy matrix.
    pub fn unroutable(&self, error: GantryError, policy: SendPolicy) -> SendOutcome {
        if policy.mandatory {
            SendOutcome::Rejected(error)
        } else {
            tracing::trace!(%error, "dropping unroutable message");
            SendOutcome::Dropped(DropReason::Unroutable)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::IdentityGenerator;
    use crate::peer::PeerTable;

    const BLOCKING: SendPolicy = SendPolicy {
        mandatory: true,
        non_blocking: false,
    };
    const NON_BLOCKING: SendPolicy = SendPolicy {
        mandatory: true,
        non_blocking: true,
    };
    const LENIENT: SendPolicy = SendPolicy {
        mandatory: false,
        non_blocking: false,
    };
    const LENIENT_NON_BLOCKING: SendPolicy = SendPolicy {
        mandatory: false,
        non_blocking: true,
    };

    fn frames(n: usize) -> Vec<Bytes> {
        (0..n).map(|_| Bytes::from_static(b"x")).collect()
    }

    fn peer_table() -> (PeerTable<()>, PeerIdentity) {
        let mut t = PeerTable::new(IdentityGenerator::new(4, 8));
        let id = t.register(None, ()).unwrap().identity().clone();
        (t, id)
    }

    #[test]
    fn queues_under_the_mark() {
        let (mut t, id) = peer_table();
        let flow = FlowController::new(4);
        let peer = t.lookup_mut(&id).unwrap();
        assert!(matches!(
            flow.enqueue(peer, frames(2), BLOCKING),
            SendOutcome::Queued { .. }
        ));
        assert!(matches!(
            flow.enqueue(peer, frames(2), BLOCKING),
            SendOutcome::Queued { .. }
        ));
        assert_eq!(peer.pending_frames(), 4);
    }

    #[test]
    fn full_queue_policy_matrix() {
        let (mut t, id) = peer_table();
        let flow = FlowController::new(2);
        let peer = t.lookup_mut(&id).unwrap();
        flow.enqueue(peer, frames(2), LENIENT);

        let dropped = flow.enqueue(peer, frames(1), LENIENT_NON_BLOCKING);
        assert!(matches!(dropped, SendOutcome::Dropped(DropReason::QueueFull)));
        assert!(dropped.is_success());

        // Blocking sends wait for the writer first, mandatory or not.
        match flow.enqueue(peer, frames(3), LENIENT) {
            SendOutcome::Park(msg) => assert_eq!(msg.len(), 3),
            other => panic!("expected park, got {other:?}"),
        }

        let rejected = flow.enqueue(peer, frames(1), NON_BLOCKING);
        assert!(matches!(
            rejected,
            SendOutcome::Rejected(GantryError::ResourceUnavailable)
        ));

        match flow.enqueue(peer, frames(1), BLOCKING) {
            SendOutcome::Park(msg) => assert_eq!(msg.len(), 1),
            other => panic!("expected park, got {other:?}"),
        }
        assert_eq!(peer.pending_frames(), 2);
    }

    #[test]
    fn oversize_message_admitted_on_empty_queue() {
        let (mut t, id) = peer_table();
        let flow = FlowController::new(2);
        let peer = t.lookup_mut(&id).unwrap();
        assert!(matches!(
            flow.enqueue(peer, frames(5), BLOCKING),
            SendOutcome::Queued { .. }
        ));
        assert!(!flow.has_capacity(peer, 1));
    }

    #[test]
    fn zero_mark_is_unlimited() {
        let (mut t, id) = peer_table();
        let flow = FlowController::new(0);
        let peer = t.lookup_mut(&id).unwrap();
        for _ in 0..100 {
            flow.enqueue(peer, frames(10), BLOCKING);
        }
        assert_eq!(peer.pending_frames(), 1000);
    }

    #[test]
    fn unroutable_policy() {
        let flow = FlowController::new(10);
        let id = PeerIdentity::from_static(b"nobody");
        let out = flow.unroutable(GantryError::HostUnreachable(id.clone()), LENIENT);
        assert!(matches!(out, SendOutcome::Dropped(DropReason::Unroutable)));

        let out = flow.unroutable(GantryError::HostUnreachable(id), NON_BLOCKING);
        assert!(matches!(out, SendOutcome::Rejected(GantryError::HostUnreachable(_))));
    }
}
