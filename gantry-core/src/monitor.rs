//! Socket event monitoring.
//!
//! Provides event streams for tracking socket lifecycle events like
//! binds, handshakes, evictions and disconnections.

use crate::endpoint::Endpoint;
use crate::identity::PeerIdentity;
use std::fmt;

/// Socket lifecycle events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    /// Socket successfully bound to an endpoint.
    Bound(Endpoint),

    /// Bind operation failed.
    BindFailed { endpoint: Endpoint, reason: String },

    /// Outgoing transport connection established (handshake pending).
    Connected(Endpoint),

    /// Connection attempt failed.
    ConnectFailed { endpoint: Endpoint, reason: String },

    /// Socket accepted a new incoming connection.
    Accepted(Endpoint),

    /// READY exchange completed; the peer is Active.
    HandshakeSucceeded { identity: PeerIdentity },

    /// READY exchange failed; the connection was dropped.
    HandshakeFailed { reason: String },

    /// Peer was force-closed because a new connection took over its identity.
    PeerEvicted { identity: PeerIdentity },

    /// An Active peer went away.
    Disconnected { identity: PeerIdentity },

    /// The socket finished closing.
    Closed,
}

impl fmt::Display for SocketEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bound(ep) => write!(f, "Bound to {ep}"),
            Self::BindFailed { endpoint, reason } => {
                write!(f, "Bind failed for {endpoint}: {reason}")
            }
            Self::Connected(ep) => write!(f, "Connected to {ep}"),
            Self::ConnectFailed { endpoint, reason } => {
                write!(f, "Connect failed for {endpoint}: {reason}")
            }
            Self::Accepted(ep) => write!(f, "Accepted connection on {ep}"),
            Self::HandshakeSucceeded { identity } => write!(f, "Handshake with {identity}"),
            Self::HandshakeFailed { reason } => write!(f, "Handshake failed: {reason}"),
            Self::PeerEvicted { identity } => write!(f, "Evicted {identity}"),
            Self::Disconnected { identity } => write!(f, "Disconnected from {identity}"),
            Self::Closed => f.write_str("Closed"),
        }
    }
}

/// Handle for receiving socket events.
pub type SocketMonitor = flume::Receiver<SocketEvent>;

/// Sending half held by the socket.
pub type SocketEventSender = flume::Sender<SocketEvent>;

/// Creates a new monitoring channel pair.
#[must_use]
pub fn create_monitor() -> (SocketEventSender, SocketMonitor) {
    flume::unbounded()
}

/// Fan-out to every registered monitor.
///
/// Monitors whose receiver was dropped are pruned on the next emit.
#[derive(Debug, Default)]
pub struct MonitorSet {
    senders: Vec<SocketEventSender>,
}

impl MonitorSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, sender: SocketEventSender) {
        self.senders.push(sender);
    }

    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }

    pub fn emit(&mut self, event: SocketEvent) {
        if self.senders.is_empty() {
            return;
        }
        self.senders.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    #[test]
    fn test_socket_event_display() {
        let addr: SocketAddr = "127.0.0.1:5555".parse().unwrap();
        let event = SocketEvent::Bound(Endpoint::Tcp(addr));
        assert_eq!(event.to_string(), "Bound to tcp://127.0.0.1:5555");

        let event = SocketEvent::Disconnected {
            identity: PeerIdentity::from_static(b"w1"),
        };
        assert_eq!(event.to_string(), "Disconnected from w1");
    }

    #[test]
    fn test_monitor_set_prunes_dropped_receivers() {
        let mut set = MonitorSet::new();
        let (tx_a, rx_a) = create_monitor();
        let (tx_b, rx_b) = create_monitor();
        set.subscribe(tx_a);
        set.subscribe(tx_b);
        drop(rx_b);

        set.emit(SocketEvent::Closed);
        assert_eq!(rx_a.recv().unwrap(), SocketEvent::Closed);
        assert_eq!(set.senders.len(), 1);
    }
}
