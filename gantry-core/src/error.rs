/// Gantry Error Types
///
/// One error type covers routing policy, connection failures and socket state.
use std::io;
use std::time::Duration;
use thiserror::Error;

use crate::endpoint::EndpointError;
use crate::identity::PeerIdentity;
use crate::socket_type::SocketType;

/// Main error type for gantry operations
#[derive(Error, Debug)]
pub enum GantryError {
    /// IO error from the transport
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Identity generation ran out of retries
    #[error("Peer identity generation exhausted after {attempts} attempts")]
    IdentityExhausted { attempts: usize },

    /// A connecting peer announced an identity that is already live
    #[error("Peer identity {0} is already in use")]
    IdentityInUse(PeerIdentity),

    /// Destination identity is unknown or disconnected
    #[error("No route to host {0}")]
    HostUnreachable(PeerIdentity),

    /// DEALER has no active peer to route to
    #[error("No available peer")]
    NoAvailablePeer,

    /// A non-blocking (or timed-out) send would have to wait for queue space
    #[error("Resource temporarily unavailable")]
    ResourceUnavailable,

    /// Malformed data from a peer
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// Socket closed
    #[error("Socket closed")]
    SocketClosed,

    /// Message shape not accepted by this socket type
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// Option value rejected
    #[error("Invalid option: {0}")]
    InvalidOption(String),

    /// Peer announced a socket type we cannot talk to
    #[error("Incompatible peer: {local} cannot talk to {peer}")]
    IncompatiblePeer { local: SocketType, peer: SocketType },

    /// Peer did not complete the READY exchange in time
    #[error("Handshake timeout after {0:?}")]
    HandshakeTimeout(Duration),

    /// Endpoint parsing failed
    #[error(transparent)]
    Endpoint(#[from] EndpointError),
}

/// Result type alias for gantry operations
pub type Result<T> = std::result::Result<T, GantryError>;

impl GantryError {
    /// Create a protocol violation error with a message
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::ProtocolViolation(msg.into())
    }

    /// Create an invalid message error
    pub fn invalid_message(msg: impl Into<String>) -> Self {
        Self::InvalidMessage(msg.into())
    }

    /// Create an invalid option error
    pub fn invalid_option(msg: impl Into<String>) -> Self {
        Self::InvalidOption(msg.into())
    }

    /// Routing-policy failures.
    ///
    /// These are delivered to exactly one sink: the error subscriber when
    /// one is registered, otherwise the caller of the failing send.
    #[must_use]
    pub const fn is_routing_failure(&self) -> bool {
        matches!(
            self,
            Self::HostUnreachable(_) | Self::NoAvailablePeer | Self::ResourceUnavailable
        )
    }

    /// Destination could not be resolved at all.
    #[must_use]
    pub const fn is_unroutable(&self) -> bool {
        matches!(self, Self::HostUnreachable(_) | Self::NoAvailablePeer)
    }

    /// Errors that end a single connection but never the socket.
    #[must_use]
    pub const fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Io(_)
                | Self::ProtocolViolation(_)
                | Self::IncompatiblePeer { .. }
                | Self::HandshakeTimeout(_)
                | Self::IdentityExhausted { .. }
                | Self::IdentityInUse(_)
        )
    }
}
