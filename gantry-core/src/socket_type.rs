//! Socket roles.
//!
//! Gantry speaks two roles: ROUTER (identity-addressed) and DEALER
//! (round-robin). The role name travels in the READY handshake.

use std::fmt;

use crate::error::{GantryError, Result};

/// Routing role of a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketType {
    /// Load-balances outbound messages, delivers inbound without envelope
    Dealer,

    /// Addresses peers explicitly by identity in every message
    Router,
}

impl SocketType {
    /// Wire name, as carried in the `Socket-Type` READY property.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Dealer => "DEALER",
            Self::Router => "ROUTER",
        }
    }

    /// Parse the `Socket-Type` READY property.
    pub fn from_wire(name: &[u8]) -> Result<Self> {
        match name {
            b"DEALER" => Ok(Self::Dealer),
            b"ROUTER" => Ok(Self::Router),
            other => Err(GantryError::protocol(format!(
                "unknown socket type {:?}",
                String::from_utf8_lossy(other)
            ))),
        }
    }

    /// ROUTER and DEALER may pair in any combination.
    pub const fn is_compatible(&self, peer: SocketType) -> bool {
        matches!(
            (self, peer),
            (Self::Dealer, Self::Router)
                | (Self::Router, Self::Dealer)
                | (Self::Dealer, Self::Dealer)
                | (Self::Router, Self::Router)
        )
    }

    /// Whether inbound messages carry the sender's identity as frame 0.
    pub const fn exposes_identities(&self) -> bool {
        matches!(self, Self::Router)
    }
}

impl fmt::Display for SocketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_type_display() {
        assert_eq!(SocketType::Dealer.to_string(), "DEALER");
        assert_eq!(SocketType::Router.to_string(), "ROUTER");
    }

    #[test]
    fn test_wire_names_round_trip() {
        for ty in [SocketType::Dealer, SocketType::Router] {
            assert_eq!(SocketType::from_wire(ty.as_str().as_bytes()).unwrap(), ty);
        }
        assert!(SocketType::from_wire(b"PUB").is_err());
    }

    #[test]
    fn test_socket_compatibility() {
        assert!(SocketType::Dealer.is_compatible(SocketType::Router));
        assert!(SocketType::Router.is_compatible(SocketType::Router));
        assert!(SocketType::Router.exposes_identities());
        assert!(!SocketType::Dealer.exposes_identities());
    }
}
