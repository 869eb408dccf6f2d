//! Gantry Core
//!
//! Runtime-agnostic routing core shared by the wire layer and the public
//! sockets. Nothing in here performs I/O:
//! - Peer identities and their generator (`identity`)
//! - Peer table with per-peer outbound queues (`peer`)
//! - High-water-mark flow control and the mandatory-delivery matrix (`flow`)
//! - ROUTER / DEALER outbound routing with the round-robin cursor (`router`)
//! - Connection lifecycle: registration, probe, handover, drain (`lifecycle`)
//! - Socket options, endpoints, monitor events, errors

#![deny(unsafe_code)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod endpoint;
pub mod error;
pub mod flow;
pub mod identity;
pub mod lifecycle;
pub mod message;
pub mod monitor;
pub mod options;
pub mod peer;
pub mod router;
pub mod socket_type;

pub use error::{GantryError, Result};

pub mod prelude {
    pub use crate::endpoint::Endpoint;
    pub use crate::error::{GantryError, Result};
    pub use crate::flow::{DropReason, FlowController, SendOutcome, SendPolicy};
    pub use crate::identity::{IdentityGenerator, PeerIdentity};
    pub use crate::lifecycle::{Connected, ConnectionLifecycle};
    pub use crate::message::Message;
    pub use crate::monitor::{MonitorSet, SocketEvent, SocketMonitor};
    pub use crate::options::{SendFlags, SocketOption, SocketOptions};
    pub use crate::peer::{Peer, PeerState, PeerTable};
    pub use crate::router::{OutboundRouter, RoutingMode};
    pub use crate::socket_type::SocketType;
}
