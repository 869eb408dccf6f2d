//! # Gantry
//!
//! Asynchronous ROUTER/DEALER message routing over TCP and IPC, built on
//! `io_uring` (via `compio`).
//!
//! ## Architecture
//!
//! Gantry is structured as a small messaging kernel with clean layering:
//!
//! - **`gantry-core`**: Sans-IO routing core (peer table, flow control,
//!   outbound router, connection lifecycle)
//! - **`gantry-wire`**: Frame codec, READY handshake, inbound demultiplexing
//!   and the per-connection reader/writer tasks
//! - **`gantry`**: Public API surface (this crate)
//!
//! Every socket runs a single reactor task that owns all routing state.
//! Socket handles are cheap to clone and only exchange messages with it.
//!
//! ## Quick Start
//!
//! ### DEALER (Client)
//!
//! ```rust,no_run
//! use gantry::prelude::*;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let socket = DealerSocket::new();
//! socket.connect("tcp://127.0.0.1:5555").await?;
//!
//! // Send a multipart message
//! socket.send(vec![Bytes::from("Hello"), Bytes::from("World")]).await?;
//!
//! // Receive a reply
//! let msg = socket.recv().await?;
//! println!("Received: {:?}", msg);
//! # Ok(())
//! # }
//! ```
//!
//! ### ROUTER (Server)
//!
//! ```rust,no_run
//! use gantry::prelude::*;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let socket = RouterSocket::new();
//! socket.bind("tcp://127.0.0.1:5555").await?;
//!
//! // Echo server
//! while let Ok(msg) = socket.recv().await {
//!     socket.send(msg).await?;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Delivery Guarantees
//!
//! - Messages to one peer are written in send order; messages from one peer
//!   are received in arrival order.
//! - A peer's queued frames are discarded when its connection goes away;
//!   other peers are unaffected.
//! - Unroutable or over-limit sends follow the `router_mandatory` policy
//!   documented on [`RouterSocket`].

#![warn(missing_docs)]
#![warn(clippy::all)]

mod dealer;
pub mod dev_tracing;
mod reactor;
mod router;
mod socket;

pub use dealer::DealerSocket;
pub use router::RouterSocket;

// Re-export core types
pub use bytes::Bytes;
pub use gantry_core::endpoint::Endpoint;
pub use gantry_core::error::{GantryError, Result};
pub use gantry_core::identity::PeerIdentity;
pub use gantry_core::message::Message;
pub use gantry_core::monitor::{SocketEvent, SocketMonitor};
pub use gantry_core::options::{SendFlags, SocketOption, SocketOptions};
pub use gantry_core::socket_type::SocketType;

/// Convenient imports.
///
/// # Example
///
/// ```rust
/// use gantry::prelude::*;
///
/// // Now you have:
/// // - DealerSocket, RouterSocket
/// // - Bytes for zero-copy messages
/// // - options, flags and errors
/// ```
pub mod prelude {
    pub use super::{
        Bytes, DealerSocket, GantryError, Message, PeerIdentity, RouterSocket, SendFlags,
        SocketEvent, SocketOption, SocketOptions, SocketType,
    };
}
