//! Gantry wire layer.
//!
//! Everything that touches bytes on a stream:
//! - `codec`: length-prefixed frame records with the MORE bit
//! - `multipart`: frame to message assembly
//! - `handshake`: the READY command exchanged before any data
//! - `demux`: per-peer inbound demultiplexing (identity envelope on ROUTER)
//! - `connection`: compio reader/writer tasks for one peer
//! - `transport`: TCP / IPC listeners and connectors
//!
//! The sans-IO pieces (`codec`, `multipart`, `handshake`, `demux`) are plain
//! state machines; only `connection` and `transport` need a compio runtime.

pub mod codec;
pub mod connection;
pub mod demux;
pub mod handshake;
pub mod multipart;
pub mod transport;

pub use codec::{CodecError, FrameDecoder, WireFrame};
pub use connection::{spawn_connection, ConnEvent, ConnId, ConnectionConfig, ConnectionLink};
pub use demux::InboundDemux;
pub use handshake::PeerReady;
pub use transport::{Listener, Stream};
