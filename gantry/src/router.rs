//! ROUTER socket implementation.

use bytes::Bytes;
use gantry_core::endpoint::Endpoint;
use gantry_core::identity::PeerIdentity;
use gantry_core::message::Message;
use gantry_core::monitor::SocketMonitor;
use gantry_core::options::{SendFlags, SocketOption, SocketOptions};
use gantry_core::socket_type::SocketType;
use gantry_core::{GantryError, Result};

use crate::socket::SocketHandle;

/// A ROUTER socket for identity-based routing.
///
/// ROUTER sockets prefix incoming messages with the sender's identity,
/// and route outgoing messages based on the first frame (identity).
/// They're used for:
///
/// - Async request-reply servers
/// - Brokers and proxies
/// - Stateful connection tracking
///
/// Any number of peers may connect; each one is addressed by its identity,
/// either the one it announced in its handshake or one generated on
/// connect.
///
/// ## Message Format
///
/// **Incoming**: `[identity, ...frames]`\
/// **Outgoing**: `[identity, ...frames]` (routes to the peer with that identity)
///
/// ## Unroutable Messages
///
/// | `router_mandatory` | unknown identity | full peer queue |
/// |--------------------|------------------|-----------------|
/// | `false` (default)  | dropped, `Ok`    | dropped, `Ok` after up to 50ms |
/// | `true`             | `HostUnreachable`| waits (or `ResourceUnavailable` when non-blocking) |
///
/// Routing failures go to the [`error_events`](Self::error_events) receiver
/// when one is subscribed, otherwise to the caller of `send`.
///
/// ## Example
///
/// ```rust,no_run
/// use gantry::RouterSocket;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let router = RouterSocket::new();
/// router.bind("tcp://127.0.0.1:5555").await?;
///
/// // Echo server
/// while let Ok(msg) = router.recv().await {
///     // msg[0] = identity, msg[1..] = payload
///     router.send(msg).await?;
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct RouterSocket {
    inner: SocketHandle,
}

impl RouterSocket {
    /// Create a ROUTER socket with default options.
    ///
    /// Must be called from within a compio runtime; the socket's reactor
    /// runs as a task on it.
    pub fn new() -> Self {
        Self {
            inner: SocketHandle::spawn_unchecked(SocketType::Router, SocketOptions::default()),
        }
    }

    /// Create a ROUTER socket with custom options.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOption` if `routing_id` is not a valid identity.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use gantry::{RouterSocket, SocketOptions};
    ///
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let opts = SocketOptions::default()
    ///     .with_router_mandatory(true)
    ///     .with_probe_router(true);
    /// let router = RouterSocket::with_options(opts)?;
    /// router.bind("tcp://0.0.0.0:5555").await?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn with_options(options: SocketOptions) -> Result<Self> {
        Ok(Self {
            inner: SocketHandle::spawn(SocketType::Router, options)?,
        })
    }

    /// Listen on an endpoint (`tcp://host:port` or `ipc:///path`).
    ///
    /// Returns the bound endpoint; with port `0` it carries the port the
    /// system picked. Every accepted connection becomes a peer.
    pub async fn bind(&self, endpoint: &str) -> Result<Endpoint> {
        self.inner.bind(endpoint).await
    }

    /// Connect to another ROUTER.
    ///
    /// Resolves once the handshake completed, with the identity the remote
    /// peer is addressed by on this socket.
    pub async fn connect(&self, endpoint: &str) -> Result<PeerIdentity> {
        self.inner.connect(endpoint).await
    }

    /// Send a message whose first frame names the destination peer.
    ///
    /// Uses the socket's mandatory and send-timeout settings.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// # use gantry::RouterSocket;
    /// # use bytes::Bytes;
    /// # async fn example(router: RouterSocket) -> Result<(), Box<dyn std::error::Error>> {
    /// router
    ///     .send(vec![Bytes::from_static(b"worker-1"), Bytes::from_static(b"job")])
    ///     .await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn send(&self, message: impl Into<Message>) -> Result<()> {
        self.inner.send(message.into(), SendFlags::default()).await
    }

    /// Send with per-call overrides of the mandatory and blocking behavior.
    pub async fn send_with(&self, message: impl Into<Message>, flags: SendFlags) -> Result<()> {
        self.inner.send(message.into(), flags).await
    }

    /// Receive the next message, prefixed with the sender's identity.
    ///
    /// Returns `SocketClosed` once the socket is closed.
    pub async fn recv(&self) -> Result<Vec<Bytes>> {
        self.inner.recv().await
    }

    /// Receive without waiting; `ResourceUnavailable` when nothing is queued.
    pub fn try_recv(&self) -> Result<Vec<Bytes>> {
        self.inner.try_recv()
    }

    /// Change an option on the running socket.
    pub async fn set_option(&self, option: SocketOption) -> Result<()> {
        self.inner.set_option(option).await
    }

    /// Enable or disable ROUTER_MANDATORY mode.
    ///
    /// When enabled, sending to an unknown identity reports
    /// `HostUnreachable` instead of silently dropping the message.
    ///
    /// # ZeroMQ Compatibility
    ///
    /// Corresponds to `ZMQ_ROUTER_MANDATORY` (33).
    pub async fn set_router_mandatory(&self, enabled: bool) -> Result<()> {
        self.set_option(SocketOption::Mandatory(enabled)).await
    }

    /// Enable or disable ROUTER_HANDOVER mode.
    ///
    /// When enabled, a new connection with an existing identity takes over
    /// that identity, closing the old connection.
    /// When disabled (default), the new connection is rejected.
    ///
    /// # ZeroMQ Compatibility
    ///
    /// Corresponds to `ZMQ_ROUTER_HANDOVER` (56).
    pub async fn set_router_handover(&self, enabled: bool) -> Result<()> {
        self.set_option(SocketOption::Handover(enabled)).await
    }

    /// Send an empty message to every newly connected peer.
    ///
    /// # ZeroMQ Compatibility
    ///
    /// Corresponds to `ZMQ_PROBE_ROUTER` (51).
    pub async fn set_probe_router(&self, enabled: bool) -> Result<()> {
        self.set_option(SocketOption::ProbeRouter(enabled)).await
    }

    /// Receive routing failures instead of having `send` return them.
    ///
    /// While the receiver is alive, `HostUnreachable` and
    /// `ResourceUnavailable` are delivered here exactly once and the failing
    /// `send` returns `Ok`. Subscribing again replaces the previous receiver.
    pub fn error_events(&self) -> Result<flume::Receiver<GantryError>> {
        self.inner.error_events()
    }

    /// Subscribe to connection lifecycle events.
    pub fn monitor(&self) -> Result<SocketMonitor> {
        self.inner.monitor()
    }

    /// Number of Active peers.
    pub async fn peer_count(&self) -> Result<usize> {
        self.inner.peer_count().await
    }

    /// Close the socket.
    ///
    /// Pending receives and blocked sends fail with `SocketClosed`; queued
    /// frames are flushed for up to the linger period.
    pub async fn close(&self) -> Result<()> {
        self.inner.close().await
    }

    /// Always [`SocketType::Router`].
    pub fn socket_type(&self) -> SocketType {
        self.inner.socket_type()
    }
}

impl Default for RouterSocket {
    fn default() -> Self {
        Self::new()
    }
}
