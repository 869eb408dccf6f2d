//! DEALER socket implementation.

use bytes::Bytes;
use gantry_core::endpoint::Endpoint;
use gantry_core::identity::PeerIdentity;
use gantry_core::message::Message;
use gantry_core::monitor::SocketMonitor;
use gantry_core::options::{SendFlags, SocketOption, SocketOptions};
use gantry_core::socket_type::SocketType;
use gantry_core::{GantryError, Result};

use crate::socket::SocketHandle;

/// A DEALER socket for asynchronous request-reply patterns.
///
/// DEALER sockets are fair-queuing clients that distribute messages
/// round-robin across all connected peers. They're used for:
///
/// - Load-balanced request-reply
/// - Async RPC clients
/// - Worker pools
///
/// Messages are sent and received without an identity envelope.
///
/// ## Example
///
/// ```rust,no_run
/// use gantry::DealerSocket;
/// use bytes::Bytes;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let socket = DealerSocket::new();
/// socket.connect("tcp://127.0.0.1:5555").await?;
///
/// // Send request
/// socket.send(vec![Bytes::from("REQUEST")]).await?;
///
/// // Receive reply
/// let reply = socket.recv().await?;
/// println!("Got reply: {:?}", reply);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct DealerSocket {
    inner: SocketHandle,
}

impl DealerSocket {
    /// Create a DEALER socket with default options.
    ///
    /// Must be called from within a compio runtime.
    pub fn new() -> Self {
        Self {
            inner: SocketHandle::spawn_unchecked(SocketType::Dealer, SocketOptions::default()),
        }
    }

    /// Create a DEALER socket with custom options.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use gantry::{DealerSocket, SocketOptions};
    /// use bytes::Bytes;
    ///
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// // Announce a stable identity to the ROUTER
    /// let opts = SocketOptions::default().with_routing_id(Bytes::from_static(b"worker-1"));
    /// let dealer = DealerSocket::with_options(opts)?;
    /// dealer.connect("tcp://127.0.0.1:5555").await?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn with_options(options: SocketOptions) -> Result<Self> {
        Ok(Self {
            inner: SocketHandle::spawn(SocketType::Dealer, options)?,
        })
    }

    /// Connect to a ROUTER.
    ///
    /// Supports both TCP and IPC endpoints:
    /// - TCP: `"tcp://127.0.0.1:5555"`
    /// - IPC: `"ipc:///tmp/socket.sock"` (Unix only)
    ///
    /// Resolves once the handshake completed. The returned identity is
    /// internal to this socket; DEALER messages never carry it.
    pub async fn connect(&self, endpoint: &str) -> Result<PeerIdentity> {
        self.inner.connect(endpoint).await
    }

    /// Listen for ROUTER connections.
    pub async fn bind(&self, endpoint: &str) -> Result<Endpoint> {
        self.inner.bind(endpoint).await
    }

    /// Send a message to the next peer in rotation.
    ///
    /// A peer whose queue is at the high-water mark is skipped. With no
    /// connected peer the message is dropped, or `NoAvailablePeer` is
    /// reported when mandatory delivery is enabled.
    pub async fn send(&self, message: impl Into<Message>) -> Result<()> {
        self.inner.send(message.into(), SendFlags::default()).await
    }

    /// Send with per-call overrides of the mandatory and blocking behavior.
    pub async fn send_with(&self, message: impl Into<Message>, flags: SendFlags) -> Result<()> {
        self.inner.send(message.into(), flags).await
    }

    /// Receive the next message from any peer.
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

    /// Receive routing failures instead of having `send` return them.
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

    /// Close the socket, flushing queued frames for up to the linger period.
    pub async fn close(&self) -> Result<()> {
        self.inner.close().await
    }

    /// Always [`SocketType::Dealer`].
    pub fn socket_type(&self) -> SocketType {
        self.inner.socket_type()
    }
}

impl Default for DealerSocket {
    fn default() -> Self {
        Self::new()
    }
}
