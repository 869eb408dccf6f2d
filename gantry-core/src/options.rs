//! Socket configuration options
//!
//! Options that change routing behavior, named after their libzmq
//! counterparts (zmq_setsockopt).

use bytes::Bytes;
use std::time::Duration;

use crate::error::{GantryError, Result};

/// Socket configuration options.
///
/// # Examples
///
/// ```
/// use gantry_core::options::SocketOptions;
///
/// let opts = SocketOptions::default()
///     .with_router_mandatory(true)
///     .with_send_hwm(5000);
/// assert!(opts.router_mandatory);
/// ```
#[derive(Debug, Clone)]
pub struct SocketOptions {
    /// High water mark for sending (ZMQ_SNDHWM)
    ///
    /// Maximum number of frames queued per peer before flow control engages.
    /// - Default: 1000 frames
    /// - `0`: no limit
    pub send_hwm: usize,

    /// Send timeout (ZMQ_SNDTIMEO)
    ///
    /// How long a blocking send may wait for queue space.
    /// - `None`: Block indefinitely (default)
    /// - `Some(Duration::ZERO)`: Non-blocking (fail with `ResourceUnavailable`)
    /// - `Some(duration)`: Wait up to duration, then `ResourceUnavailable`
    pub send_timeout: Option<Duration>,

    /// Handshake timeout (ZMQ_HANDSHAKE_IVL)
    ///
    /// Maximum time to receive the peer's READY after connecting.
    /// - Default: 30 seconds
    /// - `Duration::ZERO` disables the timeout
    pub handshake_timeout: Duration,

    /// Linger timeout (ZMQ_LINGER)
    ///
    /// Time `close()` waits for queued frames to flush.
    /// - `None` or `Some(Duration::ZERO)`: discard immediately
    /// - Default: 30 seconds
    pub linger: Option<Duration>,

    /// Maximum size of a single frame (ZMQ_MAXMSGSIZE)
    ///
    /// A peer declaring a larger data frame violates the protocol and is
    /// dropped. Handshake commands have their own fixed bound.
    /// - `None`: only the wire format limit applies (default)
    pub max_frame_size: Option<usize>,

    /// Maximum frames in one inbound multipart message.
    pub max_message_frames: usize,

    /// Read buffer size (bytes) for each connection.
    pub read_buffer_size: usize,

    /// Identity announced to peers in READY (ZMQ_ROUTING_ID)
    pub routing_id: Option<Bytes>,

    /// ROUTER mandatory mode (ZMQ_ROUTER_MANDATORY)
    ///
    /// - `false` (default): Silently drop messages to unknown or full peers
    /// - `true`: Report `HostUnreachable` / block on full queues
    pub router_mandatory: bool,

    /// ROUTER handover mode (ZMQ_ROUTER_HANDOVER)
    ///
    /// - `false` (default): a second connection announcing a live identity is rejected
    /// - `true`: the new connection evicts the old one and takes the identity
    pub router_handover: bool,

    /// Probe on connect (ZMQ_PROBE_ROUTER)
    ///
    /// - `true`: send an empty message to every newly connected peer
    pub probe_router: bool,

    /// Random bytes in a generated identity (after the `0x00` prefix).
    pub identity_width: usize,

    /// Collision retries before identity generation gives up.
    pub identity_attempts: usize,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            send_hwm: 1000,
            send_timeout: None, // Block indefinitely
            handshake_timeout: Duration::from_secs(30),
            linger: Some(Duration::from_secs(30)),
            max_frame_size: None,
            max_message_frames: 1024,
            read_buffer_size: 8192, // 8KB - balanced default
            routing_id: None,
            router_mandatory: false,
            router_handover: false,
            probe_router: false,
            identity_width: 4,
            identity_attempts: 64,
        }
    }
}

impl SocketOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set send high water mark (frames per peer, `0` = unlimited).
    pub fn with_send_hwm(mut self, hwm: usize) -> Self {
        self.send_hwm = hwm;
        self
    }

    /// Set send timeout.
    ///
    /// ```
    /// use gantry_core::options::SocketOptions;
    /// use std::time::Duration;
    ///
    /// // Non-blocking send
    /// let opts = SocketOptions::new().with_send_timeout(Duration::ZERO);
    /// assert!(opts.is_send_nonblocking());
    /// ```
    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = Some(timeout);
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_linger(mut self, linger: Option<Duration>) -> Self {
        self.linger = linger;
        self
    }

    pub fn with_max_frame_size(mut self, size: Option<usize>) -> Self {
        self.max_frame_size = size;
        self
    }

    pub fn with_max_message_frames(mut self, frames: usize) -> Self {
        self.max_message_frames = frames;
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    /// Set the identity announced to peers.
    ///
    /// ```
    /// use gantry_core::options::SocketOptions;
    /// use bytes::Bytes;
    ///
    /// let opts = SocketOptions::new()
    ///     .with_routing_id(Bytes::from_static(b"worker-01"));
    /// ```
    pub fn with_routing_id(mut self, id: Bytes) -> Self {
        self.routing_id = Some(id);
        self
    }

    pub fn with_router_mandatory(mut self, enabled: bool) -> Self {
        self.router_mandatory = enabled;
        self
    }

    pub fn with_router_handover(mut self, enabled: bool) -> Self {
        self.router_handover = enabled;
        self
    }

    pub fn with_probe_router(mut self, enabled: bool) -> Self {
        self.probe_router = enabled;
        self
    }

    /// Shape of generated identities: `width` random bytes, `attempts` retries.
    pub fn with_identity_generation(mut self, width: usize, attempts: usize) -> Self {
        self.identity_width = width;
        self.identity_attempts = attempts;
        self
    }

    /// Check if send operation should be non-blocking.
    pub fn is_send_nonblocking(&self) -> bool {
        matches!(self.send_timeout, Some(d) if d.is_zero())
    }

    /// Effective linger: `None` means discard queued frames immediately.
    pub fn effective_linger(&self) -> Option<Duration> {
        self.linger.filter(|d| !d.is_zero())
    }

    /// Validate an identity announced by or assigned to a ROUTER peer.
    ///
    /// Identities must:
    /// - Be 1-255 bytes long
    /// - Not start with null byte (0x00), reserved for generated identities
    pub fn validate_router_identity(id: &[u8]) -> Result<()> {
        if id.is_empty() {
            return Err(GantryError::invalid_option("routing ID cannot be empty"));
        }
        if id.len() > 255 {
            return Err(GantryError::invalid_option(format!(
                "routing ID cannot exceed 255 bytes (got {})",
                id.len()
            )));
        }
        if id[0] == 0x00 {
            return Err(GantryError::invalid_option(
                "routing ID cannot start with null byte (reserved for generated IDs)",
            ));
        }
        Ok(())
    }

    /// Apply a runtime option change.
    pub fn apply(&mut self, option: SocketOption) -> Result<()> {
        match option {
            SocketOption::Mandatory(v) => self.router_mandatory = v,
            SocketOption::ProbeRouter(v) => self.probe_router = v,
            SocketOption::Handover(v) => self.router_handover = v,
            SocketOption::SendHwm(v) => self.send_hwm = v,
            SocketOption::SendTimeout(v) => self.send_timeout = v,
            SocketOption::Linger(v) => self.linger = v,
            SocketOption::RoutingId(id) => {
                Self::validate_router_identity(&id)?;
                self.routing_id = Some(id);
            }
        }
        Ok(())
    }
}

/// A single option change, the `setsockopt` of a running socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketOption {
    /// ZMQ_ROUTER_MANDATORY
    Mandatory(bool),
    /// ZMQ_PROBE_ROUTER
    ProbeRouter(bool),
    /// ZMQ_ROUTER_HANDOVER
    Handover(bool),
    /// ZMQ_SNDHWM
    SendHwm(usize),
    /// ZMQ_SNDTIMEO
    SendTimeout(Option<Duration>),
    /// ZMQ_LINGER
    Linger(Option<Duration>),
    /// ZMQ_ROUTING_ID, announced on connections made after the change
    RoutingId(Bytes),
}

/// Per-call overrides for a send.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendFlags {
    /// Never wait for queue space (ZMQ_DONTWAIT)
    pub dont_wait: bool,
    /// Override the socket's mandatory-delivery option
    pub mandatory: Option<bool>,
}

impl SendFlags {
    pub const fn dont_wait() -> Self {
        Self {
            dont_wait: true,
            mandatory: None,
        }
    }

    #[must_use]
    pub const fn with_mandatory(mut self, mandatory: bool) -> Self {
        self.mandatory = Some(mandatory);
        self
    }

    /// Combine with socket defaults into the policy the flow controller applies.
    pub fn resolve(&self, options: &SocketOptions) -> crate::flow::SendPolicy {
        crate::flow::SendPolicy {
            mandatory: self.mandatory.unwrap_or(options.router_mandatory),
            non_blocking: self.dont_wait || options.is_send_nonblocking(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let opts = SocketOptions::default();
        assert_eq!(opts.send_hwm, 1000);
        assert!(opts.send_timeout.is_none());
        assert_eq!(opts.handshake_timeout, Duration::from_secs(30));
        assert!(!opts.router_mandatory);
        assert!(!opts.router_handover);
        assert!(!opts.probe_router);
    }

    #[test]
    fn test_builder_pattern() {
        let opts = SocketOptions::new()
            .with_send_hwm(10)
            .with_router_mandatory(true)
            .with_probe_router(true)
            .with_identity_generation(1, 8);

        assert_eq!(opts.send_hwm, 10);
        assert!(opts.router_mandatory);
        assert!(opts.probe_router);
        assert_eq!(opts.identity_width, 1);
        assert_eq!(opts.identity_attempts, 8);
    }

    #[test]
    fn test_nonblocking_and_linger() {
        assert!(!SocketOptions::new().is_send_nonblocking());
        let opts = SocketOptions::new()
            .with_send_timeout(Duration::ZERO)
            .with_linger(Some(Duration::ZERO));
        assert!(opts.is_send_nonblocking());
        assert_eq!(opts.effective_linger(), None);
    }

    #[test]
    fn test_routing_id_validation() {
        assert!(SocketOptions::validate_router_identity(b"client-001").is_ok());
        assert!(SocketOptions::validate_router_identity(&[0x01; 255]).is_ok());
        assert!(SocketOptions::validate_router_identity(b"").is_err());
        assert!(SocketOptions::validate_router_identity(&[0x01; 256]).is_err());
        assert!(SocketOptions::validate_router_identity(b"\x00client").is_err());
    }

    #[test]
    fn test_apply_runtime_options() {
        let mut opts = SocketOptions::new();
        opts.apply(SocketOption::Mandatory(true)).unwrap();
        opts.apply(SocketOption::SendHwm(42)).unwrap();
        opts.apply(SocketOption::Handover(true)).unwrap();
        assert!(opts.router_mandatory);
        assert!(opts.router_handover);
        assert_eq!(opts.send_hwm, 42);

        let bad = opts.apply(SocketOption::RoutingId(Bytes::from_static(b"\x00x")));
        assert!(matches!(bad, Err(GantryError::InvalidOption(_))));
    }

    #[test]
    fn test_send_flags_resolution() {
        let opts = SocketOptions::new().with_router_mandatory(true);
        let policy = SendFlags::default().resolve(&opts);
        assert!(policy.mandatory);
        assert!(!policy.non_blocking);

        let policy = SendFlags::dont_wait().with_mandatory(false).resolve(&opts);
        assert!(!policy.mandatory);
        assert!(policy.non_blocking);
    }
}
