//! Handle shared by the ROUTER and DEALER sockets.
//!
//! Every operation is a message to the socket's reactor. The handle itself
//! holds no routing state, so clones can be used from several tasks at once;
//! the reactor serializes them.

use bytes::Bytes;
use flume::{Receiver, Sender, TryRecvError};
use gantry_core::endpoint::Endpoint;
use gantry_core::identity::PeerIdentity;
use gantry_core::message::Message;
use gantry_core::monitor::{create_monitor, SocketMonitor};
use gantry_core::options::{SendFlags, SocketOption, SocketOptions};
use gantry_core::socket_type::SocketType;
use gantry_core::{GantryError, Result};

use crate::reactor::{Command, Reactor};

#[derive(Debug, Clone)]
pub(crate) struct SocketHandle {
    socket_type: SocketType,
    commands: Sender<Command>,
    inbound: Receiver<Vec<Bytes>>,
}

impl SocketHandle {
    /// Start the reactor on the current compio runtime.
    pub(crate) fn spawn(socket_type: SocketType, options: SocketOptions) -> Result<Self> {
        if let Some(id) = &options.routing_id {
            SocketOptions::validate_router_identity(id)?;
        }
        Ok(Self::spawn_unchecked(socket_type, options))
    }

    /// `spawn` for options known to be valid.
    pub(crate) fn spawn_unchecked(socket_type: SocketType, options: SocketOptions) -> Self {
        let (commands_tx, commands_rx) = flume::unbounded();
        let (inbound_tx, inbound_rx) = flume::unbounded();
        let reactor = Reactor::new(socket_type, options, commands_rx, inbound_tx);
        compio::runtime::spawn(reactor.run()).detach();
        Self {
            socket_type,
            commands: commands_tx,
            inbound: inbound_rx,
        }
    }

    async fn request<T>(&self, build: impl FnOnce(Sender<Result<T>>) -> Command) -> Result<T> {
        let (reply_tx, reply_rx) = flume::bounded(1);
        self.commands
            .send(build(reply_tx))
            .map_err(|_| GantryError::SocketClosed)?;
        reply_rx
            .recv_async()
            .await
            .map_err(|_| GantryError::SocketClosed)?
    }

    pub(crate) fn socket_type(&self) -> SocketType {
        self.socket_type
    }

    pub(crate) async fn bind(&self, endpoint: &str) -> Result<Endpoint> {
        let endpoint = Endpoint::parse(endpoint)?;
        self.request(|reply| Command::Bind { endpoint, reply }).await
    }

    pub(crate) async fn connect(&self, endpoint: &str) -> Result<PeerIdentity> {
        let endpoint = Endpoint::parse(endpoint)?;
        self.request(|reply| Command::Connect { endpoint, reply })
            .await
    }

    pub(crate) async fn send(&self, message: Message, flags: SendFlags) -> Result<()> {
        let message = message.into_frames();
        self.request(|reply| Command::Send {
            message,
            flags,
            reply,
        })
        .await
    }

    pub(crate) async fn recv(&self) -> Result<Vec<Bytes>> {
        self.inbound
            .recv_async()
            .await
            .map_err(|_| GantryError::SocketClosed)
    }

    pub(crate) fn try_recv(&self) -> Result<Vec<Bytes>> {
        self.inbound.try_recv().map_err(|e| match e {
            TryRecvError::Empty => GantryError::ResourceUnavailable,
            TryRecvError::Disconnected => GantryError::SocketClosed,
        })
    }

    pub(crate) async fn set_option(&self, option: SocketOption) -> Result<()> {
        self.request(|reply| Command::SetOption { option, reply })
            .await
    }

    pub(crate) fn error_events(&self) -> Result<Receiver<GantryError>> {
        let (tx, rx) = flume::unbounded();
        self.commands
            .send(Command::SubscribeErrors(tx))
            .map_err(|_| GantryError::SocketClosed)?;
        Ok(rx)
    }

    pub(crate) fn monitor(&self) -> Result<SocketMonitor> {
        let (tx, rx) = create_monitor();
        self.commands
            .send(Command::Monitor(tx))
            .map_err(|_| GantryError::SocketClosed)?;
        Ok(rx)
    }

    pub(crate) async fn peer_count(&self) -> Result<usize> {
        let (reply_tx, reply_rx) = flume::bounded(1);
        self.commands
            .send(Command::PeerCount(reply_tx))
            .map_err(|_| GantryError::SocketClosed)?;
        reply_rx
            .recv_async()
            .await
            .map_err(|_| GantryError::SocketClosed)
    }

    pub(crate) async fn close(&self) -> Result<()> {
        let result = self.request(|reply| Command::Close { reply }).await;
        // Messages that arrived before the close are not delivered after it.
        let discarded = self.inbound.drain().count();
        if discarded > 0 {
            tracing::debug!(discarded, "undelivered messages dropped at close");
        }
        match result {
            Err(GantryError::SocketClosed) => Ok(()),
            other => other,
        }
    }
}
