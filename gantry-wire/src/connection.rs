//! Connection driver.
//!
//! Runs one peer connection as two detached compio tasks sharing the stream
//! through `Rc<S>` (compio streams implement `AsyncRead`/`AsyncWrite` for
//! `&S`, so reads and writes proceed independently):
//!
//! - **reader**: sends our READY, waits for the peer's, reports `Ready`, then
//!   demultiplexes inbound bytes straight into the socket's inbound channel
//! - **writer**: writes encoded batches handed over by the reactor and
//!   acknowledges each with `WriteComplete`
//!
//! The reactor holds a [`ConnectionLink`]. Dropping it stops both tasks,
//! abandoning a write still in progress, and shuts the stream down. The
//! reactor only drops a link with data in flight when it means to discard
//! that data (disconnect, handover, linger expiry).

use std::rc::Rc;
use std::time::Duration;

use bytes::Bytes;
use compio::buf::BufResult;
use compio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use flume::{Receiver, Sender};
use futures::{select, FutureExt};
use gantry_core::identity::PeerIdentity;
use gantry_core::options::SocketOptions;
use gantry_core::socket_type::SocketType;
use gantry_core::{GantryError, Result};
use tracing::{debug, trace};

use crate::codec::{FrameDecoder, WireFrame};
use crate::demux::InboundDemux;
use crate::handshake::{self, PeerReady};
use crate::transport::Stream;

/// Reactor-local connection id.
pub type ConnId = u64;

/// Per-connection settings, snapshotted from the socket options.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub socket_type: SocketType,
    pub routing_id: Option<Bytes>,
    pub handshake_timeout: Duration,
    pub max_frame_size: Option<usize>,
    pub max_message_frames: usize,
    pub read_buffer_size: usize,
}

impl ConnectionConfig {
    pub fn new(socket_type: SocketType, options: &SocketOptions) -> Self {
        Self {
            socket_type,
            routing_id: options.routing_id.clone(),
            handshake_timeout: options.handshake_timeout,
            max_frame_size: options.max_frame_size,
            max_message_frames: options.max_message_frames,
            read_buffer_size: options.read_buffer_size.max(64),
        }
    }
}

/// Events from connection tasks to the reactor.
#[derive(Debug)]
pub enum ConnEvent {
    /// Handshake done. The reactor answers on `assign` with the identity the
    /// peer was registered under, or drops it to reject the connection.
    Ready {
        conn: ConnId,
        peer: PeerReady,
        assign: Sender<PeerIdentity>,
    },
    /// The last submitted batch reached the transport.
    WriteComplete { conn: ConnId },
    /// The connection ended; `error` is `None` on a clean EOF.
    Closed {
        conn: ConnId,
        error: Option<GantryError>,
    },
}

/// Reactor-side handle of a running connection.
#[derive(Debug)]
pub struct ConnectionLink {
    id: ConnId,
    writer: Sender<Vec<u8>>,
    // Never sent on; dropping it stops the reader.
    shutdown: Option<Sender<()>>,
    // Never sent on; dropping it aborts the writer.
    _abort: Sender<()>,
}

impl ConnectionLink {
    pub fn id(&self) -> ConnId {
        self.id
    }

    /// Hand an encoded batch to the writer. False once the writer is gone.
    pub fn submit(&self, batch: Vec<u8>) -> bool {
        self.writer.send(batch).is_ok()
    }

    /// Stop delivering inbound messages while keeping the writer alive, so
    /// queued output can still drain.
    pub fn stop_reading(&mut self) {
        self.shutdown = None;
    }
}

/// Start the reader and writer tasks for an established stream.
pub fn spawn_connection<E>(
    stream: Stream,
    conn: ConnId,
    config: Rc<ConnectionConfig>,
    events: Sender<E>,
    inbound: Sender<Vec<Bytes>>,
) -> ConnectionLink
where
    E: From<ConnEvent> + 'static,
{
    match stream {
        Stream::Tcp(s) => spawn_on(s, conn, config, events, inbound),
        #[cfg(unix)]
        Stream::Ipc(s) => spawn_on(s, conn, config, events, inbound),
    }
}

fn spawn_on<S, E>(
    stream: S,
    conn: ConnId,
    config: Rc<ConnectionConfig>,
    events: Sender<E>,
    inbound: Sender<Vec<Bytes>>,
) -> ConnectionLink
where
    S: 'static,
    for<'a> &'a S: AsyncRead + AsyncWrite,
    E: From<ConnEvent> + 'static,
{
    let stream = Rc::new(stream);
    let (writer_tx, writer_rx) = flume::unbounded();
    let (shutdown_tx, shutdown_rx) = flume::bounded(1);
    let (abort_tx, abort_rx) = flume::bounded(1);

    let writer = write_loop(stream.clone(), conn, writer_rx, abort_rx, events.clone());
    compio::runtime::spawn(writer).detach();
    compio::runtime::spawn(read_loop(stream, conn, config, events, inbound, shutdown_rx)).detach();

    ConnectionLink {
        id: conn,
        writer: writer_tx,
        shutdown: Some(shutdown_tx),
        _abort: abort_tx,
    }
}

async fn read_loop<S, E>(
    stream: Rc<S>,
    conn: ConnId,
    config: Rc<ConnectionConfig>,
    events: Sender<E>,
    inbound: Sender<Vec<Bytes>>,
    shutdown: Receiver<()>,
) where
    for<'a> &'a S: AsyncRead + AsyncWrite,
    E: From<ConnEvent>,
{
    let result = select! {
        res = run_reader(&stream, conn, &config, &events, &inbound).fuse() => res,
        _ = shutdown.recv_async().fuse() => {
            trace!(conn, "reader stopped");
            return;
        }
    };

    let error = result.err();
    debug!(conn, error = ?error, "connection reader finished");
    let _ = events.send(ConnEvent::Closed { conn, error }.into());
}

async fn run_reader<S, E>(
    stream: &S,
    conn: ConnId,
    config: &ConnectionConfig,
    events: &Sender<E>,
    inbound: &Sender<Vec<Bytes>>,
) -> Result<()>
where
    for<'a> &'a S: AsyncRead + AsyncWrite,
    E: From<ConnEvent>,
{
    let mut io = stream;

    // READY goes out before anything else on this stream.
    let ready = handshake::ready_frame(config.socket_type, config.routing_id.as_deref());
    let BufResult(res, _) = io.write_all(ready).await;
    res?;

    let mut decoder = FrameDecoder::new(config.max_frame_size);
    let mut buf = Vec::with_capacity(config.read_buffer_size);
    let first = read_first_frame(&mut io, &mut decoder, &mut buf);
    let first = if config.handshake_timeout.is_zero() {
        first.await?
    } else {
        compio::time::timeout(config.handshake_timeout, first)
            .await
            .map_err(|_| GantryError::HandshakeTimeout(config.handshake_timeout))??
    };
    let peer = handshake::accept_ready(&first, config.socket_type)?;
    trace!(conn, peer_type = %peer.socket_type, "received READY");

    let (assign_tx, assign_rx) = flume::bounded(1);
    let ready = ConnEvent::Ready {
        conn,
        peer,
        assign: assign_tx,
    };
    if events.send(ready.into()).is_err() {
        return Err(GantryError::SocketClosed);
    }
    let Ok(identity) = assign_rx.recv_async().await else {
        // Rejected: the link is already gone.
        return Ok(());
    };

    let mut demux = InboundDemux::with_decoder(decoder, config.max_message_frames);
    if config.socket_type.exposes_identities() {
        demux.set_envelope(Some(&identity));
    }

    let mut socket_open = true;
    demux.drain(|msg| socket_open &= inbound.send(msg).is_ok())?;

    while socket_open {
        buf.clear();
        let BufResult(res, b) = io.read(buf).await;
        buf = b;
        let n = res?;
        if n == 0 {
            if demux.has_partial() {
                debug!(
                    conn,
                    identity = %identity,
                    "peer closed mid-message; partial message dropped"
                );
            }
            return Ok(());
        }
        demux.feed(&buf[..n], |msg| socket_open &= inbound.send(msg).is_ok())?;
    }
    Ok(())
}

async fn read_first_frame<S>(
    io: &mut &S,
    decoder: &mut FrameDecoder,
    buf: &mut Vec<u8>,
) -> Result<WireFrame>
where
    for<'a> &'a S: AsyncRead,
{
    loop {
        if let Some(frame) = decoder.decode()? {
            return Ok(frame);
        }
        let mut owned = std::mem::take(buf);
        owned.clear();
        let BufResult(res, owned) = io.read(owned).await;
        *buf = owned;
        let n = res?;
        if n == 0 {
            return Err(GantryError::protocol("connection closed during handshake"));
        }
        decoder.extend(&buf[..n]);
    }
}

async fn write_loop<S, E>(
    stream: Rc<S>,
    conn: ConnId,
    batches: Receiver<Vec<u8>>,
    abort: Receiver<()>,
    events: Sender<E>,
) where
    for<'a> &'a S: AsyncRead + AsyncWrite,
    E: From<ConnEvent>,
{
    let mut io = &*stream;
    while let Ok(batch) = batches.recv_async().await {
        let len = batch.len();
        let res = select! {
            BufResult(res, _) = io.write_all(batch).fuse() => res,
            _ = abort.recv_async().fuse() => {
                debug!(conn, len, "write abandoned");
                break;
            }
        };
        if let Err(e) = res {
            debug!(conn, error = %e, "write failed");
            let _ = events.send(
                ConnEvent::Closed {
                    conn,
                    error: Some(e.into()),
                }
                .into(),
            );
            return;
        }
        trace!(conn, len, "batch written");
        if events.send(ConnEvent::WriteComplete { conn }.into()).is_err() {
            break;
        }
    }
    let _ = io.shutdown().await;
}
