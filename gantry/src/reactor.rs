//! Socket reactor.
//!
//! One task per socket owns the peer table, every per-peer queue and the
//! round-robin cursor. Socket handles talk to it through a command channel;
//! connection, acceptor and dialer tasks report back through an event
//! channel. Nothing else mutates routing state, so no locks are involved.

use std::collections::VecDeque;
use std::io;
use std::rc::Rc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use flume::{Receiver, Sender};
use futures::{select, select_biased, FutureExt};
use gantry_core::endpoint::Endpoint;
use gantry_core::flow::{FlowController, SendOutcome, SendPolicy};
use gantry_core::identity::{IdentityGenerator, PeerIdentity};
use gantry_core::lifecycle::ConnectionLifecycle;
use gantry_core::monitor::{MonitorSet, SocketEvent, SocketEventSender};
use gantry_core::options::{SendFlags, SocketOption, SocketOptions};
use gantry_core::peer::PeerTable;
use gantry_core::router::{OutboundRouter, RoutingMode};
use gantry_core::socket_type::SocketType;
use gantry_core::{GantryError, Result};
use gantry_wire::codec::encode_batch;
use gantry_wire::transport::{self, Listener, Stream};
use gantry_wire::{spawn_connection, ConnEvent, ConnId, ConnectionConfig, ConnectionLink};
use hashbrown::HashMap;
use tracing::{debug, trace, warn};

type Reply<T> = Sender<Result<T>>;

/// Longest a blocking send without mandatory delivery waits for a full peer
/// queue to drain before its message is dropped.
const FLUSH_GRACE: Duration = Duration::from_millis(50);

/// Requests from socket handles.
pub(crate) enum Command {
    Bind {
        endpoint: Endpoint,
        reply: Reply<Endpoint>,
    },
    Connect {
        endpoint: Endpoint,
        reply: Reply<PeerIdentity>,
    },
    Send {
        message: Vec<Bytes>,
        flags: SendFlags,
        reply: Reply<()>,
    },
    SetOption {
        option: SocketOption,
        reply: Reply<()>,
    },
    SubscribeErrors(Sender<GantryError>),
    Monitor(SocketEventSender),
    PeerCount(Sender<usize>),
    Close {
        reply: Reply<()>,
    },
}

/// Reports from tasks the reactor spawned.
pub(crate) enum Event {
    Listening {
        requested: Endpoint,
        result: io::Result<Endpoint>,
        reply: Reply<Endpoint>,
    },
    Accepted {
        stream: Stream,
        endpoint: Endpoint,
    },
    Dialed {
        endpoint: Endpoint,
        result: io::Result<Stream>,
        reply: Reply<PeerIdentity>,
    },
    Conn(ConnEvent),
}

impl From<ConnEvent> for Event {
    fn from(event: ConnEvent) -> Self {
        Self::Conn(event)
    }
}

enum Input {
    Command(Command),
    Event(Event),
    HandlesDropped,
    Tick,
}

/// A connection whose handshake has not completed yet.
struct PendingConnection {
    link: ConnectionLink,
    connect_reply: Option<Reply<PeerIdentity>>,
}

/// A blocking send waiting for queue space.
struct ParkedSend {
    message: Vec<Bytes>,
    policy: SendPolicy,
    deadline: Option<Instant>,
    reply: Reply<()>,
}

struct Closing {
    deadline: Option<Instant>,
    replies: Vec<Reply<()>>,
}

pub(crate) struct Reactor {
    socket_type: SocketType,
    options: SocketOptions,
    peers: PeerTable<ConnectionLink>,
    router: OutboundRouter,
    flow: FlowController,
    lifecycle: ConnectionLifecycle,
    conn_peers: HashMap<ConnId, PeerIdentity>,
    pending: HashMap<ConnId, PendingConnection>,
    parked: VecDeque<ParkedSend>,
    error_sink: Option<Sender<GantryError>>,
    monitors: MonitorSet,
    // Dropping a sender stops the matching acceptor.
    listeners: Vec<Sender<()>>,
    next_conn: ConnId,
    conn_config: Rc<ConnectionConfig>,
    commands: Receiver<Command>,
    handles_dropped: bool,
    events_tx: Sender<Event>,
    events_rx: Receiver<Event>,
    inbound_tx: Option<Sender<Vec<Bytes>>>,
    closing: Option<Closing>,
    finished: bool,
}

impl Reactor {
    pub(crate) fn new(
        socket_type: SocketType,
        options: SocketOptions,
        commands: Receiver<Command>,
        inbound_tx: Sender<Vec<Bytes>>,
    ) -> Self {
        let (events_tx, events_rx) = flume::unbounded();
        let generator = IdentityGenerator::new(options.identity_width, options.identity_attempts);
        Self {
            socket_type,
            peers: PeerTable::new(generator),
            router: OutboundRouter::new(RoutingMode::from(socket_type)),
            flow: FlowController::new(options.send_hwm),
            lifecycle: ConnectionLifecycle::new(socket_type, &options),
            conn_config: Rc::new(ConnectionConfig::new(socket_type, &options)),
            options,
            conn_peers: HashMap::new(),
            pending: HashMap::new(),
            parked: VecDeque::new(),
            error_sink: None,
            monitors: MonitorSet::new(),
            listeners: Vec::new(),
            next_conn: 0,
            commands,
            handles_dropped: false,
            events_tx,
            events_rx,
            inbound_tx: Some(inbound_tx),
            closing: None,
            finished: false,
        }
    }

    pub(crate) async fn run(mut self) {
        debug!(socket_type = %self.socket_type, "reactor started");
        while !self.finished {
            let input = self.next_input().await;
            match input {
                Input::Command(cmd) => self.handle_command(cmd),
                Input::Event(event) => self.handle_event(event),
                Input::HandlesDropped => {
                    debug!("all socket handles dropped");
                    self.handles_dropped = true;
                    self.begin_close(None);
                }
                Input::Tick => self.on_tick(),
            }
        }
        debug!(socket_type = %self.socket_type, "reactor stopped");
    }

    async fn next_input(&self) -> Input {
        let deadline = self.next_deadline();
        let timer = async move {
            match deadline {
                Some(at) => compio::time::sleep_until(at).await,
                None => futures::future::pending::<()>().await,
            }
        };
        let command = async {
            if self.handles_dropped {
                futures::future::pending().await
            } else {
                self.commands.recv_async().await
            }
        };

        // Transport events first: a write completion that arrives together
        // with a deadline must be seen before the deadline is acted on.
        select_biased! {
            event = self.events_rx.recv_async().fuse() => match event {
                Ok(event) => Input::Event(event),
                // The reactor holds a sender; this cannot disconnect.
                Err(_) => Input::Tick,
            },
            cmd = command.fuse() => match cmd {
                Ok(cmd) => Input::Command(cmd),
                Err(_) => Input::HandlesDropped,
            },
            _ = timer.fuse() => Input::Tick,
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        let parked = self.parked.iter().filter_map(|p| p.deadline).min();
        let linger = self.closing.as_ref().and_then(|c| c.deadline);
        match (parked, linger) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Bind { endpoint, reply } => self.bind(endpoint, reply),
            Command::Connect { endpoint, reply } => self.connect(endpoint, reply),
            Command::Send {
                message,
                flags,
                reply,
            } => self.send(message, flags, reply),
            Command::SetOption { option, reply } => {
                let _ = reply.send(self.set_option(option));
            }
            Command::SubscribeErrors(sink) => self.error_sink = Some(sink),
            Command::Monitor(sender) => self.monitors.subscribe(sender),
            Command::PeerCount(reply) => {
                let _ = reply.send(self.peers.active_len());
            }
            Command::Close { reply } => self.begin_close(Some(reply)),
        }
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Listening {
                requested,
                result,
                reply,
            } => match result {
                Ok(bound) => {
                    debug!(endpoint = %bound, "listening");
                    self.monitors.emit(SocketEvent::Bound(bound.clone()));
                    let _ = reply.send(Ok(bound));
                }
                Err(e) => {
                    warn!(endpoint = %requested, error = %e, "bind failed");
                    self.monitors.emit(SocketEvent::BindFailed {
                        endpoint: requested,
                        reason: e.to_string(),
                    });
                    let _ = reply.send(Err(e.into()));
                }
            },
            Event::Accepted { stream, endpoint } => {
                trace!(endpoint = %endpoint, "connection accepted");
                self.monitors.emit(SocketEvent::Accepted(endpoint));
                self.start_connection(stream, None);
            }
            Event::Dialed {
                endpoint,
                result,
                reply,
            } => match result {
                Ok(stream) => {
                    debug!(endpoint = %endpoint, "connected");
                    self.monitors.emit(SocketEvent::Connected(endpoint));
                    self.start_connection(stream, Some(reply));
                }
                Err(e) => {
                    debug!(endpoint = %endpoint, error = %e, "connect failed");
                    self.monitors.emit(SocketEvent::ConnectFailed {
                        endpoint,
                        reason: e.to_string(),
                    });
                    let _ = reply.send(Err(e.into()));
                }
            },
            Event::Conn(ConnEvent::Ready { conn, peer, assign }) => {
                self.on_ready(conn, peer.identity, assign);
            }
            Event::Conn(ConnEvent::WriteComplete { conn }) => self.on_write_complete(conn),
            Event::Conn(ConnEvent::Closed { conn, error }) => self.on_conn_closed(conn, error),
        }
    }

    // ----------------------------------------------------------------------
    // Transport
    // ----------------------------------------------------------------------

    fn bind(&mut self, endpoint: Endpoint, reply: Reply<Endpoint>) {
        if self.closing.is_some() {
            let _ = reply.send(Err(GantryError::SocketClosed));
            return;
        }
        let (shutdown_tx, shutdown_rx) = flume::bounded(1);
        self.listeners.push(shutdown_tx);
        let events = self.events_tx.clone();
        compio::runtime::spawn(accept_loop(endpoint, events, shutdown_rx, reply)).detach();
    }

    fn connect(&mut self, endpoint: Endpoint, reply: Reply<PeerIdentity>) {
        if self.closing.is_some() {
            let _ = reply.send(Err(GantryError::SocketClosed));
            return;
        }
        let events = self.events_tx.clone();
        compio::runtime::spawn(async move {
            let result = transport::connect(&endpoint).await;
            let _ = events.send(Event::Dialed {
                endpoint,
                result,
                reply,
            });
        })
        .detach();
    }

    fn start_connection(&mut self, stream: Stream, connect_reply: Option<Reply<PeerIdentity>>) {
        let Some(inbound) = self.inbound_tx.clone() else {
            // Closing: the stream is dropped unused.
            if let Some(reply) = connect_reply {
                let _ = reply.send(Err(GantryError::SocketClosed));
            }
            return;
        };
        let conn = self.next_conn;
        self.next_conn += 1;
        let link = spawn_connection(
            stream,
            conn,
            self.conn_config.clone(),
            self.events_tx.clone(),
            inbound,
        );
        self.pending.insert(conn, PendingConnection { link, connect_reply });
    }

    // ----------------------------------------------------------------------
    // Lifecycle
    // ----------------------------------------------------------------------

    fn on_ready(&mut self, conn: ConnId, announced: Option<Bytes>, assign: Sender<PeerIdentity>) {
        let Some(pending) = self.pending.remove(&conn) else {
            return;
        };
        let PendingConnection { link, connect_reply } = pending;

        match self.lifecycle.on_connected(&mut self.peers, announced, link) {
            Ok(connected) => {
                let identity = connected.identity;
                if let Some(old) = connected.evicted {
                    debug!(
                        identity = %identity,
                        old_conn = old.link().id(),
                        "peer evicted by handover"
                    );
                    self.conn_peers.remove(&old.link().id());
                    self.monitors.emit(SocketEvent::PeerEvicted {
                        identity: identity.clone(),
                    });
                }
                self.conn_peers.insert(conn, identity.clone());
                let _ = assign.send(identity.clone());
                self.monitors.emit(SocketEvent::HandshakeSucceeded {
                    identity: identity.clone(),
                });
                if connected.probed {
                    self.pump(&identity);
                }
                if let Some(reply) = connect_reply {
                    let _ = reply.send(Ok(identity));
                }
                self.retry_parked();
            }
            Err(e) => {
                debug!(conn, error = %e, "connection rejected");
                self.monitors.emit(SocketEvent::HandshakeFailed {
                    reason: e.to_string(),
                });
                if let Some(reply) = connect_reply {
                    let _ = reply.send(Err(e));
                }
            }
        }
    }

    fn on_conn_closed(&mut self, conn: ConnId, error: Option<GantryError>) {
        if let Some(pending) = self.pending.remove(&conn) {
            let error = error
                .unwrap_or_else(|| GantryError::protocol("connection closed during handshake"));
            debug!(conn, error = %error, "handshake failed");
            self.monitors.emit(SocketEvent::HandshakeFailed {
                reason: error.to_string(),
            });
            if let Some(reply) = pending.connect_reply {
                let _ = reply.send(Err(error));
            }
            return;
        }

        let Some(identity) = self.conn_peers.remove(&conn) else {
            return;
        };
        match &error {
            Some(e) if e.is_connection_error() => {
                warn!(identity = %identity, error = %e, "peer connection failed")
            }
            Some(e) => debug!(identity = %identity, error = %e, "peer connection ended"),
            None => debug!(identity = %identity, "peer disconnected"),
        }
        self.lifecycle.on_disconnected(&mut self.peers, &identity);
        self.monitors.emit(SocketEvent::Disconnected { identity });
        self.retry_parked();
        self.check_drained();
    }

    fn on_write_complete(&mut self, conn: ConnId) {
        let Some(identity) = self.conn_peers.get(&conn).cloned() else {
            return;
        };
        if let Some(peer) = self.peers.lookup_mut(&identity) {
            peer.complete_flush();
        }
        self.pump(&identity);
        self.retry_parked();
        self.check_drained();
    }

    /// Hand the peer's queue to its writer unless a batch is already out.
    fn pump(&mut self, identity: &PeerIdentity) {
        let Some(peer) = self.peers.lookup_mut(identity) else {
            return;
        };
        let Some(batch) = peer.take_batch() else {
            return;
        };
        let messages = batch.len();
        if peer.link().submit(encode_batch(&batch)) {
            trace!(identity = %identity, messages, "batch submitted");
        } else {
            // The writer is gone; its Closed event removes the peer.
            trace!(identity = %identity, "writer gone, batch dropped");
        }
    }

    // ----------------------------------------------------------------------
    // Sending
    // ----------------------------------------------------------------------

    fn send(&mut self, message: Vec<Bytes>, flags: SendFlags, reply: Reply<()>) {
        if self.closing.is_some() {
            let _ = reply.send(Err(GantryError::SocketClosed));
            return;
        }
        if message.is_empty() {
            let _ = reply.send(Err(GantryError::invalid_message("empty message")));
            return;
        }
        let policy = flags.resolve(&self.options);
        if self.must_wait(&message, policy) {
            self.park(message, policy, reply);
            return;
        }
        let outcome = self.router.route(&mut self.peers, &self.flow, message, policy);
        self.settle(outcome, policy, reply);
    }

    /// A blocking send never overtakes an earlier parked send it competes with.
    fn must_wait(&self, message: &[Bytes], policy: SendPolicy) -> bool {
        if policy.non_blocking || self.parked.is_empty() {
            return false;
        }
        match self.router.mode() {
            RoutingMode::RoundRobin => true,
            RoutingMode::Identity => self
                .parked
                .iter()
                .any(|p| p.message.first() == message.first()),
        }
    }

    fn settle(&mut self, outcome: SendOutcome, policy: SendPolicy, reply: Reply<()>) {
        match outcome {
            SendOutcome::Queued { peer } => {
                self.pump(&peer);
                let _ = reply.send(Ok(()));
            }
            SendOutcome::Dropped(reason) => {
                trace!(?reason, "message dropped");
                let _ = reply.send(Ok(()));
            }
            SendOutcome::Park(message) => self.park(message, policy, reply),
            SendOutcome::Rejected(error) => self.fail(error, reply),
        }
    }

    fn park(&mut self, message: Vec<Bytes>, policy: SendPolicy, reply: Reply<()>) {
        let timeout = self.options.send_timeout.filter(|d| !d.is_zero());
        let wait = if policy.mandatory {
            timeout
        } else {
            Some(timeout.map_or(FLUSH_GRACE, |t| t.min(FLUSH_GRACE)))
        };
        let deadline = wait.map(|d| Instant::now() + d);
        trace!(parked = self.parked.len() + 1, "send waiting for queue space");
        self.parked.push_back(ParkedSend {
            message,
            policy,
            deadline,
            reply,
        });
    }

    /// Deliver a failed send to exactly one sink.
    ///
    /// Routing failures go to the error subscriber when there is one and the
    /// send itself reports success; everything else goes to the caller.
    fn fail(&mut self, error: GantryError, reply: Reply<()>) {
        if self.error_sink.as_ref().is_some_and(|s| s.is_disconnected()) {
            debug!("error subscriber dropped; failures go to callers again");
            self.error_sink = None;
        }
        let error = match &self.error_sink {
            Some(sink) if error.is_routing_failure() => match sink.send(error) {
                Ok(()) => {
                    let _ = reply.send(Ok(()));
                    return;
                }
                Err(flume::SendError(error)) => error,
            },
            _ => error,
        };
        let _ = reply.send(Err(error));
    }

    /// A parked send ran out of time with its queue still full.
    fn give_up(&mut self, send: ParkedSend) {
        if send.policy.mandatory {
            trace!("parked send timed out");
            self.fail(GantryError::ResourceUnavailable, send.reply);
        } else {
            trace!("queue still full, message dropped");
            let _ = send.reply.send(Ok(()));
        }
    }

    /// Retry parked sends in FIFO order.
    ///
    /// A send that parks again blocks every later send to the same
    /// destination (or, round-robin, every later send) for this pass. An
    /// expired send still gets one last attempt before it gives up.
    fn retry_parked(&mut self) {
        if self.parked.is_empty() {
            return;
        }
        let now = Instant::now();
        let mut waiting = VecDeque::with_capacity(self.parked.len());
        let mut blocked: Vec<Bytes> = Vec::new();
        let mut all_blocked = false;

        while let Some(send) = self.parked.pop_front() {
            if send.reply.is_disconnected() {
                trace!("parked send abandoned by caller");
                continue;
            }
            let expired = send.deadline.is_some_and(|d| d <= now);
            let destination = match self.router.mode() {
                RoutingMode::Identity => send.message.first().cloned(),
                RoutingMode::RoundRobin => None,
            };
            if all_blocked || destination.as_ref().is_some_and(|d| blocked.contains(d)) {
                if expired {
                    self.give_up(send);
                } else {
                    waiting.push_back(send);
                }
                continue;
            }

            let ParkedSend {
                message,
                policy,
                deadline,
                reply,
            } = send;
            match self.router.route(&mut self.peers, &self.flow, message, policy) {
                SendOutcome::Park(message) => {
                    match destination {
                        Some(d) => blocked.push(d),
                        None => all_blocked = true,
                    }
                    let send = ParkedSend {
                        message,
                        policy,
                        deadline,
                        reply,
                    };
                    if expired {
                        self.give_up(send);
                    } else {
                        waiting.push_back(send);
                    }
                }
                outcome => self.settle(outcome, policy, reply),
            }
        }
        self.parked = waiting;
    }

    fn set_option(&mut self, option: SocketOption) -> Result<()> {
        trace!(?option, "set option");
        self.options.apply(option)?;
        self.flow.set_hwm(self.options.send_hwm);
        self.lifecycle.reconfigure(&self.options);
        self.conn_config = Rc::new(ConnectionConfig::new(self.socket_type, &self.options));
        // A raised mark may free space for parked sends.
        self.retry_parked();
        Ok(())
    }

    fn on_tick(&mut self) {
        let now = Instant::now();
        if self
            .closing
            .as_ref()
            .and_then(|c| c.deadline)
            .is_some_and(|d| d <= now)
        {
            let discarded = self.lifecycle.close_all(&mut self.peers);
            debug!(peers = discarded.len(), "linger expired, discarding queued frames");
            self.finish();
            return;
        }
        self.retry_parked();
    }

    // ----------------------------------------------------------------------
    // Close
    // ----------------------------------------------------------------------

    fn begin_close(&mut self, reply: Option<Reply<()>>) {
        if let Some(closing) = &mut self.closing {
            closing.replies.extend(reply);
            return;
        }
        debug!(
            peers = self.peers.len(),
            parked = self.parked.len(),
            "closing socket"
        );

        self.listeners.clear();
        for (_, pending) in self.pending.drain() {
            if let Some(reply) = pending.connect_reply {
                let _ = reply.send(Err(GantryError::SocketClosed));
            }
        }
        for send in self.parked.drain(..) {
            let _ = send.reply.send(Err(GantryError::SocketClosed));
        }

        self.lifecycle.begin_drain(&mut self.peers);
        for peer in self.peers.iter_mut() {
            peer.link_mut().stop_reading();
        }
        // Readers are stopped and no new connections start: inbound ends.
        self.inbound_tx = None;

        let linger = self.options.effective_linger();
        self.closing = Some(Closing {
            deadline: linger.map(|d| Instant::now() + d),
            replies: reply.into_iter().collect(),
        });
        if linger.is_none() {
            let discarded = self.lifecycle.close_all(&mut self.peers);
            trace!(peers = discarded.len(), "closed without linger");
        }
        self.check_drained();
    }

    fn check_drained(&mut self) {
        if self.closing.is_none() {
            return;
        }
        for peer in self.lifecycle.take_drained(&mut self.peers) {
            trace!(identity = %peer.identity(), "peer drained");
            self.conn_peers.remove(&peer.link().id());
        }
        if self.peers.is_empty() {
            self.finish();
        }
    }

    fn finish(&mut self) {
        let Some(closing) = self.closing.take() else {
            return;
        };
        self.conn_peers.clear();
        self.monitors.emit(SocketEvent::Closed);
        for reply in closing.replies {
            let _ = reply.send(Ok(()));
        }
        self.finished = true;
    }
}

async fn accept_loop(
    requested: Endpoint,
    events: Sender<Event>,
    shutdown: Receiver<()>,
    reply: Reply<Endpoint>,
) {
    let (listener, bound) = match Listener::bind(&requested).await {
        Ok(bound) => bound,
        Err(e) => {
            let _ = events.send(Event::Listening {
                requested,
                result: Err(e),
                reply,
            });
            return;
        }
    };
    let _ = events.send(Event::Listening {
        requested,
        result: Ok(bound.clone()),
        reply,
    });

    loop {
        select! {
            res = listener.accept().fuse() => match res {
                Ok(stream) => {
                    let accepted = Event::Accepted {
                        stream,
                        endpoint: bound.clone(),
                    };
                    if events.send(accepted).is_err() {
                        break;
                    }
                }
                Err(e) => debug!(endpoint = %bound, error = %e, "accept failed"),
            },
            _ = shutdown.recv_async().fuse() => break,
        }
    }

    trace!(endpoint = %bound, "listener stopped");
    #[cfg(unix)]
    if let Endpoint::Ipc(path) = &bound {
        let _ = std::fs::remove_file(path);
    }
}
