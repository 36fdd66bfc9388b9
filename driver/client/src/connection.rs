//! Connection state machine.
//!
//! One driver task exclusively owns the connection state: the socket,
//! the frame reassembly buffer, the correlation table, the offline
//! queue, the namespace cache, the endpoint cursor, and the retry
//! counter. Callers talk to it over an unbounded op channel; every
//! state transition happens on a data-arrival, op, or timer event inside
//! this task, so no two events ever race against the same state.

use std::collections::VecDeque;
use std::sync::atomic::AtomicU32;
use std::sync::Arc;

use bytes::Bytes;
use rmpv::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

use tnt_wire::{decode_response, parse_salt, request, ReadBuffer, RequestCode, GREETING_SIZE};

use crate::client::Event;
use crate::config::Config;
use crate::correlation::{next_request_id, CorrelationTable, PendingRequest};
use crate::endpoint::Endpoint;
use crate::error::DriverError;
use crate::reconnect::FailoverState;
use crate::schema::SchemaCache;

/// Connection-level states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnState {
    Disconnected,
    Connecting,
    AwaitingGreeting,
    Authenticating,
    Ready,
    Reconnecting,
    Closed,
}

/// Operations sent from client handles to the driver task
pub(crate) enum Op {
    Connect {
        reply: oneshot::Sender<Result<(), DriverError>>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    Request {
        code: RequestCode,
        sync: u32,
        frame: Bytes,
        reply: oneshot::Sender<Result<Value, DriverError>>,
    },
    SpaceLookup {
        name: String,
        reply: oneshot::Sender<Option<u32>>,
    },
    IndexLookup {
        space_id: u32,
        name: String,
        reply: oneshot::Sender<Option<u32>>,
    },
    StoreSpace {
        name: String,
        id: u32,
    },
    StoreIndex {
        space_id: u32,
        name: String,
        id: u32,
    },
}

/// The single mutable root owned by the driver task
pub(crate) struct Connection {
    config: Config,
    failover: FailoverState,
    state: ConnState,
    socket: Option<TcpStream>,
    buffer: ReadBuffer,
    table: CorrelationTable,
    offline: VecDeque<PendingRequest>,
    schema: SchemaCache,
    ids: Arc<AtomicU32>,
    events: broadcast::Sender<Event>,
    connect_waiters: Vec<oneshot::Sender<Result<(), DriverError>>>,
    retry_deadline: Option<Instant>,
    stray_responses: u64,
}

impl Connection {
    pub(crate) fn new(
        config: Config,
        endpoints: Vec<Endpoint>,
        events: broadcast::Sender<Event>,
        ids: Arc<AtomicU32>,
    ) -> Self {
        let before_reserve = config.before_reserve;
        Self {
            failover: FailoverState::new(endpoints, before_reserve),
            config,
            state: ConnState::Disconnected,
            socket: None,
            buffer: ReadBuffer::new(),
            table: CorrelationTable::default(),
            offline: VecDeque::new(),
            schema: SchemaCache::default(),
            ids,
            events,
            connect_waiters: Vec::new(),
            retry_deadline: None,
            stray_responses: 0,
        }
    }

    /// Drive the connection until the op channel closes.
    pub(crate) async fn run(mut self, mut ops: mpsc::UnboundedReceiver<Op>) {
        loop {
            match self.state {
                ConnState::Disconnected => {
                    let Some(op) = ops.recv().await else { break };
                    match op {
                        Op::Connect { reply } => {
                            self.connect_waiters.push(reply);
                            self.attempt_connect().await;
                        }
                        Op::Request {
                            code,
                            sync,
                            frame,
                            reply,
                        } => {
                            // Lazy connect: the first issued command starts
                            // the connect cycle; the request itself rides
                            // the offline queue until READY.
                            self.offline.push_back(PendingRequest {
                                sync,
                                code,
                                frame,
                                tx: reply,
                            });
                            self.attempt_connect().await;
                        }
                        Op::Disconnect { reply } => {
                            self.manual_close();
                            let _ = reply.send(());
                        }
                        other => self.handle_cache_op(other),
                    }
                }
                ConnState::Ready => self.ready_loop(&mut ops).await,
                ConnState::Reconnecting => {
                    let deadline = self.retry_deadline.take().unwrap_or_else(Instant::now);
                    tokio::select! {
                        _ = time::sleep_until(deadline) => {
                            self.attempt_connect().await;
                        }
                        op = ops.recv() => {
                            let Some(op) = op else { break };
                            self.retry_deadline = Some(deadline);
                            self.handle_offline_op(op);
                        }
                    }
                }
                ConnState::Closed => {
                    let Some(op) = ops.recv().await else { break };
                    self.reject_op(op);
                }
                // Handshake states are transient inside attempt_connect;
                // observing one here means the attempt was interrupted.
                ConnState::Connecting
                | ConnState::AwaitingGreeting
                | ConnState::Authenticating => {
                    self.on_transport_loss(None);
                }
            }
        }
    }

    /// One connect attempt against the endpoint the cursor selects.
    async fn attempt_connect(&mut self) {
        self.state = ConnState::Connecting;
        let endpoint = self.failover.current().clone();
        debug!(endpoint = %endpoint, "connecting");
        match self.establish(&endpoint).await {
            Ok(()) => {
                self.failover.record_success();
                self.state = ConnState::Ready;
                info!(endpoint = %endpoint, "connection ready");
                let _ = self.events.send(Event::Connected {
                    host: endpoint.host.clone(),
                    port: endpoint.port,
                });
                for waiter in self.connect_waiters.drain(..) {
                    let _ = waiter.send(Ok(()));
                }
                if let Err(err) = self.drain_offline().await {
                    self.on_transport_loss(Some(err));
                }
            }
            // A rejected handshake is never silently retried with the
            // same credentials.
            Err(err @ DriverError::AuthenticationFailed(_)) => {
                warn!(endpoint = %endpoint, error = %err, "authentication rejected");
                let _ = self.events.send(Event::Error(err.clone()));
                self.close_with(err);
            }
            Err(err) => {
                warn!(endpoint = %endpoint, error = %err, "connect attempt failed");
                self.on_transport_loss(Some(err));
            }
        }
    }

    /// Transport connect, greeting, and (when credentials are
    /// configured) the authentication handshake.
    async fn establish(&mut self, endpoint: &Endpoint) -> Result<(), DriverError> {
        let addr = (endpoint.host.as_str(), endpoint.port);
        let mut socket = match self.config.timeout {
            Some(limit) => time::timeout(limit, TcpStream::connect(addr))
                .await
                .map_err(|_| DriverError::Transport("connect timed out".to_string()))??,
            None => TcpStream::connect(addr).await?,
        };

        self.state = ConnState::AwaitingGreeting;
        self.buffer.clear();
        let mut greeting = [0u8; GREETING_SIZE];
        socket.read_exact(&mut greeting).await?;
        let salt = parse_salt(&greeting)?;
        debug!(endpoint = %endpoint, "greeting received");

        let password = endpoint
            .password
            .clone()
            .or_else(|| self.config.password.clone());
        if let Some(password) = password {
            let username = endpoint
                .username
                .clone()
                .or_else(|| self.config.username.clone())
                .unwrap_or_else(|| "guest".to_string());
            self.state = ConnState::Authenticating;
            self.authenticate(&mut socket, &username, &password, &salt)
                .await?;
            debug!(username = %username, "authenticated");
        }

        self.socket = Some(socket);
        Ok(())
    }

    /// Run the chap-sha1 exchange and wait for its reply.
    async fn authenticate(
        &mut self,
        socket: &mut TcpStream,
        username: &str,
        password: &str,
        salt: &str,
    ) -> Result<(), DriverError> {
        let sync = next_request_id(&self.ids);
        let scramble = tnt_wire::scramble(password, salt)?;
        let frame = request::auth(sync, username, &scramble)?;
        socket.write_all(&frame).await?;

        let mut scratch = [0u8; 4096];
        loop {
            let n = socket.read(&mut scratch).await?;
            if n == 0 {
                return Err(DriverError::Transport(
                    "connection closed during authentication".to_string(),
                ));
            }
            self.buffer.append(&scratch[..n]);
            while let Some(frame) = self.buffer.try_take_frame()? {
                let response = decode_response(&frame)?;
                if response.sync != sync {
                    warn!(sync = response.sync, "dropping stray frame during authentication");
                    continue;
                }
                self.schema.observe(response.schema_id);
                if response.ok() {
                    return Ok(());
                }
                return Err(DriverError::AuthenticationFailed(
                    response
                        .error
                        .unwrap_or_else(|| format!("status {:#x}", response.code)),
                ));
            }
        }
    }

    /// Replay the offline queue in original enqueue order, moving each
    /// entry into the correlation table as it is written.
    async fn drain_offline(&mut self) -> Result<(), DriverError> {
        if self.offline.is_empty() {
            return Ok(());
        }
        debug!(count = self.offline.len(), "replaying offline queue");
        while let Some(pending) = self.offline.pop_front() {
            let socket = self
                .socket
                .as_mut()
                .ok_or(DriverError::ConnectionClosed)?;
            if let Err(err) = socket.write_all(&pending.frame).await {
                self.offline.push_front(pending);
                return Err(err.into());
            }
            self.table.insert(pending);
        }
        Ok(())
    }

    /// Steady state: drain inbound frames and serve ops until the
    /// transport drops or the caller disconnects.
    async fn ready_loop(&mut self, ops: &mut mpsc::UnboundedReceiver<Op>) {
        let mut socket = match self.socket.take() {
            Some(socket) => socket,
            None => {
                self.on_transport_loss(None);
                return;
            }
        };
        let mut scratch = [0u8; 16 * 1024];

        while self.state == ConnState::Ready {
            tokio::select! {
                read = socket.read(&mut scratch) => match read {
                    Ok(0) => {
                        self.on_transport_loss(None);
                        return;
                    }
                    Ok(n) => {
                        if let Err(err) = self.on_bytes(&scratch[..n]) {
                            self.on_transport_loss(Some(err));
                            return;
                        }
                    }
                    Err(err) => {
                        self.on_transport_loss(Some(err.into()));
                        return;
                    }
                },
                op = ops.recv() => {
                    let Some(op) = op else {
                        self.manual_close();
                        return;
                    };
                    if let Err(err) = self.handle_ready_op(op, &mut socket).await {
                        self.on_transport_loss(Some(err));
                        return;
                    }
                }
            }
        }
        // State left READY through a disconnect; the socket drops here.
    }

    async fn handle_ready_op(
        &mut self,
        op: Op,
        socket: &mut TcpStream,
    ) -> Result<(), DriverError> {
        match op {
            Op::Request {
                code,
                sync,
                frame,
                reply,
            } => {
                let pending = PendingRequest {
                    sync,
                    code,
                    frame,
                    tx: reply,
                };
                if let Err(err) = socket.write_all(&pending.frame).await {
                    // The request survives on the offline queue; the loss
                    // path decides whether it is replayed or rejected.
                    self.offline.push_back(pending);
                    return Err(err.into());
                }
                self.table.insert(pending);
                Ok(())
            }
            Op::Connect { reply } => {
                let _ = reply.send(Err(DriverError::AlreadyConnecting));
                Ok(())
            }
            Op::Disconnect { reply } => {
                self.manual_close();
                let _ = reply.send(());
                Ok(())
            }
            other => {
                self.handle_cache_op(other);
                Ok(())
            }
        }
    }

    /// Feed an inbound chunk through the reassembly buffer, dispatching
    /// every fully-available frame before awaiting more bytes.
    fn on_bytes(&mut self, data: &[u8]) -> Result<(), DriverError> {
        self.buffer.append(data);
        while let Some(frame) = self.buffer.try_take_frame()? {
            self.dispatch(&frame)?;
        }
        Ok(())
    }

    /// Route one decoded frame to its pending request.
    fn dispatch(&mut self, frame: &[u8]) -> Result<(), DriverError> {
        let response = decode_response(frame)?;
        if self.schema.observe(response.schema_id) {
            debug!(
                schema_id = response.schema_id,
                "schema changed; namespace cache invalidated"
            );
        }
        match self.table.take(response.sync) {
            Some(pending) => {
                if response.ok() {
                    pending.fulfill(response.data.unwrap_or(Value::Nil));
                } else {
                    pending.reject(DriverError::Protocol {
                        code: response.code,
                        message: response.error.unwrap_or_default(),
                    });
                }
            }
            None => {
                // Impossible under a correct server: either a protocol
                // desynchronization or a stray late reply. Dropped, but
                // kept observable.
                self.stray_responses += 1;
                warn!(sync = response.sync, "response with unknown request id dropped");
            }
        }
        Ok(())
    }

    /// Unexpected transport closure: requeue in-flight work and consult
    /// the retry strategy.
    fn on_transport_loss(&mut self, err: Option<DriverError>) {
        if let Some(err) = &err {
            let _ = self.events.send(Event::Error(err.clone()));
        }
        let _ = self.events.send(Event::Closed);
        self.socket = None;
        self.buffer.clear();

        // In-flight requests rejoin the offline queue ahead of anything
        // queued later, preserving issuance order for replay.
        let mut replay: VecDeque<PendingRequest> = self.table.drain().collect();
        replay.append(&mut self.offline);
        self.offline = replay;

        let attempt = self.failover.record_failure();
        let delay = self
            .config
            .retry_strategy
            .as_ref()
            .and_then(|strategy| strategy(attempt));
        match delay {
            Some(delay) => {
                debug!(attempt, ?delay, "scheduling reconnect");
                self.retry_deadline = Some(Instant::now() + delay);
                self.state = ConnState::Reconnecting;
            }
            None => {
                debug!(attempt, "retry strategy exhausted; closing");
                self.close_with(DriverError::ConnectionClosed);
            }
        }
    }

    /// User-initiated teardown: straight to CLOSED, no retry.
    fn manual_close(&mut self) {
        info!("disconnect requested; closing connection");
        let _ = self.events.send(Event::Closed);
        self.close_with(DriverError::ConnectionClosed);
    }

    /// Terminal teardown: flush every pending request and connect waiter
    /// with a rejection.
    fn close_with(&mut self, err: DriverError) {
        self.state = ConnState::Closed;
        self.socket = None;
        self.retry_deadline = None;
        for waiter in self.connect_waiters.drain(..) {
            let _ = waiter.send(Err(err.clone()));
        }
        let flushed = self.table.len() + self.offline.len();
        if flushed > 0 {
            debug!(flushed, "flushing pending requests");
        }
        for pending in self.table.drain() {
            pending.reject(err.clone());
        }
        for pending in self.offline.drain(..) {
            pending.reject(err.clone());
        }
    }

    /// Ops received while not READY: queue requests, register connect
    /// waiters, serve cache lookups.
    fn handle_offline_op(&mut self, op: Op) {
        match op {
            Op::Connect { reply } => self.connect_waiters.push(reply),
            Op::Disconnect { reply } => {
                self.manual_close();
                let _ = reply.send(());
            }
            Op::Request {
                code,
                sync,
                frame,
                reply,
            } => {
                self.offline.push_back(PendingRequest {
                    sync,
                    code,
                    frame,
                    tx: reply,
                });
                debug!(queued = self.offline.len(), "queued request while disconnected");
            }
            other => self.handle_cache_op(other),
        }
    }

    /// Namespace cache ops; the cache is only ever touched from the
    /// driver task so schema invalidation stays atomic with dispatch.
    fn handle_cache_op(&mut self, op: Op) {
        match op {
            Op::SpaceLookup { name, reply } => {
                let _ = reply.send(self.schema.space_id(&name));
            }
            Op::IndexLookup {
                space_id,
                name,
                reply,
            } => {
                let _ = reply.send(self.schema.index_id(space_id, &name));
            }
            Op::StoreSpace { name, id } => self.schema.insert_space(&name, id),
            Op::StoreIndex {
                space_id,
                name,
                id,
            } => self.schema.insert_index(space_id, &name, id),
            // Connect/Disconnect/Request are handled by the state arms.
            _ => {}
        }
    }

    /// Every op is rejected once the connection is terminally closed.
    fn reject_op(&mut self, op: Op) {
        match op {
            Op::Connect { reply } => {
                let _ = reply.send(Err(DriverError::ConnectionClosed));
            }
            Op::Disconnect { reply } => {
                let _ = reply.send(());
            }
            Op::Request { reply, .. } => {
                let _ = reply.send(Err(DriverError::ConnectionClosed));
            }
            other => self.handle_cache_op(other),
        }
    }
}
