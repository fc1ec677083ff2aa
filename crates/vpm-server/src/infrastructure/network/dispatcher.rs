//! VpmServer: accept loop, per-connection handlers, unicast and broadcast.
//!
//! This module is responsible for:
//!
//! 1. Binding the listening socket (with `SO_REUSEADDR`) on the configured
//!    address.
//! 2. Accepting connections in a background task and spawning one handler
//!    task per connection, so the accept loop never waits on handler work.
//! 3. Running the server side of the handshake through the configured
//!    [`Authenticator`].
//! 4. Registering the authenticated connection in the [`ConnectionRegistry`]
//!    and reporting every inbound message as a [`ServerEvent`].
//! 5. Sending to one client ([`VpmServer::send_to`]) or to all clients
//!    ([`VpmServer::broadcast`]).
//! 6. Stopping: closing every live socket and the listener.
//!
//! # Shutdown
//!
//! A `running` flag is checked between iterations, and a `watch` channel is
//! raced against every blocking read, accept, and write.  [`VpmServer::stop`]
//! flips both, shuts every registered write half down (peers see end of
//! stream), clears the registry, and waits for the accept task to drop the
//! listener.
//!
//! # Failure isolation
//!
//! Any I/O, framing, or decryption failure ends only the connection it
//! happened on.  Apart from a short pause after a failed `accept`, there are
//! no timeouts and no retries.

use std::collections::HashSet;
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};
use vpm_core::{
    decode_envelope, Authenticator, CipherEngine, Framing, Message, PlaceholderAuthenticator,
    DEFAULT_PORT,
};

use super::registry::{
    close_writer, shared_writer, shutdown_signalled, ConnectedClientInfo, ConnectionRecord,
    ConnectionRegistry, DeliveryError,
};

/// Capacity of the event channel handed back by [`VpmServer::new`].
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Pending-connection backlog passed to `listen(2)`.
const LISTEN_BACKLOG: u32 = 128;

/// Pause after a failed `accept` before trying again.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Error type for server operations.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("bind failed on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("server is already running")]
    AlreadyRunning,
    #[error("client not found: {0}")]
    ClientNotFound(String),
    #[error("send to {client_id} failed: {source}")]
    Send {
        client_id: String,
        #[source]
        source: DeliveryError,
    },
}

/// How [`VpmServer::broadcast`] treats the registry lock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BroadcastMode {
    /// Hold the registry lock across every send.  A slow receiver delays
    /// registrations and other broadcasts until its write completes.
    #[default]
    LockHeld,
    /// Copy the recipient list, release the lock, then send to every
    /// recipient concurrently.  A slow receiver delays only its own copy,
    /// although `broadcast` still returns after the slowest send finishes.
    Snapshot,
}

impl fmt::Display for BroadcastMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BroadcastMode::LockHeld => f.write_str("lock_held"),
            BroadcastMode::Snapshot => f.write_str("snapshot"),
        }
    }
}

impl FromStr for BroadcastMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "lock_held" => Ok(BroadcastMode::LockHeld),
            "snapshot" => Ok(BroadcastMode::Snapshot),
            other => Err(format!(
                "unknown broadcast mode '{other}' (expected lock_held or snapshot)"
            )),
        }
    }
}

/// Configuration for the listening side of the server.
#[derive(Debug, Clone)]
pub struct ServerNetworkConfig {
    pub bind_addr: SocketAddr,
    pub framing: Framing,
    pub broadcast_mode: BroadcastMode,
}

impl Default for ServerNetworkConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            framing: Framing::default(),
            broadcast_mode: BroadcastMode::default(),
        }
    }
}

/// Events emitted by the server to the application.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    ClientConnected {
        client_id: String,
        address: SocketAddr,
    },
    MessageReceived {
        client_id: String,
        message: Message,
    },
    ClientDisconnected {
        client_id: String,
    },
}

/// Listener bookkeeping guarded by one async mutex.
#[derive(Default)]
struct ListenerState {
    accept_task: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
}

/// Everything a connection handler needs, cloned once per connection.
#[derive(Clone)]
struct HandlerContext {
    framing: Framing,
    cipher: Arc<CipherEngine>,
    authenticator: Arc<dyn Authenticator>,
    registry: Arc<Mutex<ConnectionRegistry>>,
    running: Arc<AtomicBool>,
    shutdown_rx: watch::Receiver<bool>,
    event_tx: mpsc::Sender<ServerEvent>,
}

/// The encrypted messaging server.
pub struct VpmServer {
    config: ServerNetworkConfig,
    cipher: Arc<CipherEngine>,
    authenticator: Arc<dyn Authenticator>,
    registry: Arc<Mutex<ConnectionRegistry>>,
    running: Arc<AtomicBool>,
    shutdown_tx: watch::Sender<bool>,
    event_tx: mpsc::Sender<ServerEvent>,
    listener: Mutex<ListenerState>,
}

impl VpmServer {
    /// Creates a stopped server and returns it together with the event receiver.
    ///
    /// Every connection uses `cipher`; the server and all of its clients
    /// share that one key.
    pub fn new(
        config: ServerNetworkConfig,
        cipher: Arc<CipherEngine>,
    ) -> (Self, mpsc::Receiver<ServerEvent>) {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (shutdown_tx, _) = watch::channel(false);
        let server = Self {
            config,
            cipher,
            authenticator: Arc::new(PlaceholderAuthenticator),
            registry: Arc::new(Mutex::new(ConnectionRegistry::new())),
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            event_tx,
            listener: Mutex::new(ListenerState::default()),
        };
        (server, event_rx)
    }

    /// Replaces the placeholder handshake.
    pub fn with_authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = authenticator;
        self
    }

    /// Binds the listener and starts accepting in a background task.
    ///
    /// Returns the bound address immediately (useful when binding port 0).
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::AlreadyRunning`] if the server was already
    /// started, and [`ServerError::Bind`] if the socket cannot be bound.
    pub async fn start(&self) -> Result<SocketAddr, ServerError> {
        let mut state = self.listener.lock().await;
        if state.accept_task.is_some() {
            return Err(ServerError::AlreadyRunning);
        }

        let listener = bind_listener(self.config.bind_addr)?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ServerError::Bind {
                addr: self.config.bind_addr,
                source,
            })?;

        self.shutdown_tx.send_replace(false);
        self.running.store(true, Ordering::SeqCst);

        let ctx = HandlerContext {
            framing: self.config.framing,
            cipher: Arc::clone(&self.cipher),
            authenticator: Arc::clone(&self.authenticator),
            registry: Arc::clone(&self.registry),
            running: Arc::clone(&self.running),
            shutdown_rx: self.shutdown_tx.subscribe(),
            event_tx: self.event_tx.clone(),
        };
        state.accept_task = Some(tokio::spawn(accept_loop(listener, ctx)));
        state.local_addr = Some(local_addr);

        info!(
            "VPM server listening on {local_addr} (framing={}, broadcast={})",
            self.config.framing, self.config.broadcast_mode
        );
        Ok(local_addr)
    }

    /// Sends `message` to one client.
    ///
    /// The registry lock is held only for the lookup; the write happens
    /// under the record's own writer lock.  A failed write does not remove
    /// the record; the connection's handler does that when its read fails.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::ClientNotFound`] if no such client is
    /// registered and [`ServerError::Send`] if the write fails.
    pub async fn send_to(&self, client_id: &str, message: &Message) -> Result<(), ServerError> {
        let record = {
            let registry = self.registry.lock().await;
            let record = registry.get(client_id).cloned();
            record
        }
        .ok_or_else(|| ServerError::ClientNotFound(client_id.to_string()))?;

        record
            .send(self.config.framing, message)
            .await
            .map_err(|source| ServerError::Send {
                client_id: client_id.to_string(),
                source,
            })
    }

    /// Sends `message` to every registered client not in `exclude`.
    ///
    /// Each recipient gets its own envelope with a fresh IV.  Returns the
    /// number of clients the message was delivered to; failures are logged
    /// and skipped.
    pub async fn broadcast(&self, message: &Message, exclude: &HashSet<String>) -> usize {
        let framing = self.config.framing;
        match self.config.broadcast_mode {
            BroadcastMode::LockHeld => {
                let registry = self.registry.lock().await;
                let mut delivered = 0;
                for record in registry.records() {
                    if exclude.contains(&record.client_id) {
                        continue;
                    }
                    if deliver(record, framing, message).await {
                        delivered += 1;
                    }
                }
                delivered
            }
            BroadcastMode::Snapshot => {
                let recipients: Vec<ConnectionRecord> = {
                    let registry = self.registry.lock().await;
                    let recipients = registry
                        .records()
                        .filter(|r| !exclude.contains(&r.client_id))
                        .cloned()
                        .collect();
                    recipients
                };
                let message = Arc::new(message.clone());
                let mut sends = JoinSet::new();
                for record in recipients {
                    let message = Arc::clone(&message);
                    sends.spawn(async move { deliver(&record, framing, &message).await });
                }
                let mut delivered = 0;
                while let Some(result) = sends.join_next().await {
                    match result {
                        Ok(true) => delivered += 1,
                        Ok(false) => {}
                        Err(e) => error!("broadcast task ended abnormally: {e}"),
                    }
                }
                delivered
            }
        }
    }

    /// Stops accepting, closes every connection, and clears the registry.
    ///
    /// In-flight sends (including a lock-held broadcast) are abandoned as
    /// soon as the shutdown signal is raised, so a peer that stopped reading
    /// cannot keep `stop` waiting.  Calling `stop` on a server that is not
    /// running is a no-op.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.shutdown_tx.send_replace(true);

        {
            let mut registry = self.registry.lock().await;
            let records = registry.drain();
            for record in &records {
                record.close().await;
            }
            if !records.is_empty() {
                info!("closed {} client connection(s)", records.len());
            }
        }

        let task = {
            let mut state = self.listener.lock().await;
            state.local_addr = None;
            state.accept_task.take()
        };
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!("accept task ended abnormally: {e}");
            }
            info!("VPM server stopped");
        }
    }

    /// Ids of all registered clients, sorted.
    pub async fn client_ids(&self) -> Vec<String> {
        self.registry.lock().await.client_ids()
    }

    /// Snapshot of every registered client.
    pub async fn connected_clients(&self) -> Vec<ConnectedClientInfo> {
        let registry = self.registry.lock().await;
        let mut clients: Vec<ConnectedClientInfo> =
            registry.records().map(ConnectedClientInfo::from).collect();
        clients.sort_by(|a, b| a.client_id.cmp(&b.client_id));
        clients
    }

    pub async fn client_count(&self) -> usize {
        self.registry.lock().await.len()
    }

    /// The bound listener address, while running.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.lock().await.local_addr
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Creates a listening socket with address reuse enabled.
fn bind_listener(addr: SocketAddr) -> Result<TcpListener, ServerError> {
    let bind_err = |source: std::io::Error| ServerError::Bind { addr, source };

    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()
    } else {
        TcpSocket::new_v6()
    }
    .map_err(bind_err)?;
    socket.set_reuseaddr(true).map_err(bind_err)?;
    socket.bind(addr).map_err(bind_err)?;
    socket.listen(LISTEN_BACKLOG).map_err(bind_err)
}

/// Sends one message to one record, logging instead of failing.
async fn deliver(record: &ConnectionRecord, framing: Framing, message: &Message) -> bool {
    match record.send(framing, message).await {
        Ok(()) => true,
        Err(e) => {
            warn!("broadcast to {} failed: {e}", record.client_id);
            false
        }
    }
}

// ── Accept loop ───────────────────────────────────────────────────────────────

/// Accepts connections until the shutdown signal fires.
///
/// Dropping `listener` on return closes the listening socket.
async fn accept_loop(listener: TcpListener, ctx: HandlerContext) {
    let mut shutdown_rx = ctx.shutdown_rx.clone();

    while ctx.running.load(Ordering::SeqCst) {
        let accepted = tokio::select! {
            result = listener.accept() => result,
            _ = shutdown_signalled(&mut shutdown_rx) => break,
        };

        match accepted {
            Ok((stream, addr)) => {
                info!("new connection from {addr}");
                let handler_ctx = ctx.clone();
                tokio::spawn(async move {
                    handle_connection(stream, addr, handler_ctx).await;
                });
            }
            Err(e) => {
                // Transient (e.g. fd exhaustion); keep accepting.
                if ctx.running.load(Ordering::SeqCst) {
                    error!("accept error: {e}; retrying in {ACCEPT_ERROR_BACKOFF:?}");
                }
                if !pause_after_accept_error(&mut shutdown_rx).await {
                    break;
                }
            }
        }
    }

    debug!("accept loop exited");
}

/// Waits out [`ACCEPT_ERROR_BACKOFF`].  Returns `false` if shutdown was
/// requested in the meantime.
async fn pause_after_accept_error(shutdown_rx: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(ACCEPT_ERROR_BACKOFF) => true,
        _ = shutdown_signalled(shutdown_rx) => false,
    }
}

// ── Per-connection handler ────────────────────────────────────────────────────

/// Runs the complete lifecycle of one client connection.
async fn handle_connection(mut stream: TcpStream, addr: SocketAddr, ctx: HandlerContext) {
    let client_id = format!("{}:{}", addr.ip(), addr.port());
    let mut shutdown_rx = ctx.shutdown_rx.clone();

    // ── Step 1: handshake ─────────────────────────────────────────────────────
    let auth = tokio::select! {
        result = ctx.authenticator.verify_client(&mut stream, ctx.framing) => result,
        _ = shutdown_signalled(&mut shutdown_rx) => return,
    };
    if let Err(e) = auth {
        warn!("authentication failed for {client_id}: {e}");
        return;
    }

    // ── Step 2: register ──────────────────────────────────────────────────────
    let (mut reader, writer) = stream.into_split();
    let writer = shared_writer(writer);
    {
        let mut registry = ctx.registry.lock().await;
        // `stop` may have drained the registry while we were authenticating.
        if !ctx.running.load(Ordering::SeqCst) {
            return;
        }
        registry.insert(ConnectionRecord::new(
            client_id.clone(),
            addr,
            Arc::clone(&writer),
            Arc::clone(&ctx.cipher),
            ctx.shutdown_rx.clone(),
        ));
    }
    info!("client {client_id} authenticated");
    let _ = ctx
        .event_tx
        .send(ServerEvent::ClientConnected {
            client_id: client_id.clone(),
            address: addr,
        })
        .await;

    // ── Step 3: receive loop ──────────────────────────────────────────────────
    loop {
        let frame = tokio::select! {
            result = ctx.framing.read_frame(&mut reader) => result,
            _ = shutdown_signalled(&mut shutdown_rx) => break,
        };

        let bytes = match frame {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                debug!("client {client_id} closed the connection");
                break;
            }
            Err(e) => {
                warn!("read from {client_id} failed: {e}");
                break;
            }
        };

        match decode_envelope(&ctx.cipher, &bytes) {
            Ok(message) => {
                debug!("message from {client_id}: {message}");
                let _ = ctx
                    .event_tx
                    .send(ServerEvent::MessageReceived {
                        client_id: client_id.clone(),
                        message,
                    })
                    .await;
            }
            Err(e) => {
                warn!("dropping {client_id}: undecodable envelope: {e}");
                break;
            }
        }
    }

    // ── Step 4: teardown ──────────────────────────────────────────────────────
    {
        let mut registry = ctx.registry.lock().await;
        registry.remove_socket(&client_id, &writer);
    }
    close_writer(&writer).await;
    info!("client {client_id} disconnected");
    let _ = ctx
        .event_tx
        .send(ServerEvent::ClientDisconnected { client_id })
        .await;
}

// ── Tests ─────────────────────────────────────────────────────────────────────
