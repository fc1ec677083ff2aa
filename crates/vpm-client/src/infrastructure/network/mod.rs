//! Network infrastructure for the client application.
//!
//! Handles the TCP connection to the server and dispatches inbound
//! [`Message`]s to the application layer.
//!
//! Architecture:
//! - [`Endpoint`] owns the write half of one TCP connection.
//! - `connect` runs the handshake on the whole stream, then hands the read
//!   half to a background receive task, which is from then on the only
//!   reader of the socket.
//! - Inbound messages are decrypted and forwarded on an `mpsc` channel as
//!   [`EndpointEvent`]s.
//! - State changes are published on a `watch` channel so callers can await
//!   transitions instead of polling.
//!
//! ```text
//! Disconnected ──► Connecting ──► Authenticating ──► Connected
//!      ▲               │                │                │
//!      └───────────────┴────────────────┴────────────────┘
//!            (connect error, auth error, EOF, I/O or decrypt error,
//!             disconnect())
//! ```
//!
//! A `disconnect` issued while `connect` is still dialing or authenticating
//! aborts the attempt: `connect` returns [`EndpointError::Aborted`] and the
//! endpoint never reports `Connected`.  The same signal interrupts a
//! `send_message` blocked on a server that stopped reading.
//!
//! There is no reconnection: once the endpoint is back in `Disconnected`
//! the caller decides whether to call `connect` again.

use std::fmt;
use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use vpm_core::{
    decode_envelope, encode_envelope, AuthError, Authenticator, CipherEngine, EnvelopeError,
    FrameError, Framing, Message, PlaceholderAuthenticator,
};

/// Capacity of the event channel handed back by [`Endpoint::new`].
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Errors that can occur in the client network layer.
#[derive(Debug, Error)]
pub enum EndpointError {
    /// TCP connection to the server failed.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    /// The handshake with the server failed.
    #[error("authentication with {addr} failed: {source}")]
    Auth {
        addr: String,
        #[source]
        source: AuthError,
    },
    /// The operation is not valid in the current connection state.
    #[error("cannot {operation} while {state}")]
    State {
        operation: &'static str,
        state: ConnectionState,
    },
    /// The message could not be serialized.
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
    /// Writing the envelope to the socket failed.
    #[error("send failed: {0}")]
    Send(#[from] FrameError),
    /// `disconnect` was called while `connect` was still in progress.
    #[error("connection to {addr} aborted by disconnect")]
    Aborted { addr: String },
}

/// Connection lifecycle of an [`Endpoint`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Authenticating,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Authenticating => "authenticating",
            ConnectionState::Connected => "connected",
        };
        f.write_str(name)
    }
}

/// Configuration for the client's network connection.
#[derive(Debug, Clone, Default)]
pub struct EndpointConfig {
    /// Wire framing; must match the server's.
    pub framing: Framing,
}

/// Events emitted by the network layer to the application layer.
#[derive(Debug, Clone, PartialEq)]
pub enum EndpointEvent {
    /// The handshake finished and the receive loop is running.
    Connected { peer: SocketAddr },
    /// A message was received from the server.
    MessageReceived(Message),
    /// The connection is gone, for whatever reason.
    Disconnected,
}

/// One connection attempt and, once it succeeds, the live connection.
///
/// `connect` installs the session before it dials, so `disconnect` can reach
/// an attempt that is still in flight through `stop_tx`.
struct Session {
    stop_tx: watch::Sender<bool>,
    peer: Option<SocketAddr>,
    receive_task: Option<JoinHandle<()>>,
}

/// State shared between the endpoint and its receive task.
#[derive(Clone)]
struct Shared {
    state_tx: Arc<watch::Sender<ConnectionState>>,
    writer: Arc<Mutex<Option<OwnedWriteHalf>>>,
    running: Arc<AtomicBool>,
    event_tx: mpsc::Sender<EndpointEvent>,
}

impl Shared {
    /// Moves to `Disconnected`.  The event is emitted only when leaving
    /// `Connected`, so every session reports exactly one disconnect and an
    /// aborted attempt reports none.
    async fn mark_disconnected(&self) {
        let previous = self.state_tx.send_replace(ConnectionState::Disconnected);
        if previous == ConnectionState::Connected {
            info!("disconnected from server");
            let _ = self.event_tx.send(EndpointEvent::Disconnected).await;
        }
    }

    /// Shuts the write half down (peer sees end of stream) and drops it.
    async fn close_writer(&self) {
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
    }
}

/// Client side of one encrypted connection.
pub struct Endpoint {
    config: EndpointConfig,
    cipher: Arc<CipherEngine>,
    authenticator: Arc<dyn Authenticator>,
    shared: Shared,
    session: Mutex<Option<Session>>,
}

impl Endpoint {
    /// Creates a disconnected endpoint and returns it together with the
    /// event receiver.
    pub fn new(
        config: EndpointConfig,
        cipher: Arc<CipherEngine>,
    ) -> (Self, mpsc::Receiver<EndpointEvent>) {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let endpoint = Self {
            config,
            cipher,
            authenticator: Arc::new(PlaceholderAuthenticator),
            shared: Shared {
                state_tx: Arc::new(state_tx),
                writer: Arc::new(Mutex::new(None)),
                running: Arc::new(AtomicBool::new(false)),
                event_tx,
            },
            session: Mutex::new(None),
        };
        (endpoint, event_rx)
    }

    /// Replaces the placeholder handshake.
    pub fn with_authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = authenticator;
        self
    }

    /// Connects to `host:port`, authenticates, and starts the receive loop.
    ///
    /// # Errors
    ///
    /// - [`EndpointError::State`] unless the endpoint is `Disconnected`.
    /// - [`EndpointError::Connect`] if the TCP connection fails.
    /// - [`EndpointError::Auth`] if the handshake fails; the socket is closed.
    /// - [`EndpointError::Aborted`] if [`disconnect`](Self::disconnect) was
    ///   called before the connection was established.
    ///
    /// In every error case except `State` the endpoint ends up
    /// `Disconnected`.
    pub async fn connect(&self, host: &str, port: u16) -> Result<(), EndpointError> {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        {
            let mut session = self.session.lock().await;
            let current = self.state();
            if current != ConnectionState::Disconnected {
                return Err(EndpointError::State {
                    operation: "connect",
                    state: current,
                });
            }
            // A receive task that is still winding down must not touch the
            // writer or the running flag of the new session.
            if let Some(previous) = session.take() {
                previous.stop_tx.send_replace(true);
                if let Some(task) = previous.receive_task {
                    if let Err(e) = task.await {
                        debug!("previous receive task ended abnormally: {e}");
                    }
                }
            }
            self.shared.state_tx.send_replace(ConnectionState::Connecting);
            *session = Some(Session {
                stop_tx,
                peer: None,
                receive_task: None,
            });
        }

        let addr = format!("{host}:{port}");
        info!("connecting to {addr}");

        let dial = async {
            let stream = TcpStream::connect(&addr).await?;
            let peer = stream.peer_addr()?;
            Ok::<_, std::io::Error>((stream, peer))
        };
        let dialed = tokio::select! {
            result = dial => result,
            _ = stop_requested(&mut stop_rx) => {
                info!("connection to {addr} aborted by disconnect");
                return Err(EndpointError::Aborted { addr: addr.clone() });
            }
        };
        let (mut stream, peer) = match dialed {
            Ok(pair) => pair,
            Err(source) => {
                warn!("could not connect to {addr}: {source}");
                self.abandon_attempt(&stop_rx).await;
                return Err(EndpointError::Connect { addr, source });
            }
        };

        if !self
            .advance_attempt(&stop_rx, ConnectionState::Authenticating)
            .await
        {
            info!("connection to {addr} aborted by disconnect");
            return Err(EndpointError::Aborted { addr });
        }
        let auth = tokio::select! {
            result = self.authenticator.answer_server(&mut stream, self.config.framing) => result,
            _ = stop_requested(&mut stop_rx) => {
                info!("connection to {addr} aborted by disconnect");
                return Err(EndpointError::Aborted { addr });
            }
        };
        if let Err(source) = auth {
            drop(stream);
            warn!("authentication with {addr} failed: {source}");
            self.abandon_attempt(&stop_rx).await;
            return Err(EndpointError::Auth { addr, source });
        }

        let (reader, writer) = stream.into_split();

        // Publishing under the session lock orders this against
        // `disconnect`: either it already fired `stop_tx` and the attempt is
        // dropped here, or it will find a complete session.
        let mut session = self.session.lock().await;
        if *stop_rx.borrow() {
            info!("connection to {addr} aborted by disconnect");
            return Err(EndpointError::Aborted { addr });
        }
        *self.shared.writer.lock().await = Some(writer);
        self.shared.running.store(true, Ordering::SeqCst);

        // Connected is published before the receive task exists, so the
        // task's own transition to Disconnected can never be overwritten.
        self.shared.state_tx.send_replace(ConnectionState::Connected);
        let _ = self
            .shared
            .event_tx
            .send(EndpointEvent::Connected { peer })
            .await;

        let receive_task = tokio::spawn(receive_loop(
            reader,
            self.config.framing,
            Arc::clone(&self.cipher),
            self.shared.clone(),
            stop_rx,
        ));
        if let Some(current) = session.as_mut() {
            current.peer = Some(peer);
            current.receive_task = Some(receive_task);
        }
        drop(session);

        info!("connected to {addr}");
        Ok(())
    }

    /// Publishes the next connect phase unless `disconnect` took over.
    async fn advance_attempt(
        &self,
        stop_rx: &watch::Receiver<bool>,
        next: ConnectionState,
    ) -> bool {
        let _session = self.session.lock().await;
        if *stop_rx.borrow() {
            return false;
        }
        self.shared.state_tx.send_replace(next);
        true
    }

    /// Returns to `Disconnected` after a failed attempt, unless `disconnect`
    /// already did (a newer attempt may own the state by then).
    async fn abandon_attempt(&self, stop_rx: &watch::Receiver<bool>) {
        let mut session = self.session.lock().await;
        if *stop_rx.borrow() {
            return;
        }
        *session = None;
        self.shared.state_tx.send_replace(ConnectionState::Disconnected);
    }

    /// Encrypts `message` and writes it as one frame.
    ///
    /// A write blocked on a server that stopped reading is abandoned when
    /// [`disconnect`](Self::disconnect) is called.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError::State`] when not connected (the state is left
    /// unchanged) or when `disconnect` interrupted the write, and
    /// [`EndpointError::Send`] if the write fails, in which case the endpoint
    /// is marked `Disconnected`.
    pub async fn send_message(&self, message: &Message) -> Result<(), EndpointError> {
        let state = self.state();
        if state != ConnectionState::Connected {
            return Err(EndpointError::State {
                operation: "send",
                state,
            });
        }

        let envelope = encode_envelope(&self.cipher, message)?;
        let disconnected = || EndpointError::State {
            operation: "send",
            state: ConnectionState::Disconnected,
        };

        let mut stop_rx = match self.session.lock().await.as_ref() {
            Some(session) => session.stop_tx.subscribe(),
            None => return Err(disconnected()),
        };
        let write = async {
            let mut guard = self.shared.writer.lock().await;
            match guard.as_mut() {
                Some(writer) => self
                    .config
                    .framing
                    .write_frame(writer, &envelope)
                    .await
                    .map_err(EndpointError::Send),
                None => Err(disconnected()),
            }
        };
        let result = tokio::select! {
            result = write => result,
            _ = stop_requested(&mut stop_rx) => Err(disconnected()),
        };

        if let Err(EndpointError::Send(e)) = &result {
            warn!("send failed: {e}");
            self.shared.running.store(false, Ordering::SeqCst);
            if let Some(session) = self.session.lock().await.as_ref() {
                session.stop_tx.send_replace(true);
            }
            self.shared.close_writer().await;
            self.shared.mark_disconnected().await;
        }
        result
    }

    /// Closes the connection, or aborts a `connect` still in progress.
    ///
    /// Safe to call in any state, any number of times.
    pub async fn disconnect(&self) {
        let session = {
            let mut guard = self.session.lock().await;
            self.shared.running.store(false, Ordering::SeqCst);
            let session = guard.take();
            if let Some(session) = &session {
                session.stop_tx.send_replace(true);
            }
            session
        };

        self.shared.close_writer().await;
        if let Some(task) = session.and_then(|s| s.receive_task) {
            if let Err(e) = task.await {
                debug!("receive task ended abnormally: {e}");
            }
        }

        self.shared.mark_disconnected().await;
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state_tx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Subscribes to state transitions.
    ///
    /// ```rust,no_run
    /// # async fn demo(endpoint: &vpm_client::Endpoint) {
    /// use vpm_client::ConnectionState;
    ///
    /// let mut state = endpoint.subscribe_state();
    /// let _ = state.wait_for(|s| *s == ConnectionState::Disconnected).await;
    /// # }
    /// ```
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Address of the server, while connected.
    pub async fn peer_addr(&self) -> Option<SocketAddr> {
        if !self.is_connected() {
            return None;
        }
        self.session.lock().await.as_ref().and_then(|s| s.peer)
    }
}

/// Resolves once the endpoint asked the receive loop to stop.
async fn stop_requested(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

/// Reads envelopes until end of stream, an error, or a stop request.
async fn receive_loop(
    mut reader: OwnedReadHalf,
    framing: Framing,
    cipher: Arc<CipherEngine>,
    shared: Shared,
    mut stop_rx: watch::Receiver<bool>,
) {
    while shared.running.load(Ordering::SeqCst) {
        let frame = tokio::select! {
            result = framing.read_frame(&mut reader) => result,
            _ = stop_requested(&mut stop_rx) => break,
        };

        let bytes = match frame {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                info!("connection closed by server");
                break;
            }
            Err(e) => {
                warn!("error receiving data: {e}");
                break;
            }
        };

        match decode_envelope(&cipher, &bytes) {
            Ok(message) => {
                info!("received message: {message}");
                if shared
                    .event_tx
                    .send(EndpointEvent::MessageReceived(message))
                    .await
                    .is_err()
                {
                    debug!("event receiver dropped; stopping receive loop");
                    break;
                }
            }
            Err(e) => {
                warn!("undecodable envelope from server: {e}");
                break;
            }
        }
    }

    shared.running.store(false, Ordering::SeqCst);
    shared.close_writer().await;
    shared.mark_disconnected().await;
}

// ── Tests ─────────────────────────────────────────────────────────────────────
