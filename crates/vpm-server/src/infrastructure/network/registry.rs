//! ConnectionRegistry: the server's table of live, authenticated connections.
//!
//! Every accepted connection that finishes the handshake gets one
//! [`ConnectionRecord`], keyed by its client id (`"ip:port"` of the peer).
//! The record is removed again when the connection closes for any reason.
//!
//! # Locking (for beginners)
//!
//! The registry itself is a plain `HashMap` wrapper with no interior
//! locking.  The dispatcher stores it behind one `tokio::sync::Mutex`, and
//! every insert, remove, lookup, and broadcast goes through that lock:
//!
//! ```text
//! Arc<Mutex<ConnectionRegistry>>
//!   └── HashMap<String, ConnectionRecord>
//!         └── writer: Arc<Mutex<Box<dyn AsyncWrite>>>   (one lock per socket)
//! ```
//!
//! Each record's write half sits behind its own mutex, so a unicast send can
//! clone the record, release the registry lock, and write without blocking
//! other connections.
//!
//! A write to a peer that stopped reading blocks while it holds that
//! mutex.  Every send therefore races the server's shutdown signal and gives
//! the mutex up as soon as `stop` is requested, so closing the socket never
//! waits on a stalled peer.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{watch, Mutex};
use vpm_core::{encode_envelope, CipherEngine, EnvelopeError, FrameError, Framing, Message};

/// Write half of a client socket, shared between its handler and senders.
pub type SharedWriter = Arc<Mutex<Box<dyn AsyncWrite + Send + Unpin>>>;

/// Wraps any writer (a TCP write half, or an in-memory pipe in tests).
pub fn shared_writer<W>(writer: W) -> SharedWriter
where
    W: AsyncWrite + Send + Unpin + 'static,
{
    Arc::new(Mutex::new(Box::new(writer)))
}

/// Shuts a shared writer down, ignoring errors from an already-closed socket.
pub async fn close_writer(writer: &SharedWriter) {
    let mut writer = writer.lock().await;
    let _ = writer.shutdown().await;
}

/// Resolves once `stop` has been requested (or the server was dropped).
pub(super) async fn shutdown_signalled(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

/// Why a message could not be delivered to one connection.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("server is shutting down")]
    Cancelled,
}

/// One live, authenticated connection.
#[derive(Clone)]
pub struct ConnectionRecord {
    pub client_id: String,
    pub address: SocketAddr,
    writer: SharedWriter,
    cipher: Arc<CipherEngine>,
    shutdown_rx: watch::Receiver<bool>,
    connected_at: Instant,
}

impl ConnectionRecord {
    pub fn new(
        client_id: String,
        address: SocketAddr,
        writer: SharedWriter,
        cipher: Arc<CipherEngine>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            client_id,
            address,
            writer,
            cipher,
            shutdown_rx,
            connected_at: Instant::now(),
        }
    }

    /// How long ago the record was inserted.
    pub fn connected_for(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Encrypts `message` with a fresh IV and writes it as one frame.
    ///
    /// Waiting for the writer and the write itself are abandoned when the
    /// server shuts down; a partly written frame is left on the socket,
    /// which is about to be closed anyway.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::Envelope`] or [`DeliveryError::Frame`] if
    /// serialization or the socket write fails, and
    /// [`DeliveryError::Cancelled`] if shutdown interrupted the send.
    pub async fn send(&self, framing: Framing, message: &Message) -> Result<(), DeliveryError> {
        let envelope = encode_envelope(&self.cipher, message)?;
        let mut shutdown_rx = self.shutdown_rx.clone();
        let write = async {
            let mut writer = self.writer.lock().await;
            framing.write_frame(&mut *writer, &envelope).await
        };
        tokio::select! {
            result = write => Ok(result?),
            _ = shutdown_signalled(&mut shutdown_rx) => Err(DeliveryError::Cancelled),
        }
    }

    /// Shuts the write half down so the peer sees end of stream.
    ///
    /// Errors are swallowed: the socket may already be gone.
    pub async fn close(&self) {
        close_writer(&self.writer).await;
    }

    /// Returns `true` if both records share the same socket writer.
    pub fn same_socket(&self, other: &SharedWriter) -> bool {
        Arc::ptr_eq(&self.writer, other)
    }
}

impl fmt::Debug for ConnectionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRecord")
            .field("client_id", &self.client_id)
            .field("address", &self.address)
            .field("connected_for", &self.connected_for())
            .finish_non_exhaustive()
    }
}

/// Snapshot of one connection, returned by `VpmServer::connected_clients`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectedClientInfo {
    pub client_id: String,
    pub address: SocketAddr,
    pub connected_for: Duration,
}

impl From<&ConnectionRecord> for ConnectedClientInfo {
    fn from(record: &ConnectionRecord) -> Self {
        Self {
            client_id: record.client_id.clone(),
            address: record.address,
            connected_for: record.connected_for(),
        }
    }
}

/// In-memory table of live connections, keyed by client id.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    records: HashMap<String, ConnectionRecord>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `record`, returning any record previously stored under its id.
    pub fn insert(&mut self, record: ConnectionRecord) -> Option<ConnectionRecord> {
        self.records.insert(record.client_id.clone(), record)
    }

    /// Removes the record for `client_id` only if it still belongs to the
    /// socket behind `writer`.
    pub fn remove_socket(
        &mut self,
        client_id: &str,
        writer: &SharedWriter,
    ) -> Option<ConnectionRecord> {
        match self.records.get(client_id) {
            Some(record) if record.same_socket(writer) => self.records.remove(client_id),
            _ => None,
        }
    }

    pub fn get(&self, client_id: &str) -> Option<&ConnectionRecord> {
        self.records.get(client_id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Client ids currently registered, sorted for stable output.
    pub fn client_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.records.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn records(&self) -> impl Iterator<Item = &ConnectionRecord> {
        self.records.values()
    }

    /// Removes and returns every record.
    pub fn drain(&mut self) -> Vec<ConnectionRecord> {
        self.records.drain().map(|(_, record)| record).collect()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use vpm_core::{decode_envelope, SessionKey};

    fn cipher() -> Arc<CipherEngine> {
        CipherEngine::shared(SessionKey::from_bytes([3u8; 32]))
    }

    /// A record over an in-memory pipe.  The returned sender is the
    /// shutdown signal; dropping it counts as shutdown.
    fn make_record(
        port: u16,
    ) -> (ConnectionRecord, tokio::io::DuplexStream, watch::Sender<bool>) {
        let (ours, theirs) = tokio::io::duplex(4096);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let address: SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
        let record = ConnectionRecord::new(
            format!("127.0.0.1:{port}"),
            address,
            shared_writer(ours),
            cipher(),
            shutdown_rx,
        );
        (record, theirs, shutdown_tx)
    }

    #[test]
    fn test_new_registry_is_empty() {
        let registry = ConnectionRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_insert_then_get_returns_record() {
        // Arrange
        let mut registry = ConnectionRegistry::new();
        let (record, _peer, _stop) = make_record(5000);

        // Act
        let previous = registry.insert(record);

        // Assert
        assert!(previous.is_none());
        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.get("127.0.0.1:5000").map(|r| r.address.port()),
            Some(5000)
        );
    }

    #[test]
    fn test_remove_socket_deletes_own_record() {
        let mut registry = ConnectionRegistry::new();
        let (record, _peer, _stop) = make_record(5001);
        let writer = Arc::clone(&record.writer);
        registry.insert(record);

        let removed = registry.remove_socket("127.0.0.1:5001", &writer);

        assert!(removed.is_some());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_remove_socket_ignores_record_of_other_socket() {
        // Arrange: a newer record reuses the same id.
        let mut registry = ConnectionRegistry::new();
        let (old, _old_peer, _old_stop) = make_record(5002);
        let old_writer = Arc::clone(&old.writer);
        let (new, _new_peer, _new_stop) = make_record(5002);
        registry.insert(old);
        registry.insert(new);

        // Act
        let removed = registry.remove_socket("127.0.0.1:5002", &old_writer);

        // Assert
        assert!(removed.is_none());
        assert!(registry.get("127.0.0.1:5002").is_some());
    }

    #[test]
    fn test_client_ids_are_sorted() {
        let mut registry = ConnectionRegistry::new();
        let mut peers = Vec::new();
        for port in [7003, 7001, 7002] {
            let (record, peer, stop) = make_record(port);
            registry.insert(record);
            peers.push((peer, stop));
        }

        assert_eq!(
            registry.client_ids(),
            vec!["127.0.0.1:7001", "127.0.0.1:7002", "127.0.0.1:7003"]
        );
    }

    #[test]
    fn test_drain_empties_registry() {
        let mut registry = ConnectionRegistry::new();
        let (a, _pa, _sa) = make_record(6001);
        let (b, _pb, _sb) = make_record(6002);
        registry.insert(a);
        registry.insert(b);

        let drained = registry.drain();

        assert_eq!(drained.len(), 2);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_record_send_writes_decryptable_frame() {
        // Arrange
        let (record, mut peer, _stop) = make_record(6100);
        let message = Message::new("hello").with("content", "hi");

        // Act
        record.send(Framing::LengthPrefixed, &message).await.unwrap();

        // Assert
        let frame = Framing::LengthPrefixed
            .read_frame(&mut peer)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(decode_envelope(&cipher(), &frame).unwrap(), message);
    }

    #[tokio::test]
    async fn test_record_close_delivers_end_of_stream() {
        let (record, mut peer, _stop) = make_record(6101);

        record.close().await;

        let frame = Framing::LengthPrefixed.read_frame(&mut peer).await.unwrap();
        assert!(frame.is_none());
    }

    #[tokio::test]
    async fn test_record_send_fails_when_peer_is_gone() {
        let (record, peer, _stop) = make_record(6102);
        drop(peer);

        let result = record.send(Framing::LengthPrefixed, &Message::new("x")).await;

        assert!(matches!(result, Err(DeliveryError::Frame(_))));
    }

    #[tokio::test]
    async fn test_send_to_stalled_peer_is_cancelled_by_shutdown() {
        // Arrange: the peer never reads, so a frame larger than the pipe
        // blocks inside the write while holding the writer lock.
        let (record, _peer, stop) = make_record(6103);
        let bulk = Message::new("bulk").with("content", "x".repeat(64 * 1024));
        let sender = record.clone();
        let pending =
            tokio::spawn(async move { sender.send(Framing::LengthPrefixed, &bulk).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!pending.is_finished());

        // Act
        stop.send_replace(true);

        // Assert
        let result = tokio::time::timeout(Duration::from_secs(5), pending)
            .await
            .expect("send must give up on shutdown")
            .unwrap();
        assert!(matches!(result, Err(DeliveryError::Cancelled)));
        tokio::time::timeout(Duration::from_secs(5), record.close())
            .await
            .expect("writer lock must be free after a cancelled send");
    }

    #[test]
    fn test_debug_output_hides_socket_and_key() {
        let (record, _peer, _stop) = make_record(6200);
        let text = format!("{record:?}");
        assert!(text.contains("127.0.0.1:6200"));
        assert!(!text.contains("writer"));
    }
}
