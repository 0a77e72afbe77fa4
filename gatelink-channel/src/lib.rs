//! The broadcast channel between the two communicator contexts.
//!
//! The channel is a single shared slot holding at most one serialized
//! [`TransmissionRecord`]. Writes overwrite (last write wins, no queueing);
//! readers get a change notification where the transport supports one and
//! fall back to polling where it does not. A context never reacts to its own
//! writes or to an id it has already processed — that filtering lives in
//! [`RecordFilter`] so every transport shares it.

use chrono::{DateTime, Utc};
use crossbeam_channel::Receiver;
use gatelink_signal::Mode;
use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize};
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Error types that can occur while publishing or polling the shared slot.
#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("runtime error: {0}")]
    Runtime(String),
    #[cfg(feature = "websocket")]
    #[error("WebSocket error: {0}")]
    WebSocket(String),
}

/// Which of the two roles authored a record. A context ignores records
/// carrying its own tag so it never replays its own transmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Sender,
    Receiver,
}

impl Origin {
    pub fn name(&self) -> &'static str {
        match self {
            Origin::Sender => "sender",
            Origin::Receiver => "receiver",
        }
    }
}

/// The one shared entity: a single user-initiated transmission.
///
/// Immutable once written. `timestamp` is informational only; ordering and
/// expiry are not derived from it. An unrecognized `mode` string parses to
/// `None` rather than failing the whole record, so the receive side can fall
/// back to its default presentation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransmissionRecord {
    pub id: String,
    pub message: String,
    #[serde(default, deserialize_with = "lenient_mode")]
    pub mode: Option<Mode>,
    #[serde(default)]
    pub speed: Option<u8>,
    pub sender: Origin,
    pub timestamp: DateTime<Utc>,
}

fn lenient_mode<'de, D>(deserializer: D) -> Result<Option<Mode>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(Mode::parse))
}

impl TransmissionRecord {
    pub fn new(message: &str, mode: Mode, speed: u8, origin: Origin) -> Self {
        TransmissionRecord {
            id: fresh_id(),
            message: message.to_string(),
            mode: Some(mode),
            speed: Some(speed),
            sender: origin,
            timestamp: Utc::now(),
        }
    }
}

/// Time-based id with a random base36 suffix. Fresh per publish so that
/// duplicate-content transmissions still look distinct to receivers.
fn fresh_id() -> String {
    let millis = Utc::now().timestamp_millis();
    let mut rng = rand::thread_rng();
    let suffix: String = (0..9)
        .map(|_| {
            let digit = rng.gen_range(0..36u32);
            char::from_digit(digit, 36).unwrap_or('0')
        })
        .collect();
    format!("{}-{}", millis, suffix)
}

/// A transport carrying the shared slot between contexts.
pub trait Channel: Send {
    /// Serialize and store the record; overwrites any previous value and
    /// notifies the other contexts (never the writer's own).
    fn publish(&mut self, record: &TransmissionRecord) -> Result<(), ChannelError>;

    /// Raw payloads pushed by the transport when the slot changes. Silent
    /// forever on poll-only transports.
    fn notifications(&self) -> &Receiver<String>;

    /// Poll fallback: the current raw slot value, if this transport keeps one.
    fn fetch(&mut self) -> Result<Option<String>, ChannelError>;
}

/// Receive-side guard shared by every transport: drops malformed payloads,
/// own-origin records and already-seen ids.
pub struct RecordFilter {
    origin: Origin,
    last_seen: Option<String>,
}

impl RecordFilter {
    pub fn new(origin: Origin) -> Self {
        RecordFilter { origin, last_seen: None }
    }

    /// Parse a raw payload and decide whether this context should act on it.
    pub fn accept(&mut self, raw: &str) -> Option<TransmissionRecord> {
        let record: TransmissionRecord = match serde_json::from_str(raw) {
            Ok(record) => record,
            Err(err) => {
                // Next valid write will be picked up normally.
                log::debug!("discarding malformed transmission payload: {}", err);
                return None;
            }
        };
        if record.sender == self.origin {
            return None;
        }
        if self.last_seen.as_deref() == Some(record.id.as_str()) {
            return None;
        }
        self.last_seen = Some(record.id.clone());
        Some(record)
    }
}

// --- In-process transport ---

#[derive(Default)]
struct MemoryShared {
    slot: Option<String>,
    taps: Vec<(usize, crossbeam_channel::Sender<String>)>,
    next_tap: usize,
}

/// In-process hub: both contexts live in one process and share the slot
/// through it. Mirrors browser shared-storage semantics — a write fires a
/// change notification in every attached context except the writer's own.
#[derive(Clone, Default)]
pub struct MemoryChannel {
    shared: Arc<Mutex<MemoryShared>>,
}

impl MemoryChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a context to the hub, receiving its own notification stream.
    pub fn attach(&self) -> MemoryHandle {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut shared = lock_shared(&self.shared);
        let tap_id = shared.next_tap;
        shared.next_tap += 1;
        shared.taps.push((tap_id, tx));
        MemoryHandle {
            shared: Arc::clone(&self.shared),
            tap_id,
            notify_rx: rx,
        }
    }
}

fn lock_shared(shared: &Arc<Mutex<MemoryShared>>) -> std::sync::MutexGuard<'_, MemoryShared> {
    // Nothing holding the lock can panic, so poisoning is unrecoverable setup
    // breakage rather than a runtime condition worth surfacing.
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// One context's endpoint on a [`MemoryChannel`].
pub struct MemoryHandle {
    shared: Arc<Mutex<MemoryShared>>,
    tap_id: usize,
    notify_rx: Receiver<String>,
}

impl Channel for MemoryHandle {
    fn publish(&mut self, record: &TransmissionRecord) -> Result<(), ChannelError> {
        let payload = serde_json::to_string(record)?;
        let mut shared = lock_shared(&self.shared);
        shared.slot = Some(payload.clone());
        let own_tap = self.tap_id;
        // Notify everyone but the writer; drop taps whose context is gone.
        shared
            .taps
            .retain(|(id, tx)| *id == own_tap || tx.send(payload.clone()).is_ok());
        Ok(())
    }

    fn notifications(&self) -> &Receiver<String> {
        &self.notify_rx
    }

    fn fetch(&mut self) -> Result<Option<String>, ChannelError> {
        Ok(lock_shared(&self.shared).slot.clone())
    }
}

impl Drop for MemoryHandle {
    fn drop(&mut self) {
        let mut shared = lock_shared(&self.shared);
        let own_tap = self.tap_id;
        shared.taps.retain(|(id, _)| *id != own_tap);
    }
}

// --- File transport ---

/// Cross-process transport: the slot is a file, written atomically via a
/// temp file and rename. Poll-only — readers discover changes through
/// `fetch`, there is no change notification.
pub struct FileChannel {
    path: PathBuf,
    silent: Receiver<String>,
}

impl FileChannel {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileChannel {
            path: path.into(),
            silent: crossbeam_channel::never(),
        }
    }
}

impl Channel for FileChannel {
    fn publish(&mut self, record: &TransmissionRecord) -> Result<(), ChannelError> {
        let payload = serde_json::to_string(record)?;
        let tmp = self.path.with_extension("slot.tmp");
        fs::write(&tmp, payload)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn notifications(&self) -> &Receiver<String> {
        &self.silent
    }

    fn fetch(&mut self) -> Result<Option<String>, ChannelError> {
        match fs::read_to_string(&self.path) {
            Ok(payload) if !payload.is_empty() => Ok(Some(payload)),
            Ok(_) => Ok(None),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => {
                // A half-visible slot is treated like a missed notification.
                log::debug!("slot file unreadable: {}", err);
                Ok(None)
            }
        }
    }
}

#[cfg(feature = "websocket")]
mod websocket {
    use super::*;
    use futures::sink::SinkExt;
    use futures::stream::StreamExt;
    use std::net::SocketAddr;
    use tokio::net::{TcpListener, TcpStream};
    use tokio::runtime::Runtime;
    use tokio::sync::{broadcast, mpsc};
    use tokio_tungstenite::tungstenite::{Error as WsError, Message};
    use tokio_tungstenite::{accept_async, connect_async};

    fn build_runtime() -> Result<Runtime, ChannelError> {
        tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(|e| ChannelError::WebSocket(e.to_string()))
    }

    /// Serving endpoint: publishes records to every connected peer and
    /// surfaces peer messages as change notifications.
    pub struct WsServerChannel {
        broadcast_tx: broadcast::Sender<String>,
        incoming_rx: Receiver<String>,
        last_seen: Arc<Mutex<Option<String>>>,
        _runtime: Runtime,
    }

    impl WsServerChannel {
        pub fn bind(host: &str, port: u16) -> Result<Self, ChannelError> {
            let runtime = build_runtime()?;

            let addr = format!("{}:{}", host, port);
            let socket_addr: SocketAddr = addr
                .parse()
                .map_err(|e| ChannelError::WebSocket(format!("invalid address: {}", e)))?;

            let (broadcast_tx, _) = broadcast::channel::<String>(16);
            let (incoming_tx, incoming_rx) = crossbeam_channel::unbounded();
            let last_seen: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));

            // Bind synchronously so a busy port fails fast instead of inside
            // a background task.
            let listener = runtime
                .block_on(TcpListener::bind(&socket_addr))
                .map_err(|e| ChannelError::WebSocket(format!("bind failed: {}", e)))?;

            let accept_tx = broadcast_tx.clone();
            let accept_last = Arc::clone(&last_seen);
            runtime.spawn(async move {
                log::info!("channel endpoint listening on: {}", socket_addr);
                while let Ok((stream, peer)) = listener.accept().await {
                    log::info!("peer connected: {}", peer);
                    tokio::spawn(handle_peer(
                        stream,
                        accept_tx.subscribe(),
                        incoming_tx.clone(),
                        Arc::clone(&accept_last),
                    ));
                }
            });

            Ok(WsServerChannel {
                broadcast_tx,
                incoming_rx,
                last_seen,
                _runtime: runtime,
            })
        }
    }

    impl Channel for WsServerChannel {
        fn publish(&mut self, record: &TransmissionRecord) -> Result<(), ChannelError> {
            let payload = serde_json::to_string(record)?;
            // A send error just means no peer is connected right now; the
            // transmission is lost, which the channel contract accepts.
            let _ = self.broadcast_tx.send(payload);
            Ok(())
        }

        fn notifications(&self) -> &Receiver<String> {
            &self.incoming_rx
        }

        fn fetch(&mut self) -> Result<Option<String>, ChannelError> {
            Ok(super::lock_slot(&self.last_seen).clone())
        }
    }

    async fn handle_peer(
        raw_stream: TcpStream,
        mut broadcast_rx: broadcast::Receiver<String>,
        incoming_tx: crossbeam_channel::Sender<String>,
        last_seen: Arc<Mutex<Option<String>>>,
    ) {
        let ws_stream = match accept_async(raw_stream).await {
            Ok(stream) => stream,
            Err(e) => {
                log::warn!("WebSocket handshake failed: {}", e);
                return;
            }
        };
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        let read_task = tokio::spawn(async move {
            while let Some(msg) = ws_receiver.next().await {
                match msg {
                    Ok(Message::Text(payload)) => {
                        *super::lock_slot(&last_seen) = Some(payload.clone());
                        if incoming_tx.send(payload).is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        if !is_disconnect_error(&e) {
                            log::warn!("WebSocket receive error: {}", e);
                        }
                        break;
                    }
                }
            }
        });

        while let Ok(payload) = broadcast_rx.recv().await {
            if let Err(e) = ws_sender.send(Message::Text(payload)).await {
                if !is_disconnect_error(&e) {
                    log::warn!("WebSocket send error: {}", e);
                }
                break;
            }
        }

        read_task.abort();
    }

    fn is_disconnect_error(e: &WsError) -> bool {
        match e {
            WsError::ConnectionClosed | WsError::AlreadyClosed => true,
            WsError::Io(io_err) => matches!(
                io_err.kind(),
                std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
            ),
            _ => false,
        }
    }

    /// Connecting endpoint: the mirror image of [`WsServerChannel`] for the
    /// context that dials out.
    pub struct WsClientChannel {
        outgoing_tx: mpsc::UnboundedSender<String>,
        incoming_rx: Receiver<String>,
        last_seen: Arc<Mutex<Option<String>>>,
        _runtime: Runtime,
    }

    impl WsClientChannel {
        pub fn connect(url: &str) -> Result<Self, ChannelError> {
            let runtime = build_runtime()?;

            let (ws_stream, _) = runtime
                .block_on(connect_async(url))
                .map_err(|e| ChannelError::WebSocket(format!("connect failed: {}", e)))?;
            let (mut ws_sender, mut ws_receiver) = ws_stream.split();

            let (outgoing_tx, mut outgoing_rx) = mpsc::unbounded_channel::<String>();
            let (incoming_tx, incoming_rx) = crossbeam_channel::unbounded();
            let last_seen: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));

            runtime.spawn(async move {
                while let Some(payload) = outgoing_rx.recv().await {
                    if let Err(e) = ws_sender.send(Message::Text(payload)).await {
                        if !is_disconnect_error(&e) {
                            log::warn!("WebSocket send error: {}", e);
                        }
                        break;
                    }
                }
            });

            let reader_last = Arc::clone(&last_seen);
            runtime.spawn(async move {
                while let Some(msg) = ws_receiver.next().await {
                    match msg {
                        Ok(Message::Text(payload)) => {
                            *super::lock_slot(&reader_last) = Some(payload.clone());
                            if incoming_tx.send(payload).is_err() {
                                break;
                            }
                        }
                        Ok(_) => {}
                        Err(e) => {
                            if !is_disconnect_error(&e) {
                                log::warn!("WebSocket receive error: {}", e);
                            }
                            break;
                        }
                    }
                }
            });

            Ok(WsClientChannel {
                outgoing_tx,
                incoming_rx,
                last_seen,
                _runtime: runtime,
            })
        }
    }

    impl Channel for WsClientChannel {
        fn publish(&mut self, record: &TransmissionRecord) -> Result<(), ChannelError> {
            let payload = serde_json::to_string(record)?;
            self.outgoing_tx
                .send(payload)
                .map_err(|_| ChannelError::WebSocket("connection closed".to_string()))
        }

        fn notifications(&self) -> &Receiver<String> {
            &self.incoming_rx
        }

        fn fetch(&mut self) -> Result<Option<String>, ChannelError> {
            Ok(super::lock_slot(&self.last_seen).clone())
        }
    }
}

#[cfg(feature = "websocket")]
fn lock_slot(slot: &Arc<Mutex<Option<String>>>) -> std::sync::MutexGuard<'_, Option<String>> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(feature = "websocket")]
pub use websocket::{WsClientChannel, WsServerChannel};

#[cfg(test)]
mod tests {
    use super::*;

    fn record(message: &str, origin: Origin) -> TransmissionRecord {
        TransmissionRecord::new(message, Mode::Morse, 3, origin)
    }

    #[test]
    fn fresh_ids_differ_for_identical_content() {
        let a = record("RUN", Origin::Sender);
        let b = record("RUN", Origin::Sender);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn publish_notifies_other_taps_not_writer() {
        let hub = MemoryChannel::new();
        let mut sender_side = hub.attach();
        let receiver_side = hub.attach();

        sender_side.publish(&record("HELLO", Origin::Sender)).unwrap();

        assert!(receiver_side.notifications().try_recv().is_ok());
        assert!(sender_side.notifications().try_recv().is_err());
    }

    #[test]
    fn last_write_wins_in_slot() {
        let hub = MemoryChannel::new();
        let mut side = hub.attach();
        side.publish(&record("FIRST", Origin::Sender)).unwrap();
        side.publish(&record("SECOND", Origin::Sender)).unwrap();

        let mut other = hub.attach();
        let raw = other.fetch().unwrap().unwrap();
        let parsed: TransmissionRecord = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed.message, "SECOND");
    }

    #[test]
    fn filter_ignores_own_origin() {
        let mut filter = RecordFilter::new(Origin::Sender);
        let own = serde_json::to_string(&record("MINE", Origin::Sender)).unwrap();
        let theirs = serde_json::to_string(&record("YOURS", Origin::Receiver)).unwrap();
        assert!(filter.accept(&own).is_none());
        assert!(filter.accept(&theirs).is_some());
    }

    #[test]
    fn filter_accepts_distinct_ids_once_each() {
        let mut filter = RecordFilter::new(Origin::Receiver);
        let first = serde_json::to_string(&record("SAME TEXT", Origin::Sender)).unwrap();
        let second = serde_json::to_string(&record("SAME TEXT", Origin::Sender)).unwrap();

        assert!(filter.accept(&first).is_some());
        // Replay of an already-seen id is ignored.
        assert!(filter.accept(&first).is_none());
        // Same content under a fresh id is a distinct transmission.
        assert!(filter.accept(&second).is_some());
    }

    #[test]
    fn filter_discards_malformed_payloads() {
        let mut filter = RecordFilter::new(Origin::Receiver);
        assert!(filter.accept("not json at all").is_none());
        assert!(filter.accept("{\"id\":42}").is_none());
    }

    #[test]
    fn unknown_mode_parses_to_none() {
        let raw = r#"{
            "id": "1-abc",
            "message": "HI",
            "mode": "demogorgon",
            "sender": "sender",
            "timestamp": "2024-01-01T00:00:00Z"
        }"#;
        let parsed: TransmissionRecord = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.mode, None);
        assert_eq!(parsed.speed, None);
    }

    #[test]
    fn file_channel_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("transmission.slot");

        let mut writer = FileChannel::new(&path);
        let mut reader = FileChannel::new(&path);

        assert!(reader.fetch().unwrap().is_none());

        writer.publish(&record("ELEVEN", Origin::Sender)).unwrap();
        let raw = reader.fetch().unwrap().unwrap();
        let mut filter = RecordFilter::new(Origin::Receiver);
        let accepted = filter.accept(&raw).unwrap();
        assert_eq!(accepted.message, "ELEVEN");
    }
}
