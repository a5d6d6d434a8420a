//! Duplex transport.
//!
//! Each connection owns three threads:
//! - writer: drains the bounded send queue onto both streams
//! - control reader: reads control frames and dispatches messages in order
//! - bulk reader: reads bulk records and hands them to the control reader
//!
//! Frames too large for the control stream are written to the bulk stream
//! first, followed by a header-only control frame that references them.
//! The control reader blocks on the referenced record, so delivery order
//! always follows the control stream.

use crate::config::{EndpointNames, TransportConfig};
use crate::endpoint::{Channel, Closer, Endpoints};
use crate::error::{IpcError, ProtocolError};
use crate::frame::{self, FrameKind, FLAG_BULK_REF};
use crossbeam_channel::{bounded, unbounded, Receiver, SendTimeoutError, Sender, TrySendError};
use serde::Serialize;
use skylight_protocol::Message;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// Sequence number and kind prefixed to every bulk record.
const BULK_OVERHEAD: usize = 9;

/// Called on the control reader thread for every received message.
/// Handlers must return quickly.
pub type MessageHandler = Arc<dyn Fn(Message) + Send + Sync>;

/// Called at most once per connection when it breaks.
pub type ErrorHandler = Arc<dyn Fn(IpcError) + Send + Sync>;

/// Transport counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TransportStats {
    pub frames_sent: u64,
    pub frames_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub bulk_sent: u64,
    pub bulk_received: u64,
    pub probes_sent: u64,
    pub probes_failed: u64,
    pub errors: u64,
}

#[derive(Default)]
struct Counters {
    frames_sent: AtomicU64,
    frames_received: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    bulk_sent: AtomicU64,
    bulk_received: AtomicU64,
    probes_sent: AtomicU64,
    probes_failed: AtomicU64,
    errors: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }

    fn snapshot(&self) -> TransportStats {
        TransportStats {
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            bulk_sent: self.bulk_sent.load(Ordering::Relaxed),
            bulk_received: self.bulk_received.load(Ordering::Relaxed),
            probes_sent: self.probes_sent.load(Ordering::Relaxed),
            probes_failed: self.probes_failed.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

struct Outbound {
    kind: FrameKind,
    body: Vec<u8>,
}

struct Session {
    tx: Sender<Outbound>,
    closers: Vec<Closer>,
    threads: Vec<JoinHandle<()>>,
}

impl Session {
    fn shut(&self) {
        for close in &self.closers {
            close();
        }
    }
}

struct Inner {
    config: TransportConfig,
    connected: AtomicBool,
    faulted: AtomicBool,
    generation: AtomicU64,
    session: Mutex<Option<Session>>,
    on_message: RwLock<Option<MessageHandler>>,
    on_error: RwLock<Option<ErrorHandler>>,
    probes: Mutex<HashMap<u64, Sender<()>>>,
    next_nonce: AtomicU64,
    counters: Counters,
}

/// One end of a control/bulk stream pair.
///
/// Register handlers before connecting; messages that arrive with no
/// handler installed are dropped.
pub struct Transport {
    inner: Arc<Inner>,
}

impl Transport {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                connected: AtomicBool::new(false),
                faulted: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                session: Mutex::new(None),
                on_message: RwLock::new(None),
                on_error: RwLock::new(None),
                probes: Mutex::new(HashMap::new()),
                next_nonce: AtomicU64::new(1),
                counters: Counters::default(),
            }),
        }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.inner.config
    }

    /// Replace the message handler.
    pub fn on_message(&self, handler: impl Fn(Message) + Send + Sync + 'static) {
        *self
            .inner
            .on_message
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(handler));
    }

    /// Replace the error handler.
    pub fn on_error(&self, handler: impl Fn(IpcError) + Send + Sync + 'static) {
        *self
            .inner
            .on_error
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(handler));
    }

    /// Connect both channels. Fails immediately if the render process is
    /// not listening yet; retrying is up to the caller.
    pub fn connect(&self, endpoints: &dyn Endpoints, names: &EndpointNames) -> Result<(), IpcError> {
        if self.is_connected() {
            return Err(IpcError::AlreadyConnected);
        }

        let mut control = endpoints
            .connect(&names.control_pipe)
            .map_err(|source| IpcError::Connect {
                name: names.control_pipe.clone(),
                source,
            })?;
        let mut bulk = match endpoints.connect(&names.shared_memory) {
            Ok(bulk) => bulk,
            Err(source) => {
                control.close();
                return Err(IpcError::Connect {
                    name: names.shared_memory.clone(),
                    source,
                });
            }
        };

        let token = handshake_token().to_le_bytes();
        let hello = frame::write_frame(&mut control.writer, FrameKind::Hello, 0, &token)
            .and_then(|_| frame::write_frame(&mut bulk.writer, FrameKind::Hello, 0, &token));
        if let Err(e) = hello {
            control.close();
            bulk.close();
            return Err(IpcError::Io(e));
        }

        self.attach(control, bulk)?;
        info!("Transport connected to {}", names.control_pipe);
        Ok(())
    }

    /// Start serving an already paired set of channels.
    pub(crate) fn attach(&self, control: Channel, bulk: Channel) -> Result<(), IpcError> {
        let inner = &self.inner;
        let mut session_slot = inner.session();
        if session_slot.is_some() {
            control.close();
            bulk.close();
            return Err(IpcError::AlreadyConnected);
        }

        let generation = inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = bounded(inner.config.send_queue_capacity.max(1));
        let (bulk_tx, bulk_rx) = unbounded();
        let Channel {
            reader: control_reader,
            writer: control_writer,
            closer: control_closer,
        } = control;
        let Channel {
            reader: bulk_reader,
            writer: bulk_writer,
            closer: bulk_closer,
        } = bulk;

        *session_slot = Some(Session {
            tx,
            closers: vec![control_closer.clone(), bulk_closer.clone()],
            threads: Vec::new(),
        });
        inner.faulted.store(false, Ordering::SeqCst);
        inner.connected.store(true, Ordering::SeqCst);
        drop(session_slot);

        let spawned = [
            spawn_named("ipc-writer", {
                let inner = inner.clone();
                move || run_writer(inner, generation, rx, control_writer, bulk_writer)
            }),
            spawn_named("ipc-bulk-reader", {
                let inner = inner.clone();
                move || run_bulk_reader(inner, generation, bulk_reader, bulk_tx)
            }),
            spawn_named("ipc-control-reader", {
                let inner = inner.clone();
                move || run_control_reader(inner, generation, control_reader, bulk_rx)
            }),
        ];

        let mut handles = Vec::new();
        for spawned in spawned {
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    control_closer();
                    bulk_closer();
                    self.close();
                    return Err(IpcError::Io(e));
                }
            }
        }
        if let Some(session) = inner.session().as_mut() {
            session.threads = handles;
        }
        Ok(())
    }

    /// Queue a message. Never blocks; a full queue is reported as `QueueFull`.
    pub fn send(&self, message: &Message) -> Result<(), IpcError> {
        let outbound = self.outbound(message)?;
        self.inner.enqueue(outbound)
    }

    /// Queue a message, waiting up to `timeout` for room in the send queue.
    /// `QueueFull` means the peer drained nothing for the whole wait.
    pub fn send_timeout(&self, message: &Message, timeout: Duration) -> Result<(), IpcError> {
        let outbound = self.outbound(message)?;
        self.inner.enqueue_timeout(outbound, timeout)
    }

    fn outbound(&self, message: &Message) -> Result<Outbound, IpcError> {
        if !self.is_connected() {
            return Err(self.inner.disconnected_error());
        }
        let body = message.encode()?;
        let max = self.inner.config.max_frame_bytes;
        if body.len() > max {
            return Err(IpcError::MessageTooLarge {
                len: body.len(),
                max,
            });
        }
        Ok(Outbound {
            kind: message.kind().into(),
            body,
        })
    }

    /// Round-trip probe. The only way to notice a connection that is open
    /// but no longer served.
    pub fn test_connection(&self) -> bool {
        if !self.is_connected() {
            return false;
        }

        let inner = &self.inner;
        let nonce = inner.next_nonce.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = bounded(1);
        inner.probes().insert(nonce, tx);
        Counters::bump(&inner.counters.probes_sent, 1);

        let sent = Message::Ping { nonce }
            .encode()
            .map_err(IpcError::from)
            .and_then(|body| {
                inner.enqueue(Outbound {
                    kind: FrameKind::Ping,
                    body,
                })
            });
        let ok = sent.is_ok() && rx.recv_timeout(inner.config.probe_timeout()).is_ok();

        inner.probes().remove(&nonce);
        if !ok {
            Counters::bump(&inner.counters.probes_failed, 1);
            debug!("Connection probe {} failed", nonce);
        }
        ok
    }

    /// Orderly shutdown. No error event is raised.
    pub fn close(&self) {
        let inner = &self.inner;
        let was_connected = inner.connected.swap(false, Ordering::SeqCst);
        let session = inner.session().take();
        inner.probes().clear();

        if let Some(session) = session {
            session.shut();
            let Session { tx, threads, .. } = session;
            drop(tx);
            let current = thread::current().id();
            for handle in threads {
                if handle.thread().id() != current {
                    let _ = handle.join();
                }
            }
        }
        if was_connected {
            info!("Transport closed");
        }
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> TransportStats {
        self.inner.counters.snapshot()
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

impl Inner {
    fn session(&self) -> MutexGuard<'_, Option<Session>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn probes(&self) -> MutexGuard<'_, HashMap<u64, Sender<()>>> {
        self.probes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn disconnected_error(&self) -> IpcError {
        if self.faulted.load(Ordering::SeqCst) {
            IpcError::ConnectionLost("transport faulted".into())
        } else {
            IpcError::NotConnected
        }
    }

    fn enqueue(&self, outbound: Outbound) -> Result<(), IpcError> {
        let session = self.session();
        let Some(session) = session.as_ref() else {
            return Err(self.disconnected_error());
        };
        match session.tx.try_send(outbound) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(IpcError::QueueFull),
            Err(TrySendError::Disconnected(_)) => {
                Err(IpcError::ConnectionLost("writer stopped".into()))
            }
        }
    }

    /// Blocking variant of [`enqueue`](Self::enqueue). The session lock is
    /// released while waiting so `close` and `fail` are never held up.
    fn enqueue_timeout(&self, outbound: Outbound, timeout: Duration) -> Result<(), IpcError> {
        let tx = match self.session().as_ref() {
            Some(session) => session.tx.clone(),
            None => return Err(self.disconnected_error()),
        };
        match tx.send_timeout(outbound, timeout) {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => Err(IpcError::QueueFull),
            Err(SendTimeoutError::Disconnected(_)) => {
                Err(IpcError::ConnectionLost("writer stopped".into()))
            }
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    /// Tear the connection down after a fault and report it once.
    fn fail(&self, generation: u64, err: IpcError) {
        if !self.is_current(generation) || !self.connected.swap(false, Ordering::SeqCst) {
            return;
        }
        self.faulted.store(true, Ordering::SeqCst);
        Counters::bump(&self.counters.errors, 1);

        if let Some(session) = self.session().take() {
            session.shut();
        }
        self.probes().clear();

        warn!("Transport fault: {}", err);
        let handler = self
            .on_error
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(handler) = handler {
            handler(err);
        }
    }

    fn dispatch(&self, message: Message) {
        match message {
            Message::Ping { nonce } => {
                let reply = Message::Pong { nonce }.encode().map_err(IpcError::from);
                if let Err(e) = reply.and_then(|body| {
                    self.enqueue(Outbound {
                        kind: FrameKind::Pong,
                        body,
                    })
                }) {
                    debug!("Could not answer ping {}: {}", nonce, e);
                }
            }
            Message::Pong { nonce } => {
                if let Some(waiter) = self.probes().remove(&nonce) {
                    let _ = waiter.try_send(());
                }
            }
            other => {
                let handler = self
                    .on_message
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone();
                match handler {
                    Some(handler) => handler(other),
                    None => debug!("No handler for {:?} message", other.kind()),
                }
            }
        }
    }
}

fn spawn_named(
    name: &str,
    f: impl FnOnce() + Send + 'static,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new().name(name.to_string()).spawn(f)
}

fn run_writer(
    inner: Arc<Inner>,
    generation: u64,
    rx: Receiver<Outbound>,
    mut control: Box<dyn Write + Send>,
    mut bulk: Box<dyn Write + Send>,
) {
    let threshold = inner.config.bulk_threshold;
    let mut next_seq: u64 = 0;

    while let Ok(out) = rx.recv() {
        let written = if out.body.len() > threshold {
            next_seq += 1;
            let record = frame::encode_bulk_record(next_seq, out.kind, &out.body);
            frame::write_frame(&mut bulk, FrameKind::Bulk, 0, &record).and_then(|n| {
                Counters::bump(&inner.counters.bulk_sent, 1);
                frame::write_frame(&mut control, out.kind, FLAG_BULK_REF, &next_seq.to_le_bytes())
                    .map(|m| n + m)
            })
        } else {
            frame::write_frame(&mut control, out.kind, 0, &out.body)
        };

        match written {
            Ok(bytes) => {
                Counters::bump(&inner.counters.frames_sent, 1);
                Counters::bump(&inner.counters.bytes_sent, bytes as u64);
            }
            Err(e) => {
                inner.fail(generation, IpcError::ConnectionLost(format!("write failed: {}", e)));
                break;
            }
        }
    }
    debug!("Transport writer stopped");
}

fn run_bulk_reader(
    inner: Arc<Inner>,
    generation: u64,
    mut reader: Box<dyn Read + Send>,
    records: Sender<(u64, FrameKind, Vec<u8>)>,
) {
    if let Err(e) = read_bulk(&inner, &mut reader, &records) {
        inner.fail(generation, e);
    }
}

fn read_bulk(
    inner: &Inner,
    reader: &mut dyn Read,
    records: &Sender<(u64, FrameKind, Vec<u8>)>,
) -> Result<(), IpcError> {
    let max = inner.config.max_frame_bytes + BULK_OVERHEAD;
    while let Some((header, payload)) = frame::read_frame(reader, max)? {
        if header.kind != FrameKind::Bulk {
            return Err(ProtocolError::UnexpectedFrame(header.kind.name()).into());
        }
        Counters::bump(&inner.counters.bulk_received, 1);
        Counters::bump(
            &inner.counters.bytes_received,
            (frame::HEADER_LEN + payload.len()) as u64,
        );
        let (seq, kind, body) = frame::decode_bulk_record(&payload)?;
        if records.send((seq, kind, body.to_vec())).is_err() {
            return Ok(());
        }
    }
    Err(IpcError::ConnectionLost("bulk channel closed".into()))
}

fn run_control_reader(
    inner: Arc<Inner>,
    generation: u64,
    mut reader: Box<dyn Read + Send>,
    records: Receiver<(u64, FrameKind, Vec<u8>)>,
) {
    if let Err(e) = read_control(&inner, generation, &mut reader, &records) {
        inner.fail(generation, e);
    }
    debug!("Transport control reader stopped");
}

fn read_control(
    inner: &Inner,
    generation: u64,
    reader: &mut dyn Read,
    records: &Receiver<(u64, FrameKind, Vec<u8>)>,
) -> Result<(), IpcError> {
    let max = inner.config.max_frame_bytes;
    let mut expected_seq: u64 = 0;

    while let Some((header, payload)) = frame::read_frame(reader, max)? {
        let Some(kind) = header.kind.message_kind() else {
            return Err(ProtocolError::UnexpectedFrame(header.kind.name()).into());
        };
        Counters::bump(&inner.counters.frames_received, 1);
        Counters::bump(
            &inner.counters.bytes_received,
            (frame::HEADER_LEN + payload.len()) as u64,
        );

        let message = if header.is_bulk_ref() {
            let seq = frame::decode_u64_payload(&payload, "bulk reference")?;
            expected_seq += 1;
            let (got, bulk_kind, body) = records
                .recv()
                .map_err(|_| IpcError::ConnectionLost("bulk channel closed".into()))?;
            if got != seq || got != expected_seq {
                return Err(ProtocolError::BulkOutOfOrder {
                    expected: expected_seq,
                    got,
                }
                .into());
            }
            if bulk_kind != header.kind {
                return Err(ProtocolError::UnexpectedFrame(bulk_kind.name()).into());
            }
            Message::decode(kind, &body).map_err(ProtocolError::from)?
        } else {
            Message::decode(kind, &payload).map_err(ProtocolError::from)?
        };

        if !inner.is_current(generation) {
            return Ok(());
        }
        inner.dispatch(message);
    }
    Err(IpcError::ConnectionLost("peer closed the connection".into()))
}

/// Read the pairing token both channels start with.
pub(crate) fn read_hello(reader: &mut dyn Read, max: usize) -> Result<u64, IpcError> {
    match frame::read_frame(reader, max)? {
        Some((header, payload)) if header.kind == FrameKind::Hello => {
            Ok(frame::decode_u64_payload(&payload, "hello")?)
        }
        Some((header, _)) => Err(ProtocolError::UnexpectedFrame(header.kind.name()).into()),
        None => Err(IpcError::ConnectionLost("closed before handshake".into())),
    }
}

fn handshake_token() -> u64 {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    nanos ^ ((std::process::id() as u64) << 32) ^ COUNTER.fetch_add(1, Ordering::Relaxed)
}
