//! In-process endpoints.
//!
//! A [`LocalNamespace`] is an explicit registry of listening names. Two
//! halves of an application (or a test and a render host running on a
//! thread) share one namespace instance; there is no process-wide registry.

use crate::endpoint::{Channel, EndpointListener, Endpoints};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::collections::{HashMap, VecDeque};
use std::io::{self, ErrorKind, Read, Write};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::debug;

#[derive(Clone, Default)]
pub struct LocalNamespace {
    listeners: Arc<Mutex<HashMap<String, Sender<Channel>>>>,
}

impl LocalNamespace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether something is currently listening under `name`.
    pub fn is_listening(&self, name: &str) -> bool {
        self.registry().contains_key(name)
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<String, Sender<Channel>>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Endpoints for LocalNamespace {
    fn connect(&self, name: &str) -> io::Result<Channel> {
        let Some(listener) = self.registry().get(name).cloned() else {
            return Err(io::Error::new(
                ErrorKind::ConnectionRefused,
                format!("nothing listening on {}", name),
            ));
        };

        let upstream = Pipe::new();
        let downstream = Pipe::new();
        let client = pipe_channel(&downstream, &upstream);
        let server = pipe_channel(&upstream, &downstream);

        listener.send(server).map_err(|_| {
            io::Error::new(ErrorKind::ConnectionRefused, format!("{} stopped listening", name))
        })?;
        debug!("Local endpoint {} connected", name);
        Ok(client)
    }

    fn bind(&self, name: &str) -> io::Result<Box<dyn EndpointListener>> {
        let mut registry = self.registry();
        if registry.contains_key(name) {
            return Err(io::Error::new(
                ErrorKind::AddrInUse,
                format!("{} is already bound", name),
            ));
        }
        let (tx, rx) = unbounded();
        registry.insert(name.to_string(), tx.clone());
        Ok(Box::new(LocalListener {
            name: name.to_string(),
            incoming: rx,
            sender: tx,
            namespace: self.clone(),
        }))
    }
}

struct LocalListener {
    name: String,
    incoming: Receiver<Channel>,
    sender: Sender<Channel>,
    namespace: LocalNamespace,
}

impl EndpointListener for LocalListener {
    fn accept(&self, timeout: Duration) -> io::Result<Option<Channel>> {
        match self.incoming.recv_timeout(timeout) {
            Ok(channel) => Ok(Some(channel)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                Err(io::Error::new(ErrorKind::NotConnected, "listener closed"))
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for LocalListener {
    fn drop(&mut self) {
        let mut registry = self.namespace.registry();
        if registry
            .get(&self.name)
            .is_some_and(|tx| tx.same_channel(&self.sender))
        {
            registry.remove(&self.name);
        }
    }
}

// ===== Pipes =====

#[derive(Default)]
struct PipeState {
    buf: VecDeque<u8>,
    write_closed: bool,
    read_closed: bool,
}

/// One direction of an in-process byte stream.
#[derive(Default)]
struct Pipe {
    state: Mutex<PipeState>,
    ready: Condvar,
}

impl Pipe {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, PipeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn close(&self) {
        let mut state = self.lock();
        state.write_closed = true;
        state.read_closed = true;
        self.ready.notify_all();
    }
}

fn pipe_channel(inbound: &Arc<Pipe>, outbound: &Arc<Pipe>) -> Channel {
    let (a, b) = (inbound.clone(), outbound.clone());
    Channel::new(
        PipeReader(inbound.clone()),
        PipeWriter(outbound.clone()),
        move || {
            a.close();
            b.close();
        },
    )
}

struct PipeReader(Arc<Pipe>);

impl Read for PipeReader {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        let mut state = self.0.lock();
        loop {
            if state.read_closed {
                return Ok(0);
            }
            if !state.buf.is_empty() {
                let n = out.len().min(state.buf.len());
                for (slot, byte) in out.iter_mut().zip(state.buf.drain(..n)) {
                    *slot = byte;
                }
                return Ok(n);
            }
            if state.write_closed {
                return Ok(0);
            }
            state = self
                .0
                .ready
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

impl Drop for PipeReader {
    fn drop(&mut self) {
        let mut state = self.0.lock();
        state.read_closed = true;
        state.buf.clear();
        self.0.ready.notify_all();
    }
}

struct PipeWriter(Arc<Pipe>);

impl Write for PipeWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let mut state = self.0.lock();
        if state.read_closed || state.write_closed {
            return Err(io::Error::new(ErrorKind::BrokenPipe, "pipe closed"));
        }
        state.buf.extend(data);
        self.0.ready.notify_all();
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for PipeWriter {
    fn drop(&mut self) {
        let mut state = self.0.lock();
        state.write_closed = true;
        self.0.ready.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_connect_without_listener_fails_fast() {
        let ns = LocalNamespace::new();
        let err = ns.connect("nobody").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConnectionRefused);
    }

    #[test]
    fn test_bytes_flow_both_ways() {
        let ns = LocalNamespace::new();
        let listener = ns.bind("pipe").unwrap();
        let mut client = ns.connect("pipe").unwrap();
        let mut server = listener.accept(Duration::from_secs(1)).unwrap().unwrap();

        client.writer.write_all(b"ping").unwrap();
        let mut buf = [0u8; 4];
        server.reader.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");

        server.writer.write_all(b"pong").unwrap();
        client.reader.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"pong");
    }

    #[test]
    fn test_close_unblocks_peer_reader() {
        let ns = LocalNamespace::new();
        let listener = ns.bind("pipe").unwrap();
        let client = ns.connect("pipe").unwrap();
        let mut server = listener.accept(Duration::from_secs(1)).unwrap().unwrap();

        let reader = thread::spawn(move || {
            let mut buf = [0u8; 1];
            server.reader.read(&mut buf).unwrap()
        });
        client.close();
        assert_eq!(reader.join().unwrap(), 0);
    }

    #[test]
    fn test_double_bind_rejected_and_released_on_drop() {
        let ns = LocalNamespace::new();
        let listener = ns.bind("pipe").unwrap();
        assert_eq!(ns.bind("pipe").unwrap_err().kind(), ErrorKind::AddrInUse);
        drop(listener);
        assert!(!ns.is_listening("pipe"));
        assert!(ns.bind("pipe").is_ok());
    }

    #[test]
    fn test_accept_times_out() {
        let ns = LocalNamespace::new();
        let listener = ns.bind("pipe").unwrap();
        assert!(listener.accept(Duration::from_millis(10)).unwrap().is_none());
    }
}
