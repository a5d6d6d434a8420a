//! Unix domain socket endpoints.
//!
//! Each endpoint name maps to `<dir>/<name>.sock`.

use crate::endpoint::{Channel, EndpointListener, Endpoints};
use std::io::{self, ErrorKind};
use std::net::Shutdown;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const ACCEPT_POLL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone)]
pub struct UnixEndpoints {
    dir: PathBuf,
}

impl UnixEndpoints {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Sockets under `$XDG_RUNTIME_DIR`, falling back to the temp directory.
    pub fn runtime_dir() -> Self {
        let dir = std::env::var_os("XDG_RUNTIME_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir);
        Self::new(dir)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn socket_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.sock", name))
    }
}

impl Endpoints for UnixEndpoints {
    fn connect(&self, name: &str) -> io::Result<Channel> {
        let stream = UnixStream::connect(self.socket_path(name))?;
        stream_channel(stream)
    }

    fn bind(&self, name: &str) -> io::Result<Box<dyn EndpointListener>> {
        let path = self.socket_path(name);
        if path.exists() {
            // A live listener would accept this connection.
            if UnixStream::connect(&path).is_ok() {
                return Err(io::Error::new(
                    ErrorKind::AddrInUse,
                    format!("{} is already bound", path.display()),
                ));
            }
            debug!("Removing stale socket {}", path.display());
            std::fs::remove_file(&path)?;
        }
        let listener = UnixListener::bind(&path)?;
        listener.set_nonblocking(true)?;
        Ok(Box::new(UnixEndpointListener {
            name: name.to_string(),
            path,
            listener,
        }))
    }
}

struct UnixEndpointListener {
    name: String,
    path: PathBuf,
    listener: UnixListener,
}

impl EndpointListener for UnixEndpointListener {
    fn accept(&self, timeout: Duration) -> io::Result<Option<Channel>> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.listener.accept() {
                Ok((stream, _)) => {
                    stream.set_nonblocking(false)?;
                    return stream_channel(stream).map(Some);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(None);
                    }
                    thread::sleep(ACCEPT_POLL.min(deadline - now));
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for UnixEndpointListener {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != ErrorKind::NotFound {
                warn!("Failed to remove socket {}: {}", self.path.display(), e);
            }
        }
    }
}

fn stream_channel(stream: UnixStream) -> io::Result<Channel> {
    let reader = stream.try_clone()?;
    let control = stream.try_clone()?;
    Ok(Channel::new(reader, stream, move || {
        let _ = control.shutdown(Shutdown::Both);
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};

    #[test]
    fn test_unix_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let endpoints = UnixEndpoints::new(dir.path());
        let listener = endpoints.bind("ctrl").unwrap();
        let mut client = endpoints.connect("ctrl").unwrap();
        let mut server = listener.accept(Duration::from_secs(1)).unwrap().unwrap();

        client.writer.write_all(b"abc").unwrap();
        let mut buf = [0u8; 3];
        server.reader.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"abc");
    }

    #[test]
    fn test_connect_without_listener_fails() {
        let dir = tempfile::tempdir().unwrap();
        let endpoints = UnixEndpoints::new(dir.path());
        assert!(endpoints.connect("missing").is_err());
    }

    #[test]
    fn test_socket_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let endpoints = UnixEndpoints::new(dir.path());
        let listener = endpoints.bind("ctrl").unwrap();
        assert!(endpoints.socket_path("ctrl").exists());
        drop(listener);
        assert!(!endpoints.socket_path("ctrl").exists());
    }
}
