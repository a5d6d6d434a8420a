//! Endpoint abstraction.
//!
//! A transport needs two byte streams per connection. Where they come from
//! (in-process pipes, Unix sockets, named pipes) is decided by an
//! [`Endpoints`] implementation passed in by the caller.

use std::io::{self, Read, Write};
use std::sync::Arc;
use std::time::Duration;

/// Closes both directions of a stream, unblocking any pending read.
pub type Closer = Arc<dyn Fn() + Send + Sync>;

/// One connected byte stream, split into halves so that reading and
/// writing can happen on different threads.
pub struct Channel {
    pub reader: Box<dyn Read + Send>,
    pub writer: Box<dyn Write + Send>,
    pub closer: Closer,
}

impl Channel {
    pub fn new(
        reader: impl Read + Send + 'static,
        writer: impl Write + Send + 'static,
        closer: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
            closer: Arc::new(closer),
        }
    }

    pub fn close(&self) {
        (self.closer)();
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel").finish_non_exhaustive()
    }
}

/// Source of named byte streams.
pub trait Endpoints: Send + Sync {
    /// Connect to a listening endpoint. Fails immediately with
    /// `ConnectionRefused` or `NotFound` when nobody is listening.
    fn connect(&self, name: &str) -> io::Result<Channel>;

    /// Start listening under `name`.
    fn bind(&self, name: &str) -> io::Result<Box<dyn EndpointListener>>;
}

/// Listening side of one named endpoint. Dropping it stops listening.
pub trait EndpointListener: Send {
    /// Wait up to `timeout` for the next client. `Ok(None)` on timeout.
    fn accept(&self, timeout: Duration) -> io::Result<Option<Channel>>;

    fn name(&self) -> &str;
}

#[cfg(test)]
impl std::fmt::Debug for dyn EndpointListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointListener").field("name", &self.name()).finish()
    }
}
