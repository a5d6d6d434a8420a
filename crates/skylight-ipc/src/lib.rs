//! Skylight IPC Transport
//!
//! Duplex channel between the control process and the render process:
//! - A control stream carrying framed commands, results and probes
//! - A bulk stream for payloads too large for the control stream
//! - Pluggable endpoints (in-process namespace, Unix domain sockets)
//!
//! The transport never reconnects on its own. Losing the connection is
//! reported once through the error handler and every later send fails.

pub mod config;
pub mod endpoint;
pub mod error;
pub mod frame;
pub mod listener;
pub mod local;
pub mod transport;
#[cfg(unix)]
pub mod unix;

pub use config::{EndpointNames, TransportConfig};
pub use endpoint::{Channel, EndpointListener, Endpoints};
pub use error::{IpcError, ProtocolError};
pub use frame::{FrameHeader, FrameKind};
pub use listener::TransportListener;
pub use local::LocalNamespace;
pub use transport::{ErrorHandler, MessageHandler, Transport, TransportStats};
#[cfg(unix)]
pub use unix::UnixEndpoints;
