//! Display errors.

use skylight_protocol::{MonitorId, WindowHandle};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DisplayError {
    #[error("monitor manager is not initialized")]
    NotInitialized,

    #[error("unknown monitor {0}")]
    UnknownMonitor(MonitorId),

    #[error("unknown window {0}")]
    UnknownWindow(WindowHandle),

    #[error("no monitors attached")]
    NoMonitors,

    #[error("display enumeration failed: {0}")]
    Enumeration(String),

    #[error("native window call failed: {0}")]
    Native(String),
}
