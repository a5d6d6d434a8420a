//! Error types for proxies, surfaces and the render-process supervisor.

use crate::proxy::ProxyState;
use skylight_display::DisplayError;
use skylight_protocol::{CommandId, CommandType, PropertiesError, RenderResultStatus, WidgetId};
use thiserror::Error;

/// Failures reported through a proxy's error callback.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProxyError {
    #[error("{command_type} {command_id} failed ({status:?}): {message}")]
    CommandFailed {
        command_id: CommandId,
        command_type: CommandType,
        status: RenderResultStatus,
        message: String,
    },

    #[error("{command_type} {command_id} timed out")]
    TimedOut {
        command_id: CommandId,
        command_type: CommandType,
    },

    #[error("connection lost: {0}")]
    ConnectionLost(String),

    #[error("operation not allowed in state {0:?}")]
    InvalidState(ProxyState),

    #[error("widget {0} already has a live proxy")]
    WidgetInUse(WidgetId),

    #[error("blocking call made on an async runtime thread; use the async variant")]
    BlockingInRuntime,
}

/// Render surface errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SurfaceError {
    #[error("surface is not attached to a window")]
    NotCreated,

    #[error("surface already attached")]
    AlreadyCreated,

    #[error("invalid bounds {0}x{1}")]
    InvalidBounds(i32, i32),

    #[error("invalid properties: {0}")]
    Properties(#[from] PropertiesError),

    #[error(transparent)]
    Display(#[from] DisplayError),
}

/// Render process supervisor errors
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("no render host executable configured")]
    NotConfigured,

    #[error("render host already running")]
    AlreadyRunning,

    #[error("render host is not running")]
    NotRunning,

    #[error("failed to launch {path}: {source}")]
    Spawn {
        path: String,
        source: std::io::Error,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        let err = ProxyError::TimedOut {
            command_id: CommandId(9),
            command_type: CommandType::Resize,
        };
        assert_eq!(err.to_string(), "Resize Cmd(9) timed out");

        let err = SurfaceError::from(DisplayError::NoMonitors);
        assert!(matches!(err, SurfaceError::Display(_)));
    }
}
