//! Results and telemetry returned by the render process.

use crate::command::RenderBackendType;
use crate::ids::{CommandId, WidgetId};
use serde::{Deserialize, Serialize};

/// Outcome of one command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RenderResultStatus {
    Success,
    Failure,
    Pending,
    BackendNotSupported,
    ContentLoadError,
    InvalidParameters,
    /// Synthesised by the control process; never sent over the wire.
    TimedOut,
    /// Synthesised by the control process; never sent over the wire.
    ConnectionLost,
}

impl RenderResultStatus {
    pub fn code(&self) -> u32 {
        match self {
            Self::Success => 0,
            Self::Failure => 1,
            Self::Pending => 2,
            Self::BackendNotSupported => 3,
            Self::ContentLoadError => 4,
            Self::InvalidParameters => 5,
            Self::TimedOut => 0x100,
            Self::ConnectionLost => 0x101,
        }
    }

    /// Decode a status received over the wire. Local-only codes are rejected.
    pub fn from_wire(code: u32) -> Option<Self> {
        Some(match code {
            0 => Self::Success,
            1 => Self::Failure,
            2 => Self::Pending,
            3 => Self::BackendNotSupported,
            4 => Self::ContentLoadError,
            5 => Self::InvalidParameters,
            _ => return None,
        })
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Self::TimedOut | Self::ConnectionLost)
    }
}

/// Exactly one result is produced for every command, matched by `command_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderResult {
    pub command_id: CommandId,
    pub widget_id: WidgetId,
    pub status: RenderResultStatus,
    pub error_message: Option<String>,
    pub render_time_ms: u64,
    pub frame_count: u32,
    pub average_fps: f32,
    pub memory_usage_mb: u64,
    /// Milliseconds since the Unix epoch when the result was produced
    pub timestamp: u64,
    /// Optional bulk payload, e.g. captured image bytes
    pub data: Vec<u8>,
}

impl RenderResult {
    pub fn success(command_id: CommandId, widget_id: WidgetId) -> Self {
        Self::with_status(command_id, widget_id, RenderResultStatus::Success, None)
    }

    pub fn failure(
        command_id: CommandId,
        widget_id: WidgetId,
        status: RenderResultStatus,
        message: impl Into<String>,
    ) -> Self {
        Self::with_status(command_id, widget_id, status, Some(message.into()))
    }

    /// Local failure for a command whose deadline passed.
    pub fn timed_out(command_id: CommandId, widget_id: WidgetId) -> Self {
        Self::failure(command_id, widget_id, RenderResultStatus::TimedOut, "timeout")
    }

    /// Local failure for a command whose connection went away.
    pub fn connection_lost(command_id: CommandId, widget_id: WidgetId) -> Self {
        Self::failure(
            command_id,
            widget_id,
            RenderResultStatus::ConnectionLost,
            "connection lost",
        )
    }

    fn with_status(
        command_id: CommandId,
        widget_id: WidgetId,
        status: RenderResultStatus,
        error_message: Option<String>,
    ) -> Self {
        Self {
            command_id,
            widget_id,
            status,
            error_message,
            render_time_ms: 0,
            frame_count: 0,
            average_fps: 0.0,
            memory_usage_mb: 0,
            timestamp: crate::timestamp_ms(),
            data: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == RenderResultStatus::Success
    }

    pub fn is_timeout(&self) -> bool {
        self.status == RenderResultStatus::TimedOut
    }

    pub fn is_connection_lost(&self) -> bool {
        self.status == RenderResultStatus::ConnectionLost
    }
}

/// Advisory rendering telemetry for one widget.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub current_fps: f32,
    pub average_fps: f32,
    pub total_frames: u64,
    pub dropped_frames: u64,
    pub memory_usage_mb: u64,
    pub vram_usage_mb: u64,
    pub cpu_usage_percent: f32,
    pub gpu_usage_percent: f32,
    pub render_time_ms: u64,
    pub content_load_time_ms: u64,
}

/// What the render process can do on this machine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemCapabilities {
    pub supports_skia: bool,
    pub supports_direct3d: bool,
    pub supports_webview: bool,
    pub supports_hardware_acceleration: bool,
    pub supports_multi_monitor: bool,
    pub supports_high_dpi: bool,
    pub gpu_name: String,
    pub driver_version: String,
    pub total_vram: u64,
    pub available_vram: u64,
}

impl SystemCapabilities {
    /// Concrete backends this machine supports.
    pub fn supported_backends(&self) -> Vec<RenderBackendType> {
        let mut backends = Vec::new();
        if self.supports_skia {
            backends.push(RenderBackendType::SkiaSharp);
        }
        if self.supports_direct3d {
            backends.push(RenderBackendType::Direct3D);
        }
        if self.supports_webview {
            backends.push(RenderBackendType::WebView);
        }
        backends
    }

    pub fn supports(&self, backend: RenderBackendType) -> bool {
        match backend {
            RenderBackendType::Auto => !self.supported_backends().is_empty(),
            other => self.supported_backends().contains(&other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_statuses_not_decodable() {
        assert_eq!(RenderResultStatus::from_wire(RenderResultStatus::TimedOut.code()), None);
        assert_eq!(
            RenderResultStatus::from_wire(RenderResultStatus::ContentLoadError.code()),
            Some(RenderResultStatus::ContentLoadError)
        );
    }

    #[test]
    fn test_synthetic_results() {
        let r = RenderResult::timed_out(CommandId(3), WidgetId(1));
        assert!(r.is_timeout());
        assert!(!r.is_success());
        assert_eq!(r.error_message.as_deref(), Some("timeout"));

        let r = RenderResult::connection_lost(CommandId(4), WidgetId(1));
        assert!(r.is_connection_lost());
        assert_eq!(r.error_message.as_deref(), Some("connection lost"));
    }

    #[test]
    fn test_supported_backends() {
        let caps = SystemCapabilities {
            supports_skia: true,
            supports_webview: true,
            ..Default::default()
        };
        assert_eq!(
            caps.supported_backends(),
            vec![RenderBackendType::SkiaSharp, RenderBackendType::WebView]
        );
        assert!(caps.supports(RenderBackendType::Auto));
        assert!(!caps.supports(RenderBackendType::Direct3D));
        assert!(!SystemCapabilities::default().supports(RenderBackendType::Auto));
    }
}
