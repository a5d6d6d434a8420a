//! Skylight Protocol
//!
//! Data contracts shared by the control process and the render process:
//! - Identifiers for commands, widgets, windows and monitors
//! - Logical/physical geometry with DPI scale
//! - Render commands, results, content and compositing properties
//! - The binary message codec carried inside transport frames
//!
//! # Wire compatibility
//!
//! Every message body starts with its fixed fields in a fixed order
//! (`commandId`, `widgetId`, `commandType` for commands). New optional
//! fields may only be appended; decoders ignore trailing bytes they do
//! not understand.

mod codec;
mod command;
mod content;
mod geometry;
mod ids;
mod monitor;
mod properties;
mod result;

pub use codec::{DecodeError, EncodeError, Message, MessageKind, MAX_MESSAGE_BYTES};
pub use command::{CaptureRequest, CommandPayload, CommandType, ImageFormat, RenderBackendType, RenderCommand};
pub use content::{ContentError, ContentParameters, ContentSourceType};
pub use geometry::{Dpi, PixelRect, RenderRect, BASE_DPI};
pub use ids::{CommandId, MonitorId, WidgetId, WindowHandle};
pub use monitor::MonitorInfo;
pub use properties::{PropertiesError, RenderColor, RenderProperties};
pub use result::{PerformanceMetrics, RenderResult, RenderResultStatus, SystemCapabilities};

/// Milliseconds since the Unix epoch, used for message timestamps.
pub fn timestamp_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
