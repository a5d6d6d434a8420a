//! Render commands issued by the control process.

use crate::content::ContentParameters;
use crate::geometry::RenderRect;
use crate::ids::{CommandId, WidgetId, WindowHandle};
use crate::properties::RenderProperties;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Rendering implementation requested for a widget.
///
/// `Auto` lets the render process choose; which concrete renderer it picks
/// never changes the wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RenderBackendType {
    SkiaSharp,
    Direct3D,
    WebView,
    #[default]
    Auto,
}

impl RenderBackendType {
    pub fn code(&self) -> u32 {
        match self {
            Self::SkiaSharp => 0,
            Self::Direct3D => 1,
            Self::WebView => 2,
            Self::Auto => 99,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            0 => Self::SkiaSharp,
            1 => Self::Direct3D,
            2 => Self::WebView,
            99 => Self::Auto,
            _ => return None,
        })
    }

    /// Concrete backends, in the order the render process prefers them.
    pub fn concrete() -> &'static [RenderBackendType] {
        &[Self::Direct3D, Self::SkiaSharp, Self::WebView]
    }
}

impl fmt::Display for RenderBackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SkiaSharp => write!(f, "SkiaSharp"),
            Self::Direct3D => write!(f, "Direct3D"),
            Self::WebView => write!(f, "WebView"),
            Self::Auto => write!(f, "Auto"),
        }
    }
}

/// Discriminant of a command on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandType {
    Initialize,
    RenderFrame,
    Resize,
    Destroy,
    SwitchBackend,
    UpdateContent,
    SetProperties,
    Capture,
    QueryCapabilities,
}

impl CommandType {
    pub fn code(&self) -> u32 {
        match self {
            Self::Initialize => 0,
            Self::RenderFrame => 1,
            Self::Resize => 2,
            Self::Destroy => 3,
            Self::SwitchBackend => 4,
            Self::UpdateContent => 5,
            Self::SetProperties => 6,
            Self::Capture => 7,
            Self::QueryCapabilities => 100,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            0 => Self::Initialize,
            1 => Self::RenderFrame,
            2 => Self::Resize,
            3 => Self::Destroy,
            4 => Self::SwitchBackend,
            5 => Self::UpdateContent,
            6 => Self::SetProperties,
            7 => Self::Capture,
            100 => Self::QueryCapabilities,
            _ => return None,
        })
    }
}

impl fmt::Display for CommandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Image encoding for frame captures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ImageFormat {
    #[default]
    Png,
    Jpeg,
    Bmp,
}

impl ImageFormat {
    pub fn code(&self) -> u8 {
        match self {
            Self::Png => 0,
            Self::Jpeg => 1,
            Self::Bmp => 2,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => Self::Png,
            1 => Self::Jpeg,
            2 => Self::Bmp,
            _ => return None,
        })
    }

    /// Parse a format name such as "PNG" or "jpg".
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "png" => Some(Self::Png),
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "bmp" => Some(Self::Bmp),
            _ => None,
        }
    }
}

/// Frame capture request.
///
/// With a path the render process writes the image itself; without one the
/// encoded image comes back in the result's data payload.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CaptureRequest {
    pub format: ImageFormat,
    pub path: Option<String>,
}

/// Command body, one variant per command type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CommandPayload {
    Initialize {
        backend: RenderBackendType,
        window: WindowHandle,
        bounds: RenderRect,
    },
    RenderFrame {
        content: ContentParameters,
        properties: RenderProperties,
    },
    UpdateContent {
        content: ContentParameters,
    },
    Resize {
        bounds: RenderRect,
    },
    SwitchBackend {
        backend: RenderBackendType,
    },
    SetProperties {
        properties: RenderProperties,
    },
    Capture(CaptureRequest),
    QueryCapabilities,
    Destroy,
}

impl CommandPayload {
    pub fn command_type(&self) -> CommandType {
        match self {
            Self::Initialize { .. } => CommandType::Initialize,
            Self::RenderFrame { .. } => CommandType::RenderFrame,
            Self::UpdateContent { .. } => CommandType::UpdateContent,
            Self::Resize { .. } => CommandType::Resize,
            Self::SwitchBackend { .. } => CommandType::SwitchBackend,
            Self::SetProperties { .. } => CommandType::SetProperties,
            Self::Capture(_) => CommandType::Capture,
            Self::QueryCapabilities => CommandType::QueryCapabilities,
            Self::Destroy => CommandType::Destroy,
        }
    }
}

/// A command addressed to one widget in the render process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderCommand {
    pub command_id: CommandId,
    pub widget_id: WidgetId,
    /// Milliseconds since the Unix epoch at issue time
    pub timestamp: u64,
    pub payload: CommandPayload,
}

impl RenderCommand {
    pub fn new(command_id: CommandId, widget_id: WidgetId, payload: CommandPayload) -> Self {
        Self {
            command_id,
            widget_id,
            timestamp: crate::timestamp_ms(),
            payload,
        }
    }

    pub fn command_type(&self) -> CommandType {
        self.payload.command_type()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_type_codes() {
        for ty in [
            CommandType::Initialize,
            CommandType::RenderFrame,
            CommandType::Resize,
            CommandType::Destroy,
            CommandType::SwitchBackend,
            CommandType::UpdateContent,
            CommandType::SetProperties,
            CommandType::Capture,
            CommandType::QueryCapabilities,
        ] {
            assert_eq!(CommandType::from_code(ty.code()), Some(ty));
        }
        assert_eq!(CommandType::from_code(55), None);
    }

    #[test]
    fn test_backend_codes() {
        assert_eq!(RenderBackendType::Auto.code(), 99);
        assert_eq!(RenderBackendType::from_code(2), Some(RenderBackendType::WebView));
        assert_eq!(RenderBackendType::from_code(3), None);
    }

    #[test]
    fn test_image_format_parse() {
        assert_eq!(ImageFormat::parse("PNG"), Some(ImageFormat::Png));
        assert_eq!(ImageFormat::parse("jpg"), Some(ImageFormat::Jpeg));
        assert_eq!(ImageFormat::parse("tiff"), None);
    }

    #[test]
    fn test_payload_type() {
        let cmd = RenderCommand::new(
            CommandId(1),
            WidgetId(7),
            CommandPayload::Resize { bounds: RenderRect::new(0, 0, 10, 10) },
        );
        assert_eq!(cmd.command_type(), CommandType::Resize);
        assert!(cmd.timestamp > 0);
    }
}
