//! Binary message codec.
//!
//! Little-endian, length-prefixed strings and byte arrays. Each message
//! body is self-describing only through the frame kind that carries it;
//! the transport supplies the kind alongside the body.

use crate::command::{CaptureRequest, CommandPayload, CommandType, ImageFormat, RenderBackendType, RenderCommand};
use crate::content::{ContentParameters, ContentSourceType};
use crate::geometry::RenderRect;
use crate::ids::{CommandId, WidgetId, WindowHandle};
use crate::properties::{RenderColor, RenderProperties};
use crate::result::{PerformanceMetrics, RenderResult, RenderResultStatus, SystemCapabilities};
use thiserror::Error;

/// Largest message body accepted by the decoder (16 MiB).
pub const MAX_MESSAGE_BYTES: usize = 16 * 1024 * 1024;

/// Errors while decoding a message body. Any of these is a protocol error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("unexpected end of message")]
    UnexpectedEof,

    #[error("invalid {field} value {value}")]
    InvalidEnum { field: &'static str, value: u32 },

    #[error("unknown command type {0}")]
    UnknownCommandType(u32),

    #[error("unknown message kind {0}")]
    UnknownKind(u8),

    #[error("invalid UTF-8 in {0}")]
    InvalidUtf8(&'static str),

    #[error("message body of {0} bytes exceeds limit")]
    OversizedPayload(usize),
}

/// Errors while encoding a message body.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error("status {0:?} is local and cannot be sent")]
    LocalStatus(RenderResultStatus),

    #[error("message body of {0} bytes exceeds limit")]
    TooLarge(usize),
}

/// Kind tag carried in the frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Command,
    Result,
    Metrics,
    Ping,
    Pong,
}

impl MessageKind {
    pub fn code(&self) -> u8 {
        match self {
            Self::Command => 1,
            Self::Result => 2,
            Self::Metrics => 3,
            Self::Ping => 4,
            Self::Pong => 5,
        }
    }

    pub fn from_code(code: u8) -> Result<Self, DecodeError> {
        Ok(match code {
            1 => Self::Command,
            2 => Self::Result,
            3 => Self::Metrics,
            4 => Self::Ping,
            5 => Self::Pong,
            other => return Err(DecodeError::UnknownKind(other)),
        })
    }
}

/// Everything that travels between the two processes.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Command(RenderCommand),
    Result(RenderResult),
    Metrics {
        widget_id: WidgetId,
        metrics: PerformanceMetrics,
    },
    /// Health probe
    Ping { nonce: u64 },
    /// Probe reply echoing the nonce
    Pong { nonce: u64 },
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Command(_) => MessageKind::Command,
            Self::Result(_) => MessageKind::Result,
            Self::Metrics { .. } => MessageKind::Metrics,
            Self::Ping { .. } => MessageKind::Ping,
            Self::Pong { .. } => MessageKind::Pong,
        }
    }

    /// Widget the message concerns, if any.
    pub fn widget_id(&self) -> Option<WidgetId> {
        match self {
            Self::Command(cmd) => Some(cmd.widget_id),
            Self::Result(result) => Some(result.widget_id),
            Self::Metrics { widget_id, .. } => Some(*widget_id),
            Self::Ping { .. } | Self::Pong { .. } => None,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        let mut w = Writer::default();
        match self {
            Self::Command(cmd) => write_command(&mut w, cmd),
            Self::Result(result) => {
                if result.status.is_local() {
                    return Err(EncodeError::LocalStatus(result.status));
                }
                write_result(&mut w, result);
            }
            Self::Metrics { widget_id, metrics } => {
                w.u32(widget_id.0);
                write_metrics(&mut w, metrics);
            }
            Self::Ping { nonce } | Self::Pong { nonce } => w.u64(*nonce),
        }
        if w.buf.len() > MAX_MESSAGE_BYTES {
            return Err(EncodeError::TooLarge(w.buf.len()));
        }
        Ok(w.buf)
    }

    /// Decode a body. Bytes after the known fields are ignored so that
    /// newer peers can append optional fields.
    pub fn decode(kind: MessageKind, bytes: &[u8]) -> Result<Message, DecodeError> {
        if bytes.len() > MAX_MESSAGE_BYTES {
            return Err(DecodeError::OversizedPayload(bytes.len()));
        }
        let mut r = Reader::new(bytes);
        Ok(match kind {
            MessageKind::Command => Message::Command(read_command(&mut r)?),
            MessageKind::Result => Message::Result(read_result(&mut r)?),
            MessageKind::Metrics => Message::Metrics {
                widget_id: WidgetId(r.u32()?),
                metrics: read_metrics(&mut r)?,
            },
            MessageKind::Ping => Message::Ping { nonce: r.u64()? },
            MessageKind::Pong => Message::Pong { nonce: r.u64()? },
        })
    }
}

impl SystemCapabilities {
    /// Encode for the data payload of a `QueryCapabilities` result.
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::default();
        w.bool(self.supports_skia);
        w.bool(self.supports_direct3d);
        w.bool(self.supports_webview);
        w.bool(self.supports_hardware_acceleration);
        w.bool(self.supports_multi_monitor);
        w.bool(self.supports_high_dpi);
        w.str(&self.gpu_name);
        w.str(&self.driver_version);
        w.u64(self.total_vram);
        w.u64(self.available_vram);
        w.buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(bytes);
        Ok(Self {
            supports_skia: r.bool()?,
            supports_direct3d: r.bool()?,
            supports_webview: r.bool()?,
            supports_hardware_acceleration: r.bool()?,
            supports_multi_monitor: r.bool()?,
            supports_high_dpi: r.bool()?,
            gpu_name: r.string("gpu_name")?,
            driver_version: r.string("driver_version")?,
            total_vram: r.u64()?,
            available_vram: r.u64()?,
        })
    }
}

// ===== Commands =====

fn write_command(w: &mut Writer, cmd: &RenderCommand) {
    w.u64(cmd.command_id.0);
    w.u32(cmd.widget_id.0);
    w.u32(cmd.command_type().code());
    w.u64(cmd.timestamp);

    match &cmd.payload {
        CommandPayload::Initialize { backend, window, bounds } => {
            w.u32(backend.code());
            w.u64(window.0);
            write_rect(w, bounds);
        }
        CommandPayload::RenderFrame { content, properties } => {
            write_content(w, content);
            write_properties(w, properties);
        }
        CommandPayload::UpdateContent { content } => write_content(w, content),
        CommandPayload::Resize { bounds } => write_rect(w, bounds),
        CommandPayload::SwitchBackend { backend } => w.u32(backend.code()),
        CommandPayload::SetProperties { properties } => write_properties(w, properties),
        CommandPayload::Capture(request) => {
            w.u8(request.format.code());
            w.opt_str(request.path.as_deref());
        }
        CommandPayload::QueryCapabilities | CommandPayload::Destroy => {}
    }
}

fn read_command(r: &mut Reader<'_>) -> Result<RenderCommand, DecodeError> {
    let command_id = CommandId(r.u64()?);
    let widget_id = WidgetId(r.u32()?);
    let type_code = r.u32()?;
    let command_type =
        CommandType::from_code(type_code).ok_or(DecodeError::UnknownCommandType(type_code))?;
    let timestamp = r.u64()?;

    let payload = match command_type {
        CommandType::Initialize => CommandPayload::Initialize {
            backend: read_backend(r)?,
            window: WindowHandle(r.u64()?),
            bounds: read_rect(r)?,
        },
        CommandType::RenderFrame => CommandPayload::RenderFrame {
            content: read_content(r)?,
            properties: read_properties(r)?,
        },
        CommandType::UpdateContent => CommandPayload::UpdateContent {
            content: read_content(r)?,
        },
        CommandType::Resize => CommandPayload::Resize { bounds: read_rect(r)? },
        CommandType::SwitchBackend => CommandPayload::SwitchBackend {
            backend: read_backend(r)?,
        },
        CommandType::SetProperties => CommandPayload::SetProperties {
            properties: read_properties(r)?,
        },
        CommandType::Capture => {
            let code = r.u8()?;
            let format = ImageFormat::from_code(code).ok_or(DecodeError::InvalidEnum {
                field: "image format",
                value: code as u32,
            })?;
            CommandPayload::Capture(CaptureRequest {
                format,
                path: r.opt_string("capture path")?,
            })
        }
        CommandType::QueryCapabilities => CommandPayload::QueryCapabilities,
        CommandType::Destroy => CommandPayload::Destroy,
    };

    Ok(RenderCommand {
        command_id,
        widget_id,
        timestamp,
        payload,
    })
}

fn read_backend(r: &mut Reader<'_>) -> Result<RenderBackendType, DecodeError> {
    let code = r.u32()?;
    RenderBackendType::from_code(code).ok_or(DecodeError::InvalidEnum {
        field: "backend type",
        value: code,
    })
}

fn write_rect(w: &mut Writer, rect: &RenderRect) {
    w.i32(rect.x);
    w.i32(rect.y);
    w.i32(rect.width);
    w.i32(rect.height);
    w.f32(rect.scale);
}

fn read_rect(r: &mut Reader<'_>) -> Result<RenderRect, DecodeError> {
    Ok(RenderRect {
        x: r.i32()?,
        y: r.i32()?,
        width: r.i32()?,
        height: r.i32()?,
        scale: r.f32()?,
    })
}

fn write_content(w: &mut Writer, content: &ContentParameters) {
    w.u32(content.source_type.code());
    w.str(&content.source_url);
    w.str(&content.template_path);
    w.str(&content.auth_token);
    w.u32(content.refresh_interval_ms);
    w.bool(content.cache_enabled);
    w.pairs(&content.custom_headers);
    w.pairs(&content.parameters);
}

fn read_content(r: &mut Reader<'_>) -> Result<ContentParameters, DecodeError> {
    let code = r.u32()?;
    let source_type = ContentSourceType::from_code(code).ok_or(DecodeError::InvalidEnum {
        field: "content source type",
        value: code,
    })?;
    Ok(ContentParameters {
        source_type,
        source_url: r.string("source url")?,
        template_path: r.string("template path")?,
        auth_token: r.string("auth token")?,
        refresh_interval_ms: r.u32()?,
        cache_enabled: r.bool()?,
        custom_headers: r.pairs("header")?,
        parameters: r.pairs("parameter")?,
    })
}

fn write_properties(w: &mut Writer, p: &RenderProperties) {
    w.f32(p.opacity);
    w.bool(p.visible);
    w.bool(p.click_through);
    w.bool(p.topmost);
    w.u32(p.background_color.to_u32());
    w.i32(p.z_order);
    w.bool(p.enable_animations);
    w.u32(p.target_fps);
    w.bool(p.enable_vsync);
    w.f32(p.scale_x);
    w.f32(p.scale_y);
    w.f32(p.rotation);
    w.bool(p.enable_blur);
    w.f32(p.blur_radius);
    w.bool(p.enable_shadow);
    w.u32(p.shadow_color.to_u32());
    w.i32(p.shadow_offset_x);
    w.i32(p.shadow_offset_y);
}

fn read_properties(r: &mut Reader<'_>) -> Result<RenderProperties, DecodeError> {
    Ok(RenderProperties {
        opacity: r.f32()?,
        visible: r.bool()?,
        click_through: r.bool()?,
        topmost: r.bool()?,
        background_color: RenderColor::from_u32(r.u32()?),
        z_order: r.i32()?,
        enable_animations: r.bool()?,
        target_fps: r.u32()?,
        enable_vsync: r.bool()?,
        scale_x: r.f32()?,
        scale_y: r.f32()?,
        rotation: r.f32()?,
        enable_blur: r.bool()?,
        blur_radius: r.f32()?,
        enable_shadow: r.bool()?,
        shadow_color: RenderColor::from_u32(r.u32()?),
        shadow_offset_x: r.i32()?,
        shadow_offset_y: r.i32()?,
    })
}

// ===== Results & metrics =====

fn write_result(w: &mut Writer, result: &RenderResult) {
    w.u64(result.command_id.0);
    w.u32(result.widget_id.0);
    w.u32(result.status.code());
    w.opt_str(result.error_message.as_deref());
    w.u64(result.render_time_ms);
    w.u32(result.frame_count);
    w.f32(result.average_fps);
    w.u64(result.memory_usage_mb);
    w.u64(result.timestamp);
    w.bytes(&result.data);
}

fn read_result(r: &mut Reader<'_>) -> Result<RenderResult, DecodeError> {
    let command_id = CommandId(r.u64()?);
    let widget_id = WidgetId(r.u32()?);
    let code = r.u32()?;
    let status = RenderResultStatus::from_wire(code).ok_or(DecodeError::InvalidEnum {
        field: "result status",
        value: code,
    })?;
    Ok(RenderResult {
        command_id,
        widget_id,
        status,
        error_message: r.opt_string("error message")?,
        render_time_ms: r.u64()?,
        frame_count: r.u32()?,
        average_fps: r.f32()?,
        memory_usage_mb: r.u64()?,
        timestamp: r.u64()?,
        data: r.byte_vec()?,
    })
}

fn write_metrics(w: &mut Writer, m: &PerformanceMetrics) {
    w.f32(m.current_fps);
    w.f32(m.average_fps);
    w.u64(m.total_frames);
    w.u64(m.dropped_frames);
    w.u64(m.memory_usage_mb);
    w.u64(m.vram_usage_mb);
    w.f32(m.cpu_usage_percent);
    w.f32(m.gpu_usage_percent);
    w.u64(m.render_time_ms);
    w.u64(m.content_load_time_ms);
}

fn read_metrics(r: &mut Reader<'_>) -> Result<PerformanceMetrics, DecodeError> {
    Ok(PerformanceMetrics {
        current_fps: r.f32()?,
        average_fps: r.f32()?,
        total_frames: r.u64()?,
        dropped_frames: r.u64()?,
        memory_usage_mb: r.u64()?,
        vram_usage_mb: r.u64()?,
        cpu_usage_percent: r.f32()?,
        gpu_usage_percent: r.f32()?,
        render_time_ms: r.u64()?,
        content_load_time_ms: r.u64()?,
    })
}

// ===== Primitives =====

#[derive(Default)]
struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn bool(&mut self, v: bool) {
        self.buf.push(v as u8);
    }

    fn u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn f32(&mut self, v: f32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn bytes(&mut self, data: &[u8]) {
        self.u32(data.len() as u32);
        self.buf.extend_from_slice(data);
    }

    fn str(&mut self, s: &str) {
        self.bytes(s.as_bytes());
    }

    fn opt_str(&mut self, s: Option<&str>) {
        match s {
            Some(s) => {
                self.bool(true);
                self.str(s);
            }
            None => self.bool(false),
        }
    }

    fn pairs(&mut self, pairs: &[(String, String)]) {
        self.u32(pairs.len() as u32);
        for (k, v) in pairs {
            self.str(k);
            self.str(v);
        }
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < n {
            return Err(DecodeError::UnexpectedEof);
        }
        let out = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    fn bool(&mut self) -> Result<bool, DecodeError> {
        match self.u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(DecodeError::InvalidEnum {
                field: "bool",
                value: other as u32,
            }),
        }
    }

    fn u32(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn i32(&mut self) -> Result<i32, DecodeError> {
        Ok(i32::from_le_bytes(self.array()?))
    }

    fn u64(&mut self) -> Result<u64, DecodeError> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    fn f32(&mut self) -> Result<f32, DecodeError> {
        Ok(f32::from_le_bytes(self.array()?))
    }

    fn byte_slice(&mut self) -> Result<&'a [u8], DecodeError> {
        let len = self.u32()? as usize;
        self.take(len)
    }

    fn byte_vec(&mut self) -> Result<Vec<u8>, DecodeError> {
        Ok(self.byte_slice()?.to_vec())
    }

    fn string(&mut self, field: &'static str) -> Result<String, DecodeError> {
        let raw = self.byte_slice()?;
        std::str::from_utf8(raw)
            .map(str::to_owned)
            .map_err(|_| DecodeError::InvalidUtf8(field))
    }

    fn opt_string(&mut self, field: &'static str) -> Result<Option<String>, DecodeError> {
        if self.bool()? {
            self.string(field).map(Some)
        } else {
            Ok(None)
        }
    }

    fn pairs(&mut self, field: &'static str) -> Result<Vec<(String, String)>, DecodeError> {
        let count = self.u32()? as usize;
        // Each pair needs at least two length prefixes.
        if count > self.remaining() / 8 {
            return Err(DecodeError::UnexpectedEof);
        }
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            out.push((self.string(field)?, self.string(field)?));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_command() -> RenderCommand {
        RenderCommand::new(
            CommandId(42),
            WidgetId(7),
            CommandPayload::RenderFrame {
                content: ContentParameters::api("https://api.example.com/weather", 60_000)
                    .with_header("Accept", "application/json")
                    .with_parameter("city", "Oslo"),
                properties: RenderProperties {
                    opacity: 0.8,
                    topmost: true,
                    ..RenderProperties::default()
                },
            },
        )
    }

    #[test]
    fn test_command_header_layout_is_fixed() {
        let bytes = Message::Command(sample_command()).encode().unwrap();
        assert_eq!(&bytes[0..8], &42u64.to_le_bytes());
        assert_eq!(&bytes[8..12], &7u32.to_le_bytes());
        assert_eq!(&bytes[12..16], &CommandType::RenderFrame.code().to_le_bytes());
    }

    #[test]
    fn test_command_roundtrip() {
        let msg = Message::Command(sample_command());
        let bytes = msg.encode().unwrap();
        assert_eq!(Message::decode(MessageKind::Command, &bytes).unwrap(), msg);
    }

    #[test]
    fn test_trailing_fields_ignored() {
        let msg = Message::Command(sample_command());
        let mut bytes = msg.encode().unwrap();
        bytes.extend_from_slice(&[0xAB; 12]);
        assert_eq!(Message::decode(MessageKind::Command, &bytes).unwrap(), msg);
    }

    #[test]
    fn test_unknown_command_type_rejected() {
        let mut bytes = Message::Command(sample_command()).encode().unwrap();
        bytes[12..16].copy_from_slice(&77u32.to_le_bytes());
        assert_eq!(
            Message::decode(MessageKind::Command, &bytes),
            Err(DecodeError::UnknownCommandType(77))
        );
    }

    #[test]
    fn test_truncated_body_rejected() {
        let bytes = Message::Command(sample_command()).encode().unwrap();
        let err = Message::decode(MessageKind::Command, &bytes[..bytes.len() / 2]).unwrap_err();
        assert_eq!(err, DecodeError::UnexpectedEof);
    }

    #[test]
    fn test_result_with_data() {
        let mut result = RenderResult::success(CommandId(9), WidgetId(3));
        result.data = vec![1, 2, 3, 4];
        result.frame_count = 12;
        let msg = Message::Result(result);
        let bytes = msg.encode().unwrap();
        assert_eq!(Message::decode(MessageKind::Result, &bytes).unwrap(), msg);
    }

    #[test]
    fn test_local_status_not_encodable() {
        let msg = Message::Result(RenderResult::timed_out(CommandId(1), WidgetId(1)));
        assert_eq!(
            msg.encode(),
            Err(EncodeError::LocalStatus(RenderResultStatus::TimedOut))
        );
    }

    #[test]
    fn test_capabilities_payload() {
        let caps = SystemCapabilities {
            supports_direct3d: true,
            gpu_name: "Null Adapter".into(),
            total_vram: 1024,
            ..Default::default()
        };
        assert_eq!(SystemCapabilities::decode(&caps.encode()).unwrap(), caps);
    }

    #[test]
    fn test_bogus_pair_count() {
        let mut w = Writer::default();
        w.u32(u32::MAX);
        let mut r = Reader::new(&w.buf);
        assert_eq!(r.pairs("header"), Err(DecodeError::UnexpectedEof));
    }
}
