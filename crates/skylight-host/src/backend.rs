//! Widget renderers inside the render host.
//!
//! [`NullBackend`] keeps the full widget bookkeeping (bounds, backend,
//! content, properties, frame counters) and validates every command, but
//! draws nothing. Captures produce a solid BMP in the widget's background
//! colour.

use skylight_protocol::{
    CaptureRequest, CommandPayload, ImageFormat, PerformanceMetrics, PixelRect, RenderBackendType,
    RenderColor, RenderCommand, RenderProperties, RenderRect, RenderResult, RenderResultStatus,
    SystemCapabilities, WidgetId, WindowHandle, ContentParameters,
};
use std::collections::HashMap;
use std::time::Instant;
use tracing::{debug, info};

/// Largest capture the null backend encodes
const MAX_CAPTURE_BYTES: usize = 8 * 1024 * 1024;

/// Executes commands for every widget of one connection.
///
/// Called from a single worker thread, in the order commands arrived.
pub trait RenderBackend: Send {
    /// Execute one command. Exactly one result per command.
    fn execute(&mut self, command: &RenderCommand) -> RenderResult;

    /// Current metrics of every live widget.
    fn metrics(&mut self) -> Vec<(WidgetId, PerformanceMetrics)>;

    fn widget_count(&self) -> usize;
}

struct WidgetRecord {
    backend: RenderBackendType,
    window: WindowHandle,
    bounds: RenderRect,
    content: Option<ContentParameters>,
    properties: RenderProperties,
    created: Instant,
    frames: u64,
    frames_at_sample: u64,
    last_sample: Instant,
    last_render_ms: u64,
}

impl WidgetRecord {
    fn average_fps(&self) -> f32 {
        let secs = self.created.elapsed().as_secs_f32();
        if secs > 0.0 {
            self.frames as f32 / secs
        } else {
            0.0
        }
    }
}

pub struct NullBackend {
    capabilities: SystemCapabilities,
    widgets: HashMap<WidgetId, WidgetRecord>,
}

impl NullBackend {
    pub fn new(capabilities: SystemCapabilities) -> Self {
        Self {
            capabilities,
            widgets: HashMap::new(),
        }
    }

    /// What a headless machine offers: every backend, no GPU.
    pub fn default_capabilities() -> SystemCapabilities {
        SystemCapabilities {
            supports_skia: true,
            supports_direct3d: true,
            supports_webview: true,
            supports_hardware_acceleration: false,
            supports_multi_monitor: true,
            supports_high_dpi: true,
            gpu_name: "Null renderer".to_string(),
            driver_version: env!("CARGO_PKG_VERSION").to_string(),
            total_vram: 0,
            available_vram: 0,
        }
    }

    pub fn capabilities(&self) -> &SystemCapabilities {
        &self.capabilities
    }

    /// Concrete backend for a request. `Auto` takes the first supported
    /// backend in preference order.
    fn resolve_backend(&self, requested: RenderBackendType) -> Option<RenderBackendType> {
        match requested {
            RenderBackendType::Auto => RenderBackendType::concrete()
                .iter()
                .copied()
                .find(|b| self.capabilities.supports(*b)),
            other if self.capabilities.supports(other) => Some(other),
            _ => None,
        }
    }

    /// Backend a widget is running on.
    pub fn widget_backend(&self, widget: WidgetId) -> Option<RenderBackendType> {
        self.widgets.get(&widget).map(|w| w.backend)
    }

    pub fn widget_bounds(&self, widget: WidgetId) -> Option<RenderRect> {
        self.widgets.get(&widget).map(|w| w.bounds)
    }

    fn initialize(
        &mut self,
        command: &RenderCommand,
        backend: RenderBackendType,
        window: WindowHandle,
        bounds: RenderRect,
    ) -> RenderResult {
        let (id, widget) = (command.command_id, command.widget_id);
        if self.widgets.contains_key(&widget) {
            return invalid(command, "widget already initialized");
        }
        if window.is_null() {
            return invalid(command, "null window handle");
        }
        if !bounds.is_valid() {
            return invalid(command, "invalid bounds");
        }
        let Some(chosen) = self.resolve_backend(backend) else {
            return RenderResult::failure(
                id,
                widget,
                RenderResultStatus::BackendNotSupported,
                format!("{} backend not supported", backend),
            );
        };

        let now = Instant::now();
        self.widgets.insert(
            widget,
            WidgetRecord {
                backend: chosen,
                window,
                bounds,
                content: None,
                properties: RenderProperties::default(),
                created: now,
                frames: 0,
                frames_at_sample: 0,
                last_sample: now,
                last_render_ms: 0,
            },
        );
        info!("{} initialized on {} (window {})", widget, chosen, window);
        RenderResult::success(id, widget)
    }

    fn capture(record: &WidgetRecord, command: &RenderCommand, request: &CaptureRequest) -> RenderResult {
        let (id, widget) = (command.command_id, command.widget_id);
        if request.format != ImageFormat::Bmp {
            return RenderResult::failure(
                id,
                widget,
                RenderResultStatus::BackendNotSupported,
                format!("null renderer cannot encode {:?}", request.format),
            );
        }

        let size = record.bounds.physical();
        let Some(image) = encode_bmp(&size, record.properties.background_color) else {
            return invalid(command, "capture too large");
        };

        let mut result = RenderResult::success(id, widget);
        match &request.path {
            Some(path) => {
                if let Err(e) = std::fs::write(path, &image) {
                    return RenderResult::failure(
                        id,
                        widget,
                        RenderResultStatus::Failure,
                        format!("failed to write {}: {}", path, e),
                    );
                }
            }
            None => result.data = image,
        }
        result
    }
}

impl Default for NullBackend {
    fn default() -> Self {
        Self::new(Self::default_capabilities())
    }
}

impl RenderBackend for NullBackend {
    fn execute(&mut self, command: &RenderCommand) -> RenderResult {
        let (id, widget) = (command.command_id, command.widget_id);

        match &command.payload {
            CommandPayload::Initialize {
                backend,
                window,
                bounds,
            } => return self.initialize(command, *backend, *window, *bounds),
            CommandPayload::QueryCapabilities => {
                let mut result = RenderResult::success(id, widget);
                result.data = self.capabilities.encode();
                return result;
            }
            CommandPayload::Destroy => {
                if self.widgets.remove(&widget).is_some() {
                    info!("{} destroyed", widget);
                }
                return RenderResult::success(id, widget);
            }
            _ => {}
        }

        let backend = match &command.payload {
            CommandPayload::SwitchBackend { backend } => Some(self.resolve_backend(*backend)),
            _ => None,
        };

        let Some(record) = self.widgets.get_mut(&widget) else {
            return invalid(command, "widget not initialized");
        };

        match &command.payload {
            CommandPayload::RenderFrame {
                content,
                properties,
            } => {
                if let Err(e) = content.validate() {
                    return RenderResult::failure(id, widget, RenderResultStatus::ContentLoadError, e.to_string());
                }
                if let Err(e) = properties.validate() {
                    return invalid(command, &e.to_string());
                }
                let started = Instant::now();
                record.content = Some(content.clone());
                record.properties = properties.clone();
                record.frames += 1;
                record.last_render_ms = started.elapsed().as_millis() as u64;

                let mut result = RenderResult::success(id, widget);
                result.frame_count = record.frames as u32;
                result.average_fps = record.average_fps();
                result.render_time_ms = record.last_render_ms;
                debug!("{} frame {}", widget, record.frames);
                result
            }
            CommandPayload::UpdateContent { content } => match content.validate() {
                Ok(()) => {
                    record.content = Some(content.clone());
                    RenderResult::success(id, widget)
                }
                Err(e) => RenderResult::failure(id, widget, RenderResultStatus::ContentLoadError, e.to_string()),
            },
            CommandPayload::Resize { bounds } => {
                if !bounds.is_valid() {
                    return invalid(command, "invalid bounds");
                }
                record.bounds = *bounds;
                RenderResult::success(id, widget)
            }
            CommandPayload::SwitchBackend { backend: requested } => match backend.flatten() {
                Some(chosen) => {
                    info!("{} switched {} -> {}", widget, record.backend, chosen);
                    record.backend = chosen;
                    RenderResult::success(id, widget)
                }
                None => RenderResult::failure(
                    id,
                    widget,
                    RenderResultStatus::BackendNotSupported,
                    format!("{} backend not supported", requested),
                ),
            },
            CommandPayload::SetProperties { properties } => match properties.validate() {
                Ok(()) => {
                    record.properties = properties.clone();
                    RenderResult::success(id, widget)
                }
                Err(e) => invalid(command, &e.to_string()),
            },
            CommandPayload::Capture(request) => Self::capture(record, command, request),
            CommandPayload::Initialize { .. }
            | CommandPayload::QueryCapabilities
            | CommandPayload::Destroy => unreachable!("handled above"),
        }
    }

    fn metrics(&mut self) -> Vec<(WidgetId, PerformanceMetrics)> {
        let now = Instant::now();
        self.widgets
            .iter_mut()
            .map(|(id, record)| {
                let secs = now.duration_since(record.last_sample).as_secs_f32();
                let recent = record.frames - record.frames_at_sample;
                let current_fps = if secs > 0.0 { recent as f32 / secs } else { 0.0 };
                record.frames_at_sample = record.frames;
                record.last_sample = now;
                let metrics = PerformanceMetrics {
                    current_fps,
                    average_fps: record.average_fps(),
                    total_frames: record.frames,
                    render_time_ms: record.last_render_ms,
                    ..PerformanceMetrics::default()
                };
                (*id, metrics)
            })
            .collect()
    }

    fn widget_count(&self) -> usize {
        self.widgets.len()
    }
}

fn invalid(command: &RenderCommand, message: &str) -> RenderResult {
    RenderResult::failure(
        command.command_id,
        command.widget_id,
        RenderResultStatus::InvalidParameters,
        message,
    )
}

/// Solid-colour 32-bit BMP of `size`.
fn encode_bmp(size: &PixelRect, color: RenderColor) -> Option<Vec<u8>> {
    const HEADER: usize = 14 + 40;
    let width = size.width.max(1) as usize;
    let height = size.height.max(1) as usize;
    let pixels = width.checked_mul(height)?.checked_mul(4)?;
    if pixels + HEADER > MAX_CAPTURE_BYTES {
        return None;
    }

    let mut out = Vec::with_capacity(HEADER + pixels);
    out.extend_from_slice(b"BM");
    out.extend_from_slice(&((HEADER + pixels) as u32).to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&(HEADER as u32).to_le_bytes());
    out.extend_from_slice(&40u32.to_le_bytes());
    out.extend_from_slice(&(width as i32).to_le_bytes());
    out.extend_from_slice(&(height as i32).to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&32u16.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes()); // BI_RGB
    out.extend_from_slice(&(pixels as u32).to_le_bytes());
    out.extend_from_slice(&2835u32.to_le_bytes());
    out.extend_from_slice(&2835u32.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());

    let bgra = [color.b, color.g, color.r, color.a];
    for _ in 0..width * height {
        out.extend_from_slice(&bgra);
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use skylight_protocol::{CommandId, SystemCapabilities};

    fn command(id: u64, widget: u32, payload: CommandPayload) -> RenderCommand {
        RenderCommand::new(CommandId(id), WidgetId(widget), payload)
    }

    fn init(backend: RenderBackendType) -> CommandPayload {
        CommandPayload::Initialize {
            backend,
            window: WindowHandle(0x1000),
            bounds: RenderRect::new(0, 0, 200, 100),
        }
    }

    #[test]
    fn test_auto_picks_preferred_supported_backend() {
        let mut backend = NullBackend::new(SystemCapabilities {
            supports_skia: true,
            ..SystemCapabilities::default()
        });
        let result = backend.execute(&command(1, 1, init(RenderBackendType::Auto)));
        assert!(result.is_success());
        assert_eq!(backend.widget_backend(WidgetId(1)), Some(RenderBackendType::SkiaSharp));

        let result = backend.execute(&command(2, 2, init(RenderBackendType::WebView)));
        assert_eq!(result.status, RenderResultStatus::BackendNotSupported);
        assert_eq!(backend.widget_count(), 1);
    }

    #[test]
    fn test_commands_require_initialized_widget() {
        let mut backend = NullBackend::default();
        let result = backend.execute(&command(
            1,
            9,
            CommandPayload::Resize {
                bounds: RenderRect::new(0, 0, 5, 5),
            },
        ));
        assert_eq!(result.status, RenderResultStatus::InvalidParameters);

        assert!(backend.execute(&command(2, 9, CommandPayload::Destroy)).is_success());
    }

    #[test]
    fn test_render_frame_counts_and_validates() {
        let mut backend = NullBackend::default();
        backend.execute(&command(1, 1, init(RenderBackendType::Auto)));

        let frame = |id, content| {
            command(
                id,
                1,
                CommandPayload::RenderFrame {
                    content,
                    properties: RenderProperties::default(),
                },
            )
        };
        let ok = backend.execute(&frame(2, ContentParameters::static_content("hello")));
        assert!(ok.is_success());
        assert_eq!(ok.frame_count, 1);

        let bad = backend.execute(&frame(3, ContentParameters::web("not a url")));
        assert_eq!(bad.status, RenderResultStatus::ContentLoadError);

        let metrics = backend.metrics();
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].1.total_frames, 1);
    }

    #[test]
    fn test_capture_bmp() {
        let mut backend = NullBackend::default();
        backend.execute(&command(1, 1, init(RenderBackendType::Auto)));

        let result = backend.execute(&command(
            2,
            1,
            CommandPayload::Capture(CaptureRequest {
                format: ImageFormat::Bmp,
                path: None,
            }),
        ));
        assert!(result.is_success());
        assert_eq!(&result.data[..2], b"BM");
        assert_eq!(result.data.len(), 54 + 200 * 100 * 4);

        let png = backend.execute(&command(
            3,
            1,
            CommandPayload::Capture(CaptureRequest::default()),
        ));
        assert_eq!(png.status, RenderResultStatus::BackendNotSupported);
    }

    #[test]
    fn test_capture_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.bmp");
        let mut backend = NullBackend::default();
        backend.execute(&command(1, 1, init(RenderBackendType::Auto)));

        let result = backend.execute(&command(
            2,
            1,
            CommandPayload::Capture(CaptureRequest {
                format: ImageFormat::Bmp,
                path: Some(path.display().to_string()),
            }),
        ));
        assert!(result.is_success());
        assert!(result.data.is_empty());
        assert_eq!(std::fs::read(&path).unwrap().len(), 54 + 200 * 100 * 4);
    }

    #[test]
    fn test_capabilities_payload() {
        let mut backend = NullBackend::default();
        let result = backend.execute(&command(1, 4, CommandPayload::QueryCapabilities));
        let caps = SystemCapabilities::decode(&result.data).unwrap();
        assert_eq!(caps, NullBackend::default_capabilities());
    }
}
