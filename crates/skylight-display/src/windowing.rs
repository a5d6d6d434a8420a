//! winit-backed displays and windows.
//!
//! winit hands out monitors and windows only on the event loop thread, so
//! [`WinitDisplays`] keeps a converted snapshot that the application
//! refreshes from there (on `resumed` and whenever the display layout or a
//! scale factor changes). [`WinitWindows`] wraps windows the application
//! created, since a surface never creates top-level windows itself.

use crate::error::DisplayError;
use crate::native::NativeWindows;
use crate::provider::DisplayProvider;
use skylight_protocol::{Dpi, MonitorId, MonitorInfo, PixelRect, WindowHandle};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tracing::{debug, info};
use winit::dpi::{PhysicalPosition, PhysicalSize};
use winit::monitor::MonitorHandle;
use winit::window::{Window, WindowLevel};

/// Monitor list taken from winit.
#[derive(Debug, Default)]
pub struct WinitDisplays {
    monitors: RwLock<Vec<MonitorInfo>>,
}

impl WinitDisplays {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the snapshot. Pass `ActiveEventLoop::available_monitors()`
    /// and `ActiveEventLoop::primary_monitor()`.
    pub fn update(
        &self,
        monitors: impl IntoIterator<Item = MonitorHandle>,
        primary: Option<MonitorHandle>,
    ) {
        let converted: Vec<MonitorInfo> = monitors
            .into_iter()
            .enumerate()
            .map(|(i, handle)| {
                let position = handle.position();
                let size = handle.size();
                monitor_info(
                    MonitorId(i as i32 + 1),
                    handle.name(),
                    (position.x, position.y),
                    (size.width, size.height),
                    handle.scale_factor(),
                    handle.refresh_rate_millihertz(),
                    primary.as_ref() == Some(&handle),
                )
            })
            .collect();
        info!("winit reported {} monitor(s)", converted.len());
        self.set(converted);
    }

    fn set(&self, mut monitors: Vec<MonitorInfo>) {
        // Platforms without a primary monitor: treat the first as primary
        if !monitors.is_empty() && !monitors.iter().any(|m| m.is_primary) {
            monitors[0].is_primary = true;
        }
        *self.monitors.write().unwrap_or_else(PoisonError::into_inner) = monitors;
    }
}

impl DisplayProvider for WinitDisplays {
    fn enumerate(&self) -> Result<Vec<MonitorInfo>, DisplayError> {
        Ok(self
            .monitors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }
}

/// winit reports neither work areas nor colour depth; the work area is the
/// full display and the depth 32 bits.
fn monitor_info(
    id: MonitorId,
    name: Option<String>,
    position: (i32, i32),
    size: (u32, u32),
    scale_factor: f64,
    refresh_millihertz: Option<u32>,
    primary: bool,
) -> MonitorInfo {
    let bounds = PixelRect::new(
        position.0,
        position.1,
        i32::try_from(size.0).unwrap_or(i32::MAX),
        i32::try_from(size.1).unwrap_or(i32::MAX),
    );
    MonitorInfo {
        id,
        device_name: name.unwrap_or_else(|| format!("monitor-{}", id.0)),
        bounds,
        work_area: bounds,
        dpi: Dpi::from_scale(scale_factor as f32),
        refresh_rate_hz: refresh_millihertz.map_or(60, |mhz| (mhz + 500) / 1000),
        bit_depth: 32,
        is_primary: primary,
        hdr_supported: false,
        touch_supported: false,
    }
}

struct Entry {
    window: Arc<Window>,
    alpha: u8,
}

/// Windows created by the application, addressed by [`WindowHandle`].
pub struct WinitWindows {
    windows: Mutex<HashMap<WindowHandle, Entry>>,
    next_handle: AtomicU64,
}

impl WinitWindows {
    pub fn new() -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(0x1000),
        }
    }

    /// Make `window` addressable. The same window registered twice gets
    /// two handles.
    pub fn register(&self, window: Arc<Window>) -> WindowHandle {
        let handle = WindowHandle(self.next_handle.fetch_add(0x10, Ordering::Relaxed));
        debug!("Registered winit window {:?} as {}", window.id(), handle);
        self.table().insert(handle, Entry { window, alpha: 255 });
        handle
    }

    pub fn unregister(&self, handle: WindowHandle) -> Option<Arc<Window>> {
        self.table().remove(&handle).map(|e| e.window)
    }

    pub fn window(&self, handle: WindowHandle) -> Option<Arc<Window>> {
        self.table().get(&handle).map(|e| e.window.clone())
    }

    /// Whole-window alpha last requested; winit has no native equivalent,
    /// so the renderer composites with it.
    pub fn alpha(&self, handle: WindowHandle) -> Option<u8> {
        self.table().get(&handle).map(|e| e.alpha)
    }

    fn table(&self) -> MutexGuard<'_, HashMap<WindowHandle, Entry>> {
        self.windows.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn get(&self, handle: WindowHandle) -> Result<Arc<Window>, DisplayError> {
        self.window(handle).ok_or(DisplayError::UnknownWindow(handle))
    }
}

impl Default for WinitWindows {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeWindows for WinitWindows {
    fn exists(&self, window: WindowHandle) -> bool {
        self.table().contains_key(&window)
    }

    fn window_rect(&self, window: WindowHandle) -> Result<PixelRect, DisplayError> {
        let window = self.get(window)?;
        let position = window
            .outer_position()
            .map_err(|e| DisplayError::Native(e.to_string()))?;
        let size = window.outer_size();
        Ok(PixelRect::new(
            position.x,
            position.y,
            i32::try_from(size.width).unwrap_or(i32::MAX),
            i32::try_from(size.height).unwrap_or(i32::MAX),
        ))
    }

    fn set_window_rect(&self, window: WindowHandle, rect: PixelRect) -> Result<(), DisplayError> {
        let window = self.get(window)?;
        window.set_outer_position(PhysicalPosition::new(rect.x, rect.y));
        let size = PhysicalSize::new(rect.width.max(1) as u32, rect.height.max(1) as u32);
        // None means the resize is applied asynchronously
        let _ = window.request_inner_size(size);
        Ok(())
    }

    fn set_visible(&self, window: WindowHandle, visible: bool) -> Result<(), DisplayError> {
        self.get(window)?.set_visible(visible);
        Ok(())
    }

    fn set_alpha(&self, window: WindowHandle, alpha: u8) -> Result<(), DisplayError> {
        let mut table = self.table();
        let entry = table
            .get_mut(&window)
            .ok_or(DisplayError::UnknownWindow(window))?;
        if entry.alpha != alpha {
            entry.alpha = alpha;
            entry.window.set_transparent(alpha < 255);
            entry.window.request_redraw();
        }
        Ok(())
    }

    fn set_topmost(&self, window: WindowHandle, topmost: bool) -> Result<(), DisplayError> {
        let level = if topmost {
            WindowLevel::AlwaysOnTop
        } else {
            WindowLevel::Normal
        };
        self.get(window)?.set_window_level(level);
        Ok(())
    }

    fn set_click_through(&self, window: WindowHandle, enabled: bool) -> Result<(), DisplayError> {
        self.get(window)?
            .set_cursor_hittest(!enabled)
            .map_err(|e| DisplayError::Native(e.to_string()))
    }

    fn invalidate(&self, window: WindowHandle, _region: Option<PixelRect>) -> Result<(), DisplayError> {
        self.get(window)?.request_redraw();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monitor_conversion() {
        let info = monitor_info(
            MonitorId(2),
            Some("DP-1".to_string()),
            (1920, 0),
            (2880, 1620),
            1.5,
            Some(143_856),
            false,
        );
        assert_eq!(info.bounds, PixelRect::new(1920, 0, 2880, 1620));
        assert_eq!(info.work_area, info.bounds);
        assert_eq!(info.scale(), 1.5);
        assert_eq!(info.refresh_rate_hz, 144);
        assert_eq!(info.device_name, "DP-1");

        let unnamed = monitor_info(MonitorId(3), None, (0, 0), (800, 600), 1.0, None, false);
        assert_eq!(unnamed.device_name, "monitor-3");
        assert_eq!(unnamed.refresh_rate_hz, 60);
    }

    #[test]
    fn test_first_monitor_becomes_primary() {
        let displays = WinitDisplays::new();
        displays.set(vec![
            monitor_info(MonitorId(1), None, (0, 0), (1920, 1080), 1.0, None, false),
            monitor_info(MonitorId(2), None, (1920, 0), (1920, 1080), 1.0, None, false),
        ]);
        let monitors = displays.enumerate().unwrap();
        assert!(monitors[0].is_primary);
        assert!(!monitors[1].is_primary);
    }

    #[test]
    fn test_unknown_window_handle() {
        let windows = WinitWindows::new();
        let handle = WindowHandle(0x42);
        assert!(!windows.exists(handle));
        assert_eq!(
            windows.set_visible(handle, true),
            Err(DisplayError::UnknownWindow(handle))
        );
        assert_eq!(windows.alpha(handle), None);
    }
}
