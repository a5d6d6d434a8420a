//! Render surface: placement and visual state of one widget's window.
//!
//! The surface attaches to a window the caller already created. Bounds are
//! kept in logical pixels together with the DPI of the monitor the window
//! is on; the native (physical) rectangle is always derived from the two
//! and recomputed whenever either changes.

use crate::error::SurfaceError;
use skylight_display::{MonitorManager, NativeWindows};
use skylight_protocol::{
    Dpi, MonitorId, MonitorInfo, PixelRect, RenderProperties, RenderRect, WindowHandle,
};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

pub type ResizeCallback = Arc<dyn Fn(PixelRect) + Send + Sync>;
pub type SurfaceDpiCallback = Arc<dyn Fn(Dpi) + Send + Sync>;
pub type VisibilityCallback = Arc<dyn Fn(bool) + Send + Sync>;

struct SurfaceState {
    window: WindowHandle,
    /// Logical desktop coordinates
    bounds: PixelRect,
    dpi: Dpi,
    monitor: Option<MonitorId>,
    properties: RenderProperties,
    hardware_acceleration: bool,
    vsync: bool,
    created: bool,
}

#[derive(Default)]
struct SurfaceCallbacks {
    resize: Option<ResizeCallback>,
    dpi: Option<SurfaceDpiCallback>,
    visibility: Option<VisibilityCallback>,
}

pub struct RenderSurface {
    windows: Arc<dyn NativeWindows>,
    monitors: Arc<MonitorManager>,
    state: Mutex<SurfaceState>,
    callbacks: Mutex<SurfaceCallbacks>,
}

impl RenderSurface {
    pub fn new(windows: Arc<dyn NativeWindows>, monitors: Arc<MonitorManager>) -> Self {
        Self {
            windows,
            monitors,
            state: Mutex::new(SurfaceState {
                window: WindowHandle::NULL,
                bounds: PixelRect::default(),
                dpi: Dpi::STANDARD,
                monitor: None,
                properties: RenderProperties::default(),
                hardware_acceleration: true,
                vsync: true,
                created: false,
            }),
            callbacks: Mutex::new(SurfaceCallbacks::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, SurfaceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn callbacks(&self) -> MutexGuard<'_, SurfaceCallbacks> {
        self.callbacks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// State guard for a created surface.
    fn live(&self) -> Result<MutexGuard<'_, SurfaceState>, SurfaceError> {
        let state = self.state();
        if state.created {
            Ok(state)
        } else {
            Err(SurfaceError::NotCreated)
        }
    }

    // ===== Lifecycle =====

    /// Attach to `window` and place it at logical `bounds` on the monitor
    /// the window currently shows on (the primary if it is off-screen).
    pub fn create_surface(
        &self,
        window: WindowHandle,
        bounds: PixelRect,
        properties: RenderProperties,
    ) -> Result<(), SurfaceError> {
        check_bounds(&bounds)?;
        properties.validate()?;
        if window.is_null() || !self.windows.exists(window) {
            return Err(skylight_display::DisplayError::UnknownWindow(window).into());
        }

        let mut state = self.state();
        if state.created {
            return Err(SurfaceError::AlreadyCreated);
        }

        let monitor = self
            .monitors
            .monitor_from_window(window)
            .or_else(|| self.monitors.primary_monitor());
        let dpi = monitor.as_ref().map_or(Dpi::STANDARD, |m| m.dpi);

        self.windows
            .set_window_rect(window, dpi.logical_rect_to_physical(&bounds))?;
        self.apply_properties(window, &properties)?;

        *state = SurfaceState {
            window,
            bounds,
            dpi,
            monitor: monitor.map(|m| m.id),
            properties,
            hardware_acceleration: state.hardware_acceleration,
            vsync: state.vsync,
            created: true,
        };
        info!(
            "Surface attached to window {} at {:?} ({}%)",
            window,
            bounds,
            (dpi.scale() * 100.0).round()
        );
        Ok(())
    }

    /// Detach from the window and hide it. The window itself stays.
    pub fn destroy_surface(&self) {
        let mut state = self.state();
        if !state.created {
            return;
        }
        state.created = false;
        let _ = self.windows.set_visible(state.window, false);
        debug!("Surface detached from window {}", state.window);
        state.window = WindowHandle::NULL;
        drop(state);
        *self.callbacks() = SurfaceCallbacks::default();
    }

    pub fn is_valid(&self) -> bool {
        let state = self.state();
        state.created && self.windows.exists(state.window)
    }

    pub fn window_handle(&self) -> WindowHandle {
        self.state().window
    }

    // ===== Geometry =====

    /// Logical bounds.
    pub fn bounds(&self) -> PixelRect {
        self.state().bounds
    }

    /// Native bounds: logical bounds scaled by the current DPI.
    pub fn physical_bounds(&self) -> PixelRect {
        let state = self.state();
        state.dpi.logical_rect_to_physical(&state.bounds)
    }

    /// Logical bounds with the scale they were computed under.
    pub fn render_rect(&self) -> RenderRect {
        let state = self.state();
        RenderRect::from_logical(state.bounds, state.dpi.scale())
    }

    pub fn set_bounds(&self, bounds: PixelRect) -> Result<(), SurfaceError> {
        check_bounds(&bounds)?;
        let mut state = self.live()?;
        self.windows
            .set_window_rect(state.window, state.dpi.logical_rect_to_physical(&bounds))?;
        let changed = state.bounds != bounds;
        state.bounds = bounds;
        drop(state);
        if changed {
            self.fire_resize(bounds);
        }
        Ok(())
    }

    pub fn dpi(&self) -> Dpi {
        self.state().dpi
    }

    /// Apply a DPI supplied by the monitor manager and re-derive the
    /// native rectangle.
    pub fn set_dpi(&self, dpi: Dpi) -> Result<(), SurfaceError> {
        if !dpi.is_valid() {
            return Err(skylight_display::DisplayError::Native(format!("invalid DPI {:?}", dpi)).into());
        }
        let mut state = self.live()?;
        if state.dpi == dpi {
            return Ok(());
        }
        self.windows
            .set_window_rect(state.window, dpi.logical_rect_to_physical(&state.bounds))?;
        state.dpi = dpi;
        drop(state);
        info!("Surface DPI changed to {}x{}", dpi.x, dpi.y);
        self.fire_dpi(dpi);
        Ok(())
    }

    /// Physical screen point to surface-relative logical coordinates.
    pub fn screen_to_surface(&self, x: i32, y: i32) -> (i32, i32) {
        let state = self.state();
        let origin = state.dpi.logical_rect_to_physical(&state.bounds);
        (
            state.dpi.physical_to_logical(x - origin.x),
            state.dpi.physical_to_logical(y - origin.y),
        )
    }

    /// Surface-relative logical point to physical screen coordinates.
    pub fn surface_to_screen(&self, x: i32, y: i32) -> (i32, i32) {
        let state = self.state();
        let origin = state.dpi.logical_rect_to_physical(&state.bounds);
        (
            origin.x + state.dpi.logical_to_physical(x),
            origin.y + state.dpi.logical_to_physical(y),
        )
    }

    /// Whether a physical screen point falls on the surface.
    pub fn contains_point(&self, x: i32, y: i32) -> bool {
        self.physical_bounds().contains(x, y)
    }

    // ===== Monitors =====

    pub fn monitor_info(&self) -> Option<MonitorInfo> {
        let id = self.state().monitor?;
        self.monitors.monitor_by_id(id)
    }

    /// Move the window onto another monitor, keeping its relative position,
    /// and adopt that monitor's DPI.
    pub fn move_to_monitor(&self, id: MonitorId) -> Result<(), SurfaceError> {
        let window = self.live()?.window;
        let dpi = self
            .monitors
            .monitor_dpi(id)
            .ok_or(skylight_display::DisplayError::UnknownMonitor(id))?;
        let physical = self.monitors.move_window_to_monitor(window, id, true)?;

        let mut state = self.live()?;
        let bounds = dpi.physical_rect_to_logical(&physical);
        let resized = (bounds.width, bounds.height) != (state.bounds.width, state.bounds.height);
        let rescaled = state.dpi != dpi;
        state.bounds = bounds;
        state.dpi = dpi;
        state.monitor = Some(id);
        drop(state);

        if rescaled {
            self.fire_dpi(dpi);
        }
        if resized {
            self.fire_resize(bounds);
        }
        Ok(())
    }

    /// Re-read the DPI of the monitor the window is on.
    pub fn sync_with_monitor(&self) -> Result<(), SurfaceError> {
        let window = self.live()?.window;
        let monitor = self
            .monitors
            .monitor_from_window(window)
            .ok_or(skylight_display::DisplayError::UnknownWindow(window))?;
        self.state().monitor = Some(monitor.id);
        self.set_dpi(monitor.dpi)
    }

    // ===== Visual state =====

    pub fn properties(&self) -> RenderProperties {
        self.state().properties.clone()
    }

    /// Apply all compositing properties to the native window.
    pub fn set_properties(&self, properties: RenderProperties) -> Result<(), SurfaceError> {
        properties.validate()?;
        let mut state = self.live()?;
        self.apply_properties(state.window, &properties)?;
        let visibility_changed = state.properties.visible != properties.visible;
        let visible = properties.visible;
        state.properties = properties;
        drop(state);
        if visibility_changed {
            self.fire_visibility(visible);
        }
        Ok(())
    }

    pub fn set_visible(&self, visible: bool) -> Result<(), SurfaceError> {
        let mut state = self.live()?;
        self.windows.set_visible(state.window, visible)?;
        let changed = state.properties.visible != visible;
        state.properties.visible = visible;
        drop(state);
        if changed {
            self.fire_visibility(visible);
        }
        Ok(())
    }

    pub fn is_visible(&self) -> bool {
        self.state().properties.visible
    }

    pub fn set_opacity(&self, opacity: f32) -> Result<(), SurfaceError> {
        if !(0.0..=1.0).contains(&opacity) {
            return Err(skylight_protocol::PropertiesError::Opacity(opacity).into());
        }
        let mut state = self.live()?;
        self.windows.set_alpha(state.window, opacity_to_alpha(opacity))?;
        state.properties.opacity = opacity;
        Ok(())
    }

    pub fn opacity(&self) -> f32 {
        self.state().properties.opacity
    }

    pub fn set_topmost(&self, topmost: bool) -> Result<(), SurfaceError> {
        let mut state = self.live()?;
        self.windows.set_topmost(state.window, topmost)?;
        state.properties.topmost = topmost;
        Ok(())
    }

    pub fn is_topmost(&self) -> bool {
        self.state().properties.topmost
    }

    pub fn set_click_through(&self, enabled: bool) -> Result<(), SurfaceError> {
        let mut state = self.live()?;
        self.windows.set_click_through(state.window, enabled)?;
        state.properties.click_through = enabled;
        Ok(())
    }

    pub fn is_click_through(&self) -> bool {
        self.state().properties.click_through
    }

    /// Hint for the renderer; backends may ignore it.
    pub fn set_hardware_acceleration(&self, enabled: bool) {
        self.state().hardware_acceleration = enabled;
    }

    pub fn is_hardware_accelerated(&self) -> bool {
        self.state().hardware_acceleration
    }

    /// Hint for the renderer; backends may ignore it.
    pub fn set_vsync(&self, enabled: bool) {
        let mut state = self.state();
        state.vsync = enabled;
        state.properties.enable_vsync = enabled;
    }

    pub fn is_vsync_enabled(&self) -> bool {
        self.state().vsync
    }

    /// Request a repaint of a surface-relative logical region, or of the
    /// whole surface.
    pub fn invalidate(&self, region: Option<PixelRect>) -> Result<(), SurfaceError> {
        let state = self.live()?;
        let physical = region.map(|r| state.dpi.logical_rect_to_physical(&r));
        self.windows.invalidate(state.window, physical)?;
        Ok(())
    }

    /// Repaint without resubmitting content.
    pub fn update_surface(&self) -> Result<(), SurfaceError> {
        self.invalidate(None)
    }

    fn apply_properties(
        &self,
        window: WindowHandle,
        properties: &RenderProperties,
    ) -> Result<(), SurfaceError> {
        self.windows.set_alpha(window, opacity_to_alpha(properties.opacity))?;
        self.windows.set_topmost(window, properties.topmost)?;
        self.windows.set_click_through(window, properties.click_through)?;
        self.windows.set_visible(window, properties.visible)?;
        Ok(())
    }

    // ===== Events =====

    /// Replaces any previous resize callback. Receives logical bounds.
    pub fn set_resize_callback(&self, callback: impl Fn(PixelRect) + Send + Sync + 'static) {
        self.callbacks().resize = Some(Arc::new(callback));
    }

    /// Replaces any previous DPI callback.
    pub fn set_dpi_change_callback(&self, callback: impl Fn(Dpi) + Send + Sync + 'static) {
        self.callbacks().dpi = Some(Arc::new(callback));
    }

    /// Replaces any previous visibility callback.
    pub fn set_visibility_callback(&self, callback: impl Fn(bool) + Send + Sync + 'static) {
        self.callbacks().visibility = Some(Arc::new(callback));
    }

    /// The native window was resized to `physical` by someone else.
    pub fn handle_resized(&self, physical: PixelRect) -> Result<(), SurfaceError> {
        let mut state = self.live()?;
        let bounds = state.dpi.physical_rect_to_logical(&physical);
        if bounds == state.bounds {
            return Ok(());
        }
        state.bounds = bounds;
        drop(state);
        self.fire_resize(bounds);
        Ok(())
    }

    /// The native window moved to a monitor with a different DPI.
    pub fn handle_dpi_changed(&self, dpi: Dpi) -> Result<(), SurfaceError> {
        self.set_dpi(dpi)
    }

    /// The native window was shown or hidden by someone else.
    pub fn handle_visibility_changed(&self, visible: bool) -> Result<(), SurfaceError> {
        let mut state = self.live()?;
        if state.properties.visible == visible {
            return Ok(());
        }
        state.properties.visible = visible;
        drop(state);
        self.fire_visibility(visible);
        Ok(())
    }

    fn fire_resize(&self, bounds: PixelRect) {
        let callback = self.callbacks().resize.clone();
        if let Some(callback) = callback {
            callback(bounds);
        }
    }

    fn fire_dpi(&self, dpi: Dpi) {
        let callback = self.callbacks().dpi.clone();
        if let Some(callback) = callback {
            callback(dpi);
        }
    }

    fn fire_visibility(&self, visible: bool) {
        let callback = self.callbacks().visibility.clone();
        if let Some(callback) = callback {
            callback(visible);
        }
    }
}

fn check_bounds(bounds: &PixelRect) -> Result<(), SurfaceError> {
    if bounds.width < 0 || bounds.height < 0 {
        return Err(SurfaceError::InvalidBounds(bounds.width, bounds.height));
    }
    Ok(())
}

fn opacity_to_alpha(opacity: f32) -> u8 {
    (opacity.clamp(0.0, 1.0) * 255.0).round() as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use skylight_display::{HeadlessWindows, MonitorConfig, StaticDisplays};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixture {
        windows: Arc<HeadlessWindows>,
        monitors: Arc<MonitorManager>,
        surface: RenderSurface,
    }

    fn fixture() -> Fixture {
        let displays = Arc::new(StaticDisplays::with_layout(&[
            (PixelRect::new(0, 0, 1920, 1080), 1.0),
            (PixelRect::new(1920, 0, 2880, 1620), 1.5),
        ]));
        let windows = Arc::new(HeadlessWindows::new());
        let config = MonitorConfig {
            change_detection_enabled: false,
            ..MonitorConfig::default()
        };
        let monitors = Arc::new(MonitorManager::new(config, displays, windows.clone()));
        monitors.initialize().unwrap();
        let surface = RenderSurface::new(windows.clone(), monitors.clone());
        Fixture {
            windows,
            monitors,
            surface,
        }
    }

    #[test]
    fn test_surface_on_150_percent_monitor() {
        let f = fixture();
        let hwnd = f.windows.create_window(PixelRect::new(2000, 100, 50, 50));
        f.surface
            .create_surface(hwnd, PixelRect::new(0, 0, 200, 100), RenderProperties::default())
            .unwrap();

        assert_eq!(f.surface.bounds(), PixelRect::new(0, 0, 200, 100));
        assert_eq!(f.surface.physical_bounds(), PixelRect::new(0, 0, 300, 150));
        assert_eq!(f.windows.window_rect(hwnd).unwrap(), PixelRect::new(0, 0, 300, 150));
        assert_eq!(f.surface.monitor_info().unwrap().id, MonitorId(2));
        assert_eq!(f.surface.render_rect().scale, 1.5);
    }

    #[test]
    fn test_operations_rejected_until_created() {
        let f = fixture();
        assert!(!f.surface.is_valid());
        assert_eq!(f.surface.set_visible(true), Err(SurfaceError::NotCreated));
        assert_eq!(
            f.surface.set_bounds(PixelRect::new(0, 0, 10, 10)),
            Err(SurfaceError::NotCreated)
        );

        let result = f.surface.create_surface(
            WindowHandle(0xbad),
            PixelRect::new(0, 0, 10, 10),
            RenderProperties::default(),
        );
        assert!(matches!(result, Err(SurfaceError::Display(_))));
    }

    #[test]
    fn test_set_visible_is_idempotent() {
        let f = fixture();
        let hwnd = f.windows.create_window(PixelRect::new(0, 0, 10, 10));
        let hidden = RenderProperties {
            visible: false,
            ..RenderProperties::default()
        };
        f.surface
            .create_surface(hwnd, PixelRect::new(0, 0, 100, 100), hidden)
            .unwrap();

        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        f.surface.set_visibility_callback(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        f.surface.set_visible(true).unwrap();
        let once = f.windows.state(hwnd).unwrap();
        f.surface.set_visible(true).unwrap();
        let twice = f.windows.state(hwnd).unwrap();

        assert_eq!(once, twice);
        assert!(twice.visible);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dpi_change_recomputes_physical_bounds() {
        let f = fixture();
        let hwnd = f.windows.create_window(PixelRect::new(10, 10, 10, 10));
        f.surface
            .create_surface(hwnd, PixelRect::new(10, 20, 200, 100), RenderProperties::default())
            .unwrap();

        let seen = Arc::new(Mutex::new(None));
        let slot = seen.clone();
        f.surface
            .set_dpi_change_callback(move |dpi| *slot.lock().unwrap() = Some(dpi.scale()));

        f.surface.handle_dpi_changed(Dpi::from_scale(1.25)).unwrap();
        assert_eq!(f.surface.physical_bounds(), PixelRect::new(13, 25, 250, 125));
        assert_eq!(f.windows.window_rect(hwnd).unwrap(), PixelRect::new(13, 25, 250, 125));
        assert_eq!(*seen.lock().unwrap(), Some(1.25));

        f.surface.handle_dpi_changed(Dpi::STANDARD).unwrap();
        assert_eq!(f.surface.physical_bounds(), PixelRect::new(10, 20, 200, 100));
    }

    #[test]
    fn test_single_slot_callbacks_replace() {
        let f = fixture();
        let hwnd = f.windows.create_window(PixelRect::new(0, 0, 10, 10));
        f.surface
            .create_surface(hwnd, PixelRect::new(0, 0, 100, 100), RenderProperties::default())
            .unwrap();

        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let a = first.clone();
        f.surface.set_resize_callback(move |_| {
            a.fetch_add(1, Ordering::SeqCst);
        });
        let b = second.clone();
        f.surface.set_resize_callback(move |_| {
            b.fetch_add(1, Ordering::SeqCst);
        });

        f.surface.handle_resized(PixelRect::new(0, 0, 300, 200)).unwrap();
        f.surface.handle_resized(PixelRect::new(0, 0, 300, 200)).unwrap();
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
        assert_eq!(f.surface.bounds(), PixelRect::new(0, 0, 300, 200));
    }

    #[test]
    fn test_coordinate_transforms() {
        let f = fixture();
        let hwnd = f.windows.create_window(PixelRect::new(2000, 0, 10, 10));
        f.surface
            .create_surface(hwnd, PixelRect::new(1400, 100, 200, 100), RenderProperties::default())
            .unwrap();

        assert_eq!(f.surface.physical_bounds(), PixelRect::new(2100, 150, 300, 150));
        assert_eq!(f.surface.surface_to_screen(10, 10), (2115, 165));
        assert_eq!(f.surface.screen_to_surface(2115, 165), (10, 10));
        assert!(f.surface.contains_point(2100, 150));
        assert!(!f.surface.contains_point(2400, 150));
    }

    #[test]
    fn test_visual_setters() {
        let f = fixture();
        let hwnd = f.windows.create_window(PixelRect::new(0, 0, 10, 10));
        f.surface
            .create_surface(hwnd, PixelRect::new(0, 0, 100, 100), RenderProperties::default())
            .unwrap();

        f.surface.set_opacity(0.5).unwrap();
        f.surface.set_topmost(true).unwrap();
        f.surface.set_click_through(true).unwrap();
        let state = f.windows.state(hwnd).unwrap();
        assert_eq!(state.alpha, 128);
        assert!(state.topmost);
        assert!(state.click_through);
        assert!(f.surface.set_opacity(1.5).is_err());

        f.surface.set_vsync(false);
        assert!(!f.surface.is_vsync_enabled());
        assert!(!f.surface.properties().enable_vsync);

        f.surface.invalidate(Some(PixelRect::new(0, 0, 10, 10))).unwrap();
        f.surface.update_surface().unwrap();
        assert_eq!(f.windows.state(hwnd).unwrap().invalidations, 2);
    }

    #[test]
    fn test_move_to_monitor_adopts_dpi() {
        let f = fixture();
        let hwnd = f.windows.create_window(PixelRect::new(0, 0, 10, 10));
        f.surface
            .create_surface(hwnd, PixelRect::new(100, 100, 200, 100), RenderProperties::default())
            .unwrap();
        assert_eq!(f.surface.dpi(), Dpi::STANDARD);

        assert!(f.surface.move_to_monitor(MonitorId(9)).is_err());
        f.surface.move_to_monitor(MonitorId(2)).unwrap();
        assert_eq!(f.surface.dpi().scale(), 1.5);
        assert_eq!(f.surface.bounds().width, 200);
        assert_eq!(f.surface.monitor_info().unwrap().id, MonitorId(2));
        assert_eq!(f.monitors.stats().window_moves, 1);
    }

    #[test]
    fn test_destroy_detaches() {
        let f = fixture();
        let hwnd = f.windows.create_window(PixelRect::new(0, 0, 10, 10));
        f.surface
            .create_surface(hwnd, PixelRect::new(0, 0, 100, 100), RenderProperties::default())
            .unwrap();
        assert!(f.surface.is_valid());

        f.surface.destroy_surface();
        assert!(!f.surface.is_valid());
        assert!(f.windows.exists(hwnd));
        assert!(!f.windows.state(hwnd).unwrap().visible);
        assert_eq!(f.surface.set_topmost(true), Err(SurfaceError::NotCreated));
    }
}
