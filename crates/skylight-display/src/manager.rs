//! Monitor manager.
//!
//! Holds the current monitor snapshot behind a reader-writer lock. A
//! refresh builds a complete new snapshot and swaps it in, so readers see
//! either the old set or the new set and never a mix.
//!
//! Display-change notifications are debounced on a dedicated thread: a
//! burst of notifications results in one refresh once the burst has been
//! quiet for the configured delay.

use crate::arrangement::MonitorArrangement;
use crate::config::MonitorConfig;
use crate::error::DisplayError;
use crate::native::NativeWindows;
use crate::provider::DisplayProvider;
use crossbeam_channel::{unbounded, RecvTimeoutError, Sender};
use serde::Serialize;
use skylight_protocol::{Dpi, MonitorId, MonitorInfo, PixelRect, WindowHandle};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Called once per coalesced burst of display changes with the new set.
pub type MonitorChangeCallback = Arc<dyn Fn(&[MonitorInfo]) + Send + Sync>;

/// Called with the monitor whose DPI changed and its new DPI.
pub type DpiChangeCallback = Arc<dyn Fn(MonitorId, Dpi) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleDirection {
    LogicalToPhysical,
    PhysicalToLogical,
}

impl ScaleDirection {
    pub fn inverse(self) -> Self {
        match self {
            Self::LogicalToPhysical => Self::PhysicalToLogical,
            Self::PhysicalToLogical => Self::LogicalToPhysical,
        }
    }
}

/// Immutable view of the attached monitors at one refresh.
#[derive(Debug, Clone, Serialize)]
pub struct MonitorSnapshot {
    pub monitors: Vec<MonitorInfo>,
    pub arrangement: MonitorArrangement,
    /// Incremented by every refresh
    pub generation: u64,
}

impl MonitorSnapshot {
    fn empty() -> Self {
        Self {
            monitors: Vec::new(),
            arrangement: MonitorArrangement::Unknown,
            generation: 0,
        }
    }

    pub fn get(&self, id: MonitorId) -> Option<&MonitorInfo> {
        self.monitors.iter().find(|m| m.id == id)
    }

    pub fn primary(&self) -> Option<&MonitorInfo> {
        self.monitors
            .iter()
            .find(|m| m.is_primary)
            .or_else(|| self.monitors.first())
    }

    /// Monitor with the largest overlap with `rect`, if any overlaps.
    pub fn best_overlap(&self, rect: &PixelRect) -> Option<&MonitorInfo> {
        self.monitors
            .iter()
            .map(|m| (m, m.bounds.overlap_area(rect)))
            .filter(|(_, area)| *area > 0)
            .max_by_key(|(_, area)| *area)
            .map(|(m, _)| m)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MonitorStats {
    pub refreshes: u64,
    pub monitor_changes: u64,
    pub dpi_changes: u64,
    pub window_moves: u64,
    pub uptime_secs: u64,
}

#[derive(Default)]
struct Callbacks {
    on_change: Option<MonitorChangeCallback>,
    on_dpi: Option<DpiChangeCallback>,
}

struct Detector {
    notify: Sender<()>,
    handle: JoinHandle<()>,
}

struct Inner {
    config: MonitorConfig,
    provider: Arc<dyn DisplayProvider>,
    windows: Arc<dyn NativeWindows>,
    snapshot: RwLock<Arc<MonitorSnapshot>>,
    initialized: AtomicBool,
    detection_enabled: AtomicBool,
    callbacks: Mutex<Callbacks>,
    detector: Mutex<Option<Detector>>,
    refreshes: AtomicU64,
    monitor_changes: AtomicU64,
    dpi_changes: AtomicU64,
    window_moves: AtomicU64,
    started: Instant,
}

/// Attached displays, their DPI, and placement within them.
///
/// Shared across threads behind an `Arc`; all methods take `&self`.
pub struct MonitorManager {
    inner: Arc<Inner>,
}

impl MonitorManager {
    pub fn new(
        config: MonitorConfig,
        provider: Arc<dyn DisplayProvider>,
        windows: Arc<dyn NativeWindows>,
    ) -> Self {
        let detection_enabled = config.change_detection_enabled;
        Self {
            inner: Arc::new(Inner {
                config,
                provider,
                windows,
                snapshot: RwLock::new(Arc::new(MonitorSnapshot::empty())),
                initialized: AtomicBool::new(false),
                detection_enabled: AtomicBool::new(detection_enabled),
                callbacks: Mutex::new(Callbacks::default()),
                detector: Mutex::new(None),
                refreshes: AtomicU64::new(0),
                monitor_changes: AtomicU64::new(0),
                dpi_changes: AtomicU64::new(0),
                window_moves: AtomicU64::new(0),
                started: Instant::now(),
            }),
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.inner.config
    }

    pub fn windows(&self) -> &Arc<dyn NativeWindows> {
        &self.inner.windows
    }

    // ===== Lifecycle =====

    /// Enumerate monitors and start change detection if enabled.
    pub fn initialize(&self) -> Result<(), DisplayError> {
        if self.is_initialized() {
            return Ok(());
        }
        let snapshot = self.refresh_monitors()?;
        self.inner.initialized.store(true, Ordering::SeqCst);
        if self.inner.detection_enabled.load(Ordering::SeqCst) {
            self.start_detector()?;
        }
        info!(
            "Monitor manager initialized with {} monitor(s), {}",
            snapshot.monitors.len(),
            snapshot.arrangement
        );
        Ok(())
    }

    /// Stop change detection and drop the monitor set.
    pub fn shutdown(&self) {
        self.stop_detector();
        if self.inner.initialized.swap(false, Ordering::SeqCst) {
            *self.inner.write_snapshot() = Arc::new(MonitorSnapshot::empty());
            info!("Monitor manager shut down");
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.initialized.load(Ordering::SeqCst)
    }

    // ===== Discovery =====

    /// Re-enumerate and atomically replace the monitor set. On failure the
    /// previous set stays in place.
    pub fn refresh_monitors(&self) -> Result<Arc<MonitorSnapshot>, DisplayError> {
        self.inner.refresh()
    }

    /// Current snapshot. Cheap; holds no lock after returning.
    pub fn snapshot(&self) -> Arc<MonitorSnapshot> {
        self.inner.read_snapshot()
    }

    pub fn all_monitors(&self) -> Vec<MonitorInfo> {
        self.snapshot().monitors.clone()
    }

    pub fn monitor_count(&self) -> usize {
        self.snapshot().monitors.len()
    }

    pub fn primary_monitor(&self) -> Option<MonitorInfo> {
        self.snapshot().primary().cloned()
    }

    pub fn monitor_by_id(&self, id: MonitorId) -> Option<MonitorInfo> {
        self.snapshot().get(id).cloned()
    }

    /// Monitor containing a physical desktop point. `None` outside every
    /// monitor; the primary is never substituted.
    pub fn monitor_from_point(&self, x: i32, y: i32) -> Option<MonitorInfo> {
        self.snapshot()
            .monitors
            .iter()
            .find(|m| m.contains(x, y))
            .cloned()
    }

    /// Monitor showing most of the window. `None` for an unknown window or
    /// one that is entirely off-screen.
    pub fn monitor_from_window(&self, window: WindowHandle) -> Option<MonitorInfo> {
        let rect = self.inner.windows.window_rect(window).ok()?;
        self.snapshot().best_overlap(&rect).cloned()
    }

    // ===== DPI =====

    /// DPI of a monitor, or `None` when the id is unknown.
    pub fn monitor_dpi(&self, id: MonitorId) -> Option<Dpi> {
        let snapshot = self.snapshot();
        let monitor = snapshot.get(id)?;
        if self.inner.config.per_monitor_dpi {
            Some(monitor.dpi)
        } else {
            snapshot.primary().map(|p| p.dpi)
        }
    }

    pub fn dpi_scaling_factor(&self, id: MonitorId) -> Option<f32> {
        self.monitor_dpi(id).map(|dpi| dpi.scale())
    }

    pub fn logical_to_physical(&self, id: MonitorId, logical: i32) -> Option<i32> {
        self.monitor_dpi(id).map(|dpi| dpi.logical_to_physical(logical))
    }

    pub fn physical_to_logical(&self, id: MonitorId, physical: i32) -> Option<i32> {
        self.monitor_dpi(id).map(|dpi| dpi.physical_to_logical(physical))
    }

    pub fn scale_rect_for_dpi(
        &self,
        id: MonitorId,
        rect: &PixelRect,
        direction: ScaleDirection,
    ) -> Option<PixelRect> {
        let dpi = self.monitor_dpi(id)?;
        Some(match direction {
            ScaleDirection::LogicalToPhysical => dpi.logical_rect_to_physical(rect),
            ScaleDirection::PhysicalToLogical => dpi.physical_rect_to_logical(rect),
        })
    }

    // ===== Layout =====

    /// Union of all monitor bounds.
    pub fn virtual_screen_bounds(&self) -> Option<PixelRect> {
        let snapshot = self.snapshot();
        let mut monitors = snapshot.monitors.iter();
        let first = monitors.next()?.bounds;
        Some(monitors.fold(first, |acc, m| acc.union(&m.bounds)))
    }

    pub fn arrangement(&self) -> MonitorArrangement {
        self.snapshot().arrangement
    }

    pub fn is_horizontal_layout(&self) -> bool {
        self.arrangement().is_horizontal()
    }

    /// Bounds of a monitor relative to the primary monitor's origin.
    pub fn relative_position(&self, id: MonitorId) -> Option<PixelRect> {
        let snapshot = self.snapshot();
        let monitor = snapshot.get(id)?;
        let primary = snapshot.primary()?;
        Some(
            monitor
                .bounds
                .translated(-primary.bounds.x, -primary.bounds.y),
        )
    }

    // ===== Capabilities =====

    pub fn refresh_rate(&self, id: MonitorId) -> Option<u32> {
        self.monitor_by_id(id).map(|m| m.refresh_rate_hz)
    }

    pub fn bit_depth(&self, id: MonitorId) -> Option<u32> {
        self.monitor_by_id(id).map(|m| m.bit_depth)
    }

    pub fn is_hdr_supported(&self, id: MonitorId) -> bool {
        self.monitor_by_id(id).is_some_and(|m| m.hdr_supported)
    }

    pub fn is_touch_supported(&self, id: MonitorId) -> bool {
        self.monitor_by_id(id).is_some_and(|m| m.touch_supported)
    }

    // ===== Placement =====

    /// Move a window onto a monitor's work area. With
    /// `preserve_relative_position` the window keeps its relative offset
    /// within the work area it is leaving. Size follows the DPI ratio
    /// between the two monitors.
    pub fn move_window_to_monitor(
        &self,
        window: WindowHandle,
        id: MonitorId,
        preserve_relative_position: bool,
    ) -> Result<PixelRect, DisplayError> {
        let snapshot = self.snapshot();
        let target = snapshot.get(id).ok_or(DisplayError::UnknownMonitor(id))?;
        let rect = self.inner.windows.window_rect(window)?;
        let source = snapshot.best_overlap(&rect);

        let ratio = source.map_or(1.0, |s| target.scale() as f64 / s.scale() as f64);
        let width = (rect.width as f64 * ratio).round() as i32;
        let height = (rect.height as f64 * ratio).round() as i32;
        let area = target.work_area;

        let (x, y) = match source {
            Some(src) if preserve_relative_position && !src.work_area.is_empty() => {
                let fx = (rect.x - src.work_area.x) as f64 / src.work_area.width as f64;
                let fy = (rect.y - src.work_area.y) as f64 / src.work_area.height as f64;
                (
                    area.x + (fx * area.width as f64).round() as i32,
                    area.y + (fy * area.height as f64).round() as i32,
                )
            }
            _ => (area.x, area.y),
        };

        let placed = clamp_into(PixelRect::new(x, y, width, height), &area);
        self.place(window, placed)?;
        debug!("Moved window {} to {} at {:?}", window, id, placed);
        Ok(placed)
    }

    pub fn center_window_on_monitor(
        &self,
        window: WindowHandle,
        id: MonitorId,
    ) -> Result<PixelRect, DisplayError> {
        let target = self
            .monitor_by_id(id)
            .ok_or(DisplayError::UnknownMonitor(id))?;
        let rect = self.inner.windows.window_rect(window)?;
        let area = target.work_area;
        let width = rect.width.min(area.width);
        let height = rect.height.min(area.height);
        let placed = PixelRect::new(
            area.x + (area.width - width) / 2,
            area.y + (area.height - height) / 2,
            width,
            height,
        );
        self.place(window, placed)?;
        Ok(placed)
    }

    pub fn maximize_window_to_monitor(
        &self,
        window: WindowHandle,
        id: MonitorId,
    ) -> Result<PixelRect, DisplayError> {
        let target = self
            .monitor_by_id(id)
            .ok_or(DisplayError::UnknownMonitor(id))?;
        if !self.inner.windows.exists(window) {
            return Err(DisplayError::UnknownWindow(window));
        }
        self.place(window, target.work_area)?;
        Ok(target.work_area)
    }

    /// Recommended monitor for a window: the primary when preferred,
    /// otherwise the one showing most of the window, falling back to the
    /// primary for off-screen windows.
    pub fn optimal_monitor_for_window(
        &self,
        window: WindowHandle,
        prefer_primary: bool,
    ) -> Option<MonitorId> {
        let primary = self.primary_monitor().map(|m| m.id);
        if prefer_primary {
            return primary;
        }
        self.monitor_from_window(window).map(|m| m.id).or(primary)
    }

    fn place(&self, window: WindowHandle, rect: PixelRect) -> Result<(), DisplayError> {
        self.inner.windows.set_window_rect(window, rect)?;
        self.inner.window_moves.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    // ===== Events =====

    /// Replaces any previous change callback.
    pub fn set_monitor_change_callback(&self, callback: impl Fn(&[MonitorInfo]) + Send + Sync + 'static) {
        self.inner.callbacks().on_change = Some(Arc::new(callback));
    }

    /// Replaces any previous DPI callback.
    pub fn set_dpi_change_callback(&self, callback: impl Fn(MonitorId, Dpi) + Send + Sync + 'static) {
        self.inner.callbacks().on_dpi = Some(Arc::new(callback));
    }

    pub fn enable_change_detection(&self, enabled: bool) -> Result<(), DisplayError> {
        self.inner.detection_enabled.store(enabled, Ordering::SeqCst);
        if !self.is_initialized() {
            return Ok(());
        }
        if enabled {
            self.start_detector()
        } else {
            self.stop_detector();
            Ok(())
        }
    }

    pub fn is_change_detection_enabled(&self) -> bool {
        self.inner.detection_enabled.load(Ordering::SeqCst)
    }

    /// Entry point for the platform's display-change notification.
    /// Schedules a debounced refresh.
    pub fn handle_display_change(&self) {
        if !self.is_change_detection_enabled() {
            return;
        }
        if let Some(detector) = self.inner.detector().as_ref() {
            let _ = detector.notify.send(());
        }
    }

    /// Entry point for a per-window DPI change notification. Updates the
    /// DPI of the monitor showing the window and returns its id.
    pub fn handle_dpi_change(&self, window: WindowHandle, dpi: Dpi) -> Result<MonitorId, DisplayError> {
        if !dpi.is_valid() {
            return Err(DisplayError::Native(format!("invalid DPI {:?}", dpi)));
        }
        let rect = self.inner.windows.window_rect(window)?;

        let id = {
            let mut slot = self.inner.write_snapshot();
            let id = slot
                .best_overlap(&rect)
                .map(|m| m.id)
                .ok_or(DisplayError::UnknownWindow(window))?;
            let mut next = MonitorSnapshot::clone(&slot);
            if let Some(monitor) = next.monitors.iter_mut().find(|m| m.id == id) {
                if monitor.dpi == dpi {
                    return Ok(id);
                }
                monitor.dpi = dpi;
            }
            next.generation += 1;
            *slot = Arc::new(next);
            id
        };

        self.inner.dpi_changes.fetch_add(1, Ordering::Relaxed);
        info!("DPI of {} changed to {}x{}", id, dpi.x, dpi.y);
        let callback = self.inner.callbacks().on_dpi.clone();
        if let Some(callback) = callback {
            callback(id, dpi);
        }
        Ok(id)
    }

    fn start_detector(&self) -> Result<(), DisplayError> {
        let mut detector = self.inner.detector();
        if detector.is_some() {
            return Ok(());
        }
        let (tx, rx) = unbounded::<()>();
        let delay = self.inner.config.change_detection_delay();
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);

        let handle = thread::Builder::new()
            .name("monitor-change-detector".to_string())
            .spawn(move || {
                debug!("Monitor change detector started");
                while rx.recv().is_ok() {
                    // Wait until the burst has been quiet for `delay`.
                    loop {
                        match rx.recv_timeout(delay) {
                            Ok(()) => continue,
                            Err(RecvTimeoutError::Timeout) => break,
                            Err(RecvTimeoutError::Disconnected) => return,
                        }
                    }
                    match weak.upgrade() {
                        Some(inner) => inner.process_changes(),
                        None => return,
                    }
                }
                debug!("Monitor change detector stopped");
            })
            .map_err(|e| DisplayError::Native(format!("failed to spawn detector: {}", e)))?;

        *detector = Some(Detector { notify: tx, handle });
        Ok(())
    }

    fn stop_detector(&self) {
        let detector = self.inner.detector().take();
        if let Some(Detector { notify, handle }) = detector {
            drop(notify);
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }

    // ===== Diagnostics =====

    pub fn stats(&self) -> MonitorStats {
        let inner = &self.inner;
        MonitorStats {
            refreshes: inner.refreshes.load(Ordering::Relaxed),
            monitor_changes: inner.monitor_changes.load(Ordering::Relaxed),
            dpi_changes: inner.dpi_changes.load(Ordering::Relaxed),
            window_moves: inner.window_moves.load(Ordering::Relaxed),
            uptime_secs: inner.started.elapsed().as_secs(),
        }
    }

    /// Monitor set, layout and statistics as JSON.
    pub fn diagnostics(&self) -> serde_json::Value {
        let snapshot = self.snapshot();
        serde_json::json!({
            "initialized": self.is_initialized(),
            "change_detection": self.is_change_detection_enabled(),
            "per_monitor_dpi": self.inner.config.per_monitor_dpi,
            "arrangement": snapshot.arrangement,
            "generation": snapshot.generation,
            "virtual_screen": self.virtual_screen_bounds(),
            "monitors": snapshot.monitors,
            "stats": self.stats(),
            "issues": self.configuration_issues(),
        })
    }

    /// Problems with the current monitor set. Empty when it is consistent.
    pub fn configuration_issues(&self) -> Vec<String> {
        let snapshot = self.snapshot();
        let monitors = &snapshot.monitors;
        let mut issues = Vec::new();

        if monitors.is_empty() {
            issues.push("no monitors".to_string());
        }
        let primaries = monitors.iter().filter(|m| m.is_primary).count();
        if !monitors.is_empty() && primaries != 1 {
            issues.push(format!("{} primary monitors", primaries));
        }
        let mut ids = HashSet::new();
        for m in monitors {
            if !ids.insert(m.id) {
                issues.push(format!("duplicate id {}", m.id));
            }
            if m.bounds.is_empty() {
                issues.push(format!("{} has empty bounds", m.id));
            }
            if !m.dpi.is_valid() {
                issues.push(format!("{} has invalid DPI", m.id));
            }
            if m.work_area.intersection(&m.bounds) != Some(m.work_area) {
                issues.push(format!("{} work area outside bounds", m.id));
            }
        }
        for (i, a) in monitors.iter().enumerate() {
            for b in &monitors[i + 1..] {
                if a.bounds.overlap_area(&b.bounds) > 0 {
                    issues.push(format!("{} overlaps {}", a.id, b.id));
                }
            }
        }
        issues
    }

    pub fn validate_configuration(&self) -> bool {
        self.configuration_issues().is_empty()
    }

    pub fn log_monitor_information(&self) {
        log_snapshot(&self.snapshot());
    }
}

impl Drop for MonitorManager {
    fn drop(&mut self) {
        self.stop_detector();
    }
}

impl Inner {
    fn read_snapshot(&self) -> Arc<MonitorSnapshot> {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn write_snapshot(&self) -> std::sync::RwLockWriteGuard<'_, Arc<MonitorSnapshot>> {
        self.snapshot.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn callbacks(&self) -> MutexGuard<'_, Callbacks> {
        self.callbacks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn detector(&self) -> MutexGuard<'_, Option<Detector>> {
        self.detector.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn refresh(&self) -> Result<Arc<MonitorSnapshot>, DisplayError> {
        let mut monitors = self.provider.enumerate()?;
        for m in &mut monitors {
            if !m.dpi.is_valid() {
                warn!("{} reported invalid DPI {:?}, assuming 96", m.id, m.dpi);
                m.dpi = Dpi::STANDARD;
            }
        }

        let arrangement = MonitorArrangement::classify(&monitors);
        let mut slot = self.write_snapshot();
        let snapshot = Arc::new(MonitorSnapshot {
            monitors,
            arrangement,
            generation: slot.generation + 1,
        });
        *slot = snapshot.clone();
        drop(slot);

        self.refreshes.fetch_add(1, Ordering::Relaxed);
        Ok(snapshot)
    }

    /// Debounced refresh: notify subscribers if anything changed.
    fn process_changes(&self) {
        let previous = self.read_snapshot();
        let current = match self.refresh() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("Monitor refresh after display change failed: {}", e);
                return;
            }
        };
        if previous.monitors == current.monitors {
            debug!("Display change notification without monitor changes");
            return;
        }

        self.monitor_changes.fetch_add(1, Ordering::Relaxed);
        if self.config.log_changes {
            info!(
                "Monitor configuration changed: {} -> {} monitor(s)",
                previous.monitors.len(),
                current.monitors.len()
            );
            log_snapshot(&current);
        }

        let (on_change, on_dpi) = {
            let callbacks = self.callbacks();
            (callbacks.on_change.clone(), callbacks.on_dpi.clone())
        };
        if let Some(callback) = on_change {
            callback(&current.monitors);
        }

        for monitor in &current.monitors {
            let changed = previous
                .get(monitor.id)
                .is_some_and(|old| old.dpi != monitor.dpi);
            if changed {
                self.dpi_changes.fetch_add(1, Ordering::Relaxed);
                if let Some(callback) = &on_dpi {
                    callback(monitor.id, monitor.dpi);
                }
            }
        }
    }
}

fn log_snapshot(snapshot: &MonitorSnapshot) {
    info!(
        "{} monitor(s), arrangement {}",
        snapshot.monitors.len(),
        snapshot.arrangement
    );
    for m in &snapshot.monitors {
        info!(
            "  {} {} {:?} @ {}% {}Hz{}",
            m.id,
            m.device_name,
            m.bounds,
            (m.scale() * 100.0).round(),
            m.refresh_rate_hz,
            if m.is_primary { " (primary)" } else { "" }
        );
    }
}

/// Fit `rect` inside `area`, shrinking it if needed.
fn clamp_into(rect: PixelRect, area: &PixelRect) -> PixelRect {
    let width = rect.width.clamp(0, area.width.max(0));
    let height = rect.height.clamp(0, area.height.max(0));
    // A malformed work area can end before it starts; prefer its origin
    PixelRect::new(
        rect.x.min(area.right() - width).max(area.x),
        rect.y.min(area.bottom() - height).max(area.y),
        width,
        height,
    )
}
