//! Native window access.
//!
//! All rectangles here are physical desktop pixels. Surfaces and the
//! monitor manager talk to windows only through [`NativeWindows`], so a
//! platform backend can be swapped for [`HeadlessWindows`] in tests and
//! headless hosts.

use crate::error::DisplayError;
use serde::Serialize;
use skylight_protocol::{PixelRect, WindowHandle};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

pub trait NativeWindows: Send + Sync {
    fn exists(&self, window: WindowHandle) -> bool;

    fn window_rect(&self, window: WindowHandle) -> Result<PixelRect, DisplayError>;

    fn set_window_rect(&self, window: WindowHandle, rect: PixelRect) -> Result<(), DisplayError>;

    fn set_visible(&self, window: WindowHandle, visible: bool) -> Result<(), DisplayError>;

    /// Whole-window alpha, 0 transparent to 255 opaque.
    fn set_alpha(&self, window: WindowHandle, alpha: u8) -> Result<(), DisplayError>;

    fn set_topmost(&self, window: WindowHandle, topmost: bool) -> Result<(), DisplayError>;

    /// Let mouse input pass through the window.
    fn set_click_through(&self, window: WindowHandle, enabled: bool) -> Result<(), DisplayError>;

    /// Request a repaint of `region` (window-relative), or the whole window.
    fn invalidate(&self, window: WindowHandle, region: Option<PixelRect>) -> Result<(), DisplayError>;
}

/// Observable state of a headless window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WindowState {
    pub rect: PixelRect,
    pub visible: bool,
    pub alpha: u8,
    pub topmost: bool,
    pub click_through: bool,
    pub invalidations: u64,
    /// Native calls that changed something
    pub changes: u64,
}

impl WindowState {
    fn new(rect: PixelRect) -> Self {
        Self {
            rect,
            visible: false,
            alpha: 255,
            topmost: false,
            click_through: false,
            invalidations: 0,
            changes: 0,
        }
    }
}

/// In-memory window table.
pub struct HeadlessWindows {
    windows: Mutex<HashMap<WindowHandle, WindowState>>,
    next_handle: AtomicU64,
}

impl HeadlessWindows {
    pub fn new() -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(0x1000),
        }
    }

    /// Create a hidden window at `rect`.
    pub fn create_window(&self, rect: PixelRect) -> WindowHandle {
        let handle = WindowHandle(self.next_handle.fetch_add(0x10, Ordering::Relaxed));
        self.table().insert(handle, WindowState::new(rect));
        handle
    }

    pub fn destroy_window(&self, window: WindowHandle) -> bool {
        self.table().remove(&window).is_some()
    }

    pub fn state(&self, window: WindowHandle) -> Option<WindowState> {
        self.table().get(&window).cloned()
    }

    pub fn window_count(&self) -> usize {
        self.table().len()
    }

    fn table(&self) -> MutexGuard<'_, HashMap<WindowHandle, WindowState>> {
        self.windows.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update<F>(&self, window: WindowHandle, f: F) -> Result<(), DisplayError>
    where
        F: FnOnce(&mut WindowState) -> bool,
    {
        let mut table = self.table();
        let state = table
            .get_mut(&window)
            .ok_or(DisplayError::UnknownWindow(window))?;
        if f(state) {
            state.changes += 1;
        }
        Ok(())
    }
}

impl Default for HeadlessWindows {
    fn default() -> Self {
        Self::new()
    }
}

fn replace<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        false
    } else {
        *slot = value;
        true
    }
}

impl NativeWindows for HeadlessWindows {
    fn exists(&self, window: WindowHandle) -> bool {
        self.table().contains_key(&window)
    }

    fn window_rect(&self, window: WindowHandle) -> Result<PixelRect, DisplayError> {
        self.table()
            .get(&window)
            .map(|s| s.rect)
            .ok_or(DisplayError::UnknownWindow(window))
    }

    fn set_window_rect(&self, window: WindowHandle, rect: PixelRect) -> Result<(), DisplayError> {
        self.update(window, |s| replace(&mut s.rect, rect))
    }

    fn set_visible(&self, window: WindowHandle, visible: bool) -> Result<(), DisplayError> {
        self.update(window, |s| replace(&mut s.visible, visible))
    }

    fn set_alpha(&self, window: WindowHandle, alpha: u8) -> Result<(), DisplayError> {
        self.update(window, |s| replace(&mut s.alpha, alpha))
    }

    fn set_topmost(&self, window: WindowHandle, topmost: bool) -> Result<(), DisplayError> {
        self.update(window, |s| replace(&mut s.topmost, topmost))
    }

    fn set_click_through(&self, window: WindowHandle, enabled: bool) -> Result<(), DisplayError> {
        self.update(window, |s| replace(&mut s.click_through, enabled))
    }

    fn invalidate(&self, window: WindowHandle, _region: Option<PixelRect>) -> Result<(), DisplayError> {
        self.update(window, |s| {
            s.invalidations += 1;
            false
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_lifecycle() {
        let windows = HeadlessWindows::new();
        let hwnd = windows.create_window(PixelRect::new(10, 10, 100, 50));
        assert!(windows.exists(hwnd));
        assert_eq!(windows.window_rect(hwnd).unwrap(), PixelRect::new(10, 10, 100, 50));

        windows.set_visible(hwnd, true).unwrap();
        windows.set_visible(hwnd, true).unwrap();
        let state = windows.state(hwnd).unwrap();
        assert!(state.visible);
        assert_eq!(state.changes, 1);

        assert!(windows.destroy_window(hwnd));
        assert_eq!(
            windows.set_alpha(hwnd, 10),
            Err(DisplayError::UnknownWindow(hwnd))
        );
    }

    #[test]
    fn test_handles_are_unique() {
        let windows = HeadlessWindows::new();
        let a = windows.create_window(PixelRect::new(0, 0, 1, 1));
        let b = windows.create_window(PixelRect::new(0, 0, 1, 1));
        assert_ne!(a, b);
        assert!(!a.is_null());
        assert_eq!(windows.window_count(), 2);
    }
}
