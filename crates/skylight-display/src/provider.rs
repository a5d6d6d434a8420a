//! Display enumeration sources.

use crate::error::DisplayError;
use skylight_protocol::{Dpi, MonitorId, MonitorInfo, PixelRect};
use std::sync::{PoisonError, RwLock};

/// Where the monitor manager gets its monitor list from.
pub trait DisplayProvider: Send + Sync {
    /// Enumerate attached displays. Bounds are physical desktop pixels.
    fn enumerate(&self) -> Result<Vec<MonitorInfo>, DisplayError>;
}

/// A fixed monitor list that can be swapped at runtime.
///
/// Used by headless hosts and tests to simulate hot-plug and DPI changes.
#[derive(Debug, Default)]
pub struct StaticDisplays {
    monitors: RwLock<Vec<MonitorInfo>>,
}

impl StaticDisplays {
    pub fn new(monitors: Vec<MonitorInfo>) -> Self {
        Self {
            monitors: RwLock::new(monitors),
        }
    }

    /// Monitors from `(bounds, scale)` pairs. The first is primary, ids
    /// count up from 1, and the work area leaves 40 px for a task bar.
    pub fn with_layout(layout: &[(PixelRect, f32)]) -> Self {
        Self::new(layout_monitors(layout))
    }

    /// One 1920x1080 monitor at 100%.
    pub fn single() -> Self {
        Self::with_layout(&[(PixelRect::new(0, 0, 1920, 1080), 1.0)])
    }

    pub fn set_monitors(&self, monitors: Vec<MonitorInfo>) {
        *self.monitors.write().unwrap_or_else(PoisonError::into_inner) = monitors;
    }

    pub fn set_layout(&self, layout: &[(PixelRect, f32)]) {
        self.set_monitors(layout_monitors(layout));
    }

    /// Change one monitor's DPI scale. Returns false for an unknown id.
    pub fn set_scale(&self, id: MonitorId, scale: f32) -> bool {
        let mut monitors = self.monitors.write().unwrap_or_else(PoisonError::into_inner);
        match monitors.iter_mut().find(|m| m.id == id) {
            Some(m) => {
                m.dpi = Dpi::from_scale(scale);
                true
            }
            None => false,
        }
    }
}

impl DisplayProvider for StaticDisplays {
    fn enumerate(&self) -> Result<Vec<MonitorInfo>, DisplayError> {
        Ok(self
            .monitors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }
}

fn layout_monitors(layout: &[(PixelRect, f32)]) -> Vec<MonitorInfo> {
    layout
        .iter()
        .enumerate()
        .map(|(i, (bounds, scale))| monitor(MonitorId(i as i32 + 1), *bounds, *scale, i == 0))
        .collect()
}

/// A plain monitor description with common defaults.
pub fn monitor(id: MonitorId, bounds: PixelRect, scale: f32, primary: bool) -> MonitorInfo {
    let work_area = PixelRect::new(bounds.x, bounds.y, bounds.width, (bounds.height - 40).max(0));
    MonitorInfo {
        id,
        device_name: format!("\\\\.\\DISPLAY{}", id.0),
        bounds,
        work_area,
        dpi: Dpi::from_scale(scale),
        refresh_rate_hz: 60,
        bit_depth: 32,
        is_primary: primary,
        hdr_supported: false,
        touch_supported: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_builder() {
        let displays = StaticDisplays::with_layout(&[
            (PixelRect::new(0, 0, 1920, 1080), 1.0),
            (PixelRect::new(1920, 0, 2880, 1620), 1.5),
        ]);
        let monitors = displays.enumerate().unwrap();
        assert_eq!(monitors.len(), 2);
        assert!(monitors[0].is_primary);
        assert_eq!(monitors[1].id, MonitorId(2));
        assert_eq!(monitors[1].dpi.x, 144.0);
        assert_eq!(monitors[1].work_area.height, 1580);
    }

    #[test]
    fn test_swap_and_rescale() {
        let displays = StaticDisplays::single();
        assert!(displays.set_scale(MonitorId(1), 1.25));
        assert!(!displays.set_scale(MonitorId(9), 2.0));
        assert_eq!(displays.enumerate().unwrap()[0].scale(), 1.25);

        displays.set_layout(&[]);
        assert!(displays.enumerate().unwrap().is_empty());
    }
}
