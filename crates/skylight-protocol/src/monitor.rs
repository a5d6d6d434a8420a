//! Display description snapshot.

use crate::geometry::{Dpi, PixelRect};
use crate::ids::MonitorId;
use serde::{Deserialize, Serialize};

/// Immutable description of one display at the time of a refresh.
///
/// Bounds are in physical desktop pixels; the logical view is derived from
/// the DPI on demand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorInfo {
    pub id: MonitorId,
    pub device_name: String,
    /// Full display area
    pub bounds: PixelRect,
    /// Display area minus task bars and docked toolbars
    pub work_area: PixelRect,
    pub dpi: Dpi,
    pub refresh_rate_hz: u32,
    pub bit_depth: u32,
    pub is_primary: bool,
    pub hdr_supported: bool,
    pub touch_supported: bool,
}

impl MonitorInfo {
    pub fn scale(&self) -> f32 {
        self.dpi.scale()
    }

    /// Bounds in logical (96 DPI) units.
    pub fn logical_bounds(&self) -> PixelRect {
        self.dpi.physical_rect_to_logical(&self.bounds)
    }

    pub fn logical_work_area(&self) -> PixelRect {
        self.dpi.physical_rect_to_logical(&self.work_area)
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        self.bounds.contains(x, y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logical_bounds() {
        let info = MonitorInfo {
            id: MonitorId(1),
            device_name: "\\\\.\\DISPLAY2".into(),
            bounds: PixelRect::new(1920, 0, 3840, 2160),
            work_area: PixelRect::new(1920, 0, 3840, 2100),
            dpi: Dpi::from_scale(2.0),
            refresh_rate_hz: 144,
            bit_depth: 10,
            is_primary: false,
            hdr_supported: true,
            touch_supported: false,
        };
        assert_eq!(info.scale(), 2.0);
        assert_eq!(info.logical_bounds(), PixelRect::new(960, 0, 1920, 1080));
        assert!(info.contains(1920, 0));
        assert!(!info.contains(0, 0));
    }
}
