//! Geometry with explicit DPI scale.
//!
//! Logical coordinates are device independent (96 DPI = 1.0 scale).
//! Physical pixels are always derived from a logical rectangle and the
//! scale it was computed under; they are never stored next to it.

use serde::{Deserialize, Serialize};

/// DPI that corresponds to a scale factor of 1.0.
pub const BASE_DPI: f32 = 96.0;

/// Integer rectangle in one coordinate space (physical desktop pixels
/// unless stated otherwise).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct PixelRect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl PixelRect {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self { x, y, width, height }
    }

    pub fn right(&self) -> i32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> i32 {
        self.y + self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    /// Half-open containment: the right and bottom edges belong to the
    /// neighbouring rectangle.
    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.x && x < self.right() && y >= self.y && y < self.bottom()
    }

    pub fn intersection(&self, other: &PixelRect) -> Option<PixelRect> {
        let left = self.x.max(other.x);
        let top = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        if right > left && bottom > top {
            Some(PixelRect::new(left, top, right - left, bottom - top))
        } else {
            None
        }
    }

    /// Area shared with `other`, zero when disjoint.
    pub fn overlap_area(&self, other: &PixelRect) -> i64 {
        self.intersection(other)
            .map(|r| r.width as i64 * r.height as i64)
            .unwrap_or(0)
    }

    /// Smallest rectangle containing both.
    pub fn union(&self, other: &PixelRect) -> PixelRect {
        let left = self.x.min(other.x);
        let top = self.y.min(other.y);
        let right = self.right().max(other.right());
        let bottom = self.bottom().max(other.bottom());
        PixelRect::new(left, top, right - left, bottom - top)
    }

    pub fn center(&self) -> (i32, i32) {
        (self.x + self.width / 2, self.y + self.height / 2)
    }

    pub fn translated(&self, dx: i32, dy: i32) -> PixelRect {
        PixelRect::new(self.x + dx, self.y + dy, self.width, self.height)
    }
}

/// Horizontal and vertical DPI of a display.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Dpi {
    pub x: f32,
    pub y: f32,
}

impl Dpi {
    /// 96 DPI, a 100% scale.
    pub const STANDARD: Dpi = Dpi { x: BASE_DPI, y: BASE_DPI };

    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Same DPI on both axes.
    pub fn uniform(dpi: f32) -> Self {
        Self { x: dpi, y: dpi }
    }

    /// DPI for a scale factor (1.5 -> 144 DPI).
    pub fn from_scale(scale: f32) -> Self {
        Self::uniform(scale * BASE_DPI)
    }

    /// Horizontal scale factor relative to 96 DPI.
    pub fn scale(&self) -> f32 {
        self.x / BASE_DPI
    }

    pub fn scale_y(&self) -> f32 {
        self.y / BASE_DPI
    }

    /// A DPI is usable when both axes are finite and positive.
    pub fn is_valid(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.x > 0.0 && self.y > 0.0
    }

    pub fn logical_to_physical(&self, logical: i32) -> i32 {
        scale_value(logical, self.scale())
    }

    pub fn physical_to_logical(&self, physical: i32) -> i32 {
        scale_value(physical, 1.0 / self.scale())
    }

    pub fn logical_rect_to_physical(&self, rect: &PixelRect) -> PixelRect {
        scale_rect(rect, self.scale(), self.scale_y())
    }

    pub fn physical_rect_to_logical(&self, rect: &PixelRect) -> PixelRect {
        scale_rect(rect, 1.0 / self.scale(), 1.0 / self.scale_y())
    }
}

impl Default for Dpi {
    fn default() -> Self {
        Self::STANDARD
    }
}

fn scale_value(value: i32, factor: f32) -> i32 {
    (value as f64 * factor as f64).round() as i32
}

fn scale_rect(rect: &PixelRect, fx: f32, fy: f32) -> PixelRect {
    PixelRect::new(
        scale_value(rect.x, fx),
        scale_value(rect.y, fy),
        scale_value(rect.width, fx),
        scale_value(rect.height, fy),
    )
}

/// A logical rectangle together with the DPI scale it was computed under.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RenderRect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    /// Scale factor (1.0 = 96 DPI)
    pub scale: f32,
}

impl RenderRect {
    /// Logical rectangle at 100% scale.
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self { x, y, width, height, scale: 1.0 }
    }

    pub fn with_scale(mut self, scale: f32) -> Self {
        self.scale = scale;
        self
    }

    pub fn from_logical(rect: PixelRect, scale: f32) -> Self {
        Self {
            x: rect.x,
            y: rect.y,
            width: rect.width,
            height: rect.height,
            scale,
        }
    }

    /// Rebuild the logical rectangle from physical pixels at `scale`.
    pub fn from_physical(rect: PixelRect, scale: f32) -> Self {
        let inv = 1.0 / scale;
        Self::from_logical(scale_rect(&rect, inv, inv), scale)
    }

    pub fn logical(&self) -> PixelRect {
        PixelRect::new(self.x, self.y, self.width, self.height)
    }

    /// `round(logical * scale)`, recomputed on every call.
    pub fn physical(&self) -> PixelRect {
        scale_rect(&self.logical(), self.scale, self.scale)
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    pub fn is_valid(&self) -> bool {
        !self.is_empty() && self.scale.is_finite() && self.scale > 0.0
    }
}

impl Default for RenderRect {
    fn default() -> Self {
        Self::new(0, 0, 0, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_physical_is_rounded_product() {
        let rect = RenderRect::new(0, 0, 200, 100).with_scale(1.5);
        assert_eq!(rect.physical(), PixelRect::new(0, 0, 300, 150));

        let odd = RenderRect::new(1, 1, 3, 3).with_scale(1.25);
        assert_eq!(odd.physical(), PixelRect::new(1, 1, 4, 4));
    }

    #[test]
    fn test_from_physical() {
        let rect = RenderRect::from_physical(PixelRect::new(300, 150, 600, 300), 1.5);
        assert_eq!(rect.logical(), PixelRect::new(200, 100, 400, 200));
        assert_eq!(rect.physical(), PixelRect::new(300, 150, 600, 300));
    }

    #[test]
    fn test_pixel_rect_contains_is_half_open() {
        let r = PixelRect::new(0, 0, 10, 10);
        assert!(r.contains(0, 0));
        assert!(r.contains(9, 9));
        assert!(!r.contains(10, 0));
        assert!(!r.contains(-1, 5));
    }

    #[test]
    fn test_intersection_and_union() {
        let a = PixelRect::new(0, 0, 100, 100);
        let b = PixelRect::new(50, 50, 100, 100);
        assert_eq!(a.intersection(&b), Some(PixelRect::new(50, 50, 50, 50)));
        assert_eq!(a.overlap_area(&b), 2500);
        assert_eq!(a.union(&b), PixelRect::new(0, 0, 150, 150));

        let c = PixelRect::new(100, 0, 10, 10);
        assert_eq!(a.intersection(&c), None);
    }

    #[test]
    fn test_dpi_scale() {
        let dpi = Dpi::uniform(144.0);
        assert_eq!(dpi.scale(), 1.5);
        assert_eq!(dpi.logical_to_physical(200), 300);
        assert_eq!(dpi.physical_to_logical(300), 200);
        assert!(!Dpi::uniform(0.0).is_valid());
        assert!(Dpi::STANDARD.is_valid());
    }
}
