//! Monitor layout classification.

use serde::Serialize;
use skylight_protocol::{MonitorInfo, PixelRect};
use std::fmt;

/// How the attached monitors are laid out on the desktop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum MonitorArrangement {
    Single,
    HorizontalDual,
    VerticalDual,
    MultipleHorizontal,
    MultipleVertical,
    Mixed,
    Unknown,
}

impl MonitorArrangement {
    /// Classify a monitor set from its bounds alone.
    pub fn classify(monitors: &[MonitorInfo]) -> Self {
        let bounds: Vec<PixelRect> = monitors.iter().map(|m| m.bounds).collect();
        Self::classify_bounds(&bounds)
    }

    pub fn classify_bounds(bounds: &[PixelRect]) -> Self {
        match bounds.len() {
            0 => Self::Unknown,
            1 => Self::Single,
            2 if side_by_side(&bounds[0], &bounds[1]) => Self::HorizontalDual,
            2 if stacked(&bounds[0], &bounds[1]) => Self::VerticalDual,
            2 => Self::Mixed,
            _ if is_row(bounds) => Self::MultipleHorizontal,
            _ if is_column(bounds) => Self::MultipleVertical,
            _ => Self::Mixed,
        }
    }

    pub fn is_horizontal(&self) -> bool {
        matches!(self, Self::HorizontalDual | Self::MultipleHorizontal)
    }

    pub fn is_vertical(&self) -> bool {
        matches!(self, Self::VerticalDual | Self::MultipleVertical)
    }
}

impl fmt::Display for MonitorArrangement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

fn ranges_overlap(a_start: i32, a_end: i32, b_start: i32, b_end: i32) -> bool {
    a_start < b_end && b_start < a_end
}

/// Disjoint horizontally, sharing some vertical span.
fn side_by_side(a: &PixelRect, b: &PixelRect) -> bool {
    !ranges_overlap(a.x, a.right(), b.x, b.right()) && ranges_overlap(a.y, a.bottom(), b.y, b.bottom())
}

/// Disjoint vertically, sharing some horizontal span.
fn stacked(a: &PixelRect, b: &PixelRect) -> bool {
    !ranges_overlap(a.y, a.bottom(), b.y, b.bottom()) && ranges_overlap(a.x, a.right(), b.x, b.right())
}

fn is_row(bounds: &[PixelRect]) -> bool {
    let mut sorted = bounds.to_vec();
    sorted.sort_by_key(|r| r.x);
    sorted.windows(2).all(|w| side_by_side(&w[0], &w[1]))
        && sorted
            .iter()
            .all(|r| ranges_overlap(r.y, r.bottom(), sorted[0].y, sorted[0].bottom()))
}

fn is_column(bounds: &[PixelRect]) -> bool {
    let mut sorted = bounds.to_vec();
    sorted.sort_by_key(|r| r.y);
    sorted.windows(2).all(|w| stacked(&w[0], &w[1]))
        && sorted
            .iter()
            .all(|r| ranges_overlap(r.x, r.right(), sorted[0].x, sorted[0].right()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(x: i32, y: i32, w: i32, h: i32) -> PixelRect {
        PixelRect::new(x, y, w, h)
    }

    #[test]
    fn test_trivial_sets() {
        assert_eq!(MonitorArrangement::classify_bounds(&[]), MonitorArrangement::Unknown);
        assert_eq!(
            MonitorArrangement::classify_bounds(&[r(0, 0, 1920, 1080)]),
            MonitorArrangement::Single
        );
    }

    #[test]
    fn test_dual_layouts() {
        let horizontal = [r(0, 0, 1920, 1080), r(1920, 0, 2560, 1440)];
        assert_eq!(
            MonitorArrangement::classify_bounds(&horizontal),
            MonitorArrangement::HorizontalDual
        );

        let left_of_primary = [r(0, 0, 1920, 1080), r(-1280, 200, 1280, 1024)];
        assert_eq!(
            MonitorArrangement::classify_bounds(&left_of_primary),
            MonitorArrangement::HorizontalDual
        );

        let vertical = [r(0, 0, 1920, 1080), r(0, -1080, 1920, 1080)];
        assert_eq!(
            MonitorArrangement::classify_bounds(&vertical),
            MonitorArrangement::VerticalDual
        );

        let diagonal = [r(0, 0, 1920, 1080), r(1920, 1080, 1920, 1080)];
        assert_eq!(
            MonitorArrangement::classify_bounds(&diagonal),
            MonitorArrangement::Mixed
        );
    }

    #[test]
    fn test_multiple_layouts() {
        let row = [r(1920, 0, 1920, 1080), r(0, 0, 1920, 1080), r(3840, 0, 1920, 1080)];
        assert_eq!(
            MonitorArrangement::classify_bounds(&row),
            MonitorArrangement::MultipleHorizontal
        );

        let column = [r(0, 0, 1920, 1080), r(0, 1080, 1920, 1080), r(0, 2160, 1920, 1080)];
        assert_eq!(
            MonitorArrangement::classify_bounds(&column),
            MonitorArrangement::MultipleVertical
        );

        let l_shape = [r(0, 0, 1920, 1080), r(1920, 0, 1920, 1080), r(0, 1080, 1920, 1080)];
        assert_eq!(
            MonitorArrangement::classify_bounds(&l_shape),
            MonitorArrangement::Mixed
        );
    }
}
