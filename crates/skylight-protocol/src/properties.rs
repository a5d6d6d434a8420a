//! Compositing properties of a widget surface.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// RGBA color
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl RenderColor {
    pub const TRANSPARENT: RenderColor = RenderColor::rgba(0, 0, 0, 0);

    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub fn to_u32(&self) -> u32 {
        u32::from_be_bytes([self.r, self.g, self.b, self.a])
    }

    pub fn from_u32(value: u32) -> Self {
        let [r, g, b, a] = value.to_be_bytes();
        Self { r, g, b, a }
    }
}

impl Default for RenderColor {
    fn default() -> Self {
        Self::rgba(0, 0, 0, 255)
    }
}

/// Property validation errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PropertiesError {
    #[error("opacity {0} outside 0.0..=1.0")]
    Opacity(f32),

    #[error("target frame rate {0} outside 1..=240")]
    FrameRate(u32),

    #[error("scale ({0}, {1}) must be positive")]
    Scale(f32, f32),

    #[error("blur radius {0} must not be negative")]
    BlurRadius(f32),
}

/// How a surface is composited, independent of its content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderProperties {
    pub opacity: f32,
    pub visible: bool,
    pub click_through: bool,
    pub topmost: bool,
    pub background_color: RenderColor,
    pub z_order: i32,
    pub enable_animations: bool,
    pub target_fps: u32,
    pub enable_vsync: bool,

    pub scale_x: f32,
    pub scale_y: f32,
    /// Rotation in degrees
    pub rotation: f32,
    pub enable_blur: bool,
    pub blur_radius: f32,
    pub enable_shadow: bool,
    pub shadow_color: RenderColor,
    pub shadow_offset_x: i32,
    pub shadow_offset_y: i32,
}

impl RenderProperties {
    pub fn validate(&self) -> Result<(), PropertiesError> {
        if !(0.0..=1.0).contains(&self.opacity) {
            return Err(PropertiesError::Opacity(self.opacity));
        }
        if !(1..=240).contains(&self.target_fps) {
            return Err(PropertiesError::FrameRate(self.target_fps));
        }
        if !(self.scale_x > 0.0 && self.scale_y > 0.0) {
            return Err(PropertiesError::Scale(self.scale_x, self.scale_y));
        }
        if self.blur_radius < 0.0 || self.blur_radius.is_nan() {
            return Err(PropertiesError::BlurRadius(self.blur_radius));
        }
        Ok(())
    }
}

impl Default for RenderProperties {
    fn default() -> Self {
        Self {
            opacity: 1.0,
            visible: true,
            click_through: false,
            topmost: false,
            background_color: RenderColor::TRANSPARENT,
            z_order: 0,
            enable_animations: true,
            target_fps: 60,
            enable_vsync: true,
            scale_x: 1.0,
            scale_y: 1.0,
            rotation: 0.0,
            enable_blur: false,
            blur_radius: 0.0,
            enable_shadow: false,
            shadow_color: RenderColor::rgba(0, 0, 0, 128),
            shadow_offset_x: 2,
            shadow_offset_y: 2,
        }
    }
}
