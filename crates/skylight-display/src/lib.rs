//! Skylight Display Management
//!
//! Multi-monitor and DPI awareness for widget surfaces:
//! - Monitor snapshots replaced atomically on refresh
//! - Layout classification and placement within a monitor's work area
//! - Debounced display-change detection
//! - Native window access behind a trait, with an in-memory implementation
//!   and a winit-backed one behind the `winit` feature

pub mod arrangement;
pub mod config;
pub mod error;
pub mod manager;
pub mod native;
pub mod provider;
#[cfg(feature = "winit")]
pub mod windowing;

pub use arrangement::MonitorArrangement;
pub use config::MonitorConfig;
pub use error::DisplayError;
pub use manager::{
    DpiChangeCallback, MonitorChangeCallback, MonitorManager, MonitorSnapshot, MonitorStats,
    ScaleDirection,
};
pub use native::{HeadlessWindows, NativeWindows, WindowState};
pub use provider::{monitor, DisplayProvider, StaticDisplays};
#[cfg(feature = "winit")]
pub use windowing::{WinitDisplays, WinitWindows};
