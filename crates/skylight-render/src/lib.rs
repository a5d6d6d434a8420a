//! Skylight Render Core
//!
//! Control-process side of widget rendering:
//! - [`Connection`] routes one render host connection to per-widget proxies
//! - [`BackendProxy`] turns render commands into futures with timeouts
//! - [`RenderSurface`] owns placement and visual state of a widget window
//! - [`RenderProcessSupervisor`] launches and watches the render host
//!
//! Monitor and DPI handling live in `skylight-display`; the wire format
//! and transport in `skylight-protocol` and `skylight-ipc`.

pub mod config;
pub mod connection;
pub mod diagnostics;
pub mod error;
pub mod pending;
pub mod proxy;
pub mod supervisor;
pub mod surface;

pub use config::{ConfigError, LaunchConfig, ProxyConfig, RestartPolicy, SkylightConfig};
pub use connection::Connection;
pub use diagnostics::{DiagnosticsSink, FaultReport, TracingDiagnostics};
pub use error::{ProxyError, SupervisorError, SurfaceError};
pub use pending::PendingResult;
pub use proxy::{BackendProxy, PerformanceCallback, ProxyErrorCallback, ProxyState, ProxyStats};
pub use supervisor::{LivenessCallback, RenderProcessSupervisor};
pub use surface::{RenderSurface, ResizeCallback, SurfaceDpiCallback, VisibilityCallback};
