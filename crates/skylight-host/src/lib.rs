//! Skylight Render Host
//!
//! Render process side of the Skylight protocol: accepts one control
//! process connection and executes its commands on a worker thread.

pub mod backend;
pub mod host;
pub mod sampler;

pub use backend::{NullBackend, RenderBackend};
pub use host::{HostConfig, HostStats, RenderHost};
pub use sampler::{ProcessSample, ProcessSampler};
