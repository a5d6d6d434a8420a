//! Transport configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Well-known names of the two channels, agreed by both processes at startup.
///
/// Renaming either endpoint breaks compatibility with existing render hosts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointNames {
    /// Control/signaling stream
    pub control_pipe: String,
    /// Bulk payload channel
    pub shared_memory: String,
}

impl EndpointNames {
    pub fn new(control_pipe: impl Into<String>, shared_memory: impl Into<String>) -> Self {
        Self {
            control_pipe: control_pipe.into(),
            shared_memory: shared_memory.into(),
        }
    }

    /// Derive a unique pair of names from a suffix, e.g. per test or per session.
    pub fn with_suffix(suffix: &str) -> Self {
        let base = Self::default();
        Self::new(
            format!("{}-{}", base.control_pipe, suffix),
            format!("{}-{}", base.shared_memory, suffix),
        )
    }
}

impl Default for EndpointNames {
    fn default() -> Self {
        Self::new("SkylightRenderPipe", "SkylightRenderSharedMemory")
    }
}

/// Transport tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Outbound messages buffered before `send` reports `QueueFull`
    pub send_queue_capacity: usize,
    /// Largest frame payload accepted in either direction
    pub max_frame_bytes: usize,
    /// Encoded messages above this size travel on the bulk channel
    pub bulk_threshold: usize,
    /// How long `test_connection` waits for the pong
    pub probe_timeout_ms: u64,
    /// How long a listener waits for the second channel of a connection
    pub connect_timeout_ms: u64,
}

impl TransportConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            send_queue_capacity: 256,
            max_frame_bytes: skylight_protocol::MAX_MESSAGE_BYTES,
            bulk_threshold: 64 * 1024,
            probe_timeout_ms: 2000,
            connect_timeout_ms: 2000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_names() {
        let names = EndpointNames::default();
        assert_eq!(names.control_pipe, "SkylightRenderPipe");
        assert_eq!(names.shared_memory, "SkylightRenderSharedMemory");
    }

    #[test]
    fn test_suffixed_names_are_distinct() {
        let a = EndpointNames::with_suffix("a");
        let b = EndpointNames::with_suffix("b");
        assert_ne!(a, b);
        assert_ne!(a.control_pipe, a.shared_memory);
    }

    #[test]
    fn test_defaults() {
        let config = TransportConfig::default();
        assert_eq!(config.max_frame_bytes, 16 * 1024 * 1024);
        assert!(config.bulk_threshold < config.max_frame_bytes);
        assert_eq!(config.probe_timeout(), Duration::from_secs(2));
    }
}
