//! Control-process configuration.
//!
//! One TOML document configures the transport, the proxies, the monitor
//! manager and how the render host is launched. Every section is optional
//! and falls back to its defaults.

use serde::{Deserialize, Serialize};
use skylight_display::MonitorConfig;
use skylight_ipc::{EndpointNames, TransportConfig};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Backend proxy tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Deadline for every asynchronous operation
    pub default_timeout_ms: u64,
    /// Minimum spacing between performance callback invocations
    pub performance_interval_ms: u64,
    /// How often the sweeper looks for overdue operations
    pub sweep_interval_ms: u64,
}

impl ProxyConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn performance_interval(&self) -> Duration {
        Duration::from_millis(self.performance_interval_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 5000,
            performance_interval_ms: 1000,
            sweep_interval_ms: 10,
        }
    }
}

/// When the supervisor relaunches an exited render host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestartPolicy {
    #[default]
    Never,
    /// Only after a non-zero exit
    OnCrash,
    Always,
    /// After a non-zero exit, waiting longer after each attempt
    ExponentialBackoff,
}

/// Render host process launch settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LaunchConfig {
    pub executable: Option<PathBuf>,
    /// Passed before the endpoint arguments
    pub extra_args: Vec<String>,
    pub restart_policy: RestartPolicy,
    pub max_restart_attempts: u32,
    pub restart_delay_ms: u64,
    pub max_restart_delay_ms: u64,
    /// How often the child is checked for exit
    pub liveness_poll_ms: u64,
}

impl LaunchConfig {
    /// Delay before restart attempt `attempt` (0-based).
    pub fn restart_delay(&self, attempt: u32) -> Duration {
        let base = self.restart_delay_ms;
        let delay = match self.restart_policy {
            RestartPolicy::ExponentialBackoff => base
                .saturating_mul(1u64.checked_shl(attempt).unwrap_or(u64::MAX))
                .min(self.max_restart_delay_ms),
            _ => base,
        };
        Duration::from_millis(delay)
    }

    pub fn liveness_poll(&self) -> Duration {
        Duration::from_millis(self.liveness_poll_ms)
    }
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            executable: None,
            extra_args: Vec::new(),
            restart_policy: RestartPolicy::Never,
            max_restart_attempts: 5,
            restart_delay_ms: 1000,
            max_restart_delay_ms: 30_000,
            liveness_poll_ms: 1000,
        }
    }
}

/// Complete control-process configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SkylightConfig {
    pub endpoints: EndpointNames,
    pub transport: TransportConfig,
    pub proxy: ProxyConfig,
    pub monitor: MonitorConfig,
    pub launch: LaunchConfig,
}

impl SkylightConfig {
    /// Load from TOML file
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        Self::from_toml(&content)
    }

    /// Load from TOML string and validate
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        let names = &self.endpoints;
        if names.control_pipe.is_empty() || names.shared_memory.is_empty() {
            return invalid("endpoint names must not be empty");
        }
        if names.control_pipe == names.shared_memory {
            return invalid("control and bulk endpoint names must differ");
        }

        let transport = &self.transport;
        if transport.send_queue_capacity == 0 {
            return invalid("transport.send_queue_capacity must be positive");
        }
        if transport.max_frame_bytes == 0 {
            return invalid("transport.max_frame_bytes must be positive");
        }
        if transport.bulk_threshold > transport.max_frame_bytes {
            return invalid("transport.bulk_threshold exceeds max_frame_bytes");
        }
        if transport.probe_timeout_ms == 0 || transport.connect_timeout_ms == 0 {
            return invalid("transport timeouts must be positive");
        }

        if self.proxy.default_timeout_ms == 0 {
            return invalid("proxy.default_timeout_ms must be positive");
        }
        if self.proxy.sweep_interval_ms == 0 {
            return invalid("proxy.sweep_interval_ms must be positive");
        }

        if self.monitor.change_detection_delay_ms == 0 && self.monitor.change_detection_enabled {
            return invalid("monitor.change_detection_delay_ms must be positive");
        }

        if self.launch.liveness_poll_ms == 0 {
            return invalid("launch.liveness_poll_ms must be positive");
        }
        if self.launch.restart_delay_ms > self.launch.max_restart_delay_ms {
            return invalid("launch.restart_delay_ms exceeds max_restart_delay_ms");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_validate() {
        let config = SkylightConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.proxy.default_timeout(), Duration::from_secs(5));
        assert_eq!(config.endpoints.control_pipe, "SkylightRenderPipe");
        assert_eq!(config.launch.restart_policy, RestartPolicy::Never);
    }

    #[test]
    fn test_partial_toml() {
        let config = SkylightConfig::from_toml(
            r#"
            [proxy]
            default_timeout_ms = 2500

            [launch]
            executable = "/opt/skylight/skylight-host"
            restart_policy = "exponential_backoff"
            "#,
        )
        .unwrap();
        assert_eq!(config.proxy.default_timeout_ms, 2500);
        assert_eq!(config.proxy.performance_interval_ms, 1000);
        assert_eq!(config.launch.restart_policy, RestartPolicy::ExponentialBackoff);
        assert_eq!(config.transport, TransportConfig::default());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = SkylightConfig::from_toml(
            r#"
            [endpoints]
            control_pipe = "same"
            shared_memory = "same"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = SkylightConfig::from_toml("[proxy]\ndefault_timeout_ms = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = SkylightConfig::from_toml("proxy = 3").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_backoff_delays() {
        let launch = LaunchConfig {
            restart_policy: RestartPolicy::ExponentialBackoff,
            ..LaunchConfig::default()
        };
        assert_eq!(launch.restart_delay(0), Duration::from_millis(1000));
        assert_eq!(launch.restart_delay(3), Duration::from_millis(8000));
        assert_eq!(launch.restart_delay(10), Duration::from_millis(30_000));
        assert_eq!(launch.restart_delay(80), Duration::from_millis(30_000));

        let fixed = LaunchConfig::default();
        assert_eq!(fixed.restart_delay(4), Duration::from_millis(1000));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[monitor]\nchange_detection_delay_ms = 250").unwrap();
        let config = SkylightConfig::from_toml_file(file.path()).unwrap();
        assert_eq!(config.monitor.change_detection_delay_ms, 250);

        let missing = SkylightConfig::from_toml_file(Path::new("/nonexistent/skylight.toml"));
        assert!(matches!(missing, Err(ConfigError::Io(_))));
    }
}
