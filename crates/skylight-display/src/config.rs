//! Monitor manager configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// React to display-change notifications
    pub change_detection_enabled: bool,
    /// Quiet period before a burst of notifications triggers one refresh
    pub change_detection_delay_ms: u64,
    /// Report each monitor's own DPI rather than the primary's
    pub per_monitor_dpi: bool,
    /// Log the monitor set after every refresh that changed it
    pub log_changes: bool,
}

impl MonitorConfig {
    pub fn change_detection_delay(&self) -> Duration {
        Duration::from_millis(self.change_detection_delay_ms)
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            change_detection_enabled: true,
            change_detection_delay_ms: 500,
            per_monitor_dpi: true,
            log_changes: true,
        }
    }
}
