//! Fault reporting hook.
//!
//! When a proxy faults, the connection hands a report to the installed
//! sink. Sinks are fire-and-forget: they run on the thread that observed
//! the fault and their outcome is ignored.

use crate::proxy::{ProxyState, ProxyStats};
use serde::Serialize;
use skylight_protocol::{RenderBackendType, WidgetId};
use tracing::error;

#[derive(Debug, Clone, Serialize)]
pub struct FaultReport {
    pub widget_id: WidgetId,
    /// State before the fault
    pub previous_state: ProxyState,
    pub backend: RenderBackendType,
    pub reason: String,
    /// Operations failed by the fault
    pub pending_failed: usize,
    pub stats: ProxyStats,
    pub timestamp: u64,
}

pub trait DiagnosticsSink: Send + Sync {
    fn capture(&self, report: &FaultReport);
}

/// Writes fault reports to the log.
#[derive(Debug, Default)]
pub struct TracingDiagnostics;

impl DiagnosticsSink for TracingDiagnostics {
    fn capture(&self, report: &FaultReport) {
        let json = serde_json::to_string(report).unwrap_or_default();
        error!("Render proxy fault on {}: {} {}", report.widget_id, report.reason, json);
    }
}
