//! Process resource sampling for performance reports.

use sysinfo::{Pid, ProcessRefreshKind, System};

const MB: u64 = 1024 * 1024;

/// One reading of this process.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProcessSample {
    pub memory_mb: u64,
    pub cpu_percent: f32,
}

/// Samples memory and CPU of the current process.
///
/// CPU usage is relative to the previous call, so the first sample
/// reports zero.
pub struct ProcessSampler {
    system: System,
    pid: Pid,
}

impl ProcessSampler {
    pub fn new() -> Self {
        Self {
            system: System::new(),
            pid: Pid::from_u32(std::process::id()),
        }
    }

    pub fn sample(&mut self) -> ProcessSample {
        self.system.refresh_processes_specifics(
            sysinfo::ProcessesToUpdate::Some(&[self.pid]),
            true,
            ProcessRefreshKind::everything(),
        );
        self.system
            .process(self.pid)
            .map(|p| ProcessSample {
                memory_mb: p.memory() / MB,
                cpu_percent: p.cpu_usage(),
            })
            .unwrap_or_default()
    }
}

impl Default for ProcessSampler {
    fn default() -> Self {
        Self::new()
    }
}
