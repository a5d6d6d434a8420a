//! Render host process supervisor.
//!
//! Launches the render host with the endpoint names on its command line,
//! watches it from a monitor thread and reports liveness changes. A
//! relaunch gives a fresh process; proxies that faulted with the old one
//! stay faulted.

use crate::config::{LaunchConfig, RestartPolicy};
use crate::error::SupervisorError;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use skylight_ipc::EndpointNames;
use std::process::{Child, Command, ExitStatus};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Called with `false` when the render host exits and `true` when it is
/// (re)launched.
pub type LivenessCallback = Arc<dyn Fn(bool) + Send + Sync>;

struct Running {
    child: Child,
    started: Instant,
}

struct Shared {
    config: LaunchConfig,
    names: EndpointNames,
    process: Mutex<Option<Running>>,
    liveness: RwLock<Option<LivenessCallback>>,
    restarts: AtomicU32,
    stopping: AtomicBool,
}

struct Monitor {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

pub struct RenderProcessSupervisor {
    shared: Arc<Shared>,
    monitor: Mutex<Option<Monitor>>,
}

impl RenderProcessSupervisor {
    pub fn new(config: LaunchConfig, names: EndpointNames) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                names,
                process: Mutex::new(None),
                liveness: RwLock::new(None),
                restarts: AtomicU32::new(0),
                stopping: AtomicBool::new(false),
            }),
            monitor: Mutex::new(None),
        }
    }

    fn monitor(&self) -> MutexGuard<'_, Option<Monitor>> {
        self.monitor.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the liveness callback.
    pub fn on_liveness(&self, callback: impl Fn(bool) + Send + Sync + 'static) {
        *self
            .shared
            .liveness
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(callback));
    }

    /// Start the render host and its monitor thread. Returns the process id.
    pub fn launch(&self) -> Result<u32, SupervisorError> {
        if self.is_running() {
            return Err(SupervisorError::AlreadyRunning);
        }
        self.stop_monitor();
        self.shared.stopping.store(false, Ordering::SeqCst);
        self.shared.restarts.store(0, Ordering::SeqCst);

        let pid = self.shared.spawn()?;

        let (stop, stop_rx) = bounded::<()>(0);
        let shared = self.shared.clone();
        let handle = thread::Builder::new()
            .name("render-host-monitor".to_string())
            .spawn(move || {
                debug!("Render host monitor started");
                shared.watch(stop_rx);
                debug!("Render host monitor stopped");
            })?;
        *self.monitor() = Some(Monitor { stop, handle });
        Ok(pid)
    }

    /// Kill the render host and wait for it. No liveness event is raised.
    pub fn terminate(&self) -> Result<(), SupervisorError> {
        self.shared.stopping.store(true, Ordering::SeqCst);
        self.stop_monitor();

        let running = self.shared.process().take();
        let Some(mut running) = running else {
            return Err(SupervisorError::NotRunning);
        };
        if let Err(e) = running.child.kill() {
            debug!("Render host already gone: {}", e);
        }
        let status = running.child.wait()?;
        info!("Render host {} terminated ({})", running.child.id(), status);
        Ok(())
    }

    fn stop_monitor(&self) {
        let monitor = self.monitor().take();
        if let Some(Monitor { stop, handle }) = monitor {
            drop(stop);
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }

    pub fn is_running(&self) -> bool {
        let mut process = self.shared.process();
        match process.as_mut() {
            Some(running) => matches!(running.child.try_wait(), Ok(None)),
            None => false,
        }
    }

    pub fn process_id(&self) -> Option<u32> {
        self.shared.process().as_ref().map(|r| r.child.id())
    }

    /// Time since the current process was launched.
    pub fn uptime(&self) -> Option<Duration> {
        self.shared.process().as_ref().map(|r| r.started.elapsed())
    }

    /// Relaunches since the last explicit `launch`.
    pub fn restart_count(&self) -> u32 {
        self.shared.restarts.load(Ordering::Relaxed)
    }
}

impl Drop for RenderProcessSupervisor {
    fn drop(&mut self) {
        if self.shared.process().is_some() {
            let _ = self.terminate();
        } else {
            self.stop_monitor();
        }
    }
}

impl Shared {
    fn process(&self) -> MutexGuard<'_, Option<Running>> {
        self.process.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn spawn(&self) -> Result<u32, SupervisorError> {
        let path = self
            .config
            .executable
            .as_ref()
            .ok_or(SupervisorError::NotConfigured)?;

        let child = Command::new(path)
            .args(&self.config.extra_args)
            .arg(format!("--named-pipe={}", self.names.control_pipe))
            .arg(format!("--shared-memory={}", self.names.shared_memory))
            .spawn()
            .map_err(|source| SupervisorError::Spawn {
                path: path.display().to_string(),
                source,
            })?;

        let pid = child.id();
        info!("Launched render host {} ({})", path.display(), pid);
        *self.process() = Some(Running {
            child,
            started: Instant::now(),
        });
        Ok(pid)
    }

    fn notify(&self, alive: bool) {
        let callback = self
            .liveness
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(callback) = callback {
            callback(alive);
        }
    }

    /// Exit status of the child if it has exited.
    fn poll_exit(&self) -> Option<ExitStatus> {
        let mut process = self.process();
        let running = process.as_mut()?;
        match running.child.try_wait() {
            Ok(Some(status)) => {
                process.take();
                Some(status)
            }
            Ok(None) => None,
            Err(e) => {
                warn!("Failed to poll render host: {}", e);
                None
            }
        }
    }

    fn should_restart(&self, status: &ExitStatus) -> bool {
        let crashed = !status.success();
        match self.config.restart_policy {
            RestartPolicy::Never => false,
            RestartPolicy::Always => true,
            RestartPolicy::OnCrash | RestartPolicy::ExponentialBackoff => crashed,
        }
    }

    fn watch(&self, stop: Receiver<()>) {
        let poll = self.config.liveness_poll();
        loop {
            match stop.recv_timeout(poll) {
                Err(RecvTimeoutError::Timeout) => {}
                _ => return,
            }
            if self.stopping.load(Ordering::SeqCst) {
                return;
            }
            let Some(status) = self.poll_exit() else {
                continue;
            };

            if status.success() {
                info!("Render host exited ({})", status);
            } else {
                error!("Render host crashed ({})", status);
            }
            self.notify(false);

            if !self.should_restart(&status) {
                return;
            }
            let attempt = self.restarts.load(Ordering::SeqCst);
            if attempt >= self.config.max_restart_attempts {
                error!("Giving up on render host after {} restart(s)", attempt);
                return;
            }

            let delay = self.config.restart_delay(attempt);
            info!("Restarting render host in {:?} (attempt {})", delay, attempt + 1);
            match stop.recv_timeout(delay) {
                Err(RecvTimeoutError::Timeout) => {}
                _ => return,
            }
            self.restarts.fetch_add(1, Ordering::SeqCst);
            match self.spawn() {
                Ok(_) => self.notify(true),
                Err(e) => {
                    error!("Render host restart failed: {}", e);
                    return;
                }
            }
        }
    }
}
