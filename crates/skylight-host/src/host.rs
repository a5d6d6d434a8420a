//! Render host server loop.
//!
//! Commands arrive on the transport's control reader thread and are
//! forwarded to a single worker thread, which executes them in receipt
//! order and sends exactly one result back for each. A panic while
//! executing a command is caught and reported as a failed result; the
//! host keeps serving.

use crate::backend::{NullBackend, RenderBackend};
use crate::sampler::ProcessSampler;
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use skylight_ipc::{IpcError, Transport, TransportConfig, TransportListener, TransportStats};
use skylight_protocol::{
    CommandId, CommandType, Message, RenderCommand, RenderResult, RenderResultStatus, WidgetId,
};
use std::collections::{HashMap, VecDeque};
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Commands remembered per widget
const HISTORY_LIMIT: usize = 256;

#[derive(Debug, Clone)]
pub struct HostConfig {
    pub transport: TransportConfig,
    /// Interval between performance reports; zero disables them
    pub metrics_interval_ms: u64,
    /// How long a result may wait for room in the send queue
    pub reply_timeout_ms: u64,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            metrics_interval_ms: 1000,
            reply_timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HostStats {
    pub commands_executed: u64,
    pub panics: u64,
    pub metrics_sent: u64,
    pub widgets: usize,
    pub transport: TransportStats,
}

enum WorkItem {
    Command(RenderCommand),
    Shutdown,
}

struct Shared {
    transport: Transport,
    reply_timeout: Duration,
    backend: Mutex<Box<dyn RenderBackend>>,
    history: Mutex<HashMap<WidgetId, VecDeque<(CommandId, CommandType)>>>,
    executed: AtomicU64,
    panics: AtomicU64,
    metrics_sent: AtomicU64,
}

impl Shared {
    fn backend(&self) -> MutexGuard<'_, Box<dyn RenderBackend>> {
        self.backend.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn history(&self) -> MutexGuard<'_, HashMap<WidgetId, VecDeque<(CommandId, CommandType)>>> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, command: &RenderCommand) {
        let mut history = self.history();
        let log = history.entry(command.widget_id).or_default();
        if log.len() == HISTORY_LIMIT {
            log.pop_front();
        }
        log.push_back((command.command_id, command.command_type()));
    }

    fn execute(&self, command: &RenderCommand) -> RenderResult {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.backend().execute(command)));
        self.executed.fetch_add(1, Ordering::Relaxed);

        match outcome {
            Ok(result) => result,
            Err(panic_info) => {
                let error_msg = if let Some(s) = panic_info.downcast_ref::<&str>() {
                    s.to_string()
                } else if let Some(s) = panic_info.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "Unknown panic".to_string()
                };
                self.panics.fetch_add(1, Ordering::Relaxed);
                error!(
                    "{} panicked executing {} {}: {}",
                    command.widget_id,
                    command.command_type(),
                    command.command_id,
                    error_msg
                );
                RenderResult::failure(
                    command.command_id,
                    command.widget_id,
                    RenderResultStatus::Failure,
                    format!("render host panicked: {}", error_msg),
                )
            }
        }
    }

    /// Send a result, waiting for a slow reader instead of dropping it.
    fn reply(&self, result: RenderResult) {
        let (id, widget) = (result.command_id, result.widget_id);
        let sent = match self.send_result(result) {
            Err(IpcError::MessageTooLarge { len, max }) => {
                self.send_result(RenderResult::failure(
                    id,
                    widget,
                    RenderResultStatus::Failure,
                    format!("result of {} bytes exceeds {} byte frame limit", len, max),
                ))
            }
            other => other,
        };
        if let Err(e) = sent {
            warn!("Dropping result for {}: {}", id, e);
        }
    }

    fn send_result(&self, result: RenderResult) -> Result<(), IpcError> {
        self.transport
            .send_timeout(&Message::Result(result), self.reply_timeout)
    }

    fn report_metrics(&self, sampler: &mut ProcessSampler) {
        if !self.transport.is_connected() {
            return;
        }
        let widgets = self.backend().metrics();
        if widgets.is_empty() {
            return;
        }
        let sample = sampler.sample();
        for (widget_id, mut metrics) in widgets {
            metrics.memory_usage_mb = sample.memory_mb;
            metrics.cpu_usage_percent = sample.cpu_percent;
            match self.transport.send(&Message::Metrics { widget_id, metrics }) {
                Ok(()) => {
                    self.metrics_sent.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => debug!("Metrics for {} not sent: {}", widget_id, e),
            }
        }
    }
}

struct MetricsThread {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

/// Render side of one control-process connection.
pub struct RenderHost {
    shared: Arc<Shared>,
    work: Sender<WorkItem>,
    disconnected: Receiver<IpcError>,
    worker: Mutex<Option<JoinHandle<()>>>,
    metrics: Mutex<Option<MetricsThread>>,
}

impl RenderHost {
    /// Host backed by the [`NullBackend`].
    pub fn new(config: HostConfig) -> io::Result<Self> {
        Self::with_backend(config, Box::new(NullBackend::default()))
    }

    pub fn with_backend(config: HostConfig, backend: Box<dyn RenderBackend>) -> io::Result<Self> {
        let transport = Transport::new(config.transport.clone());
        let (work, work_rx) = unbounded();
        let (disconnect_tx, disconnected) = bounded(1);

        let forward = work.clone();
        transport.on_message(move |message| match message {
            Message::Command(command) => {
                let _ = forward.send(WorkItem::Command(command));
            }
            other => warn!("Unexpected {:?} message from control process", other.kind()),
        });
        transport.on_error(move |err| {
            let _ = disconnect_tx.try_send(err);
        });

        let shared = Arc::new(Shared {
            transport,
            reply_timeout: Duration::from_millis(config.reply_timeout_ms),
            backend: Mutex::new(backend),
            history: Mutex::new(HashMap::new()),
            executed: AtomicU64::new(0),
            panics: AtomicU64::new(0),
            metrics_sent: AtomicU64::new(0),
        });

        let worker = {
            let shared = shared.clone();
            thread::Builder::new()
                .name("render-worker".to_string())
                .spawn(move || {
                    info!("Render worker started");
                    run_worker_loop(&shared, work_rx);
                    info!("Render worker stopped");
                })?
        };

        let metrics = if config.metrics_interval_ms > 0 {
            let interval = Duration::from_millis(config.metrics_interval_ms);
            let (stop, stop_rx) = bounded::<()>(0);
            let shared = shared.clone();
            let handle = thread::Builder::new()
                .name("render-metrics".to_string())
                .spawn(move || run_metrics_loop(&shared, stop_rx, interval))?;
            Some(MetricsThread { stop, handle })
        } else {
            None
        };

        Ok(Self {
            shared,
            work,
            disconnected,
            worker: Mutex::new(Some(worker)),
            metrics: Mutex::new(metrics),
        })
    }

    pub fn transport(&self) -> &Transport {
        &self.shared.transport
    }

    /// Wait up to `timeout` for the control process to connect.
    pub fn accept(&self, listener: &TransportListener, timeout: Duration) -> Result<bool, IpcError> {
        listener.accept(&self.shared.transport, timeout)
    }

    /// Block until the connection breaks. Returns the transport error, or
    /// `None` if `timeout` passed first or the host was shut down.
    pub fn wait_for_disconnect(&self, timeout: Option<Duration>) -> Option<IpcError> {
        match timeout {
            Some(timeout) => self.disconnected.recv_timeout(timeout).ok(),
            None => self.disconnected.recv().ok(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.shared.transport.is_connected()
    }

    /// Commands received for `widget`, oldest first.
    pub fn received_commands(&self, widget: WidgetId) -> Vec<(CommandId, CommandType)> {
        self.shared
            .history()
            .get(&widget)
            .map(|log| log.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn stats(&self) -> HostStats {
        HostStats {
            commands_executed: self.shared.executed.load(Ordering::Relaxed),
            panics: self.shared.panics.load(Ordering::Relaxed),
            metrics_sent: self.shared.metrics_sent.load(Ordering::Relaxed),
            widgets: self.shared.backend().widget_count(),
            transport: self.shared.transport.stats(),
        }
    }

    /// Close the connection and stop the worker threads.
    pub fn shutdown(&self) {
        self.shared.transport.close();

        if let Some(handle) = self.worker.lock().unwrap_or_else(PoisonError::into_inner).take() {
            let _ = self.work.send(WorkItem::Shutdown);
            let _ = handle.join();
        }
        if let Some(MetricsThread { stop, handle }) =
            self.metrics.lock().unwrap_or_else(PoisonError::into_inner).take()
        {
            drop(stop);
            let _ = handle.join();
        }
    }
}

impl Drop for RenderHost {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker_loop(shared: &Shared, rx: Receiver<WorkItem>) {
    loop {
        let command = match rx.recv() {
            Ok(WorkItem::Command(command)) => command,
            Ok(WorkItem::Shutdown) => {
                debug!("Render worker received shutdown");
                break;
            }
            Err(_) => {
                debug!("Render worker channel closed, shutting down");
                break;
            }
        };

        debug!(
            "Executing {} {} for {}",
            command.command_type(),
            command.command_id,
            command.widget_id
        );
        shared.record(&command);
        let result = shared.execute(&command);
        shared.reply(result);
    }
}

fn run_metrics_loop(shared: &Shared, stop: Receiver<()>, interval: Duration) {
    let mut sampler = ProcessSampler::new();
    loop {
        match stop.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => shared.report_metrics(&mut sampler),
            _ => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skylight_ipc::{EndpointNames, LocalNamespace};
    use skylight_protocol::{CommandPayload, PerformanceMetrics};

    struct PanickingBackend;

    impl RenderBackend for PanickingBackend {
        fn execute(&mut self, command: &RenderCommand) -> RenderResult {
            if command.command_type() == CommandType::Capture {
                panic!("capture exploded");
            }
            RenderResult::success(command.command_id, command.widget_id)
        }

        fn metrics(&mut self) -> Vec<(WidgetId, PerformanceMetrics)> {
            Vec::new()
        }

        fn widget_count(&self) -> usize {
            0
        }
    }

    fn connect(host: &RenderHost, suffix: &str) -> (Transport, Receiver<Message>, TransportListener) {
        let ns = LocalNamespace::new();
        let names = EndpointNames::with_suffix(suffix);
        let listener = TransportListener::bind(&ns, &names, TransportConfig::default()).unwrap();

        let client = Transport::new(TransportConfig::default());
        let (tx, rx) = unbounded();
        client.on_message(move |m| {
            let _ = tx.send(m);
        });
        let connecting = {
            let ns = ns.clone();
            let names = names.clone();
            thread::spawn(move || {
                client.connect(&ns, &names).unwrap();
                client
            })
        };
        assert!(host.accept(&listener, Duration::from_secs(5)).unwrap());
        (connecting.join().unwrap(), rx, listener)
    }

    fn recv_result(rx: &Receiver<Message>) -> RenderResult {
        loop {
            match rx.recv_timeout(Duration::from_secs(5)).unwrap() {
                Message::Result(result) => return result,
                _ => continue,
            }
        }
    }

    #[test]
    fn test_panic_is_reported_and_host_keeps_serving() {
        let host = RenderHost::with_backend(
            HostConfig {
                metrics_interval_ms: 0,
                ..HostConfig::default()
            },
            Box::new(PanickingBackend),
        )
        .unwrap();
        let (client, rx, _listener) = connect(&host, "panic");

        let capture = RenderCommand::new(
            CommandId(1),
            WidgetId(3),
            CommandPayload::Capture(Default::default()),
        );
        client.send(&Message::Command(capture)).unwrap();
        let result = recv_result(&rx);
        assert_eq!(result.status, RenderResultStatus::Failure);
        assert!(result.error_message.unwrap().contains("capture exploded"));

        let destroy = RenderCommand::new(CommandId(2), WidgetId(3), CommandPayload::Destroy);
        client.send(&Message::Command(destroy)).unwrap();
        assert!(recv_result(&rx).is_success());

        let stats = host.stats();
        assert_eq!(stats.commands_executed, 2);
        assert_eq!(stats.panics, 1);
        assert_eq!(
            host.received_commands(WidgetId(3)),
            vec![(CommandId(1), CommandType::Capture), (CommandId(2), CommandType::Destroy)]
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_slow_reader_still_gets_every_result() {
        use skylight_ipc::UnixEndpoints;

        const COMMANDS: u64 = 20_000;
        let dir = tempfile::tempdir().unwrap();
        let endpoints = UnixEndpoints::new(dir.path());
        let names = EndpointNames::with_suffix("backpressure");

        // A tiny queue so the worker has to wait on the socket
        let config = HostConfig {
            transport: TransportConfig {
                send_queue_capacity: 4,
                ..TransportConfig::default()
            },
            metrics_interval_ms: 0,
            ..HostConfig::default()
        };
        let listener = TransportListener::bind(&endpoints, &names, config.transport.clone()).unwrap();
        let host = RenderHost::new(config).unwrap();

        let client = Transport::new(TransportConfig {
            send_queue_capacity: COMMANDS as usize,
            ..TransportConfig::default()
        });
        let (gate, gate_rx) = bounded::<()>(0);
        let (tx, rx) = unbounded();
        client.on_message(move |m| {
            // Held until the gate sender is dropped
            let _ = gate_rx.recv();
            let _ = tx.send(m);
        });
        let connecting = {
            let endpoints = endpoints.clone();
            let names = names.clone();
            thread::spawn(move || {
                client.connect(&endpoints, &names).unwrap();
                client
            })
        };
        assert!(host.accept(&listener, Duration::from_secs(5)).unwrap());
        let client = connecting.join().unwrap();

        for id in 1..=COMMANDS {
            let query = RenderCommand::new(
                CommandId(id),
                WidgetId(1),
                CommandPayload::QueryCapabilities,
            );
            client.send(&Message::Command(query)).unwrap();
        }
        thread::sleep(Duration::from_millis(300));
        drop(gate);

        let mut answered = std::collections::HashSet::new();
        while (answered.len() as u64) < COMMANDS {
            match rx.recv_timeout(Duration::from_secs(10)) {
                Ok(Message::Result(result)) => {
                    assert!(result.is_success());
                    assert!(answered.insert(result.command_id));
                }
                Ok(_) => {}
                Err(_) => break,
            }
        }
        assert_eq!(answered.len() as u64, COMMANDS);
        assert_eq!(host.stats().commands_executed, COMMANDS);
        client.close();
    }

    #[test]
    fn test_client_close_is_seen_as_disconnect() {
        let host = RenderHost::new(HostConfig {
            metrics_interval_ms: 0,
            ..HostConfig::default()
        })
        .unwrap();
        let (client, _rx, _listener) = connect(&host, "disconnect");
        assert!(host.is_connected());

        client.close();
        assert!(host.wait_for_disconnect(Some(Duration::from_secs(5))).is_some());
        assert!(!host.is_connected());
        host.shutdown();
    }
}
