//! Connection router.
//!
//! One [`Connection`] wraps one transport connection to the render host.
//! It allocates command ids, routes inbound results and metrics to the
//! proxy that owns the widget, and turns transport faults and liveness
//! loss into a fault on every proxy.

use crate::config::ProxyConfig;
use crate::diagnostics::DiagnosticsSink;
use crate::error::ProxyError;
use crate::proxy::{BackendProxy, ProxyShared};
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use skylight_ipc::{EndpointNames, Endpoints, IpcError, Transport, TransportConfig};
use skylight_protocol::{CommandId, CommandPayload, CommandType, Message, RenderCommand, WidgetId};
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{debug, info, warn};

struct Sweeper {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

pub(crate) struct ConnectionInner {
    transport: Transport,
    config: ProxyConfig,
    next_command_id: AtomicU64,
    next_widget_id: AtomicU32,
    /// Held from id allocation until the command is queued, so ids reach
    /// the wire in increasing order.
    send_lock: Mutex<()>,
    proxies: Mutex<HashMap<WidgetId, Weak<ProxyShared>>>,
    diagnostics: RwLock<Option<Arc<dyn DiagnosticsSink>>>,
    process_alive: AtomicBool,
    late_results: AtomicU64,
    sweeper: Mutex<Option<Sweeper>>,
}

/// Client side of one render host connection.
///
/// Cheap to clone; all clones share the same router.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl Connection {
    /// Route messages of `transport`, which may or may not be connected yet.
    /// Fails only if the timeout sweeper thread cannot be started.
    pub fn new(transport: Transport, config: ProxyConfig) -> Result<Self, IpcError> {
        let inner = Arc::new(ConnectionInner {
            transport,
            config,
            next_command_id: AtomicU64::new(1),
            next_widget_id: AtomicU32::new(1),
            send_lock: Mutex::new(()),
            proxies: Mutex::new(HashMap::new()),
            diagnostics: RwLock::new(None),
            process_alive: AtomicBool::new(true),
            late_results: AtomicU64::new(0),
            sweeper: Mutex::new(None),
        });

        let weak = Arc::downgrade(&inner);
        inner.transport.on_message(move |message| {
            if let Some(inner) = weak.upgrade() {
                inner.dispatch(message);
            }
        });
        let weak = Arc::downgrade(&inner);
        inner.transport.on_error(move |error| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_transport_error(error);
            }
        });

        let sweeper = spawn_sweeper(&inner)?;
        *inner.sweeper() = Some(sweeper);
        Ok(Self { inner })
    }

    /// Create a transport and connect it to a listening render host.
    pub fn connect(
        endpoints: &dyn Endpoints,
        names: &EndpointNames,
        transport_config: TransportConfig,
        config: ProxyConfig,
    ) -> Result<Self, IpcError> {
        let connection = Self::new(Transport::new(transport_config), config)?;
        connection.inner.transport.connect(endpoints, names)?;
        info!("Connected to render host on {}", names.control_pipe);
        Ok(connection)
    }

    pub fn transport(&self) -> &Transport {
        &self.inner.transport
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.inner.config
    }

    pub fn is_connected(&self) -> bool {
        self.inner.transport.is_connected()
    }

    /// Round-trip probe; see [`Transport::test_connection`].
    pub fn test_connection(&self) -> bool {
        self.inner.transport.test_connection()
    }

    /// Proxy for a newly allocated widget id.
    pub fn create_proxy(&self) -> BackendProxy {
        loop {
            let id = WidgetId(self.inner.next_widget_id.fetch_add(1, Ordering::Relaxed));
            if let Ok(proxy) = self.create_proxy_for(id) {
                return proxy;
            }
        }
    }

    /// Proxy for a caller-chosen widget id. Fails while another live proxy
    /// owns the id.
    pub fn create_proxy_for(&self, widget_id: WidgetId) -> Result<BackendProxy, ProxyError> {
        let shared = Arc::new(ProxyShared::new(widget_id, self.inner.clone()));
        let mut proxies = self.inner.proxies();
        let owned = proxies
            .get(&widget_id)
            .and_then(Weak::upgrade)
            .is_some_and(|p| !p.is_destroyed());
        if owned {
            return Err(ProxyError::WidgetInUse(widget_id));
        }
        proxies.insert(widget_id, Arc::downgrade(&shared));
        debug!("Created proxy for {}", widget_id);
        Ok(BackendProxy::from_shared(shared))
    }

    /// Widgets with a live proxy.
    pub fn live_widgets(&self) -> Vec<WidgetId> {
        let mut ids: Vec<WidgetId> = self
            .inner
            .live_proxies()
            .iter()
            .map(|p| p.widget_id())
            .collect();
        ids.sort_by_key(|id| id.0);
        ids
    }

    pub fn set_diagnostics_sink(&self, sink: Arc<dyn DiagnosticsSink>) {
        *self
            .inner
            .diagnostics
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(sink);
    }

    /// Liveness report from the render process supervisor. Losing the
    /// process is handled exactly like losing the transport.
    pub fn notify_liveness(&self, alive: bool) {
        let was_alive = self.inner.process_alive.swap(alive, Ordering::SeqCst);
        if alive {
            if !was_alive {
                info!("Render process reported alive");
            }
            return;
        }
        if was_alive {
            warn!("Render process is no longer alive");
            self.inner.transport.close();
            self.inner.fault_all("render process exited", true);
        }
    }

    pub fn is_process_alive(&self) -> bool {
        self.inner.is_alive()
    }

    /// Results that arrived after their operation was resolved or whose
    /// widget has no proxy.
    pub fn late_results(&self) -> u64 {
        self.inner.late_results.load(Ordering::Relaxed)
    }

    /// Close the transport and fail everything outstanding.
    pub fn close(&self) {
        self.inner.transport.close();
        self.inner.fault_all("connection closed", false);
        let sweeper = self.inner.sweeper().take();
        if let Some(Sweeper { stop, handle }) = sweeper {
            drop(stop);
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

impl ConnectionInner {
    fn proxies(&self) -> MutexGuard<'_, HashMap<WidgetId, Weak<ProxyShared>>> {
        self.proxies.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn sweeper(&self) -> MutexGuard<'_, Option<Sweeper>> {
        self.sweeper.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn config(&self) -> &ProxyConfig {
        &self.config
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.process_alive.load(Ordering::SeqCst) && self.transport.is_connected()
    }

    fn live_proxies(&self) -> Vec<Arc<ProxyShared>> {
        let mut proxies = self.proxies();
        proxies.retain(|_, weak| weak.strong_count() > 0);
        proxies.values().filter_map(Weak::upgrade).collect()
    }

    fn proxy(&self, widget_id: WidgetId) -> Option<Arc<ProxyShared>> {
        self.proxies().get(&widget_id).and_then(Weak::upgrade)
    }

    /// Drop the registration of `proxy` if it still owns its widget id.
    pub(crate) fn unregister(&self, proxy: &ProxyShared) {
        let mut proxies = self.proxies();
        let owned = proxies
            .get(&proxy.widget_id())
            .is_some_and(|weak| std::ptr::eq(weak.as_ptr(), proxy));
        if owned {
            proxies.remove(&proxy.widget_id());
        }
    }

    /// Allocate an id, let `register` record the pending operation, then
    /// queue the command.
    pub(crate) fn send_command<T>(
        &self,
        widget_id: WidgetId,
        payload: CommandPayload,
        register: impl FnOnce(CommandId, CommandType) -> T,
    ) -> (CommandId, T, Result<(), IpcError>) {
        let _guard = self.send_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let id = CommandId(self.next_command_id.fetch_add(1, Ordering::SeqCst));
        let command = RenderCommand::new(id, widget_id, payload);
        let registered = register(id, command.command_type());
        let sent = self.transport.send(&Message::Command(command));
        (id, registered, sent)
    }

    fn dispatch(&self, message: Message) {
        match message {
            Message::Result(result) => {
                let widget_id = result.widget_id;
                let command_id = result.command_id;
                let routed = self
                    .proxy(widget_id)
                    .is_some_and(|proxy| proxy.on_result(result));
                if !routed {
                    self.late_results.fetch_add(1, Ordering::Relaxed);
                    warn!("Discarding late result {} for {}", command_id, widget_id);
                }
            }
            Message::Metrics { widget_id, metrics } => match self.proxy(widget_id) {
                Some(proxy) => proxy.on_metrics(metrics),
                None => debug!("Metrics for {} without a proxy", widget_id),
            },
            Message::Command(command) => {
                warn!(
                    "Unexpected {} command from render host",
                    command.command_type()
                );
            }
            Message::Ping { .. } | Message::Pong { .. } => {}
        }
    }

    fn handle_transport_error(&self, error: IpcError) {
        if error.is_fatal() {
            warn!("Render connection failed: {}", error);
            self.fault_all(&error.to_string(), true);
        } else {
            warn!("Render transport error: {}", error);
        }
    }

    /// Fail every proxy's outstanding operations.
    pub(crate) fn fault_all(&self, reason: &str, capture: bool) {
        for proxy in self.live_proxies() {
            self.fault_proxy(&proxy, reason, capture);
        }
    }

    pub(crate) fn fault_proxy(&self, proxy: &ProxyShared, reason: &str, capture: bool) {
        let Some(report) = proxy.fault(reason) else {
            return;
        };
        if !capture {
            return;
        }
        let sink = self
            .diagnostics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(sink) = sink {
            sink.capture(&report);
        }
    }

    fn sweep(&self, now: Instant) {
        for proxy in self.live_proxies() {
            proxy.expire(now);
        }
    }
}

fn spawn_sweeper(inner: &Arc<ConnectionInner>) -> io::Result<Sweeper> {
    let (stop, stop_rx) = bounded::<()>(0);
    let interval = inner.config.sweep_interval();
    let weak = Arc::downgrade(inner);

    let handle = thread::Builder::new()
        .name("proxy-sweeper".to_string())
        .spawn(move || {
            debug!("Pending operation sweeper started");
            loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => match weak.upgrade() {
                        Some(inner) => inner.sweep(Instant::now()),
                        None => break,
                    },
                    _ => break,
                }
            }
            debug!("Pending operation sweeper stopped");
        })?;
    Ok(Sweeper { stop, handle })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_connection_runs_sweeper() {
        let connection =
            Connection::new(Transport::new(TransportConfig::default()), ProxyConfig::default())
                .unwrap();
        let name = connection
            .inner
            .sweeper()
            .as_ref()
            .and_then(|s| s.handle.thread().name().map(str::to_string));
        assert_eq!(name.as_deref(), Some("proxy-sweeper"));

        connection.close();
        assert!(connection.inner.sweeper().is_none());
    }
}
