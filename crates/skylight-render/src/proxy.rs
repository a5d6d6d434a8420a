//! Per-widget render backend proxy.
//!
//! A [`BackendProxy`] turns render commands into futures. Each operation
//! sends its command immediately and returns a [`PendingResult`]; any
//! number of operations may be in flight at once and the render host
//! applies them in the order they were issued.
//!
//! State machine:
//!
//! ```text
//! Uninitialized -> Initializing -> Ready <-> (Rendering | Updating | Resizing)
//!                                  Ready -> Destroying -> Destroyed
//! any state -> Faulted -> Destroyed
//! ```
//!
//! Operations that are not allowed in the current state resolve at once
//! with a failed result whose command id is 0; nothing is sent for them.
//!
//! A proxy may own its widget's [`RenderSurface`]. The surface is attached
//! to the window by `initialize_async`, detached once the proxy is
//! destroyed, and its resize and DPI events are forwarded as Resize
//! commands.

use crate::connection::ConnectionInner;
use crate::diagnostics::FaultReport;
use crate::error::ProxyError;
use crate::pending::{Effect, PendingOperation, PendingResult, PendingTable};
use crate::surface::RenderSurface;
use serde::Serialize;
use skylight_protocol::{
    timestamp_ms, CaptureRequest, CommandId, CommandPayload, CommandType, ContentParameters,
    PerformanceMetrics, RenderBackendType, RenderProperties, RenderRect, RenderResult,
    RenderResultStatus, SystemCapabilities, WidgetId, WindowHandle,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ProxyState {
    Uninitialized,
    Initializing,
    Ready,
    Rendering,
    Updating,
    Resizing,
    Destroying,
    Destroyed,
    Faulted,
}

impl ProxyState {
    /// States in which content operations are accepted.
    pub fn accepts_operations(&self) -> bool {
        matches!(
            self,
            Self::Ready | Self::Rendering | Self::Updating | Self::Resizing
        )
    }
}

pub type PerformanceCallback = Arc<dyn Fn(&PerformanceMetrics) + Send + Sync>;
pub type ProxyErrorCallback = Arc<dyn Fn(&ProxyError) + Send + Sync>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ProxyStats {
    pub commands_sent: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub connection_lost: u64,
    pub average_round_trip_ms: f64,
}

#[derive(Default)]
struct Counters {
    sent: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
    connection_lost: AtomicU64,
    round_trip_us: AtomicU64,
}

struct ProxyData {
    state: ProxyState,
    backend: RenderBackendType,
    window: WindowHandle,
    bounds: RenderRect,
    properties: RenderProperties,
    metrics: PerformanceMetrics,
    capabilities: Option<SystemCapabilities>,
    timeout: Duration,
}

#[derive(Default)]
struct Callbacks {
    performance: Option<PerformanceCallback>,
    performance_interval: Duration,
    last_performance: Option<Instant>,
    error: Option<ProxyErrorCallback>,
}

pub(crate) struct ProxyShared {
    widget_id: WidgetId,
    connection: Arc<ConnectionInner>,
    data: Mutex<ProxyData>,
    pending: PendingTable,
    callbacks: Mutex<Callbacks>,
    surface: Mutex<Option<Arc<RenderSurface>>>,
    counters: Counters,
}

impl ProxyShared {
    pub(crate) fn new(widget_id: WidgetId, connection: Arc<ConnectionInner>) -> Self {
        let config = connection.config().clone();
        Self {
            widget_id,
            data: Mutex::new(ProxyData {
                state: ProxyState::Uninitialized,
                backend: RenderBackendType::Auto,
                window: WindowHandle::NULL,
                bounds: RenderRect::new(0, 0, 0, 0),
                properties: RenderProperties::default(),
                metrics: PerformanceMetrics::default(),
                capabilities: None,
                timeout: config.default_timeout(),
            }),
            pending: PendingTable::default(),
            callbacks: Mutex::new(Callbacks {
                performance_interval: config.performance_interval(),
                ..Callbacks::default()
            }),
            surface: Mutex::new(None),
            counters: Counters::default(),
            connection,
        }
    }

    fn data(&self) -> MutexGuard<'_, ProxyData> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn callbacks(&self) -> MutexGuard<'_, Callbacks> {
        self.callbacks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn widget_id(&self) -> WidgetId {
        self.widget_id
    }

    fn surface(&self) -> Option<Arc<RenderSurface>> {
        self.surface
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Detach the surface from its window, keeping it for inspection.
    fn release_surface(&self) {
        if let Some(surface) = self.surface() {
            surface.destroy_surface();
        }
    }

    /// Tell the renderer about the surface's current logical bounds and
    /// scale.
    fn follow_surface(&self) {
        let Some(surface) = self.surface() else {
            return;
        };
        let bounds = surface.render_rect();
        if !bounds.is_valid() {
            debug!("{} ignoring surface change to {:?}", self.widget_id, bounds);
            return;
        }
        debug!("{} surface changed, resizing to {:?}", self.widget_id, bounds);
        // The outcome arrives through the usual callbacks
        let _ = self.operation(CommandPayload::Resize { bounds }, Effect::Resize(bounds));
    }

    pub(crate) fn is_destroyed(&self) -> bool {
        self.data().state == ProxyState::Destroyed
    }

    fn state(&self) -> ProxyState {
        let data = self.data();
        if data.state != ProxyState::Ready {
            return data.state;
        }
        match self.pending.latest_type() {
            Some(CommandType::RenderFrame) => ProxyState::Rendering,
            Some(CommandType::UpdateContent) => ProxyState::Updating,
            Some(CommandType::Resize) => ProxyState::Resizing,
            _ => ProxyState::Ready,
        }
    }

    /// Failed result for an operation that was never sent.
    fn reject(&self, status: RenderResultStatus, message: impl Into<String>) -> PendingResult {
        PendingResult::ready(RenderResult::failure(
            CommandId(0),
            self.widget_id,
            status,
            message,
        ))
    }

    fn reject_state(&self, command_type: CommandType, state: ProxyState) -> PendingResult {
        debug!("{} rejected {} in state {:?}", self.widget_id, command_type, state);
        self.reject(
            RenderResultStatus::Failure,
            ProxyError::InvalidState(state).to_string(),
        )
    }

    fn operation(&self, payload: CommandPayload, effect: Effect) -> PendingResult {
        let state = self.state();
        if !state.accepts_operations() {
            return self.reject_state(payload.command_type(), state);
        }
        let timeout = self.data().timeout;
        self.issue(payload, effect, timeout)
    }

    fn issue(&self, payload: CommandPayload, effect: Effect, timeout: Duration) -> PendingResult {
        let widget_id = self.widget_id;
        let (id, future, sent) = self.connection.send_command(widget_id, payload, |id, ty| {
            let (op, future) = PendingOperation::new(id, widget_id, ty, timeout, effect);
            self.pending.insert(op);
            future
        });

        match sent {
            Ok(()) => {
                self.counters.sent.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                let fatal = e.is_fatal();
                if let Some(op) = self.pending.take(id) {
                    let result = if fatal {
                        RenderResult::connection_lost(id, widget_id)
                    } else {
                        RenderResult::failure(id, widget_id, RenderResultStatus::Failure, e.to_string())
                    };
                    self.complete(op, result);
                }
                if fatal {
                    self.connection.fault_proxy(self, &e.to_string(), true);
                }
            }
        }
        future
    }

    /// Resolve an operation: update statistics and state, report failures,
    /// then wake the caller.
    fn complete(&self, op: PendingOperation, result: RenderResult) {
        let status = result.status;
        match status {
            RenderResultStatus::Success => {
                self.counters.succeeded.fetch_add(1, Ordering::Relaxed);
                let rtt = op.issued_at.elapsed().as_micros() as u64;
                self.counters.round_trip_us.fetch_add(rtt, Ordering::Relaxed);
            }
            RenderResultStatus::TimedOut => {
                self.counters.timed_out.fetch_add(1, Ordering::Relaxed);
            }
            RenderResultStatus::ConnectionLost => {
                self.counters.connection_lost.fetch_add(1, Ordering::Relaxed);
            }
            _ => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
            }
        }

        let destroyed = self.apply(&op.effect, &result);
        if matches!(op.effect, Effect::Initialize { .. })
            && !result.is_success()
            && !result.is_connection_lost()
        {
            self.release_surface();
        }

        let error = match status {
            RenderResultStatus::Success | RenderResultStatus::ConnectionLost => None,
            RenderResultStatus::TimedOut => Some(ProxyError::TimedOut {
                command_id: op.command_id,
                command_type: op.command_type,
            }),
            _ => Some(ProxyError::CommandFailed {
                command_id: op.command_id,
                command_type: op.command_type,
                status,
                message: result.error_message.clone().unwrap_or_default(),
            }),
        };
        if let Some(error) = error {
            debug!("{}: {}", self.widget_id, error);
            self.report_error(&error);
        }

        op.resolve(result);

        if destroyed {
            self.connection.unregister(self);
            self.release_surface();
            self.abandon_pending();
            info!("{} destroyed", self.widget_id);
        }
    }

    /// Resolve whatever is still outstanding once the widget is gone.
    /// Destroyed proxies are not swept.
    fn abandon_pending(&self) {
        for op in self.pending.drain() {
            debug!(
                "{} {} {} abandoned by destroy",
                self.widget_id, op.command_type, op.command_id
            );
            let result = RenderResult::failure(
                op.command_id,
                self.widget_id,
                RenderResultStatus::Failure,
                "widget destroyed before the operation completed",
            );
            self.complete(op, result);
        }
    }

    /// Apply an operation's outcome to the proxy. Returns true when the
    /// proxy reached `Destroyed`.
    fn apply(&self, effect: &Effect, result: &RenderResult) -> bool {
        let mut data = self.data();
        let success = result.is_success();
        match effect {
            Effect::Destroy => {
                data.state = ProxyState::Destroyed;
                return true;
            }
            Effect::Initialize {
                backend,
                window,
                bounds,
            } => {
                if data.state == ProxyState::Initializing {
                    if success {
                        data.state = ProxyState::Ready;
                        data.backend = *backend;
                        data.window = *window;
                        data.bounds = *bounds;
                        info!("{} ready on {} backend", self.widget_id, backend);
                    } else if !result.is_connection_lost() {
                        data.state = ProxyState::Uninitialized;
                    }
                }
            }
            _ if !success => {}
            Effect::Resize(bounds) => data.bounds = *bounds,
            Effect::SetProperties(properties) => data.properties = properties.clone(),
            Effect::SwitchBackend(backend) => {
                info!("{} switched backend {} -> {}", self.widget_id, data.backend, backend);
                data.backend = *backend;
            }
            Effect::Capabilities => match SystemCapabilities::decode(&result.data) {
                Ok(capabilities) => data.capabilities = Some(capabilities),
                Err(e) => warn!("{}: malformed capabilities: {}", self.widget_id, e),
            },
            Effect::None => {}
        }
        false
    }

    fn report_error(&self, error: &ProxyError) {
        let callback = self.callbacks().error.clone();
        if let Some(callback) = callback {
            callback(error);
        }
    }

    /// Route an inbound result. Returns false if no operation was waiting
    /// for it.
    pub(crate) fn on_result(&self, result: RenderResult) -> bool {
        match self.pending.take(result.command_id) {
            Some(op) => {
                self.complete(op, result);
                true
            }
            None => false,
        }
    }

    pub(crate) fn on_metrics(&self, metrics: PerformanceMetrics) {
        self.data().metrics = metrics.clone();

        let callback = {
            let mut callbacks = self.callbacks();
            let now = Instant::now();
            let due = callbacks
                .last_performance
                .is_none_or(|last| now.duration_since(last) >= callbacks.performance_interval);
            match (&callbacks.performance, due) {
                (Some(callback), true) => {
                    let callback = callback.clone();
                    callbacks.last_performance = Some(now);
                    Some(callback)
                }
                _ => None,
            }
        };
        if let Some(callback) = callback {
            callback(&metrics);
        }
    }

    /// Time out every overdue operation.
    pub(crate) fn expire(&self, now: Instant) {
        for op in self.pending.take_expired(now) {
            warn!(
                "{} {} {} timed out after {:?}",
                self.widget_id,
                op.command_type,
                op.command_id,
                now.duration_since(op.issued_at)
            );
            let result = RenderResult::timed_out(op.command_id, self.widget_id);
            self.complete(op, result);
        }
    }

    /// Fail all outstanding operations with "connection lost" and enter
    /// `Faulted`. Returns a report the first time a live proxy faults.
    pub(crate) fn fault(&self, reason: &str) -> Option<FaultReport> {
        let (previous, backend) = {
            let mut data = self.data();
            let previous = data.state;
            if !matches!(
                previous,
                ProxyState::Destroying | ProxyState::Destroyed | ProxyState::Faulted
            ) {
                data.state = ProxyState::Faulted;
            }
            (previous, data.backend)
        };

        let ops = self.pending.drain();
        let failed = ops.len();
        for op in ops {
            let result = RenderResult::connection_lost(op.command_id, self.widget_id);
            self.complete(op, result);
        }

        if matches!(
            previous,
            ProxyState::Destroying | ProxyState::Destroyed | ProxyState::Faulted
        ) {
            return None;
        }

        warn!(
            "{} faulted: {} ({} operation(s) failed)",
            self.widget_id, reason, failed
        );
        self.report_error(&ProxyError::ConnectionLost(reason.to_string()));
        Some(FaultReport {
            widget_id: self.widget_id,
            previous_state: previous,
            backend,
            reason: reason.to_string(),
            pending_failed: failed,
            stats: self.stats(),
            timestamp: timestamp_ms(),
        })
    }

    fn stats(&self) -> ProxyStats {
        let c = &self.counters;
        let succeeded = c.succeeded.load(Ordering::Relaxed);
        let average_round_trip_ms = if succeeded == 0 {
            0.0
        } else {
            c.round_trip_us.load(Ordering::Relaxed) as f64 / succeeded as f64 / 1000.0
        };
        ProxyStats {
            commands_sent: c.sent.load(Ordering::Relaxed),
            succeeded,
            failed: c.failed.load(Ordering::Relaxed),
            timed_out: c.timed_out.load(Ordering::Relaxed),
            connection_lost: c.connection_lost.load(Ordering::Relaxed),
            average_round_trip_ms,
        }
    }
}

/// Client-side handle for one widget's renderer.
///
/// Cheap to clone; clones share state. Callbacks run on the transport's
/// reader thread or the timeout sweeper and must return quickly.
#[derive(Clone)]
pub struct BackendProxy {
    shared: Arc<ProxyShared>,
}

impl BackendProxy {
    pub(crate) fn from_shared(shared: Arc<ProxyShared>) -> Self {
        Self { shared }
    }

    // ===== Operations =====

    /// Create the widget's renderer in the render host. `Auto` lets the
    /// host choose.
    pub fn initialize_async(
        &self,
        backend: RenderBackendType,
        window: WindowHandle,
        bounds: RenderRect,
    ) -> PendingResult {
        let shared = &self.shared;
        if window.is_null() {
            return shared.reject(RenderResultStatus::InvalidParameters, "null window handle");
        }
        if !bounds.is_valid() {
            return shared.reject(RenderResultStatus::InvalidParameters, "invalid bounds");
        }
        let (timeout, properties) = {
            let mut data = shared.data();
            if data.state != ProxyState::Uninitialized {
                let state = data.state;
                drop(data);
                return shared.reject_state(CommandType::Initialize, state);
            }
            data.state = ProxyState::Initializing;
            (data.timeout, data.properties.clone())
        };

        let bounds = match shared.surface() {
            Some(surface) => match surface.create_surface(window, bounds.logical(), properties) {
                Ok(()) => {
                    self.bind_surface_events(&surface);
                    surface.render_rect()
                }
                Err(e) => {
                    shared.data().state = ProxyState::Uninitialized;
                    warn!("{} surface creation failed: {}", shared.widget_id, e);
                    return shared.reject(RenderResultStatus::InvalidParameters, e.to_string());
                }
            },
            None => bounds,
        };
        info!("Initializing {} with {} backend", shared.widget_id, backend);
        shared.issue(
            CommandPayload::Initialize {
                backend,
                window,
                bounds,
            },
            Effect::Initialize {
                backend,
                window,
                bounds,
            },
            timeout,
        )
    }

    pub fn render_frame_async(
        &self,
        content: ContentParameters,
        properties: RenderProperties,
    ) -> PendingResult {
        self.shared.operation(
            CommandPayload::RenderFrame {
                content,
                properties: properties.clone(),
            },
            Effect::SetProperties(properties),
        )
    }

    pub fn update_content_async(&self, content: ContentParameters) -> PendingResult {
        self.shared
            .operation(CommandPayload::UpdateContent { content }, Effect::None)
    }

    pub fn resize_async(&self, bounds: RenderRect) -> PendingResult {
        if !bounds.is_valid() {
            return self
                .shared
                .reject(RenderResultStatus::InvalidParameters, "invalid bounds");
        }
        self.shared
            .operation(CommandPayload::Resize { bounds }, Effect::Resize(bounds))
    }

    pub fn set_properties_async(&self, properties: RenderProperties) -> PendingResult {
        if let Err(e) = properties.validate() {
            return self
                .shared
                .reject(RenderResultStatus::InvalidParameters, e.to_string());
        }
        self.shared.operation(
            CommandPayload::SetProperties {
                properties: properties.clone(),
            },
            Effect::SetProperties(properties),
        )
    }

    /// Replace the renderer while keeping the widget id and its surface.
    pub fn switch_backend_async(&self, backend: RenderBackendType) -> PendingResult {
        let state = self.shared.state();
        if state.accepts_operations() && self.current_backend() == backend {
            return PendingResult::ready(RenderResult::success(CommandId(0), self.widget_id()));
        }
        self.shared.operation(
            CommandPayload::SwitchBackend { backend },
            Effect::SwitchBackend(backend),
        )
    }

    pub fn capture_frame_async(&self, request: CaptureRequest) -> PendingResult {
        self.shared
            .operation(CommandPayload::Capture(request), Effect::None)
    }

    /// Ask the render host what it supports. On success the answer is
    /// available from [`capabilities`](Self::capabilities).
    pub fn query_capabilities_async(&self) -> PendingResult {
        self.shared
            .operation(CommandPayload::QueryCapabilities, Effect::Capabilities)
    }

    /// Tear down the widget's renderer. Accepted in every state except
    /// `Destroying` and `Destroyed`; a proxy that never initialized or
    /// has faulted is destroyed locally.
    pub fn destroy_async(&self) -> PendingResult {
        let shared = &self.shared;
        let (state, timeout) = {
            let mut data = shared.data();
            let state = data.state;
            match state {
                ProxyState::Destroying | ProxyState::Destroyed => {}
                ProxyState::Uninitialized | ProxyState::Faulted => {
                    data.state = ProxyState::Destroyed;
                }
                _ => data.state = ProxyState::Destroying,
            }
            (state, data.timeout)
        };

        match state {
            ProxyState::Destroying | ProxyState::Destroyed => {
                shared.reject_state(CommandType::Destroy, state)
            }
            ProxyState::Uninitialized | ProxyState::Faulted => {
                shared.connection.unregister(shared);
                shared.release_surface();
                info!("{} destroyed locally", shared.widget_id);
                PendingResult::ready(RenderResult::success(CommandId(0), shared.widget_id))
            }
            _ => shared.issue(CommandPayload::Destroy, Effect::Destroy, timeout),
        }
    }

    /// Render one frame and block for at most `timeout`. The operation is
    /// resolved by then either way, so nothing is left pending.
    ///
    /// Called from a thread that is running a tokio runtime, nothing is
    /// sent and a failed result with command id 0 is returned at once; use
    /// [`render_frame_async`](Self::render_frame_async) there.
    pub fn render_frame(
        &self,
        content: ContentParameters,
        properties: RenderProperties,
        timeout: Duration,
    ) -> RenderResult {
        let shared = &self.shared;
        if tokio::runtime::Handle::try_current().is_ok() {
            warn!("{}: blocking render_frame called on a runtime thread", shared.widget_id);
            return shared
                .reject(
                    RenderResultStatus::Failure,
                    ProxyError::BlockingInRuntime.to_string(),
                )
                .wait();
        }
        let state = shared.state();
        if !state.accepts_operations() {
            return shared.reject_state(CommandType::RenderFrame, state).wait();
        }
        shared
            .issue(
                CommandPayload::RenderFrame {
                    content,
                    properties: properties.clone(),
                },
                Effect::SetProperties(properties),
                timeout,
            )
            .wait()
    }

    // ===== Surface =====

    /// Hand the widget's surface to this proxy. Only before
    /// `initialize_async`; the surface must not be attached to a window yet.
    pub fn attach_surface(&self, surface: RenderSurface) -> Result<(), ProxyError> {
        let data = self.shared.data();
        if data.state != ProxyState::Uninitialized {
            return Err(ProxyError::InvalidState(data.state));
        }
        let mut slot = self.shared.surface.lock().unwrap_or_else(PoisonError::into_inner);
        *slot = Some(Arc::new(surface));
        Ok(())
    }

    pub fn surface(&self) -> Option<Arc<RenderSurface>> {
        self.shared.surface()
    }

    fn bind_surface_events(&self, surface: &RenderSurface) {
        let weak = Arc::downgrade(&self.shared);
        surface.set_resize_callback(move |_| {
            if let Some(shared) = weak.upgrade() {
                shared.follow_surface();
            }
        });
        let weak = Arc::downgrade(&self.shared);
        surface.set_dpi_change_callback(move |_| {
            if let Some(shared) = weak.upgrade() {
                shared.follow_surface();
            }
        });
    }

    // ===== Callbacks =====

    /// Deliver metrics no more often than `interval`. Replaces any
    /// previous performance callback.
    pub fn set_performance_callback(
        &self,
        callback: impl Fn(&PerformanceMetrics) + Send + Sync + 'static,
        interval: Duration,
    ) {
        let mut callbacks = self.shared.callbacks();
        callbacks.performance = Some(Arc::new(callback));
        callbacks.performance_interval = interval;
        callbacks.last_performance = None;
    }

    /// Called once per failed command, timeout or connection fault.
    /// Replaces any previous error callback.
    pub fn set_error_callback(&self, callback: impl Fn(&ProxyError) + Send + Sync + 'static) {
        self.shared.callbacks().error = Some(Arc::new(callback));
    }

    pub fn clear_callbacks(&self) {
        let mut callbacks = self.shared.callbacks();
        callbacks.performance = None;
        callbacks.error = None;
    }

    // ===== Queries =====

    pub fn widget_id(&self) -> WidgetId {
        self.shared.widget_id
    }

    pub fn state(&self) -> ProxyState {
        self.shared.state()
    }

    pub fn is_ready(&self) -> bool {
        self.state().accepts_operations()
    }

    /// Whether the render host is believed alive. No I/O.
    pub fn is_process_alive(&self) -> bool {
        self.shared.connection.is_alive() && self.state() != ProxyState::Faulted
    }

    pub fn current_backend(&self) -> RenderBackendType {
        self.shared.data().backend
    }

    pub fn current_properties(&self) -> RenderProperties {
        self.shared.data().properties.clone()
    }

    /// Most recent metrics reported by the render host.
    pub fn performance_metrics(&self) -> PerformanceMetrics {
        self.shared.data().metrics.clone()
    }

    pub fn render_bounds(&self) -> RenderRect {
        self.shared.data().bounds
    }

    pub fn window_handle(&self) -> WindowHandle {
        self.shared.data().window
    }

    pub fn capabilities(&self) -> Option<SystemCapabilities> {
        self.shared.data().capabilities.clone()
    }

    /// Backends the render host reported; empty until capabilities were
    /// queried.
    pub fn supported_backends(&self) -> Vec<RenderBackendType> {
        self.capabilities()
            .map(|c| c.supported_backends())
            .unwrap_or_default()
    }

    pub fn pending_count(&self) -> usize {
        self.shared.pending.len()
    }

    pub fn default_timeout(&self) -> Duration {
        self.shared.data().timeout
    }

    /// Deadline for operations issued from now on.
    pub fn set_default_timeout(&self, timeout: Duration) {
        self.shared.data().timeout = timeout;
    }

    pub fn stats(&self) -> ProxyStats {
        self.shared.stats()
    }
}
