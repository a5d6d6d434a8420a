//! Pending-operation correlation table.
//!
//! Every issued command gets an entry keyed by its command id. The entry is
//! removed exactly once: by its matching result, by the timeout sweep, or
//! by a connection fault. Whoever removes it resolves the caller's future,
//! so a command can never be answered twice.

use skylight_protocol::{
    CommandId, CommandType, RenderBackendType, RenderProperties, RenderRect, RenderResult,
    WidgetId, WindowHandle,
};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

/// Proxy state to apply when an operation succeeds.
#[derive(Debug, Clone)]
pub(crate) enum Effect {
    Initialize {
        backend: RenderBackendType,
        window: WindowHandle,
        bounds: RenderRect,
    },
    Resize(RenderRect),
    SetProperties(RenderProperties),
    SwitchBackend(RenderBackendType),
    Capabilities,
    Destroy,
    None,
}

pub(crate) struct PendingOperation {
    pub command_id: CommandId,
    pub command_type: CommandType,
    pub issued_at: Instant,
    pub deadline: Instant,
    pub effect: Effect,
    tx: oneshot::Sender<RenderResult>,
}

impl PendingOperation {
    pub fn new(
        command_id: CommandId,
        widget_id: WidgetId,
        command_type: CommandType,
        timeout: Duration,
        effect: Effect,
    ) -> (Self, PendingResult) {
        let (tx, rx) = oneshot::channel();
        let issued_at = Instant::now();
        let op = Self {
            command_id,
            command_type,
            issued_at,
            deadline: issued_at + timeout,
            effect,
            tx,
        };
        (op, PendingResult::waiting(command_id, widget_id, rx))
    }

    /// Hand the result to whoever holds the future. A dropped future is
    /// not an error.
    pub fn resolve(self, result: RenderResult) {
        let _ = self.tx.send(result);
    }
}

/// Outstanding operations of one proxy.
#[derive(Default)]
pub(crate) struct PendingTable {
    ops: Mutex<HashMap<CommandId, PendingOperation>>,
}

impl PendingTable {
    fn ops(&self) -> MutexGuard<'_, HashMap<CommandId, PendingOperation>> {
        self.ops.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, op: PendingOperation) {
        self.ops().insert(op.command_id, op);
    }

    pub fn take(&self, id: CommandId) -> Option<PendingOperation> {
        self.ops().remove(&id)
    }

    /// Remove every operation whose deadline has passed.
    pub fn take_expired(&self, now: Instant) -> Vec<PendingOperation> {
        let mut ops = self.ops();
        let expired: Vec<CommandId> = ops
            .values()
            .filter(|op| op.deadline <= now)
            .map(|op| op.command_id)
            .collect();
        let mut taken: Vec<PendingOperation> =
            expired.into_iter().filter_map(|id| ops.remove(&id)).collect();
        taken.sort_by_key(|op| op.command_id);
        taken
    }

    /// Remove everything, oldest first.
    pub fn drain(&self) -> Vec<PendingOperation> {
        let mut taken: Vec<PendingOperation> = self.ops().drain().map(|(_, op)| op).collect();
        taken.sort_by_key(|op| op.command_id);
        taken
    }

    pub fn len(&self) -> usize {
        self.ops().len()
    }

    /// Type of the newest outstanding operation.
    pub fn latest_type(&self) -> Option<CommandType> {
        self.ops()
            .values()
            .max_by_key(|op| op.command_id)
            .map(|op| op.command_type)
    }
}

enum Slot {
    Ready(Option<RenderResult>),
    Waiting(oneshot::Receiver<RenderResult>),
}

/// Future resolving to the result of one operation.
///
/// The command has already been sent when this is returned; awaiting it
/// only observes the outcome. Dropping it abandons the outcome, not the
/// command.
pub struct PendingResult {
    command_id: CommandId,
    widget_id: WidgetId,
    slot: Slot,
}

impl PendingResult {
    fn waiting(command_id: CommandId, widget_id: WidgetId, rx: oneshot::Receiver<RenderResult>) -> Self {
        Self {
            command_id,
            widget_id,
            slot: Slot::Waiting(rx),
        }
    }

    /// An operation that was resolved without being sent.
    pub fn ready(result: RenderResult) -> Self {
        Self {
            command_id: result.command_id,
            widget_id: result.widget_id,
            slot: Slot::Ready(Some(result)),
        }
    }

    pub fn command_id(&self) -> CommandId {
        self.command_id
    }

    pub fn widget_id(&self) -> WidgetId {
        self.widget_id
    }

    /// Block the current thread until the operation resolves. The pending
    /// table guarantees resolution by the operation's deadline.
    ///
    /// # Panics
    ///
    /// Panics if called on a thread that is running a tokio runtime,
    /// unless the result is already available.
    pub fn wait(self) -> RenderResult {
        let (command_id, widget_id) = (self.command_id, self.widget_id);
        match self.slot {
            Slot::Ready(Some(result)) => result,
            Slot::Ready(None) => RenderResult::connection_lost(command_id, widget_id),
            Slot::Waiting(rx) => rx
                .blocking_recv()
                .unwrap_or_else(|_| RenderResult::connection_lost(command_id, widget_id)),
        }
    }
}

impl Future for PendingResult {
    type Output = RenderResult;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<RenderResult> {
        let this = self.get_mut();
        let (command_id, widget_id) = (this.command_id, this.widget_id);
        match &mut this.slot {
            Slot::Ready(result) => Poll::Ready(
                result
                    .take()
                    .unwrap_or_else(|| RenderResult::connection_lost(command_id, widget_id)),
            ),
            // A dropped sender means the table went away with the proxy.
            Slot::Waiting(rx) => Pin::new(rx).poll(cx).map(|r| {
                r.unwrap_or_else(|_| RenderResult::connection_lost(command_id, widget_id))
            }),
        }
    }
}
