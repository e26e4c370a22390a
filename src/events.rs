//! Transaction lifecycle events.
//!
//! A session emits one named event before and after each start, commit and
//! rollback. Events go synchronously, in registration order, to every listener
//! in the session's [`EventBroadcaster`]. The first listener error stops the
//! broadcast and is handed back to the session.

use std::fmt;
use std::sync::Arc;

use crate::error::QueryRunnerError;
use crate::types::{ReplicationMode, SessionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionEvent {
    BeforeStart,
    AfterStart,
    BeforeCommit,
    AfterCommit,
    BeforeRollback,
    AfterRollback,
}

impl TransactionEvent {
    #[must_use]
    pub fn is_before(self) -> bool {
        matches!(
            self,
            TransactionEvent::BeforeStart
                | TransactionEvent::BeforeCommit
                | TransactionEvent::BeforeRollback
        )
    }
}

impl fmt::Display for TransactionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransactionEvent::BeforeStart => "BeforeTransactionStart",
            TransactionEvent::AfterStart => "AfterTransactionStart",
            TransactionEvent::BeforeCommit => "BeforeTransactionCommit",
            TransactionEvent::AfterCommit => "AfterTransactionCommit",
            TransactionEvent::BeforeRollback => "BeforeTransactionRollback",
            TransactionEvent::AfterRollback => "AfterTransactionRollback",
        };
        f.write_str(name)
    }
}

/// Identity of the session emitting an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: SessionId,
    pub mode: ReplicationMode,
}

/// What a listener sees for one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HookContext {
    pub session: SessionInfo,
    pub event: TransactionEvent,
    /// Nesting depth at the moment the event fires
    pub depth: usize,
}

/// Receiver of transaction lifecycle events.
///
/// Returning an error from a "before" event aborts the operation and leaves the
/// session as it was; an error from an "after" event is reported to the caller
/// but the transition already happened.
pub trait TransactionListener: Send + Sync {
    /// # Errors
    /// Any error aborts the broadcast and is returned to the session.
    fn on_event(&self, ctx: &HookContext) -> Result<(), QueryRunnerError>;
}

impl<F> TransactionListener for F
where
    F: Fn(&HookContext) -> Result<(), QueryRunnerError> + Send + Sync,
{
    fn on_event(&self, ctx: &HookContext) -> Result<(), QueryRunnerError> {
        self(ctx)
    }
}

#[derive(Clone, Default)]
pub struct EventBroadcaster {
    listeners: Vec<Arc<dyn TransactionListener>>,
}

impl fmt::Debug for EventBroadcaster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBroadcaster")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl EventBroadcaster {
    #[must_use]
    pub fn new(listeners: Vec<Arc<dyn TransactionListener>>) -> Self {
        Self { listeners }
    }

    pub fn subscribe(&mut self, listener: Arc<dyn TransactionListener>) {
        self.listeners.push(listener);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Deliver `ctx` to every listener in order.
    ///
    /// # Errors
    /// Returns the first listener error; later listeners are not called.
    pub fn broadcast(&self, ctx: &HookContext) -> Result<(), QueryRunnerError> {
        for listener in &self.listeners {
            listener.on_event(ctx).inspect_err(|err| {
                tracing::debug!(session = %ctx.session.id, event = %ctx.event, error = %err, "listener failed");
            })?;
        }
        Ok(())
    }
}
