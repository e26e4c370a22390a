//! Nested transactions on top of a single-level backend.
//!
//! Depth 0 → 1 opens a real transaction with `BEGIN`. Every deeper start opens a
//! savepoint named `nest_<depth>_<counter>`, where `<depth>` is the depth before the
//! start and `<counter>` is a session-wide counter that only moves forward. The
//! counter is reset by [`TransactionManager::reset`] and nothing else, so ids stay
//! unique even when several nested scopes open one after another at the same depth.
//!
//! Invariants held between calls:
//! * `nesting_ids.len() == depth.saturating_sub(1)`
//! * `active == (depth > 0)`

use async_trait::async_trait;

use crate::error::QueryRunnerError;
use crate::events::{EventBroadcaster, HookContext, SessionInfo, TransactionEvent};
use crate::types::IsolationLevel;

/// Where the manager sends the statements it decides on.
#[async_trait]
pub trait StatementSink: Send {
    /// # Errors
    /// Returns the execution failure of `sql`.
    async fn run_statement(&mut self, sql: &str) -> Result<(), QueryRunnerError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionManager {
    depth: usize,
    nesting_ids: Vec<String>,
    savepoint_counter: u64,
    active: bool,
}

impl TransactionManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Savepoint ids of the open nested scopes, innermost last.
    #[must_use]
    pub fn nesting_ids(&self) -> &[String] {
        &self.nesting_ids
    }

    #[must_use]
    pub fn savepoint_counter(&self) -> u64 {
        self.savepoint_counter
    }

    /// Open a transaction scope.
    ///
    /// `isolation` is applied only when this opens the outermost transaction.
    ///
    /// # Errors
    /// Returns the `BeforeStart` listener error (state untouched), the statement
    /// failure (depth and stack untouched), or the `AfterStart` listener error
    /// (scope already open). A failed isolation level change rolls the fresh
    /// transaction back before its error is returned.
    pub async fn start<S>(
        &mut self,
        sink: &mut S,
        hooks: &EventBroadcaster,
        session: SessionInfo,
        isolation: Option<IsolationLevel>,
    ) -> Result<(), QueryRunnerError>
    where
        S: StatementSink + ?Sized,
    {
        let was_active = self.active;
        self.active = true;
        if let Err(err) = hooks.broadcast(&self.context(session, TransactionEvent::BeforeStart)) {
            self.active = was_active;
            return Err(err);
        }

        if self.depth == 0 {
            if let Err(err) = self.begin(sink, isolation).await {
                self.active = was_active;
                return Err(err);
            }
        } else {
            self.savepoint_counter += 1;
            let id = format!("nest_{}_{}", self.depth, self.savepoint_counter);
            if isolation.is_some() {
                tracing::debug!(session = %session.id, savepoint = %id, "isolation level ignored for nested transaction");
            }
            sink.run_statement(&format!("SAVEPOINT \"{id}\"")).await?;
            tracing::debug!(session = %session.id, depth = self.depth, savepoint = %id, "savepoint created");
            self.nesting_ids.push(id);
        }
        self.depth += 1;

        hooks.broadcast(&self.context(session, TransactionEvent::AfterStart))
    }

    async fn begin<S>(
        &mut self,
        sink: &mut S,
        isolation: Option<IsolationLevel>,
    ) -> Result<(), QueryRunnerError>
    where
        S: StatementSink + ?Sized,
    {
        sink.run_statement("BEGIN").await?;
        if let Some(level) = isolation {
            let set = format!("SET TRANSACTION ISOLATION LEVEL {}", level.as_sql());
            if let Err(err) = sink.run_statement(&set).await {
                // the server transaction is open; close it so depth 0 stays true
                if let Err(rollback) = sink.run_statement("ROLLBACK").await {
                    tracing::warn!(error = %rollback, "rollback after failed isolation level change failed");
                }
                return Err(err);
            }
        }
        Ok(())
    }

    /// Close the innermost scope, keeping its work.
    ///
    /// # Errors
    /// `TransactionNotStarted` at depth 0 (nothing issued), otherwise as for [`start`](Self::start).
    pub async fn commit<S>(
        &mut self,
        sink: &mut S,
        hooks: &EventBroadcaster,
        session: SessionInfo,
    ) -> Result<(), QueryRunnerError>
    where
        S: StatementSink + ?Sized,
    {
        self.finish(sink, hooks, session, Finish::Commit).await
    }

    /// Close the innermost scope, discarding its work.
    ///
    /// At depth > 1 the savepoint id is consumed: the next nested start gets a new one.
    ///
    /// # Errors
    /// `TransactionNotStarted` at depth 0 (nothing issued), otherwise as for [`start`](Self::start).
    pub async fn rollback<S>(
        &mut self,
        sink: &mut S,
        hooks: &EventBroadcaster,
        session: SessionInfo,
    ) -> Result<(), QueryRunnerError>
    where
        S: StatementSink + ?Sized,
    {
        self.finish(sink, hooks, session, Finish::Rollback).await
    }

    async fn finish<S>(
        &mut self,
        sink: &mut S,
        hooks: &EventBroadcaster,
        session: SessionInfo,
        kind: Finish,
    ) -> Result<(), QueryRunnerError>
    where
        S: StatementSink + ?Sized,
    {
        if self.depth == 0 {
            return Err(QueryRunnerError::TransactionNotStarted);
        }
        hooks.broadcast(&self.context(session, kind.before()))?;

        if self.depth == 1 {
            sink.run_statement(kind.top_level()).await?;
            self.active = false;
        } else {
            let Some(id) = self.nesting_ids.pop() else {
                return Err(QueryRunnerError::TransactionNotStarted);
            };
            if let Err(err) = sink.run_statement(&kind.savepoint_statement(&id)).await {
                self.nesting_ids.push(id);
                return Err(err);
            }
            tracing::debug!(session = %session.id, depth = self.depth, savepoint = %id, "savepoint closed");
        }
        self.depth -= 1;

        hooks.broadcast(&self.context(session, kind.after()))
    }

    /// Forget every open scope and restart the savepoint counter.
    pub fn reset(&mut self) {
        self.depth = 0;
        self.nesting_ids.clear();
        self.savepoint_counter = 0;
        self.active = false;
    }

    fn context(&self, session: SessionInfo, event: TransactionEvent) -> HookContext {
        HookContext {
            session,
            event,
            depth: self.depth,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Finish {
    Commit,
    Rollback,
}

impl Finish {
    fn before(self) -> TransactionEvent {
        match self {
            Finish::Commit => TransactionEvent::BeforeCommit,
            Finish::Rollback => TransactionEvent::BeforeRollback,
        }
    }

    fn after(self) -> TransactionEvent {
        match self {
            Finish::Commit => TransactionEvent::AfterCommit,
            Finish::Rollback => TransactionEvent::AfterRollback,
        }
    }

    fn top_level(self) -> &'static str {
        match self {
            Finish::Commit => "COMMIT",
            Finish::Rollback => "ROLLBACK",
        }
    }

    fn savepoint_statement(self, id: &str) -> String {
        match self {
            Finish::Commit => format!("RELEASE SAVEPOINT \"{id}\""),
            Finish::Rollback => format!("ROLLBACK TO SAVEPOINT \"{id}\""),
        }
    }
}
