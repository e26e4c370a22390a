//! The query runner: one logical database session.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use crate::ddl::{DdlBuilder, Query, SchemaMutationPlan, TablePath};
use crate::error::QueryRunnerError;
use crate::events::{EventBroadcaster, SessionInfo, TransactionListener};
use crate::results::{CanonicalResult, LegacyResult, normalize};
use crate::router::{Driver, SessionSlot};
use crate::transaction::{StatementSink, TransactionManager};
use crate::types::{IsolationLevel, ReplicationMode, RowValues, SessionId};

/// Column as reported by the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub is_nullable: bool,
    pub default: Option<String>,
}

/// Statement path of a session: binds lazily, then runs everything on its one connection.
struct SessionExecutor {
    driver: Arc<Driver>,
    slot: Arc<SessionSlot>,
    mode: ReplicationMode,
}

impl SessionExecutor {
    async fn connect(&self) -> Result<(), QueryRunnerError> {
        if self.slot.is_released() {
            return Err(QueryRunnerError::SessionAlreadyReleased);
        }
        let mut connection = self.slot.connection.lock().await;
        if self.slot.is_released() {
            return Err(QueryRunnerError::SessionAlreadyReleased);
        }
        if connection.is_none() {
            *connection = Some(self.driver.bind(&self.slot, self.mode).await?);
        }
        Ok(())
    }

    async fn execute(
        &self,
        sql: &str,
        params: &[RowValues],
    ) -> Result<CanonicalResult, QueryRunnerError> {
        if self.slot.is_released() {
            return Err(QueryRunnerError::SessionAlreadyReleased);
        }
        let mut connection = self.slot.connection.lock().await;
        // shutdown may have drained the slot while we waited
        if self.slot.is_released() {
            return Err(QueryRunnerError::SessionAlreadyReleased);
        }
        if connection.is_none() {
            *connection = Some(self.driver.bind(&self.slot, self.mode).await?);
        }
        let Some(client) = connection.as_mut() else {
            return Err(QueryRunnerError::ConnectionError(
                "session has no connection".into(),
            ));
        };

        tracing::debug!(session = %self.slot.id, statement = sql, params = ?params, "executing");
        let started = Instant::now();
        let response = client.execute(sql, params).await.map_err(|source| {
            tracing::warn!(session = %self.slot.id, statement = sql, error = %source, "statement failed");
            QueryRunnerError::StatementFailed {
                statement: sql.to_string(),
                parameters: params.to_vec(),
                source,
            }
        })?;

        let elapsed = started.elapsed();
        if let Some(limit) = self.driver.config().max_query_execution_time {
            if elapsed > limit {
                tracing::warn!(session = %self.slot.id, statement = sql, elapsed_ms = elapsed.as_millis(), "slow statement");
            }
        }
        Ok(normalize(response))
    }
}

#[async_trait]
impl StatementSink for SessionExecutor {
    async fn run_statement(&mut self, sql: &str) -> Result<(), QueryRunnerError> {
        self.execute(sql, &[]).await.map(|_| ())
    }
}

/// A single logical session.
///
/// Calls on one runner must not overlap; every statement runs in submission order
/// on the connection the runner was bound to. Once released, every operation
/// fails with [`QueryRunnerError::SessionAlreadyReleased`].
pub struct QueryRunner {
    info: SessionInfo,
    executor: SessionExecutor,
    transactions: TransactionManager,
    hooks: EventBroadcaster,
    ddl: DdlBuilder,
    sql_memory: Option<SchemaMutationPlan>,
}

impl std::fmt::Debug for QueryRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryRunner")
            .field("info", &self.info)
            .field("transactions", &self.transactions)
            .field("released", &self.is_released())
            .finish_non_exhaustive()
    }
}

impl QueryRunner {
    pub(crate) fn new(
        driver: Arc<Driver>,
        slot: Arc<SessionSlot>,
        mode: ReplicationMode,
        hooks: EventBroadcaster,
    ) -> Self {
        let ddl = DdlBuilder::new(driver.config().default_schema.clone());
        Self {
            info: SessionInfo { id: slot.id, mode },
            executor: SessionExecutor { driver, slot, mode },
            transactions: TransactionManager::new(),
            hooks,
            ddl,
            sql_memory: None,
        }
    }

    #[must_use]
    pub fn id(&self) -> SessionId {
        self.info.id
    }

    #[must_use]
    pub fn replication_mode(&self) -> ReplicationMode {
        self.info.mode
    }

    #[must_use]
    pub fn is_released(&self) -> bool {
        self.executor.slot.is_released()
    }

    #[must_use]
    pub fn transaction_depth(&self) -> usize {
        if self.is_released() { 0 } else { self.transactions.depth() }
    }

    #[must_use]
    pub fn is_transaction_active(&self) -> bool {
        !self.is_released() && self.transactions.is_active()
    }

    /// Savepoint ids of the open nested scopes, innermost last.
    #[must_use]
    pub fn nesting_ids(&self) -> &[String] {
        if self.is_released() { &[] } else { self.transactions.nesting_ids() }
    }

    #[must_use]
    pub fn savepoint_counter(&self) -> u64 {
        if self.is_released() { 0 } else { self.transactions.savepoint_counter() }
    }

    /// Builder configured with this session's default schema.
    #[must_use]
    pub fn ddl(&self) -> &DdlBuilder {
        &self.ddl
    }

    pub fn subscribe(&mut self, listener: Arc<dyn TransactionListener>) {
        self.hooks.subscribe(listener);
    }

    /// Clear local state left behind if the driver drained this session.
    fn ensure_live(&mut self) -> Result<(), QueryRunnerError> {
        if self.is_released() {
            self.transactions.reset();
            self.sql_memory = None;
            return Err(QueryRunnerError::SessionAlreadyReleased);
        }
        Ok(())
    }

    /// Bind to a connection now instead of on the first statement.
    ///
    /// # Errors
    /// `SessionAlreadyReleased`, or `ConnectionError` if no connection is available.
    pub async fn connect(&mut self) -> Result<(), QueryRunnerError> {
        self.ensure_live()?;
        self.executor.connect().await
    }

    /// Open a transaction, or a savepoint when one is already open.
    ///
    /// # Errors
    /// See [`TransactionManager::start`]; also `SessionAlreadyReleased`.
    pub async fn start_transaction(
        &mut self,
        isolation: Option<IsolationLevel>,
    ) -> Result<(), QueryRunnerError> {
        self.ensure_live()?;
        self.transactions
            .start(&mut self.executor, &self.hooks, self.info, isolation)
            .await
    }

    /// # Errors
    /// `TransactionNotStarted` at depth 0; see [`TransactionManager::commit`].
    pub async fn commit_transaction(&mut self) -> Result<(), QueryRunnerError> {
        self.ensure_live()?;
        self.transactions
            .commit(&mut self.executor, &self.hooks, self.info)
            .await
    }

    /// # Errors
    /// `TransactionNotStarted` at depth 0; see [`TransactionManager::rollback`].
    pub async fn rollback_transaction(&mut self) -> Result<(), QueryRunnerError> {
        self.ensure_live()?;
        self.transactions
            .rollback(&mut self.executor, &self.hooks, self.info)
            .await
    }

    /// Run one statement and return its canonical result.
    ///
    /// # Errors
    /// `StatementFailed` carrying the server diagnostics, the statement and its parameters.
    pub async fn query(
        &mut self,
        sql: &str,
        params: &[RowValues],
    ) -> Result<CanonicalResult, QueryRunnerError> {
        self.ensure_live()?;
        self.executor.execute(sql, params).await
    }

    /// Like [`query`](Self::query), but UPDATE/DELETE come back paired with their
    /// affected count.
    ///
    /// # Errors
    /// As for [`query`](Self::query).
    pub async fn query_legacy(
        &mut self,
        sql: &str,
        params: &[RowValues],
    ) -> Result<LegacyResult, QueryRunnerError> {
        Ok(self.query(sql, params).await?.into_legacy())
    }

    /// Run the forward statements of `plan` in order. The inverse is left to the caller.
    ///
    /// A failure stops the plan where it is; statements already run stay applied
    /// unless the caller wrapped the plan in a transaction. In SQL memory mode the
    /// plan is recorded instead of executed.
    ///
    /// # Errors
    /// The first `StatementFailed`.
    pub async fn execute_plan(&mut self, plan: &SchemaMutationPlan) -> Result<(), QueryRunnerError> {
        self.ensure_live()?;
        if let Some(memory) = self.sql_memory.as_mut() {
            memory.extend(plan.clone());
            return Ok(());
        }
        for Query { sql, parameters } in &plan.up {
            self.executor.execute(sql, parameters).await?;
        }
        Ok(())
    }

    /// Record plans passed to [`execute_plan`](Self::execute_plan) instead of running them.
    pub fn enable_sql_memory(&mut self) {
        if self.sql_memory.is_none() {
            self.sql_memory = Some(SchemaMutationPlan::default());
        }
    }

    pub fn disable_sql_memory(&mut self) {
        self.sql_memory = None;
    }

    pub fn clear_sql_memory(&mut self) {
        if let Some(memory) = self.sql_memory.as_mut() {
            *memory = SchemaMutationPlan::default();
        }
    }

    /// Everything recorded since memory mode was enabled or last cleared.
    #[must_use]
    pub fn memory_sql(&self) -> SchemaMutationPlan {
        self.sql_memory.clone().unwrap_or_default()
    }

    /// Remove all rows from a table. Not reversible, never part of a plan.
    ///
    /// # Errors
    /// As for [`query`](Self::query).
    pub async fn clear_table(&mut self, path: &TablePath) -> Result<(), QueryRunnerError> {
        let sql = format!("TRUNCATE TABLE {}", self.ddl.escape_path(path));
        self.query(&sql, &[]).await.map(|_| ())
    }

    /// Forget all transaction state and let go of the connection. Idempotent.
    ///
    /// An open transaction is abandoned without a statement unless
    /// [`RunnerConfig::rollback_on_release`](crate::config::RunnerConfig) is set, in
    /// which case a best-effort `ROLLBACK` is sent first.
    pub async fn release(&mut self) {
        if self.is_released() {
            self.transactions.reset();
            self.sql_memory = None;
            return;
        }
        if self.transactions.depth() > 0 {
            if self.executor.driver.config().rollback_on_release {
                if let Err(err) = self.executor.execute("ROLLBACK", &[]).await {
                    tracing::warn!(session = %self.info.id, error = %err, "rollback on release failed");
                }
            } else {
                tracing::debug!(session = %self.info.id, depth = self.transactions.depth(), "releasing with open transaction");
            }
        }
        self.transactions.reset();
        self.sql_memory = None;
        self.executor.slot.drain().await;
        self.executor.driver.deregister(self.info.id);
        tracing::debug!(session = %self.info.id, "session released");
    }

    /// # Errors
    /// As for [`query`](Self::query).
    pub async fn current_database(&mut self) -> Result<String, QueryRunnerError> {
        let result = self.query("SELECT current_database() AS \"name\"", &[]).await?;
        first_text(&result, "name")
    }

    /// # Errors
    /// As for [`query`](Self::query).
    pub async fn current_schema(&mut self) -> Result<String, QueryRunnerError> {
        let result = self.query("SELECT current_schema() AS \"name\"", &[]).await?;
        first_text(&result, "name")
    }

    /// # Errors
    /// As for [`query`](Self::query).
    pub async fn has_database(&mut self, name: &str) -> Result<bool, QueryRunnerError> {
        let result = self
            .query(
                "SELECT EXISTS (SELECT 1 FROM pg_database WHERE datname = $1::text) AS \"exists\"",
                &[RowValues::from(name)],
            )
            .await?;
        first_bool(&result)
    }

    /// # Errors
    /// As for [`query`](Self::query).
    pub async fn has_schema(&mut self, name: &str) -> Result<bool, QueryRunnerError> {
        let result = self
            .query(
                "SELECT EXISTS (SELECT 1 FROM information_schema.schemata WHERE schema_name = $1::text) AS \"exists\"",
                &[RowValues::from(name)],
            )
            .await?;
        first_bool(&result)
    }

    /// # Errors
    /// As for [`query`](Self::query).
    pub async fn has_table(&mut self, path: &TablePath) -> Result<bool, QueryRunnerError> {
        let params = self.schema_and_name(path);
        let result = self
            .query(
                "SELECT EXISTS (SELECT 1 FROM information_schema.tables WHERE table_schema = $1::text AND table_name = $2::text) AS \"exists\"",
                &params,
            )
            .await?;
        first_bool(&result)
    }

    /// # Errors
    /// As for [`query`](Self::query).
    pub async fn has_column(
        &mut self,
        path: &TablePath,
        column: &str,
    ) -> Result<bool, QueryRunnerError> {
        let mut params = self.schema_and_name(path);
        params.push(RowValues::from(column));
        let result = self
            .query(
                "SELECT EXISTS (SELECT 1 FROM information_schema.columns WHERE table_schema = $1::text AND table_name = $2::text AND column_name = $3::text) AS \"exists\"",
                &params,
            )
            .await?;
        first_bool(&result)
    }

    /// Base tables in `schema` (or the session's default), sorted by name.
    ///
    /// # Errors
    /// As for [`query`](Self::query).
    pub async fn list_tables(&mut self, schema: Option<&str>) -> Result<Vec<String>, QueryRunnerError> {
        let schema = schema
            .or(self.ddl.default_schema())
            .unwrap_or(crate::ddl::IMPLICIT_SCHEMA)
            .to_string();
        let result = self
            .query(
                "SELECT table_name::text AS \"name\" FROM information_schema.tables WHERE table_schema = $1::text AND table_type = 'BASE TABLE' ORDER BY table_name",
                &[RowValues::Text(schema)],
            )
            .await?;
        all_text(&result, "name")
    }

    /// # Errors
    /// As for [`query`](Self::query).
    pub async fn list_columns(&mut self, path: &TablePath) -> Result<Vec<ColumnInfo>, QueryRunnerError> {
        let params = self.schema_and_name(path);
        let result = self
            .query(
                "SELECT column_name::text AS \"name\", data_type::text AS \"data_type\", is_nullable::text AS \"is_nullable\", column_default::text AS \"default\" FROM information_schema.columns WHERE table_schema = $1::text AND table_name = $2::text ORDER BY ordinal_position",
                &params,
            )
            .await?;
        result
            .rows
            .iter()
            .map(|row| {
                Ok(ColumnInfo {
                    name: text_field(row.get("name"), "name")?,
                    data_type: text_field(row.get("data_type"), "data_type")?,
                    is_nullable: row.get("is_nullable").and_then(RowValues::as_text) == Some("YES"),
                    default: row.get("default").and_then(RowValues::as_text).map(str::to_string),
                })
            })
            .collect()
    }

    /// Index definitions (`CREATE INDEX ...` text) of a table, sorted by index name.
    ///
    /// # Errors
    /// As for [`query`](Self::query).
    pub async fn list_indices(&mut self, path: &TablePath) -> Result<Vec<String>, QueryRunnerError> {
        let params = self.schema_and_name(path);
        let result = self
            .query(
                "SELECT indexdef AS \"definition\" FROM pg_indexes WHERE schemaname = $1::text AND tablename = $2::text ORDER BY indexname",
                &params,
            )
            .await?;
        all_text(&result, "definition")
    }

    fn schema_and_name(&self, path: &TablePath) -> Vec<RowValues> {
        vec![
            RowValues::from(self.ddl.resolve_schema(path)),
            RowValues::from(path.name.as_str()),
        ]
    }
}

impl Drop for QueryRunner {
    fn drop(&mut self) {
        if !self.executor.slot.mark_released() {
            return;
        }
        self.executor.driver.deregister(self.info.id);
        if self.transactions.depth() > 0 && self.executor.driver.config().rollback_on_release {
            let slot = Arc::clone(&self.executor.slot);
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    let mut connection = slot.connection.lock().await;
                    if let Some(client) = connection.as_mut() {
                        if let Err(err) = client.execute("ROLLBACK", &[]).await {
                            tracing::warn!(session = %slot.id, error = %err, "rollback on drop failed");
                        }
                    }
                    connection.take();
                });
            }
        }
    }
}

fn text_field(value: Option<&RowValues>, column: &str) -> Result<String, QueryRunnerError> {
    value
        .and_then(RowValues::as_text)
        .map(str::to_string)
        .ok_or_else(|| QueryRunnerError::ParameterError(format!("expected text in column \"{column}\"")))
}

fn first_text(result: &CanonicalResult, column: &str) -> Result<String, QueryRunnerError> {
    text_field(result.rows.first().and_then(|row| row.get(column)), column)
}

fn all_text(result: &CanonicalResult, column: &str) -> Result<Vec<String>, QueryRunnerError> {
    result
        .rows
        .iter()
        .map(|row| text_field(row.get(column), column))
        .collect()
}

fn first_bool(result: &CanonicalResult) -> Result<bool, QueryRunnerError> {
    result
        .rows
        .first()
        .and_then(|row| row.get_by_index(0))
        .and_then(RowValues::as_bool)
        .copied()
        .ok_or_else(|| QueryRunnerError::ParameterError("expected a boolean result".into()))
}
