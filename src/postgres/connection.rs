use std::time::Duration;

use async_trait::async_trait;
use deadpool_postgres::{Object, Pool};
use futures_util::{TryStreamExt, pin_mut};

use super::params::Params;
use super::query::{build_rows, command_tag};
use crate::client::{ClientConnection, ClientPool};
use crate::error::{DriverError, QueryRunnerError};
use crate::results::{ClientResponse, RowSequence};
use crate::types::RowValues;

/// One endpoint: a `deadpool-postgres` pool for the primary or a single replica.
#[derive(Clone)]
pub struct PostgresPool {
    pool: Pool,
}

impl std::fmt::Debug for PostgresPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = self.pool.status();
        f.debug_struct("PostgresPool")
            .field("size", &status.size)
            .field("available", &status.available)
            .finish()
    }
}

impl PostgresPool {
    #[must_use]
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn inner(&self) -> &Pool {
        &self.pool
    }
}

#[async_trait]
impl ClientPool for PostgresPool {
    async fn connect(&self) -> Result<Box<dyn ClientConnection>, QueryRunnerError> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| QueryRunnerError::ConnectionError(format!("Failed to get Postgres connection: {e}")))?;
        Ok(Box::new(PostgresConnection { client }))
    }

    /// Waits until every checked-out connection is back in the pool, then closes it.
    async fn shutdown(&self, drain_timeout: Duration) {
        let drained = tokio::time::timeout(drain_timeout, async {
            loop {
                let status = self.pool.status();
                if status.available >= status.size {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await;
        if drained.is_err() {
            let status = self.pool.status();
            tracing::warn!(
                in_use = status.size.saturating_sub(status.available),
                timeout_ms = drain_timeout.as_millis(),
                "closing Postgres pool with connections still in use"
            );
        }
        self.pool.close();
    }
}

/// A pooled connection, returned to the pool when dropped.
pub struct PostgresConnection {
    client: Object,
}

#[async_trait]
impl ClientConnection for PostgresConnection {
    async fn execute(
        &mut self,
        sql: &str,
        params: &[RowValues],
    ) -> Result<ClientResponse, DriverError> {
        let stmt = self.client.prepare(sql).await?;
        let converted = Params::convert(params);

        let stream = self
            .client
            .query_raw(&stmt, converted.as_refs().iter().copied())
            .await?;
        pin_mut!(stream);
        let mut rows = Vec::new();
        while let Some(row) = stream.try_next().await? {
            rows.push(row);
        }

        let mut sequence = RowSequence::new(build_rows(stmt.columns(), &rows)?);
        if let Some(command) = command_tag(sql) {
            sequence = sequence.with_command(command);
        }
        if let Some(count) = stream.rows_affected() {
            sequence = sequence.with_count(count);
        }
        Ok(ClientResponse::Rows(sequence))
    }
}
