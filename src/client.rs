//! Seam to the underlying database client.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::{DriverError, QueryRunnerError};
use crate::results::ClientResponse;
use crate::types::RowValues;

/// One physical connection, owned by exactly one session while that session is live.
#[async_trait]
pub trait ClientConnection: Send {
    /// Run one statement and return whatever shape the client produces.
    ///
    /// # Errors
    /// Returns the client's diagnostics when the server rejects the statement or the
    /// connection fails mid-call.
    async fn execute(
        &mut self,
        sql: &str,
        params: &[RowValues],
    ) -> Result<ClientResponse, DriverError>;
}

/// Source of connections for one endpoint (the primary or a single replica).
#[async_trait]
pub trait ClientPool: Send + Sync {
    /// Hand out a connection for a session to own.
    ///
    /// # Errors
    /// Returns `QueryRunnerError::ConnectionError` if no connection can be obtained.
    async fn connect(&self) -> Result<Box<dyn ClientConnection>, QueryRunnerError>;

    /// Terminate the client, giving in-flight work up to `drain_timeout` to finish.
    async fn shutdown(&self, drain_timeout: Duration);
}
