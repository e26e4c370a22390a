use std::sync::Arc;

use deadpool_postgres::Config as PgConfig;
use tokio_postgres::NoTls;

use super::connection::PostgresPool;
use crate::client::ClientPool;
use crate::config::RunnerConfig;
use crate::error::QueryRunnerError;
use crate::router::Driver;

impl PostgresPool {
    /// Validate `pg_config` and build a pool from it. No connection is opened yet.
    ///
    /// # Errors
    /// Returns `QueryRunnerError::ConfigError` if required config fields are missing or
    /// `QueryRunnerError::ConnectionError` if pool creation fails.
    pub fn from_config(pg_config: &PgConfig) -> Result<Self, QueryRunnerError> {
        if pg_config.dbname.is_none() {
            return Err(QueryRunnerError::ConfigError("dbname is required".to_string()));
        }
        if pg_config.host.is_none() && pg_config.hosts.is_none() {
            return Err(QueryRunnerError::ConfigError("host is required".to_string()));
        }
        if pg_config.port.is_none() && pg_config.ports.is_none() {
            return Err(QueryRunnerError::ConfigError("port is required".to_string()));
        }
        if pg_config.user.is_none() {
            return Err(QueryRunnerError::ConfigError("user is required".to_string()));
        }

        let pool = pg_config
            .create_pool(Some(deadpool_postgres::Runtime::Tokio1), NoTls)
            .map_err(|e| {
                QueryRunnerError::ConnectionError(format!("Failed to create Postgres pool: {e}"))
            })?;
        Ok(PostgresPool::new(pool))
    }
}

/// Build a driver over a primary and zero or more read replicas.
///
/// # Errors
/// Returns the first configuration error among `master` and `slaves`.
pub fn postgres_driver(
    master: &PgConfig,
    slaves: &[PgConfig],
    config: RunnerConfig,
) -> Result<Arc<Driver>, QueryRunnerError> {
    let master: Arc<dyn ClientPool> = Arc::new(PostgresPool::from_config(master)?);
    let slaves = slaves
        .iter()
        .map(|slave| {
            PostgresPool::from_config(slave).map(|pool| Arc::new(pool) as Arc<dyn ClientPool>)
        })
        .collect::<Result<Vec<_>, _>>()?;
    tracing::debug!(replicas = slaves.len(), "postgres driver configured");
    Ok(Arc::new(Driver::new(master, config).with_slaves(slaves)))
}
