//! Convenient imports for common functionality.
//!
//! This module re-exports the most commonly used types and functions
//! to make it easier to get started with the library.

pub use crate::client::{ClientConnection, ClientPool};
pub use crate::config::RunnerConfig;
pub use crate::ddl::{
    CreateTableOptions, DdlBuilder, DropTableOptions, Query, SchemaMutationPlan, Table,
    TableCheck, TableColumn, TableExclusion, TableForeignKey, TableIndex, TablePath, TableUnique,
    View,
};
pub use crate::error::{DriverError, QueryRunnerError};
pub use crate::events::{HookContext, TransactionEvent, TransactionListener};
pub use crate::results::{
    CanonicalResult, ClientResponse, LegacyResult, ResultRow, RowSequence, rows_from_values,
};
pub use crate::router::Driver;
pub use crate::runner::{ColumnInfo, QueryRunner};
pub use crate::types::{IsolationLevel, ReplicationMode, RowValues, SessionId};

#[cfg(feature = "postgres")]
pub use crate::postgres::{PostgresPool, postgres_driver};
