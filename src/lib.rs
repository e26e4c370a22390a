//! Query runner over a single-level transactional database client.
//!
//! A [`Driver`] routes sessions to a primary or replica pool. Each
//! [`QueryRunner`] is one session: it emulates nested transactions with
//! savepoints, fires lifecycle events around every transaction boundary,
//! normalizes client results and runs reversible schema mutation plans.

pub mod client;
pub mod config;
pub mod ddl;
pub mod error;
pub mod events;
pub mod prelude;
pub mod results;
pub mod router;
pub mod runner;
pub mod transaction;
pub mod types;

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "test-utils")]
pub mod test_utils;

pub use client::{ClientConnection, ClientPool};
pub use config::RunnerConfig;
pub use ddl::{DdlBuilder, Query, SchemaMutationPlan, TablePath};
pub use error::{DriverError, QueryRunnerError};
pub use events::{EventBroadcaster, HookContext, SessionInfo, TransactionEvent, TransactionListener};
pub use results::{CanonicalResult, ClientResponse, LegacyResult, ResultRow, RowSequence};
pub use router::Driver;
pub use runner::{ColumnInfo, QueryRunner};
pub use types::{IsolationLevel, ReplicationMode, RowValues, SessionId};
