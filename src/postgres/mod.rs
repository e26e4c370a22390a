//! PostgreSQL client built on `tokio-postgres` and `deadpool-postgres`.
//!
//! - config: pool validation and driver construction
//! - params: `RowValues` to wire-format conversion
//! - query: row extraction and server error mapping
//! - connection: the [`ClientPool`](crate::client::ClientPool) and
//!   [`ClientConnection`](crate::client::ClientConnection) implementations

pub mod config;
pub mod connection;
pub mod params;
pub mod query;

pub use config::postgres_driver;
pub use connection::{PostgresConnection, PostgresPool};
pub use params::Params;
