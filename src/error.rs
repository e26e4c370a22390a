use thiserror::Error;

use crate::types::RowValues;

/// Failure reported by the underlying database client.
///
/// Every diagnostic field the server sent is kept verbatim so callers see the
/// original backend information, not a reworded copy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Error)]
#[error("{message}{}", sqlstate_suffix(.code))]
pub struct DriverError {
    /// Primary human-readable message
    pub message: String,
    /// SQLSTATE code, e.g. `23505`
    pub code: Option<String>,
    pub severity: Option<String>,
    pub detail: Option<String>,
    pub hint: Option<String>,
    /// Cursor position into the statement text (1-based, as sent by the server)
    pub position: Option<String>,
    pub where_: Option<String>,
    pub schema: Option<String>,
    pub table: Option<String>,
    pub column: Option<String>,
    pub data_type: Option<String>,
    pub constraint: Option<String>,
    pub routine: Option<String>,
}

impl DriverError {
    /// Error carrying only a message, for client-side failures with no server diagnostics.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

fn sqlstate_suffix(code: &Option<String>) -> String {
    code.as_ref()
        .map(|code| format!(" (SQLSTATE {code})"))
        .unwrap_or_default()
}

#[derive(Debug, Error)]
pub enum QueryRunnerError {
    #[error("Transaction is not started")]
    TransactionNotStarted,

    #[error("Query runner already released, cannot run queries anymore")]
    SessionAlreadyReleased,

    #[error("Statement failed: {source}; statement: {statement}")]
    StatementFailed {
        statement: String,
        parameters: Vec<RowValues>,
        #[source]
        source: DriverError,
    },

    #[error("Irreversible schema mutation: {0}")]
    IrreversibleMutation(String),

    #[error("Schema object not found: {0}")]
    SchemaObjectNotFound(String),

    #[error("Invalid schema mutation: {0}")]
    InvalidMutation(String),

    #[error("Lifecycle hook failed: {0}")]
    HookFailed(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Parameter conversion error: {0}")]
    ParameterError(String),
}

impl QueryRunnerError {
    /// Server diagnostics of a failed statement, if this error wraps one.
    #[must_use]
    pub fn driver_error(&self) -> Option<&DriverError> {
        match self {
            Self::StatementFailed { source, .. } => Some(source),
            _ => None,
        }
    }

    /// Text of the statement that failed, if any.
    #[must_use]
    pub fn statement(&self) -> Option<&str> {
        match self {
            Self::StatementFailed { statement, .. } => Some(statement),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn driver_error_display_appends_sqlstate() {
        let plain = DriverError::new("relation \"users\" does not exist");
        assert_eq!(plain.to_string(), "relation \"users\" does not exist");
        let coded = plain.with_code("42P01");
        assert_eq!(coded.to_string(), "relation \"users\" does not exist (SQLSTATE 42P01)");
    }

    #[test]
    fn statement_failure_exposes_driver_error_as_source() {
        use std::error::Error as _;
        let err = QueryRunnerError::StatementFailed {
            statement: "SELECT 1".into(),
            parameters: Vec::new(),
            source: DriverError::new("boom").with_code("XX000"),
        };
        let source = err.source().map(ToString::to_string);
        assert_eq!(source.as_deref(), Some("boom (SQLSTATE XX000)"));
    }
}
