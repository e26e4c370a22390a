//! Reversible schema mutations.
//!
//! Every [`DdlBuilder`] operation returns a [`SchemaMutationPlan`]: the statements
//! that apply the change and the statements that undo it. The builder never
//! executes anything. Plans are assembled from steps; forward statements run
//! step by step in order, and the inverse runs the steps backwards so dependent
//! objects (indices, foreign keys) go away before the objects they hang off.
//!
//! Drop operations never guess object names. If the inverse would need a name the
//! caller did not supply, the operation fails with
//! [`QueryRunnerError::IrreversibleMutation`] before producing any statement.

mod columns;
mod constraints;
mod table;
mod tables;

use serde::{Deserialize, Serialize};

use crate::error::QueryRunnerError;
use crate::types::RowValues;

pub use table::{
    ColumnGeneration, Table, TableCheck, TableColumn, TableExclusion, TableForeignKey, TableIndex,
    TableUnique, View,
};
pub use tables::{CreateTableOptions, DropTableOptions};

/// Schema the backend resolves unqualified names against.
pub const IMPLICIT_SCHEMA: &str = "public";

/// Longest identifier the backend keeps without truncation.
const MAX_IDENTIFIER_LEN: usize = 63;

/// One statement with its bound parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub sql: String,
    #[serde(default)]
    pub parameters: Vec<RowValues>,
}

impl Query {
    #[must_use]
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            parameters: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_parameters(sql: impl Into<String>, parameters: Vec<RowValues>) -> Self {
        Self {
            sql: sql.into(),
            parameters,
        }
    }
}

/// Forward statements and the statements that undo them, both in execution order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaMutationPlan {
    pub up: Vec<Query>,
    pub down: Vec<Query>,
}

impl SchemaMutationPlan {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.up.is_empty() && self.down.is_empty()
    }

    /// Append `other` so that it runs after `self`, and is undone before it.
    pub fn extend(&mut self, other: SchemaMutationPlan) {
        self.up.extend(other.up);
        let mut down = other.down;
        down.append(&mut self.down);
        self.down = down;
    }

    /// The plan that reverts this one.
    #[must_use]
    pub fn reversed(self) -> SchemaMutationPlan {
        SchemaMutationPlan {
            up: self.down,
            down: self.up,
        }
    }
}

/// Steps of a plan under construction.
#[derive(Debug, Default)]
struct PlanBuilder {
    steps: Vec<(Vec<String>, Vec<String>)>,
}

impl PlanBuilder {
    fn step(&mut self, up: impl Into<String>, down: impl Into<String>) {
        self.steps.push((vec![up.into()], vec![down.into()]));
    }

    fn step_many(&mut self, up: Vec<String>, down: Vec<String>) {
        self.steps.push((up, down));
    }

    fn finish(self) -> SchemaMutationPlan {
        let mut plan = SchemaMutationPlan::default();
        for (up, _) in &self.steps {
            plan.up.extend(up.iter().cloned().map(Query::new));
        }
        for (_, down) in self.steps.into_iter().rev() {
            plan.down.extend(down.into_iter().map(Query::new));
        }
        plan
    }
}

/// Address of a table, view or other schema object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TablePath {
    /// Carried for callers only. A PostgreSQL statement always runs in the database
    /// its connection is open on, so rendered SQL leaves this out; point the pool at
    /// the right database instead.
    pub database: Option<String>,
    pub schema: Option<String>,
    pub name: String,
}

impl TablePath {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            database: None,
            schema: None,
            name: name.into(),
        }
    }

    #[must_use]
    pub fn in_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    #[must_use]
    pub fn in_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Parse `name`, `schema.name` or `database.schema.name`.
    #[must_use]
    pub fn parse(path: &str) -> Self {
        let parts: Vec<&str> = path.split('.').collect();
        match parts.as_slice() {
            [database, schema, name] => TablePath::new(*name)
                .in_schema(*schema)
                .in_database(*database),
            [schema, name] => TablePath::new(*name).in_schema(*schema),
            _ => TablePath::new(path),
        }
    }

    #[must_use]
    pub fn with_name(&self, name: impl Into<String>) -> Self {
        Self {
            database: self.database.clone(),
            schema: self.schema.clone(),
            name: name.into(),
        }
    }
}

/// Builds reversible plans for the PostgreSQL dialect.
#[derive(Debug, Clone, Default)]
pub struct DdlBuilder {
    default_schema: Option<String>,
}

impl DdlBuilder {
    #[must_use]
    pub fn new(default_schema: Option<String>) -> Self {
        Self { default_schema }
    }

    #[must_use]
    pub fn default_schema(&self) -> Option<&str> {
        self.default_schema.as_deref()
    }

    /// Schema a path resolves to, falling back to the configured default.
    #[must_use]
    pub fn resolve_schema<'a>(&'a self, path: &'a TablePath) -> &'a str {
        path.schema
            .as_deref()
            .or(self.default_schema.as_deref())
            .unwrap_or(IMPLICIT_SCHEMA)
    }

    /// Quoted, schema-qualified reference; the schema is left out when it is the
    /// backend's implicit one. [`TablePath::database`] is never rendered.
    #[must_use]
    pub fn escape_path(&self, path: &TablePath) -> String {
        self.qualify(path, &path.name)
    }

    /// Reference to an object (e.g. an index) living in the same schema as `path`.
    fn qualify(&self, path: &TablePath, name: &str) -> String {
        let schema = self.resolve_schema(path);
        if schema == IMPLICIT_SCHEMA {
            quote_identifier(name)
        } else {
            format!("{}.{}", quote_identifier(schema), quote_identifier(name))
        }
    }
}

#[must_use]
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[must_use]
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn quote_columns(columns: &[String]) -> String {
    columns
        .iter()
        .map(|c| quote_identifier(c))
        .collect::<Vec<_>>()
        .join(", ")
}

/// `<table>_<col>_<col>_<suffix>`, cut to the identifier limit.
fn default_name(table: &str, columns: &[String], suffix: &str) -> String {
    let mut parts = Vec::with_capacity(columns.len() + 2);
    parts.push(table);
    parts.extend(columns.iter().map(String::as_str));
    parts.push(suffix);
    truncate_identifier(parts.join("_"))
}

fn truncate_identifier(mut name: String) -> String {
    if name.len() > MAX_IDENTIFIER_LEN {
        let mut cut = MAX_IDENTIFIER_LEN;
        while !name.is_char_boundary(cut) {
            cut -= 1;
        }
        name.truncate(cut);
    }
    name
}

fn require_name<'a>(name: Option<&'a str>, what: &str, table: &TablePath) -> Result<&'a str, QueryRunnerError> {
    name.ok_or_else(|| {
        QueryRunnerError::IrreversibleMutation(format!(
            "{what} on table \"{}\" has no known name",
            table.name
        ))
    })
}
