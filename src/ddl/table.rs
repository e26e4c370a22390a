use serde::{Deserialize, Serialize};

use super::TablePath;

/// How a column's value is produced by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnGeneration {
    IdentityAlways,
    IdentityByDefault,
    /// `GENERATED ALWAYS AS (<expr>) STORED`
    Stored(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableColumn {
    pub name: String,
    /// Full type text, e.g. `varchar(255)` or `timestamp with time zone`
    pub sql_type: String,
    pub is_nullable: bool,
    pub is_primary: bool,
    /// Default expression, emitted verbatim
    pub default: Option<String>,
    pub generated: Option<ColumnGeneration>,
    pub collation: Option<String>,
    pub comment: Option<String>,
}

impl TableColumn {
    #[must_use]
    pub fn new(name: impl Into<String>, sql_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql_type: sql_type.into(),
            is_nullable: true,
            is_primary: false,
            default: None,
            generated: None,
            collation: None,
            comment: None,
        }
    }

    #[must_use]
    pub fn not_null(mut self) -> Self {
        self.is_nullable = false;
        self
    }

    /// Mark as part of the primary key (implies NOT NULL).
    #[must_use]
    pub fn primary(mut self) -> Self {
        self.is_primary = true;
        self.is_nullable = false;
        self
    }

    #[must_use]
    pub fn default_value(mut self, expression: impl Into<String>) -> Self {
        self.default = Some(expression.into());
        self
    }

    #[must_use]
    pub fn generated(mut self, generation: ColumnGeneration) -> Self {
        self.generated = Some(generation);
        self
    }

    #[must_use]
    pub fn collate(mut self, collation: impl Into<String>) -> Self {
        self.collation = Some(collation.into());
        self
    }

    #[must_use]
    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableIndex {
    pub name: Option<String>,
    pub columns: Vec<String>,
    pub is_unique: bool,
    /// Access method, e.g. `gin`
    pub method: Option<String>,
    /// Partial index predicate
    pub where_clause: Option<String>,
}

impl TableIndex {
    #[must_use]
    pub fn new(name: Option<&str>, columns: &[&str]) -> Self {
        Self {
            name: name.map(str::to_string),
            columns: columns.iter().map(|c| (*c).to_string()).collect(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn unique(mut self) -> Self {
        self.is_unique = true;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableUnique {
    pub name: Option<String>,
    pub columns: Vec<String>,
    /// e.g. `INITIALLY DEFERRED`
    pub deferrable: Option<String>,
}

impl TableUnique {
    #[must_use]
    pub fn new(name: Option<&str>, columns: &[&str]) -> Self {
        Self {
            name: name.map(str::to_string),
            columns: columns.iter().map(|c| (*c).to_string()).collect(),
            deferrable: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableCheck {
    pub name: Option<String>,
    pub expression: String,
    /// Columns the expression reads; a column drop cannot be planned without them
    pub columns: Vec<String>,
}

impl TableCheck {
    #[must_use]
    pub fn new(name: Option<&str>, expression: impl Into<String>) -> Self {
        Self {
            name: name.map(str::to_string),
            expression: expression.into(),
            columns: Vec::new(),
        }
    }

    #[must_use]
    pub fn on_columns(mut self, columns: &[&str]) -> Self {
        self.columns = columns.iter().map(|c| (*c).to_string()).collect();
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableExclusion {
    pub name: Option<String>,
    /// Everything after `EXCLUDE`, e.g. `USING gist ("room" WITH =, "during" WITH &&)`
    pub expression: String,
    /// Columns the element list uses; a column drop cannot be planned without them
    pub columns: Vec<String>,
}

impl TableExclusion {
    #[must_use]
    pub fn new(name: Option<&str>, expression: impl Into<String>) -> Self {
        Self {
            name: name.map(str::to_string),
            expression: expression.into(),
            columns: Vec::new(),
        }
    }

    #[must_use]
    pub fn on_columns(mut self, columns: &[&str]) -> Self {
        self.columns = columns.iter().map(|c| (*c).to_string()).collect();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableForeignKey {
    pub name: Option<String>,
    pub columns: Vec<String>,
    pub referenced_table: TablePath,
    pub referenced_columns: Vec<String>,
    pub on_delete: Option<String>,
    pub on_update: Option<String>,
    pub deferrable: Option<String>,
}

impl TableForeignKey {
    #[must_use]
    pub fn new(
        name: Option<&str>,
        columns: &[&str],
        referenced_table: TablePath,
        referenced_columns: &[&str],
    ) -> Self {
        Self {
            name: name.map(str::to_string),
            columns: columns.iter().map(|c| (*c).to_string()).collect(),
            referenced_table,
            referenced_columns: referenced_columns.iter().map(|c| (*c).to_string()).collect(),
            on_delete: None,
            on_update: None,
            deferrable: None,
        }
    }

    #[must_use]
    pub fn on_delete(mut self, action: impl Into<String>) -> Self {
        self.on_delete = Some(action.into());
        self
    }

    #[must_use]
    pub fn on_update(mut self, action: impl Into<String>) -> Self {
        self.on_update = Some(action.into());
        self
    }
}

/// Full shape of a table, as far as the builder needs it to synthesize inverses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub path: TablePath,
    pub columns: Vec<TableColumn>,
    pub indices: Vec<TableIndex>,
    pub foreign_keys: Vec<TableForeignKey>,
    pub uniques: Vec<TableUnique>,
    pub checks: Vec<TableCheck>,
    pub exclusions: Vec<TableExclusion>,
    /// Name of the primary key constraint, when known
    pub primary_key_name: Option<String>,
    pub comment: Option<String>,
}

impl Table {
    #[must_use]
    pub fn new(path: TablePath) -> Self {
        Self {
            path,
            columns: Vec::new(),
            indices: Vec::new(),
            foreign_keys: Vec::new(),
            uniques: Vec::new(),
            checks: Vec::new(),
            exclusions: Vec::new(),
            primary_key_name: None,
            comment: None,
        }
    }

    #[must_use]
    pub fn column(mut self, column: TableColumn) -> Self {
        self.columns.push(column);
        self
    }

    #[must_use]
    pub fn index(mut self, index: TableIndex) -> Self {
        self.indices.push(index);
        self
    }

    #[must_use]
    pub fn foreign_key(mut self, foreign_key: TableForeignKey) -> Self {
        self.foreign_keys.push(foreign_key);
        self
    }

    #[must_use]
    pub fn unique(mut self, unique: TableUnique) -> Self {
        self.uniques.push(unique);
        self
    }

    #[must_use]
    pub fn check(mut self, check: TableCheck) -> Self {
        self.checks.push(check);
        self
    }

    #[must_use]
    pub fn exclusion(mut self, exclusion: TableExclusion) -> Self {
        self.exclusions.push(exclusion);
        self
    }

    #[must_use]
    pub fn primary_key_name(mut self, name: impl Into<String>) -> Self {
        self.primary_key_name = Some(name.into());
        self
    }

    #[must_use]
    pub fn find_column(&self, name: &str) -> Option<&TableColumn> {
        self.columns.iter().find(|c| c.name == name)
    }

    #[must_use]
    pub fn primary_columns(&self) -> Vec<String> {
        self.columns
            .iter()
            .filter(|c| c.is_primary)
            .map(|c| c.name.clone())
            .collect()
    }
}

/// A plain or materialized view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct View {
    pub path: TablePath,
    /// The `SELECT` the view is defined by
    pub expression: String,
    pub materialized: bool,
}

impl View {
    #[must_use]
    pub fn new(path: TablePath, expression: impl Into<String>) -> Self {
        Self {
            path,
            expression: expression.into(),
            materialized: false,
        }
    }

    #[must_use]
    pub fn materialized(mut self) -> Self {
        self.materialized = true;
        self
    }
}
