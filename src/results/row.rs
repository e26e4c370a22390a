use std::sync::Arc;

use crate::types::RowValues;

/// A row from a database query result
///
/// Column names are shared by all rows of one result, values are positional.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRow {
    /// The column names for this row (shared across all rows in a result set)
    pub column_names: Arc<Vec<String>>,
    /// The values for this row
    pub values: Vec<RowValues>,
}

impl ResultRow {
    /// Create a new database row
    ///
    /// # Arguments
    ///
    /// * `column_names` - The column names
    /// * `values` - The values for this row, in column order
    #[must_use]
    pub fn new(column_names: Arc<Vec<String>>, values: Vec<RowValues>) -> Self {
        Self {
            column_names,
            values,
        }
    }

    /// Get the index of a column by name
    #[must_use]
    pub fn get_column_index(&self, column_name: &str) -> Option<usize> {
        self.column_names.iter().position(|col| col == column_name)
    }

    /// Get a value from the row by column name
    ///
    /// # Returns
    ///
    /// The value at the column, or None if the column wasn't found
    #[must_use]
    pub fn get(&self, column_name: &str) -> Option<&RowValues> {
        self.get_column_index(column_name)
            .and_then(|idx| self.values.get(idx))
    }

    /// Get a value from the row by column index
    #[must_use]
    pub fn get_by_index(&self, index: usize) -> Option<&RowValues> {
        self.values.get(index)
    }
}

/// Build rows that share one column-name list.
pub fn rows_from_values(columns: &[&str], values: Vec<Vec<RowValues>>) -> Vec<ResultRow> {
    let names = Arc::new(columns.iter().map(|c| (*c).to_string()).collect::<Vec<_>>());
    values
        .into_iter()
        .map(|row| ResultRow::new(names.clone(), row))
        .collect()
}
