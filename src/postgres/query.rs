use std::sync::{Arc, LazyLock};

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;
use serde_json::Value;
use tokio_postgres::error::ErrorPosition;
use tokio_postgres::{Column, Row};

use crate::error::DriverError;
use crate::results::ResultRow;
use crate::types::RowValues;

static COMMAND_VERB: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^\s*(?:--[^\n]*\n\s*)*([A-Za-z]+)").ok());

/// Command tag of `sql`, taken from its leading keyword.
///
/// The extended protocol reports only a row count, so the verb is read off the
/// statement text instead.
#[must_use]
pub fn command_tag(sql: &str) -> Option<String> {
    let regex = COMMAND_VERB.as_ref()?;
    regex
        .captures(sql)
        .and_then(|caps| caps.get(1))
        .map(|verb| verb.as_str().to_ascii_uppercase())
}

/// Convert the rows of one statement, sharing a single column-name list.
///
/// # Errors
/// Returns a `DriverError` if a value cannot be decoded.
pub fn build_rows(columns: &[Column], rows: &[Row]) -> Result<Vec<ResultRow>, DriverError> {
    let column_names = Arc::new(
        columns
            .iter()
            .map(|col| col.name().to_string())
            .collect::<Vec<_>>(),
    );
    let mut result = Vec::with_capacity(rows.len());
    for row in rows {
        let mut values = Vec::with_capacity(column_names.len());
        for idx in 0..column_names.len() {
            values.push(postgres_extract_value(row, idx)?);
        }
        result.push(ResultRow::new(Arc::clone(&column_names), values));
    }
    Ok(result)
}

/// Extracts a `RowValues` from a `tokio_postgres` Row at the given index.
///
/// # Errors
/// Returns `DriverError` if the column cannot be retrieved.
pub fn postgres_extract_value(row: &Row, idx: usize) -> Result<RowValues, DriverError> {
    let type_info = row.columns()[idx].type_();

    let value = match type_info.name() {
        "int2" => row.try_get::<_, Option<i16>>(idx)?.map(|v| RowValues::Int(i64::from(v))),
        "int4" => row.try_get::<_, Option<i32>>(idx)?.map(|v| RowValues::Int(i64::from(v))),
        "int8" => row.try_get::<_, Option<i64>>(idx)?.map(RowValues::Int),
        "float4" => row
            .try_get::<_, Option<f32>>(idx)?
            .map(|v| RowValues::Float(f64::from(v))),
        "float8" => row.try_get::<_, Option<f64>>(idx)?.map(RowValues::Float),
        "bool" => row.try_get::<_, Option<bool>>(idx)?.map(RowValues::Bool),
        "timestamp" => row
            .try_get::<_, Option<NaiveDateTime>>(idx)?
            .map(RowValues::Timestamp),
        "timestamptz" => row
            .try_get::<_, Option<DateTime<Utc>>>(idx)?
            .map(|v| RowValues::Timestamp(v.naive_utc())),
        "date" => row
            .try_get::<_, Option<NaiveDate>>(idx)?
            .and_then(|v| v.and_hms_opt(0, 0, 0))
            .map(RowValues::Timestamp),
        "json" | "jsonb" => row.try_get::<_, Option<Value>>(idx)?.map(RowValues::JSON),
        "bytea" => row.try_get::<_, Option<Vec<u8>>>(idx)?.map(RowValues::Blob),
        // text-like types, and anything else the server can hand over as a string
        _ => row.try_get::<_, Option<String>>(idx)?.map(RowValues::Text),
    };
    Ok(value.unwrap_or(RowValues::Null))
}

/// Keep every diagnostic field the server sent.
impl From<tokio_postgres::Error> for DriverError {
    fn from(err: tokio_postgres::Error) -> Self {
        let Some(db) = err.as_db_error() else {
            return DriverError {
                message: err.to_string(),
                code: err.code().map(|code| code.code().to_string()),
                ..DriverError::default()
            };
        };
        DriverError {
            message: db.message().to_string(),
            code: Some(db.code().code().to_string()),
            severity: Some(db.severity().to_string()),
            detail: db.detail().map(str::to_string),
            hint: db.hint().map(str::to_string),
            position: db.position().map(|position| match position {
                ErrorPosition::Original(n) => n.to_string(),
                ErrorPosition::Internal { position, .. } => position.to_string(),
            }),
            where_: db.where_().map(str::to_string),
            schema: db.schema().map(str::to_string),
            table: db.table().map(str::to_string),
            column: db.column().map(str::to_string),
            data_type: db.datatype().map(str::to_string),
            constraint: db.constraint().map(str::to_string),
            routine: db.routine().map(str::to_string),
        }
    }
}
