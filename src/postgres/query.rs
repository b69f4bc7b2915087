use std::pin::Pin;
use std::sync::Arc;

use chrono::NaiveDateTime;
use futures_util::StreamExt;
use serde_json::Value;
use tokio_postgres::row::RowIndex;
use tokio_postgres::types::FromSql;
use tokio_postgres::{Column, RowStream, ToStatement};

use crate::context::Context;
use crate::error::PgCompatError;
use crate::pool::Conn;
use crate::types::RowValues;

/// One result row.
#[derive(Debug)]
pub struct Row(tokio_postgres::Row);

impl Row {
    /// Typed column access by position or name.
    ///
    /// # Errors
    /// Returns the driver error for an unknown column or a type mismatch.
    pub fn get<'a, I, T>(&'a self, idx: I) -> Result<T, PgCompatError>
    where
        I: RowIndex + std::fmt::Display,
        T: FromSql<'a>,
    {
        Ok(self.0.try_get(idx)?)
    }

    #[must_use]
    pub fn columns(&self) -> &[Column] {
        self.0.columns()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Column `idx` as a [`RowValues`].
    ///
    /// # Errors
    /// Returns `ExecutionError` for an out-of-range index, or the driver error.
    pub fn value(&self, idx: usize) -> Result<RowValues, PgCompatError> {
        extract_value(&self.0, idx)
    }

    /// Every column as a [`RowValues`], in order.
    ///
    /// # Errors
    /// Returns the first conversion failure.
    pub fn values(&self) -> Result<Vec<RowValues>, PgCompatError> {
        (0..self.0.len()).map(|idx| self.value(idx)).collect()
    }

    #[must_use]
    pub fn into_inner(self) -> tokio_postgres::Row {
        self.0
    }
}

/// Extracts a `RowValues` from a `tokio_postgres` Row at the given index.
///
/// # Errors
/// Returns `PgCompatError` if the column cannot be retrieved.
pub fn extract_value(row: &tokio_postgres::Row, idx: usize) -> Result<RowValues, PgCompatError> {
    let Some(column) = row.columns().get(idx) else {
        return Err(PgCompatError::ExecutionError(format!(
            "column index {idx} out of range"
        )));
    };

    match column.type_().name() {
        "int2" => {
            let val: Option<i16> = row.try_get(idx)?;
            Ok(val.map_or(RowValues::Null, |v| RowValues::Int(i64::from(v))))
        }
        "int4" => {
            let val: Option<i32> = row.try_get(idx)?;
            Ok(val.map_or(RowValues::Null, |v| RowValues::Int(i64::from(v))))
        }
        "int8" => {
            let val: Option<i64> = row.try_get(idx)?;
            Ok(val.map_or(RowValues::Null, RowValues::Int))
        }
        "float4" => {
            let val: Option<f32> = row.try_get(idx)?;
            Ok(val.map_or(RowValues::Null, |v| RowValues::Float(f64::from(v))))
        }
        "float8" => {
            let val: Option<f64> = row.try_get(idx)?;
            Ok(val.map_or(RowValues::Null, RowValues::Float))
        }
        "bool" => {
            let val: Option<bool> = row.try_get(idx)?;
            Ok(val.map_or(RowValues::Null, RowValues::Bool))
        }
        "timestamp" => {
            let val: Option<NaiveDateTime> = row.try_get(idx)?;
            Ok(val.map_or(RowValues::Null, RowValues::Timestamp))
        }
        "timestamptz" => {
            let val: Option<chrono::DateTime<chrono::Utc>> = row.try_get(idx)?;
            Ok(val.map_or(RowValues::Null, |v| RowValues::Timestamp(v.naive_utc())))
        }
        "json" | "jsonb" => {
            let val: Option<Value> = row.try_get(idx)?;
            Ok(val.map_or(RowValues::Null, RowValues::JSON))
        }
        "bytea" => {
            let val: Option<Vec<u8>> = row.try_get(idx)?;
            Ok(val.map_or(RowValues::Null, RowValues::Blob))
        }
        // text, varchar, bpchar, name and anything else that decodes as a string
        _ => {
            let val: Option<String> = row.try_get(idx)?;
            Ok(val.map_or(RowValues::Null, RowValues::Text))
        }
    }
}

/// Forward-only stream of rows.
///
/// Holds the connection the query ran on until the stream is exhausted,
/// fails, is closed, or is dropped.
pub struct RowsCompat {
    stream: Option<Pin<Box<RowStream>>>,
    conn: Option<Arc<Conn>>,
    ctx: Context,
    rows_affected: Option<u64>,
}

impl std::fmt::Debug for RowsCompat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowsCompat")
            .field("open", &self.stream.is_some())
            .field("conn", &self.conn)
            .field("rows_affected", &self.rows_affected)
            .finish()
    }
}

impl RowsCompat {
    pub(crate) async fn open<T>(
        ctx: &Context,
        conn: Arc<Conn>,
        statement: &T,
        params: &[RowValues],
    ) -> Result<Self, PgCompatError>
    where
        T: ?Sized + ToStatement,
    {
        let stream = conn.client()?.query_raw(statement, params.iter()).await?;
        Ok(Self {
            stream: Some(Box::pin(stream)),
            conn: Some(conn),
            ctx: ctx.clone(),
            rows_affected: None,
        })
    }

    /// Next row, or `None` once the result set is exhausted.
    ///
    /// # Errors
    /// Returns the driver error, `Cancelled` or `DeadlineExceeded`. A driver
    /// error also closes the stream.
    pub async fn next(&mut self) -> Result<Option<Row>, PgCompatError> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(None);
        };
        let item = self.ctx.run(async { Ok(stream.next().await) }).await?;
        match item {
            Some(Ok(row)) => Ok(Some(Row(row))),
            Some(Err(err)) => {
                self.close();
                Err(err.into())
            }
            None => {
                self.rows_affected = stream.rows_affected();
                self.close();
                Ok(None)
            }
        }
    }

    /// Collect the remaining rows.
    ///
    /// # Errors
    /// Returns the first error from [`RowsCompat::next`].
    pub async fn collect(mut self) -> Result<Vec<Row>, PgCompatError> {
        let mut rows = Vec::new();
        while let Some(row) = self.next().await? {
            rows.push(row);
        }
        Ok(rows)
    }

    /// Release the stream and its connection. Safe to call more than once.
    pub fn close(&mut self) {
        self.stream = None;
        self.conn = None;
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.stream.is_none()
    }

    /// Rows reported by the server; known once the stream is exhausted.
    #[must_use]
    pub fn rows_affected(&self) -> Option<u64> {
        self.rows_affected
    }
}

/// Result of a single-row query. Any error is held until the row is read.
#[derive(Debug)]
pub struct RowCompat {
    row: Result<Row, PgCompatError>,
}

impl RowCompat {
    pub(crate) fn new(row: Result<Row, PgCompatError>) -> Self {
        Self { row }
    }

    #[must_use]
    pub fn err(&self) -> Option<&PgCompatError> {
        self.row.as_ref().err()
    }

    /// The row itself.
    ///
    /// # Errors
    /// Returns `NoRows` when the query matched nothing, or the query's error.
    pub fn scan(self) -> Result<Row, PgCompatError> {
        self.row
    }

    /// Typed read of one column.
    ///
    /// # Errors
    /// Returns the deferred query error or the column conversion error.
    pub fn get<I, T>(self, idx: I) -> Result<T, PgCompatError>
    where
        I: RowIndex + std::fmt::Display,
        T: for<'a> FromSql<'a>,
    {
        let row = self.row?;
        row.get(idx)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecResultCompat {
    pub rows_affected: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_compat_defers_errors() {
        let row = RowCompat::new(Err(PgCompatError::NoRows));
        assert!(matches!(row.err(), Some(PgCompatError::NoRows)));
        assert!(matches!(
            row.get::<_, i64>(0),
            Err(PgCompatError::NoRows)
        ));
    }
}
