use std::sync::Arc;

use tracing::debug;

use super::Postgres;
use super::config::validate_search_path;
use super::params::Params;
use super::query::{ExecResultCompat, Row, RowCompat, RowsCompat};
use super::statement::StmtCompat;
use crate::context::Context;
use crate::error::PgCompatError;
use crate::pool::Backend;
use crate::types::RowValues;

impl Postgres {
    /// Run a query and stream its rows.
    ///
    /// The returned stream keeps its connection checked out until it is
    /// exhausted, closed or dropped.
    ///
    /// # Errors
    /// Returns checkout, driver, cancellation or deadline errors.
    pub async fn query(
        &self,
        ctx: &Context,
        sql: &str,
        params: &[RowValues],
    ) -> Result<RowsCompat, PgCompatError> {
        self.traced(
            sql,
            ctx.run(async {
                let conn = Arc::new(self.conn().await?);
                RowsCompat::open(ctx, conn, sql, params).await
            }),
        )
        .await
    }

    /// Run a query and hand each row to `f`, stopping at the first error.
    ///
    /// ```rust,no_run
    /// use pg_compat_middleware::prelude::*;
    ///
    /// # async fn demo(db: Postgres) -> Result<(), PgCompatError> {
    /// let ctx = Context::background();
    /// let mut names = Vec::new();
    /// db.run_query(
    ///     &ctx,
    ///     "SELECT name FROM users WHERE active = $1",
    ///     |row| {
    ///         names.push(row.get::<_, String>(0)?);
    ///         Ok(())
    ///     },
    ///     &[RowValues::Bool(true)],
    /// )
    /// .await?;
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// # Errors
    /// Returns the query error or the first error from `f`.
    pub async fn run_query<F>(
        &self,
        ctx: &Context,
        sql: &str,
        mut f: F,
        params: &[RowValues],
    ) -> Result<(), PgCompatError>
    where
        F: FnMut(&Row) -> Result<(), PgCompatError>,
    {
        let mut rows = self.query(ctx, sql, params).await?;
        let result = loop {
            match rows.next().await {
                Ok(Some(row)) => {
                    if let Err(err) = f(&row) {
                        break Err(err);
                    }
                }
                Ok(None) => break Ok(()),
                Err(err) => break Err(err),
            }
        };
        rows.close();
        result
    }

    /// Run a query expected to return one row. Errors surface when the row is read.
    pub async fn query_row(&self, ctx: &Context, sql: &str, params: &[RowValues]) -> RowCompat {
        let row = async {
            let mut rows = self.query(ctx, sql, params).await?;
            let first = rows.next().await?;
            rows.close();
            first.ok_or(PgCompatError::NoRows)
        }
        .await;
        RowCompat::new(row)
    }

    /// Execute a statement that returns no rows.
    ///
    /// # Errors
    /// Returns checkout, driver, cancellation or deadline errors.
    pub async fn exec(
        &self,
        ctx: &Context,
        sql: &str,
        params: &[RowValues],
    ) -> Result<ExecResultCompat, PgCompatError> {
        self.traced(
            sql,
            ctx.run(async {
                let conn = self.conn().await?;
                let converted = Params::convert(params);
                let rows_affected = conn.client()?.execute(sql, converted.as_refs()).await?;
                Ok(ExecResultCompat { rows_affected })
            }),
        )
        .await
    }

    /// Execute one or more `;`-separated statements without parameters.
    ///
    /// # Errors
    /// Returns checkout, driver, cancellation or deadline errors.
    pub async fn exec_batch(&self, ctx: &Context, sql: &str) -> Result<(), PgCompatError> {
        self.traced(
            sql,
            ctx.run(async {
                let conn = self.conn().await?;
                conn.client()?.batch_execute(sql).await?;
                Ok(())
            }),
        )
        .await
    }

    /// Prepare `sql` for repeated use.
    ///
    /// On the pool backend the statement stays logical and runs on whichever
    /// pooled connection is free. On the standard backend, and inside a
    /// transaction, it is prepared on one connection that the statement keeps.
    ///
    /// # Errors
    /// Returns checkout, driver, cancellation or deadline errors.
    pub async fn prepare(&self, ctx: &Context, sql: &str) -> Result<StmtCompat, PgCompatError> {
        if !self.in_transaction() && matches!(self.inner.backend, Backend::Pool(_)) {
            return Ok(StmtCompat::logical(self.clone(), sql));
        }
        self.traced(
            sql,
            ctx.run(async {
                let conn = Arc::new(self.conn().await?);
                let statement = conn.client()?.prepare(sql).await?;
                Ok(StmtCompat::prepared(conn, statement, sql, self.query_tracer()))
            }),
        )
        .await
    }

    /// Check that the server answers.
    ///
    /// # Errors
    /// Returns checkout, driver, cancellation or deadline errors.
    pub async fn ping(&self, ctx: &Context) -> Result<(), PgCompatError> {
        ctx.run(async {
            let conn = self.conn().await?;
            conn.client()?.simple_query("SELECT 1").await?;
            Ok(())
        })
        .await
    }

    /// Issue `SET search_path TO <schema>` and remember the new path.
    ///
    /// The stored path only changes when the statement succeeds.
    ///
    /// # Errors
    /// Returns `ConfigError` for an invalid schema list, or the statement's error.
    pub async fn set_default_search_path(
        &self,
        ctx: &Context,
        schema: &str,
    ) -> Result<(), PgCompatError> {
        validate_search_path(schema)?;
        self.exec_batch(ctx, &format!("SET search_path TO {schema}"))
            .await?;
        self.store_search_path(schema);
        debug!(search_path = %schema, "search path updated");
        Ok(())
    }
}
