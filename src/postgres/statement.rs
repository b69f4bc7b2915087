use std::sync::Arc;

use tokio_postgres::Statement;

use super::Postgres;
use super::params::Params;
use super::query::{ExecResultCompat, RowCompat, RowsCompat};
use crate::context::Context;
use crate::error::PgCompatError;
use crate::pool::Conn;
use crate::tracer::QueryTracer;
use crate::types::RowValues;

/// A statement returned by [`Postgres::prepare`].
pub struct StmtCompat {
    sql: String,
    kind: StmtKind,
}

enum StmtKind {
    /// Pool backend: SQL re-issued through the client on each use.
    Logical(Postgres),
    /// Prepared on `conn`, which stays checked out for the statement's lifetime.
    Prepared {
        conn: Arc<Conn>,
        statement: Statement,
        tracer: Option<QueryTracer>,
    },
}

impl std::fmt::Debug for StmtCompat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match &self.kind {
            StmtKind::Logical(_) => "logical",
            StmtKind::Prepared { .. } => "prepared",
        };
        f.debug_struct("StmtCompat")
            .field("sql", &self.sql)
            .field("kind", &kind)
            .finish()
    }
}

impl StmtCompat {
    pub(crate) fn logical(db: Postgres, sql: &str) -> Self {
        Self {
            sql: sql.to_string(),
            kind: StmtKind::Logical(db),
        }
    }

    pub(crate) fn prepared(
        conn: Arc<Conn>,
        statement: Statement,
        sql: &str,
        tracer: Option<QueryTracer>,
    ) -> Self {
        Self {
            sql: sql.to_string(),
            kind: StmtKind::Prepared {
                conn,
                statement,
                tracer,
            },
        }
    }

    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    #[must_use]
    pub fn is_prepared(&self) -> bool {
        matches!(self.kind, StmtKind::Prepared { .. })
    }

    /// # Errors
    /// Returns driver, cancellation or deadline errors.
    pub async fn query(
        &self,
        ctx: &Context,
        params: &[RowValues],
    ) -> Result<RowsCompat, PgCompatError> {
        match &self.kind {
            StmtKind::Logical(db) => db.query(ctx, &self.sql, params).await,
            StmtKind::Prepared {
                conn,
                statement,
                tracer,
            } => {
                let fut = ctx.run(RowsCompat::open(ctx, Arc::clone(conn), statement, params));
                match tracer {
                    Some(tracer) => tracer.trace(&self.sql, fut).await,
                    None => fut.await,
                }
            }
        }
    }

    /// Errors surface when the row is read.
    pub async fn query_row(&self, ctx: &Context, params: &[RowValues]) -> RowCompat {
        let row = async {
            let mut rows = self.query(ctx, params).await?;
            let first = rows.next().await?;
            rows.close();
            first.ok_or(PgCompatError::NoRows)
        }
        .await;
        RowCompat::new(row)
    }

    /// # Errors
    /// Returns driver, cancellation or deadline errors.
    pub async fn exec(
        &self,
        ctx: &Context,
        params: &[RowValues],
    ) -> Result<ExecResultCompat, PgCompatError> {
        match &self.kind {
            StmtKind::Logical(db) => db.exec(ctx, &self.sql, params).await,
            StmtKind::Prepared {
                conn,
                statement,
                tracer,
            } => {
                let fut = ctx.run(async {
                    let converted = Params::convert(params);
                    let rows_affected = conn.client()?.execute(statement, converted.as_refs()).await?;
                    Ok(ExecResultCompat { rows_affected })
                });
                match tracer {
                    Some(tracer) => tracer.trace(&self.sql, fut).await,
                    None => fut.await,
                }
            }
        }
    }
}
