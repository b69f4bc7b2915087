use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use super::{Origin, Postgres};
use crate::context::Context;
use crate::error::PgCompatError;
use crate::types::RowValues;

/// Installs `clone_schema(source text, dest text)`.
const CLONE_SCHEMA_SQL: &str = include_str!("../../sql/clone_schema.sql");

impl Postgres {
    /// Release the backend. Later calls return `Ok(())` without doing anything.
    ///
    /// A forked client also drops its schema, through the client it was
    /// forked from when that one is still open and through a short-lived
    /// connection otherwise. Cleanup failures are logged, not returned.
    ///
    /// # Errors
    /// Backend shutdown cannot fail on either pool, so this returns `Ok(())`.
    #[allow(clippy::unnecessary_wraps)]
    pub async fn close(&self) -> Result<(), PgCompatError> {
        if self.in_transaction() {
            warn!("close called on a transaction-scoped client; ignoring");
            return Ok(());
        }

        if !self.release().await {
            return Ok(());
        }
        if let Some(origin) = &self.inner.origin {
            self.drop_fork_schema(origin).await;
        }
        Ok(())
    }

    /// Close the backend once. Returns false if it was already closed.
    async fn release(&self) -> bool {
        let mut closed = self.inner.closed.lock().await;
        if *closed {
            return false;
        }
        self.inner.backend.close();
        *closed = true;
        debug!(driver = %self.backend_kind(), "postgres client closed");
        true
    }

    async fn drop_fork_schema(&self, origin: &Origin) {
        let schema = &origin.schema;
        let sql = drop_schema_sql(schema);
        let ctx = Context::background();

        if let Some(inner) = origin.conn.upgrade() {
            let parent = Postgres { inner };
            if !parent.is_closed().await {
                match parent.exec_batch(&ctx, &sql).await {
                    Ok(()) => debug!(schema = %schema, "fork schema dropped"),
                    Err(e) => warn!(schema = %schema, error = %e, "failed to drop fork schema"),
                }
                return;
            }
        }

        let mut config = origin.config.clone();
        config.tracer = None;
        match Postgres::connect(&ctx, config).await {
            Ok(temp) => {
                match temp.exec_batch(&ctx, &sql).await {
                    Ok(()) => debug!(schema = %schema, "fork schema dropped via temporary client"),
                    Err(e) => warn!(schema = %schema, error = %e, "failed to drop fork schema"),
                }
                temp.release().await;
            }
            Err(e) => warn!(
                schema = %schema,
                error = %e,
                "could not connect to drop fork schema"
            ),
        }
    }

    /// Copy the first schema of the search path into a new `fork_<uuid>`
    /// schema and return a client that uses it.
    ///
    /// Closing the returned client drops the schema again. Forks of forks
    /// share the one-time installation of the cloning function.
    ///
    /// # Errors
    /// Returns `AlreadyInTransaction` on a transaction-scoped client, or the
    /// error of installing the cloning function, cloning, or connecting.
    pub async fn fork(&self, ctx: &Context) -> Result<Postgres, PgCompatError> {
        if self.in_transaction() {
            return Err(PgCompatError::AlreadyInTransaction);
        }

        self.inner
            .clone_once
            .get_or_try_init(|| async { self.exec_batch(ctx, CLONE_SCHEMA_SQL).await })
            .await?;

        let source = self
            .search_path()
            .into_iter()
            .next()
            .unwrap_or_else(|| "public".to_string());
        let source = source.trim_matches('"').to_string();
        let schema = format!("fork_{}", Uuid::new_v4().simple());

        self.exec(
            ctx,
            "SELECT clone_schema($1, $2)",
            &[RowValues::Text(source.clone()), RowValues::Text(schema.clone())],
        )
        .await?;

        let mut config = self.inner.config.clone();
        config.search_path = schema.clone();
        let origin = Origin {
            conn: Arc::downgrade(&self.inner),
            config: self.inner.config.clone(),
            schema: schema.clone(),
        };

        match Postgres::open(ctx, config, Some(origin), Arc::clone(&self.inner.clone_once)).await {
            Ok(fork) => {
                debug!(source = %source, schema = %schema, "fork created");
                Ok(fork)
            }
            Err(err) => {
                let drop_sql = drop_schema_sql(&schema);
                if let Err(e) = self.exec_batch(&Context::background(), &drop_sql).await {
                    warn!(schema = %schema, error = %e, "failed to drop schema of failed fork");
                }
                Err(err)
            }
        }
    }
}

/// `DROP SCHEMA "<name>" CASCADE` with the name quoted as an identifier.
fn drop_schema_sql(schema: &str) -> String {
    format!("DROP SCHEMA IF EXISTS \"{}\" CASCADE", schema.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::drop_schema_sql;

    #[test]
    fn drop_schema_sql_quotes_the_name() {
        assert_eq!(
            drop_schema_sql("fork_0a1b"),
            r#"DROP SCHEMA IF EXISTS "fork_0a1b" CASCADE"#
        );
        assert_eq!(
            drop_schema_sql(r#"odd"name"#),
            r#"DROP SCHEMA IF EXISTS "odd""name" CASCADE"#
        );
    }
}
