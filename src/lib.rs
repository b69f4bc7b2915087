//! One async PostgreSQL client over two backends.
//!
//! [`Postgres`] runs queries, executions, prepared statements, transactions
//! and schema forks the same way whether it sits on a `deadpool-postgres`
//! pool (`driver = "deadpool"`) or on a bb8 pool of standard
//! `tokio_postgres` clients (`driver = "postgres"`, alias `"libpq"`).
//!
//! ```rust,no_run
//! use pg_compat_middleware::prelude::*;
//!
//! # async fn demo() -> Result<(), PgCompatError> {
//! let mut cfg = ConnectConfig::new(Driver::Postgres);
//! cfg.username = "app".into();
//! cfg.password = "secret".into();
//! cfg.host = "localhost".into();
//! cfg.port = "5432".into();
//! cfg.dbname = "app".into();
//!
//! let ctx = Context::background();
//! let db = Postgres::connect(&ctx, cfg).await?;
//! let count: i64 = db
//!     .query_row(&ctx, "SELECT count(*) FROM users", &[])
//!     .await
//!     .get(0)?;
//! println!("{count} users");
//! db.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod context;
pub mod dsn;
pub mod error;
pub mod pool;
pub mod postgres;
pub mod prelude;
pub mod tracer;
pub mod types;

#[cfg(feature = "test-utils")]
pub mod test_utils;

pub use context::Context;
pub use error::PgCompatError;
pub use postgres::{
    ConnectConfig, ExecResultCompat, IsolationLevel, Postgres, Row, RowCompat, RowsCompat,
    StmtCompat, TransactCompat, Transaction,
};
pub use tracer::{DbInfo, SpanTracer, Tracer};
pub use types::{Driver, RowValues};
