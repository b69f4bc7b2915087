//! Convenient imports for common functionality.
//!
//! This module re-exports the most commonly used types and functions
//! to make it easier to get started with the library.

pub use crate::context::Context;
pub use crate::dsn::parse_dsn;
pub use crate::error::PgCompatError;
pub use crate::postgres::{
    ConnectConfig, ExecResultCompat, IsolationLevel, Postgres, Row, RowCompat, RowsCompat,
    StmtCompat, Transaction,
};
pub use crate::tracer::{DbInfo, SpanTracer, Tracer};
pub use crate::types::{Driver, RowValues};
